//! Common status codes and grid geometry shared by the tile cache builders

mod geometry;
mod math;
mod status;

pub use geometry::*;
pub use math::*;
pub use status::*;
