//! Walkable polygon meshes from compressed tile cache layers
//!
//! A tile cache stores each navigation tile as one or more compressed 2.5D
//! layers. When obstacles change, a layer is decompressed, stamped with the
//! obstacle areas and rebuilt into a polygon mesh without touching the
//! original geometry.
//!
//! # Pipeline
//!
//! - [`decompress_tile_cache_layer`]: blob to [`TileCacheLayer`]
//! - [`mark_cylinder_area`], [`mark_box_area`], [`mark_convex_area`]: obstacles
//! - [`build_tile_cache_distance_field`] and [`build_tile_cache_regions`]
//!   (watershed), or [`build_tile_cache_regions_monotone`] and
//!   [`build_tile_cache_regions_chunky`]
//! - [`build_tile_cache_contours`]: simplified region outlines and clusters
//! - [`build_tile_cache_poly_mesh`]: convex polygons with adjacency
//! - [`build_tile_cache_clusters`]: polygon to cluster map
//! - [`build_tile_cache_poly_mesh_detail`]: height detail triangles
//!
//! [`TileCacheBuilder`] runs all of them with a [`TileCacheBuilderConfig`].
//!
//! # Example
//!
//! ```rust,ignore
//! use detour_tilecache::{
//!     BuildContext, HeapAllocator, Lz4Compressor, TileCacheBuilder, TileCacheBuilderConfig,
//!     TileCacheObstacle,
//! };
//! use glam::Vec3;
//!
//! let builder = TileCacheBuilder::new(TileCacheBuilderConfig::default());
//! let mut alloc = HeapAllocator::new();
//! let mut ctx = BuildContext::new();
//! let obstacle = TileCacheObstacle::cylinder(Vec3::new(10.0, 0.0, 10.0), 2.0, 4.0);
//! let result =
//!     builder.build_from_compressed(&mut alloc, &Lz4Compressor, &blob, &[obstacle], &mut ctx)?;
//! println!("{} polygons", result.mesh.npolys);
//! ```
//!
//! Every buffer is charged to a [`TileCacheAlloc`]. Failures are reported as
//! [`Status`] and abort the remaining stages for that layer.

pub mod alloc;
pub mod area;
pub mod cluster;
pub mod compressor;
pub mod config;
pub mod context;
pub mod contour;
pub mod detail_mesh;
pub mod distance_field;
pub mod monotone;
pub mod poly_mesh;
mod region;
pub mod tile_cache_builder;
pub mod tile_cache_data;
pub mod watershed;

#[cfg(test)]
mod pipeline_tests;
#[cfg(test)]
mod test_helpers;

pub use alloc::{
    alloc_buffer, alloc_with_capacity, free_buffer, HeapAllocator, LinearAllocator,
    TileCacheAlloc,
};
pub use area::{
    mark_box_area, mark_convex_area, mark_cylinder_area, replace_area, replace_box_area,
    replace_convex_area, replace_cylinder_area,
};
pub use cluster::{build_tile_cache_clusters, TileCacheClusterSet, TILECACHE_NULL_CLUSTER};
pub use compressor::{Lz4Compressor, PassthroughCompressor, TileCacheCompressor};
pub use config::{RegionPartitioning, TileCacheBuilderConfig};
pub use context::{BuildContext, LogEntry, LogLevel, TileCacheLogContext, TimerCategory};
pub use contour::{
    build_tile_cache_contours, TileCacheContour, TileCacheContourSet, CONTOUR_NO_PORTAL,
    CONTOUR_REMOVE_VERTEX,
};
pub use detail_mesh::{build_tile_cache_poly_mesh_detail, TileCachePolyMeshDetail};
pub use distance_field::{build_tile_cache_distance_field, TileCacheDistanceField};
pub use monotone::{build_tile_cache_regions_chunky, build_tile_cache_regions_monotone};
pub use poly_mesh::{build_tile_cache_poly_mesh, TileCachePolyMesh, TILECACHE_PORTAL_FLAG};
pub use tile_cache_builder::{
    ObstacleShape, TileCacheBuildResult, TileCacheBuilder, TileCacheObstacle,
};
pub use tile_cache_data::*;
pub use watershed::build_tile_cache_regions;

pub use tilecache_common::{Result, Status};
