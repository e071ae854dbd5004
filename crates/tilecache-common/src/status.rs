//! Status codes for tile cache build operations

/// Result type for tile cache operations
pub type Result<T> = std::result::Result<T, Status>;

/// High-level failure bit of a packed status word
pub const FAILURE_BITS: u32 = 1 << 31;
/// High-level success bit of a packed status word
pub const SUCCESS_BITS: u32 = 1 << 30;
/// Detail bit: input data is not recognized
pub const WRONG_MAGIC_BITS: u32 = 1 << 0;
/// Detail bit: input data is in wrong version
pub const WRONG_VERSION_BITS: u32 = 1 << 1;
/// Detail bit: operation ran out of memory
pub const OUT_OF_MEMORY_BITS: u32 = 1 << 2;
/// Detail bit: an input parameter was invalid
pub const INVALID_PARAM_BITS: u32 = 1 << 3;
/// Detail bit: result buffer was too small to store all results
pub const BUFFER_TOO_SMALL_BITS: u32 = 1 << 4;
/// Mask of all detail bits
pub const STATUS_DETAIL_MASK: u32 = 0x0ff_ffff;

/// Failure reasons reported by the tile cache builders.
///
/// Success is expressed as `Ok(..)`; every variant here is a failure that
/// aborts the remaining stages for the tile being built.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// An allocation was refused by the allocator or the heap
    #[error("out of memory")]
    OutOfMemory,
    /// A fixed-capacity buffer was too small for the input tile
    #[error("buffer too small")]
    BufferTooSmall,
    /// Serialized data does not start with the expected magic number
    #[error("wrong magic number")]
    WrongMagic,
    /// Serialized data has an unsupported format version
    #[error("wrong version")]
    WrongVersion,
    /// A parameter was missing or nonsensical
    #[error("invalid parameter")]
    InvalidParam,
    /// Compressor failure or corrupted payload
    #[error("operation failed")]
    Failure,
}

impl Status {
    /// Returns the packed status word for this failure.
    pub fn to_bits(self) -> u32 {
        let detail = match self {
            Status::OutOfMemory => OUT_OF_MEMORY_BITS,
            Status::BufferTooSmall => BUFFER_TOO_SMALL_BITS,
            Status::WrongMagic => WRONG_MAGIC_BITS,
            Status::WrongVersion => WRONG_VERSION_BITS,
            Status::InvalidParam => INVALID_PARAM_BITS,
            Status::Failure => 0,
        };
        FAILURE_BITS | detail
    }

    /// Decodes a packed status word.
    ///
    /// Returns `Ok(())` for a success word. Unknown detail bits on a failure
    /// word decode to [`Status::Failure`].
    pub fn from_bits(bits: u32) -> Result<()> {
        if bits & FAILURE_BITS == 0 {
            return Ok(());
        }
        let detail = bits & STATUS_DETAIL_MASK;
        let status = if detail & OUT_OF_MEMORY_BITS != 0 {
            Status::OutOfMemory
        } else if detail & BUFFER_TOO_SMALL_BITS != 0 {
            Status::BufferTooSmall
        } else if detail & WRONG_MAGIC_BITS != 0 {
            Status::WrongMagic
        } else if detail & WRONG_VERSION_BITS != 0 {
            Status::WrongVersion
        } else if detail & INVALID_PARAM_BITS != 0 {
            Status::InvalidParam
        } else {
            Status::Failure
        };
        Err(status)
    }

    /// Checks whether the failure can be retried with more resources
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Status::OutOfMemory | Status::BufferTooSmall)
    }
}

/// Converts a result into a packed status word.
pub fn status_bits<T>(result: &Result<T>) -> u32 {
    match result {
        Ok(_) => SUCCESS_BITS,
        Err(status) => status.to_bits(),
    }
}

impl From<std::io::Error> for Status {
    fn from(err: std::io::Error) -> Self {
        log::debug!("I/O error while reading tile cache data: {err}");
        Status::Failure
    }
}

impl From<std::collections::TryReserveError> for Status {
    fn from(_: std::collections::TryReserveError) -> Self {
        Status::OutOfMemory
    }
}
