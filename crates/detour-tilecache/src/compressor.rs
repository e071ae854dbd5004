//! Compression capability used by layer serialization

use tilecache_common::{Result, Status};

/// Compressor capability used to persist layer grids.
pub trait TileCacheCompressor {
    /// Upper bound of the compressed size for `buffer_size` input bytes
    fn max_compressed_size(&self, buffer_size: usize) -> usize;

    /// Compresses `src` into `dst`, returning the number of bytes written
    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize>;

    /// Decompresses `src` into `dst`, returning the number of bytes written
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize>;
}

/// LZ4 block compressor
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Compressor;

impl Lz4Compressor {
    pub fn new() -> Self {
        Self
    }
}

impl TileCacheCompressor for Lz4Compressor {
    fn max_compressed_size(&self, buffer_size: usize) -> usize {
        lz4_flex::block::get_maximum_output_size(buffer_size)
    }

    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        lz4_flex::block::compress_into(src, dst).map_err(|e| {
            log::error!("LZ4 compression of {} bytes failed: {e}", src.len());
            Status::BufferTooSmall
        })
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        lz4_flex::block::decompress_into(src, dst).map_err(|e| {
            log::error!("LZ4 decompression of {} bytes failed: {e}", src.len());
            Status::Failure
        })
    }
}

/// Stores the payload unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCompressor;

impl TileCacheCompressor for PassthroughCompressor {
    fn max_compressed_size(&self, buffer_size: usize) -> usize {
        buffer_size
    }

    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        let out = dst.get_mut(..src.len()).ok_or(Status::BufferTooSmall)?;
        out.copy_from_slice(src);
        Ok(src.len())
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        Ok(n)
    }
}
