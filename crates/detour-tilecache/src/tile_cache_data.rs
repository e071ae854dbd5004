//! Tile cache layer data structures and serialization
//!
//! A compressed layer blob is a fixed 60-byte header followed by the
//! compressed concatenation of the height, area and connectivity grids.
//! Regions are never persisted; they are rebuilt after decompression.
//!
//! | Field     | Written by                 | Read by                    |
//! |-----------|----------------------------|----------------------------|
//! | `heights` | decompression              | contours, detail mesh      |
//! | `areas`   | decompression, area marking| every stage                |
//! | `cons`    | decompression              | every stage                |
//! | `regs`    | region builders            | contours                   |

use crate::alloc::{alloc_buffer, free_buffer, TileCacheAlloc};
use crate::compressor::TileCacheCompressor;
use byteorder::{ByteOrder, NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use tilecache_common::{align4, Result, Status};

/// Magic number for tile cache layer data, `'DTLR'`
pub const TILECACHE_MAGIC: i32 =
    ((b'D' as i32) << 24) | ((b'T' as i32) << 16) | ((b'L' as i32) << 8) | (b'R' as i32);

/// Version number for tile cache layer data
pub const TILECACHE_VERSION: i32 = 1;

/// Area id of an unwalkable cell
pub const TILECACHE_NULL_AREA: u8 = 0;
/// Default area id of a walkable cell
pub const TILECACHE_WALKABLE_AREA: u8 = 63;
/// Sentinel for an unused vertex or polygon index
pub const TILECACHE_NULL_IDX: u16 = 0xffff;
/// Region id of a cell no region builder has visited yet
pub const TILECACHE_UNSET_REGION: u16 = 0xffff;

/// Maximum number of vertices per polygon in the built meshes
pub const MAX_VERTS_PER_POLY: usize = 6;

/// Serialized size of [`TileCacheLayerHeader`]
pub const TILECACHE_HEADER_SIZE: usize = 60;

/// Bytes per cell in the compressed payload: height (2), area (1), cons (1)
const PAYLOAD_BYTES_PER_CELL: usize = 4;

/// Tile cache layer header
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileCacheLayerHeader {
    /// Magic number for validation
    pub magic: i32,
    /// Version of the layer format
    pub version: i32,
    /// Tile position X
    pub tx: i32,
    /// Tile position Y
    pub ty: i32,
    /// Layer index within the tile
    pub tlayer: i32,
    /// Bounding box minimum
    pub bmin: [f32; 3],
    /// Bounding box maximum
    pub bmax: [f32; 3],
    /// Height range of the layer, in cells
    pub hmin: u16,
    pub hmax: u16,
    /// Grid width in cells
    pub width: u16,
    /// Grid height in cells
    pub height: u16,
    /// Usable sub-region of the grid
    pub minx: u16,
    pub maxx: u16,
    pub miny: u16,
    pub maxy: u16,
}

impl Default for TileCacheLayerHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl TileCacheLayerHeader {
    /// Creates an empty header carrying the current magic and version
    pub fn new() -> Self {
        Self {
            magic: TILECACHE_MAGIC,
            version: TILECACHE_VERSION,
            tx: 0,
            ty: 0,
            tlayer: 0,
            bmin: [0.0; 3],
            bmax: [0.0; 3],
            hmin: 0,
            hmax: 0,
            width: 0,
            height: 0,
            minx: 0,
            maxx: 0,
            miny: 0,
            maxy: 0,
        }
    }

    /// Number of cells in the layer grid
    pub fn grid_size(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Validates magic and version
    pub fn validate(&self) -> Result<()> {
        if self.magic != TILECACHE_MAGIC {
            return Err(Status::WrongMagic);
        }
        if self.version != TILECACHE_VERSION {
            return Err(Status::WrongVersion);
        }
        Ok(())
    }

    /// Appends the native-endian header to `out`
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        out.write_i32::<NativeEndian>(self.magic)?;
        out.write_i32::<NativeEndian>(self.version)?;
        out.write_i32::<NativeEndian>(self.tx)?;
        out.write_i32::<NativeEndian>(self.ty)?;
        out.write_i32::<NativeEndian>(self.tlayer)?;
        for v in self.bmin.iter().chain(self.bmax.iter()) {
            out.write_f32::<NativeEndian>(*v)?;
        }
        for v in [
            self.hmin,
            self.hmax,
            self.width,
            self.height,
            self.minx,
            self.maxx,
            self.miny,
            self.maxy,
        ] {
            out.write_u16::<NativeEndian>(v)?;
        }
        // Keep the payload 4-byte aligned.
        out.resize(start + align4(out.len() - start), 0);
        Ok(())
    }

    /// Reads a native-endian header without validating it
    pub fn read_from(data: &[u8]) -> Result<Self> {
        if data.len() < TILECACHE_HEADER_SIZE {
            return Err(Status::InvalidParam);
        }
        let mut cursor = Cursor::new(data);
        let magic = cursor.read_i32::<NativeEndian>()?;
        let version = cursor.read_i32::<NativeEndian>()?;
        let tx = cursor.read_i32::<NativeEndian>()?;
        let ty = cursor.read_i32::<NativeEndian>()?;
        let tlayer = cursor.read_i32::<NativeEndian>()?;
        let mut bmin = [0.0f32; 3];
        for item in &mut bmin {
            *item = cursor.read_f32::<NativeEndian>()?;
        }
        let mut bmax = [0.0f32; 3];
        for item in &mut bmax {
            *item = cursor.read_f32::<NativeEndian>()?;
        }
        let mut dims = [0u16; 8];
        for item in &mut dims {
            *item = cursor.read_u16::<NativeEndian>()?;
        }
        let [hmin, hmax, width, height, minx, maxx, miny, maxy] = dims;
        Ok(Self {
            magic,
            version,
            tx,
            ty,
            tlayer,
            bmin,
            bmax,
            hmin,
            hmax,
            width,
            height,
            minx,
            maxx,
            miny,
            maxy,
        })
    }
}

/// Decompressed layer: the mutable grid set one build works on.
#[derive(Debug, Clone)]
pub struct TileCacheLayer {
    pub header: TileCacheLayerHeader,
    /// Number of regions written into `regs`
    pub reg_count: usize,
    pub heights: Vec<u16>,
    pub areas: Vec<u8>,
    /// Low 4 bits: walkable connection per direction. High 4 bits: portal edges.
    pub cons: Vec<u8>,
    pub regs: Vec<u16>,
}

impl TileCacheLayer {
    /// Allocates zeroed grids for `header`, with every region unset.
    pub fn new(alloc: &mut dyn TileCacheAlloc, header: TileCacheLayerHeader) -> Result<Self> {
        let grid = header.grid_size();
        Ok(Self {
            header,
            reg_count: 0,
            heights: alloc_buffer(alloc, grid, 0)?,
            areas: alloc_buffer(alloc, grid, TILECACHE_NULL_AREA)?,
            cons: alloc_buffer(alloc, grid, 0)?,
            regs: alloc_buffer(alloc, grid, TILECACHE_UNSET_REGION)?,
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.header.width as usize
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.header.height as usize
    }

    /// Checks the walkable connection bit of cell `idx` towards `dir`
    #[inline]
    pub fn is_connected(&self, idx: usize, dir: usize) -> bool {
        self.cons[idx] & (1 << dir) != 0
    }

    /// Portal (tile boundary) bits of cell `idx`
    #[inline]
    pub fn portal_mask(&self, idx: usize) -> u8 {
        self.cons[idx] >> 4
    }

    /// Compresses the height, area and connectivity grids into a layer blob.
    pub fn compress(&self, compressor: &dyn TileCacheCompressor) -> Result<Vec<u8>> {
        build_tile_cache_layer(compressor, &self.header, &self.heights, &self.areas, &self.cons)
    }

    /// Returns the grid memory to `alloc`
    pub fn release(self, alloc: &mut dyn TileCacheAlloc) {
        free_buffer(alloc, self.heights);
        free_buffer(alloc, self.areas);
        free_buffer(alloc, self.cons);
        free_buffer(alloc, self.regs);
    }
}

/// Serializes and compresses layer grids into a layer blob.
pub fn build_tile_cache_layer(
    compressor: &dyn TileCacheCompressor,
    header: &TileCacheLayerHeader,
    heights: &[u16],
    areas: &[u8],
    cons: &[u8],
) -> Result<Vec<u8>> {
    let grid = header.grid_size();
    if heights.len() != grid || areas.len() != grid || cons.len() != grid {
        log::error!(
            "Layer grids do not match {}x{} header",
            header.width,
            header.height
        );
        return Err(Status::InvalidParam);
    }

    let buffer_size = grid * PAYLOAD_BYTES_PER_CELL;
    let mut buffer = Vec::with_capacity(buffer_size);
    for h in heights {
        buffer.extend_from_slice(&h.to_le_bytes());
    }
    buffer.extend_from_slice(areas);
    buffer.extend_from_slice(cons);

    let max_compressed = compressor.max_compressed_size(buffer_size);
    let mut data = Vec::with_capacity(TILECACHE_HEADER_SIZE + max_compressed);
    header.write_to(&mut data)?;
    let header_size = data.len();
    data.resize(header_size + max_compressed, 0);

    let written = compressor.compress(&buffer, &mut data[header_size..])?;
    data.truncate(header_size + written);

    log::debug!(
        "Compressed layer ({}, {}, {}): {} -> {} bytes",
        header.tx,
        header.ty,
        header.tlayer,
        buffer_size,
        written
    );
    Ok(data)
}

/// Validates and decompresses a layer blob.
///
/// The returned layer has every region unset and `reg_count == 0`.
pub fn decompress_tile_cache_layer(
    alloc: &mut dyn TileCacheAlloc,
    compressor: &dyn TileCacheCompressor,
    data: &[u8],
) -> Result<TileCacheLayer> {
    let header = TileCacheLayerHeader::read_from(data)?;
    header.validate()?;

    let grid = header.grid_size();
    let payload_size = grid * PAYLOAD_BYTES_PER_CELL;
    let mut layer = TileCacheLayer::new(alloc, header)?;

    let mut buffer = match alloc_buffer(alloc, payload_size, 0u8) {
        Ok(buffer) => buffer,
        Err(status) => {
            layer.release(alloc);
            return Err(status);
        }
    };
    let written = match compressor.decompress(&data[TILECACHE_HEADER_SIZE..], &mut buffer) {
        Ok(written) => written,
        Err(status) => {
            free_buffer(alloc, buffer);
            layer.release(alloc);
            return Err(status);
        }
    };
    if written != payload_size {
        log::error!(
            "Layer payload inflated to {} bytes, expected {}",
            written,
            payload_size
        );
        free_buffer(alloc, buffer);
        layer.release(alloc);
        return Err(Status::Failure);
    }

    let (heights, rest) = buffer.split_at(grid * 2);
    let (areas, cons) = rest.split_at(grid);
    for (dst, src) in layer.heights.iter_mut().zip(heights.chunks_exact(2)) {
        *dst = u16::from_le_bytes([src[0], src[1]]);
    }
    layer.areas.copy_from_slice(areas);
    layer.cons.copy_from_slice(cons);
    free_buffer(alloc, buffer);

    Ok(layer)
}

/// Swaps the byte order of a serialized layer header in place.
///
/// The header may be in either byte order. The grid payload is byte
/// oriented and left untouched.
pub fn header_swap_endian(data: &mut [u8]) -> Result<()> {
    if data.len() < TILECACHE_HEADER_SIZE {
        return Err(Status::InvalidParam);
    }
    let magic = NativeEndian::read_i32(&data[0..4]);
    let version = NativeEndian::read_i32(&data[4..8]);
    if magic != TILECACHE_MAGIC && magic.swap_bytes() != TILECACHE_MAGIC {
        return Err(Status::WrongMagic);
    }
    if version != TILECACHE_VERSION && version.swap_bytes() != TILECACHE_VERSION {
        return Err(Status::WrongVersion);
    }

    // magic, version, tx, ty, tlayer, bmin[3], bmax[3]
    for field in data[..44].chunks_exact_mut(4) {
        field.reverse();
    }
    // hmin, hmax, width, height, minx, maxx, miny, maxy
    for field in data[44..TILECACHE_HEADER_SIZE].chunks_exact_mut(2) {
        field.reverse();
    }
    Ok(())
}
