//! Synthetic layers shared by the unit tests

use crate::alloc::TileCacheAlloc;
use crate::tile_cache_data::{
    TileCacheLayer, TileCacheLayerHeader, TILECACHE_NULL_AREA, TILECACHE_WALKABLE_AREA,
};
use tilecache_common::{dir_offset_x, dir_offset_y, opposite_dir};

/// Flat, fully connected, walkable layer with cell size 1 at the origin
pub fn flat_layer(alloc: &mut dyn TileCacheAlloc, width: usize, height: usize) -> TileCacheLayer {
    let header = TileCacheLayerHeader {
        bmin: [0.0, 0.0, 0.0],
        bmax: [width as f32, 10.0, height as f32],
        hmin: 0,
        hmax: 10,
        width: width as u16,
        height: height as u16,
        minx: 0,
        maxx: width.saturating_sub(1) as u16,
        miny: 0,
        maxy: height.saturating_sub(1) as u16,
        ..TileCacheLayerHeader::new()
    };
    let mut layer = TileCacheLayer::new(alloc, header).unwrap();
    for y in 0..height {
        for x in 0..width {
            let idx = x + y * width;
            layer.areas[idx] = TILECACHE_WALKABLE_AREA;
            for dir in 0..4 {
                let nx = x as i32 + dir_offset_x(dir);
                let ny = y as i32 + dir_offset_y(dir);
                if nx >= 0 && ny >= 0 && (nx as usize) < width && (ny as usize) < height {
                    layer.cons[idx] |= 1 << dir;
                }
            }
        }
    }
    layer
}

/// Removes the cells in `[x0, x1) x [y0, y1)` from the walkable surface.
pub fn set_null_area(layer: &mut TileCacheLayer, x0: usize, y0: usize, x1: usize, y1: usize) {
    let w = layer.width();
    for y in y0..y1 {
        for x in x0..x1 {
            let idx = x + y * w;
            for dir in 0..4 {
                if layer.cons[idx] & (1 << dir) == 0 {
                    continue;
                }
                let nx = (x as i32 + dir_offset_x(dir)) as usize;
                let ny = (y as i32 + dir_offset_y(dir)) as usize;
                layer.cons[nx + ny * w] &= !(1 << opposite_dir(dir));
            }
            layer.cons[idx] = 0;
            layer.areas[idx] = TILECACHE_NULL_AREA;
        }
    }
}

/// Sets the area id of the cells in `[x0, x1) x [y0, y1)`, keeping connectivity.
pub fn set_area(
    layer: &mut TileCacheLayer,
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
    area: u8,
) {
    let w = layer.width();
    for y in y0..y1 {
        for x in x0..x1 {
            layer.areas[x + y * w] = area;
        }
    }
}

/// Alternates two area ids cell by cell, so no two neighbours share an area.
pub fn set_checkerboard_areas(layer: &mut TileCacheLayer) {
    let w = layer.width();
    for y in 0..layer.height() {
        for x in 0..w {
            layer.areas[x + y * w] = 1 + ((x + y) % 2) as u8;
        }
    }
}

/// Marks every edge of the grid that leads out of the tile as a portal.
pub fn add_edge_portals(layer: &mut TileCacheLayer) {
    let w = layer.width();
    let h = layer.height();
    for y in 0..h {
        for x in 0..w {
            let idx = x + y * w;
            if layer.areas[idx] == TILECACHE_NULL_AREA {
                continue;
            }
            for dir in 0..4 {
                let nx = x as i32 + dir_offset_x(dir);
                let ny = y as i32 + dir_offset_y(dir);
                if nx < 0 || ny < 0 || nx as usize >= w || ny as usize >= h {
                    layer.cons[idx] |= 1 << (dir + 4);
                }
            }
        }
    }
}

/// Checks the compaction contract every region builder must honour.
pub fn assert_regions_compacted(layer: &TileCacheLayer) {
    let mut seen = vec![false; layer.reg_count + 1];
    for (i, &reg) in layer.regs.iter().enumerate() {
        if layer.areas[i] == TILECACHE_NULL_AREA {
            assert_eq!(reg, 0, "null cell {i} has region {reg}");
        }
        assert!(
            (reg as usize) <= layer.reg_count,
            "cell {i} has region {reg} > {}",
            layer.reg_count
        );
        seen[reg as usize] = true;
    }
    for (id, used) in seen.iter().enumerate().skip(1) {
        assert!(used, "region id {id} is unused");
    }
}
