//! Distance field generation for watershed region building
//!
//! Every walkable cell gets an approximate distance to the closest boundary
//! (unwalkable cell, area change or missing connection), weighted 2 for
//! orthogonal steps and 3 for diagonal steps, then smoothed with a box blur.

use crate::alloc::{alloc_buffer, free_buffer, TileCacheAlloc};
use crate::tile_cache_data::{TileCacheLayer, TILECACHE_NULL_AREA};
use tilecache_common::{dir_offset_x, dir_offset_y, Result};

/// Distances at or below this value are left untouched by the blur
const BLUR_THRESHOLD: u16 = 1;

/// Per-cell distance to the nearest boundary
#[derive(Debug, Clone, Default)]
pub struct TileCacheDistanceField {
    /// Largest distance before blurring
    pub max_dist: u16,
    pub data: Vec<u16>,
}

impl TileCacheDistanceField {
    pub fn release(self, alloc: &mut dyn TileCacheAlloc) {
        free_buffer(alloc, self.data);
    }
}

/// Index of the neighbour of cell (`x`, `y`) in direction `dir`.
///
/// Callers only ask for directions whose connection bit is set, and layer
/// connectivity never points outside the grid.
#[inline]
fn neighbour(w: usize, x: usize, y: usize, dir: usize) -> (usize, usize, usize) {
    let nx = (x as i32 + dir_offset_x(dir)) as usize;
    let ny = (y as i32 + dir_offset_y(dir)) as usize;
    (nx, ny, nx + ny * w)
}

/// Connection test that also guards against malformed bits on the grid edge
#[inline]
fn connected(layer: &TileCacheLayer, x: usize, y: usize, dir: usize) -> bool {
    let idx = x + y * layer.width();
    if !layer.is_connected(idx, dir) {
        return false;
    }
    let nx = x as i32 + dir_offset_x(dir);
    let ny = y as i32 + dir_offset_y(dir);
    nx >= 0 && ny >= 0 && (nx as usize) < layer.width() && (ny as usize) < layer.height()
}

fn calculate_distance_field(layer: &TileCacheLayer, dist: &mut [u16]) -> u16 {
    let w = layer.width();
    let h = layer.height();

    // Mark boundary cells.
    for y in 0..h {
        for x in 0..w {
            let idx = x + y * w;
            let area = layer.areas[idx];
            if area == TILECACHE_NULL_AREA {
                dist[idx] = 0;
                continue;
            }
            let mut nc = 0;
            for dir in 0..4 {
                if connected(layer, x, y, dir) {
                    let (_, _, ai) = neighbour(w, x, y, dir);
                    if layer.areas[ai] == area {
                        nc += 1;
                    }
                }
            }
            dist[idx] = if nc == 4 { 0xffff } else { 0 };
        }
    }

    // Pass 1: (-1,0), (-1,-1), (0,-1), (1,-1)
    for y in 0..h {
        for x in 0..w {
            let idx = x + y * w;
            let mut d = dist[idx];

            if connected(layer, x, y, 0) {
                let (ax, ay, ai) = neighbour(w, x, y, 0);
                d = d.min(dist[ai].saturating_add(2));
                if connected(layer, ax, ay, 3) {
                    let (_, _, aai) = neighbour(w, ax, ay, 3);
                    d = d.min(dist[aai].saturating_add(3));
                }
            }
            if connected(layer, x, y, 3) {
                let (ax, ay, ai) = neighbour(w, x, y, 3);
                d = d.min(dist[ai].saturating_add(2));
                if connected(layer, ax, ay, 2) {
                    let (_, _, aai) = neighbour(w, ax, ay, 2);
                    d = d.min(dist[aai].saturating_add(3));
                }
            }
            dist[idx] = d;
        }
    }

    // Pass 2: (1,0), (1,1), (0,1), (-1,1)
    for y in (0..h).rev() {
        for x in (0..w).rev() {
            let idx = x + y * w;
            let mut d = dist[idx];

            if connected(layer, x, y, 2) {
                let (ax, ay, ai) = neighbour(w, x, y, 2);
                d = d.min(dist[ai].saturating_add(2));
                if connected(layer, ax, ay, 1) {
                    let (_, _, aai) = neighbour(w, ax, ay, 1);
                    d = d.min(dist[aai].saturating_add(3));
                }
            }
            if connected(layer, x, y, 1) {
                let (ax, ay, ai) = neighbour(w, x, y, 1);
                d = d.min(dist[ai].saturating_add(2));
                if connected(layer, ax, ay, 0) {
                    let (_, _, aai) = neighbour(w, ax, ay, 0);
                    d = d.min(dist[aai].saturating_add(3));
                }
            }
            dist[idx] = d;
        }
    }

    dist.iter().copied().max().unwrap_or(0)
}

fn box_blur(layer: &TileCacheLayer, threshold: u16, src: &[u16], dst: &mut [u16]) {
    let w = layer.width();
    let h = layer.height();
    let threshold = threshold * 2;

    for y in 0..h {
        for x in 0..w {
            let idx = x + y * w;
            let cd = src[idx];
            if cd <= threshold {
                dst[idx] = cd;
                continue;
            }

            let mut d = cd as u32;
            for dir in 0..4 {
                if connected(layer, x, y, dir) {
                    let (ax, ay, ai) = neighbour(w, x, y, dir);
                    d += src[ai] as u32;

                    let dir2 = (dir + 1) & 0x3;
                    if connected(layer, ax, ay, dir2) {
                        let (_, _, ai2) = neighbour(w, ax, ay, dir2);
                        d += src[ai2] as u32;
                    } else {
                        // No diagonal, count the orthogonal cell twice.
                        d += src[ai] as u32;
                    }
                } else {
                    d += cd as u32 * 2;
                }
            }
            dst[idx] = ((d + 5) / 9) as u16;
        }
    }
}

/// Builds the distance field of `layer`.
pub fn build_tile_cache_distance_field(
    alloc: &mut dyn TileCacheAlloc,
    layer: &TileCacheLayer,
) -> Result<TileCacheDistanceField> {
    let grid = layer.width() * layer.height();
    let mut src = alloc_buffer(alloc, grid, 0u16)?;
    let mut data = alloc_buffer(alloc, grid, 0u16)?;

    let max_dist = calculate_distance_field(layer, &mut src);
    box_blur(layer, BLUR_THRESHOLD, &src, &mut data);
    free_buffer(alloc, src);

    log::debug!(
        "Distance field {}x{}: max distance {}",
        layer.width(),
        layer.height(),
        max_dist
    );
    Ok(TileCacheDistanceField { max_dist, data })
}
