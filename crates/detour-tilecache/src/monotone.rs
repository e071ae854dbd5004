//! Monotone and chunky-monotone partitioning of a layer into regions
//!
//! Rows are swept left to right. A run of connected cells continues the
//! region above it when that region connects to the run and nothing else,
//! which yields vertically monotone strips without a distance field.

use crate::alloc::{alloc_buffer, alloc_with_capacity, free_buffer, TileCacheAlloc};
use crate::region::{
    collect_regions, compact_region_ids, remove_small_regions, write_layer_regions, LayerRegion,
    MAX_REGION_ID, NULL_REGION,
};
use crate::tile_cache_data::{TileCacheLayer, TILECACHE_NULL_AREA};
use tilecache_common::{Result, Status};

/// No neighbour, or more than one
const NULL_NEI: u16 = 0xffff;

#[derive(Debug, Clone, Copy)]
struct SweepSpan {
    /// Number of cells connecting to `nei`
    ns: u32,
    /// Region above this run
    nei: u16,
    /// Final region id
    id: u16,
}

/// Both cells are walkable neighbours of the same area type.
#[inline]
fn is_connected(layer: &TileCacheLayer, ia: usize, ib: usize, dir: usize) -> bool {
    layer.is_connected(ia, dir) && layer.areas[ia] == layer.areas[ib]
}

#[inline]
fn add_unique(list: &mut Vec<u16>, v: u16) {
    if !list.contains(&v) {
        list.push(v);
    }
}

/// Sweeps the cells in `[x0, x1) x [y0, y1)`, minting ids from `next_id`.
#[allow(clippy::too_many_arguments)]
fn sweep_chunk(
    layer: &TileCacheLayer,
    x0: usize,
    x1: usize,
    y0: usize,
    y1: usize,
    src_reg: &mut [u16],
    sweeps: &mut Vec<SweepSpan>,
    prev_count: &mut Vec<u32>,
    next_id: &mut u16,
) -> Result<()> {
    let w = layer.width();

    for y in y0..y1 {
        prev_count.clear();
        prev_count.resize(*next_id as usize, 0);
        sweeps.clear();
        // Local run ids are 1-based so they never collide with NULL_REGION.
        sweeps.push(SweepSpan {
            ns: 0,
            nei: NULL_NEI,
            id: NULL_REGION,
        });

        for x in x0..x1 {
            let idx = x + y * w;
            if layer.areas[idx] == TILECACHE_NULL_AREA {
                continue;
            }

            // -x
            let mut sid = NULL_REGION;
            if x > x0 && is_connected(layer, idx, idx - 1, 0) {
                sid = src_reg[idx - 1];
            }
            if sid == NULL_REGION {
                sid = sweeps.len() as u16;
                sweeps.push(SweepSpan {
                    ns: 0,
                    nei: NULL_NEI,
                    id: NULL_REGION,
                });
            }

            // -y
            if y > y0 && is_connected(layer, idx, idx - w, 3) {
                let nr = src_reg[idx - w];
                if nr != NULL_REGION {
                    let sweep = &mut sweeps[sid as usize];
                    // Set neighbour when first valid neighbour is encountered.
                    if sweep.ns == 0 {
                        sweep.nei = nr;
                    }
                    if sweep.nei == nr {
                        sweep.ns += 1;
                        prev_count[nr as usize] += 1;
                    } else {
                        // More than one neighbour, invalidate.
                        sweep.nei = NULL_NEI;
                    }
                }
            }

            src_reg[idx] = sid;
        }

        // Continue the region above if the connection is unambiguous, else mint a new id.
        for sweep in sweeps.iter_mut().skip(1) {
            if sweep.nei != NULL_NEI && prev_count[sweep.nei as usize] == sweep.ns {
                sweep.id = sweep.nei;
            } else {
                if *next_id > MAX_REGION_ID {
                    log::error!("Monotone region ids overflowed at {}", *next_id);
                    return Err(Status::BufferTooSmall);
                }
                sweep.id = *next_id;
                *next_id += 1;
            }
        }

        for x in x0..x1 {
            let idx = x + y * w;
            if src_reg[idx] != NULL_REGION {
                src_reg[idx] = sweeps[src_reg[idx] as usize].id;
            }
        }
    }
    Ok(())
}

/// Records which regions touch each other.
fn find_region_neighbours(layer: &TileCacheLayer, src_reg: &[u16], regions: &mut [LayerRegion]) {
    let w = layer.width();
    for y in 0..layer.height() {
        for x in 0..w {
            let idx = x + y * w;
            let ri = src_reg[idx];
            if ri == NULL_REGION {
                continue;
            }
            // Vertical connections between strips, plus horizontal ones across chunk edges.
            let mut link = |nidx: usize, dir: usize| {
                if !is_connected(layer, idx, nidx, dir) {
                    return;
                }
                let rai = src_reg[nidx];
                if rai != NULL_REGION && rai != ri {
                    add_unique(&mut regions[ri as usize].connections, rai);
                    add_unique(&mut regions[rai as usize].connections, ri);
                }
            };
            if y > 0 {
                link(idx - w, 3);
            }
            if x > 0 {
                link(idx - 1, 0);
            }
        }
    }
}

/// Merge is allowed when exactly one region of the `old_id` group touches the `new_id` group.
fn can_merge(regions: &[LayerRegion], old_id: u16, new_id: u16) -> bool {
    let mut count = 0;
    for reg in regions.iter().filter(|r| r.id == old_id) {
        for &nei in &reg.connections {
            if regions[nei as usize].id == new_id {
                count += 1;
            }
        }
    }
    count == 1
}

/// Merges small regions into their largest mergeable neighbour.
fn merge_small_regions(regions: &mut [LayerRegion], merge_region_area: usize) {
    // Cell count of each merge group, indexed by group id.
    let mut group_area: Vec<usize> = regions.iter().map(|r| r.cell_count).collect();

    for i in 1..regions.len() {
        let reg_id = regions[i].id;
        if reg_id == NULL_REGION || regions[i].cell_count == 0 {
            continue;
        }
        if group_area[reg_id as usize] >= merge_region_area {
            continue;
        }

        let mut merge = None;
        let mut merge_area = 0;
        for &nei in &regions[i].connections {
            let regn = &regions[nei as usize];
            if regn.id == reg_id || regn.id == NULL_REGION {
                continue;
            }
            if regn.area_type != regions[i].area_type || regn.chunk_id != regions[i].chunk_id {
                continue;
            }
            let area = group_area[regn.id as usize];
            if area > merge_area && can_merge(regions, reg_id, regn.id) {
                merge_area = area;
                merge = Some(regn.id);
            }
        }

        if let Some(new_id) = merge {
            group_area[new_id as usize] += group_area[reg_id as usize];
            group_area[reg_id as usize] = 0;
            for reg in regions.iter_mut() {
                if reg.id == reg_id {
                    reg.id = new_id;
                }
            }
        }
    }
}

fn build_monotone_regions(
    alloc: &mut dyn TileCacheAlloc,
    layer: &mut TileCacheLayer,
    min_region_area: i32,
    merge_region_area: i32,
    chunk_size: usize,
) -> Result<usize> {
    let w = layer.width();
    let h = layer.height();
    let chunk_size = chunk_size.max(1);

    let mut src_reg = alloc_buffer(alloc, w * h, NULL_REGION)?;
    let mut sweeps: Vec<SweepSpan> = alloc_with_capacity(alloc, chunk_size.min(w) + 1)?;
    let mut prev_count: Vec<u32> = alloc_with_capacity(alloc, 256)?;

    let chunks_x = w.div_ceil(chunk_size);
    let mut next_id: u16 = 1;
    for cy in (0..h).step_by(chunk_size) {
        for cx in (0..w).step_by(chunk_size) {
            sweep_chunk(
                layer,
                cx,
                (cx + chunk_size).min(w),
                cy,
                (cy + chunk_size).min(h),
                &mut src_reg,
                &mut sweeps,
                &mut prev_count,
                &mut next_id,
            )?;
        }
    }
    free_buffer(alloc, sweeps);
    free_buffer(alloc, prev_count);

    let nregs = next_id as usize;
    let chunk_of = |x: usize, y: usize| ((x / chunk_size) + (y / chunk_size) * chunks_x) as u16;
    let mut regions = collect_regions(layer, &src_reg, nregs, chunk_of);
    find_region_neighbours(layer, &src_reg, &mut regions);

    remove_small_regions(&mut regions, min_region_area.max(0) as usize);
    merge_small_regions(&mut regions, merge_region_area.max(0) as usize);
    let reg_count = compact_region_ids(&mut regions);

    write_layer_regions(layer, &src_reg, &regions, reg_count);
    free_buffer(alloc, src_reg);

    log::debug!(
        "Monotone partitioned {}x{} layer (chunk {}) into {} regions ({} strips)",
        w,
        h,
        chunk_size,
        reg_count,
        nregs - 1
    );
    Ok(reg_count)
}

/// Builds regions by sweeping monotone strips over the whole layer.
pub fn build_tile_cache_regions_monotone(
    alloc: &mut dyn TileCacheAlloc,
    layer: &mut TileCacheLayer,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<usize> {
    let chunk_size = layer.width().max(layer.height()).max(1);
    build_monotone_regions(alloc, layer, min_region_area, merge_region_area, chunk_size)
}

/// Builds monotone regions independently inside square chunks of `chunk_size` cells.
///
/// Regions never merge across chunks.
pub fn build_tile_cache_regions_chunky(
    alloc: &mut dyn TileCacheAlloc,
    layer: &mut TileCacheLayer,
    min_region_area: i32,
    merge_region_area: i32,
    chunk_size: i32,
) -> Result<usize> {
    if chunk_size <= 0 {
        return Err(Status::InvalidParam);
    }
    build_monotone_regions(
        alloc,
        layer,
        min_region_area,
        merge_region_area,
        chunk_size as usize,
    )
}
