//! Watershed partitioning of a layer into regions
//!
//! Regions grow outward from the ridges of the distance field, one water
//! level at a time, then small regions are filtered and merged.

use crate::alloc::{alloc_buffer, alloc_with_capacity, free_buffer, TileCacheAlloc};
use crate::distance_field::TileCacheDistanceField;
use crate::region::{
    collect_regions, compact_region_ids, remove_small_regions, write_layer_regions, LayerRegion,
    MAX_REGION_ID, NULL_REGION,
};
use crate::tile_cache_data::{TileCacheLayer, TILECACHE_NULL_AREA};
use tilecache_common::{dir_offset_x, dir_offset_y, Result, Status};

/// Expand passes per water level
const EXPAND_ITERS: usize = 8;

/// Upper bound on steps when walking a region outline
const MAX_OUTLINE_WALK: usize = 40000;

#[derive(Debug, Clone, Copy)]
struct LevelStackEntry {
    x: usize,
    y: usize,
    index: usize,
}

impl LevelStackEntry {
    fn new(x: usize, y: usize, index: usize) -> Self {
        Self { x, y, index }
    }
}

/// Neighbour of (`x`, `y`) in `dir` if the connection bit says it is reachable.
#[inline]
fn neighbour(layer: &TileCacheLayer, x: usize, y: usize, dir: usize) -> Option<(usize, usize, usize)> {
    if !layer.is_connected(x + y * layer.width(), dir) {
        return None;
    }
    let nx = x as i32 + dir_offset_x(dir);
    let ny = y as i32 + dir_offset_y(dir);
    if nx < 0 || ny < 0 || nx as usize >= layer.width() || ny as usize >= layer.height() {
        return None;
    }
    let (nx, ny) = (nx as usize, ny as usize);
    Some((nx, ny, nx + ny * layer.width()))
}

#[allow(clippy::too_many_arguments)]
fn flood_region(
    entry: LevelStackEntry,
    level: u16,
    r: u16,
    layer: &TileCacheLayer,
    dfield: &TileCacheDistanceField,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
    stack: &mut Vec<LevelStackEntry>,
) -> bool {
    let area = layer.areas[entry.index];

    // Flood fill mark region.
    stack.clear();
    stack.push(entry);
    src_reg[entry.index] = r;
    src_dist[entry.index] = 0;

    let lev = level.saturating_sub(2);
    let mut count = 0;

    while let Some(cur) = stack.pop() {
        // Check if any of the neighbours already have a valid region set.
        let mut ar = NULL_REGION;
        for dir in 0..4 {
            let Some((ax, ay, ai)) = neighbour(layer, cur.x, cur.y, dir) else {
                continue;
            };
            if layer.areas[ai] != area {
                continue;
            }
            let nr = src_reg[ai];
            if nr != NULL_REGION && nr != r {
                ar = nr;
                break;
            }

            let dir2 = (dir + 1) & 0x3;
            if let Some((_, _, ai2)) = neighbour(layer, ax, ay, dir2) {
                if layer.areas[ai2] != area {
                    continue;
                }
                let nr2 = src_reg[ai2];
                if nr2 != NULL_REGION && nr2 != r {
                    ar = nr2;
                    break;
                }
            }
        }
        if ar != NULL_REGION {
            src_reg[cur.index] = NULL_REGION;
            continue;
        }

        count += 1;

        // Expand neighbours.
        for dir in 0..4 {
            let Some((ax, ay, ai)) = neighbour(layer, cur.x, cur.y, dir) else {
                continue;
            };
            if layer.areas[ai] != area {
                continue;
            }
            if dfield.data[ai] >= lev && src_reg[ai] == NULL_REGION {
                src_reg[ai] = r;
                src_dist[ai] = 0;
                stack.push(LevelStackEntry::new(ax, ay, ai));
            }
        }
    }

    count > 0
}

/// Grows existing regions into unassigned cells at or above `level`.
///
/// Every pass decides all cells against the state of the previous pass.
/// `max_iter` only bounds passes while `level > 0`.
#[allow(clippy::too_many_arguments)]
fn expand_regions(
    max_iter: usize,
    level: u16,
    layer: &TileCacheLayer,
    dfield: &TileCacheDistanceField,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
    stack: &mut Vec<LevelStackEntry>,
    dirty: &mut Vec<(usize, u16, u16)>,
) {
    let w = layer.width();

    // Find cells revealed by the raised level.
    stack.clear();
    for y in 0..layer.height() {
        for x in 0..w {
            let i = x + y * w;
            if dfield.data[i] >= level
                && src_reg[i] == NULL_REGION
                && layer.areas[i] != TILECACHE_NULL_AREA
            {
                stack.push(LevelStackEntry::new(x, y, i));
            }
        }
    }

    let mut iter = 0;
    while !stack.is_empty() {
        dirty.clear();

        for entry in stack.iter() {
            let i = entry.index;
            let area = layer.areas[i];
            let mut r = NULL_REGION;
            let mut d2 = 0xffffu16;
            for dir in 0..4 {
                let Some((_, _, ai)) = neighbour(layer, entry.x, entry.y, dir) else {
                    continue;
                };
                if layer.areas[ai] != area {
                    continue;
                }
                if src_reg[ai] != NULL_REGION {
                    let d = src_dist[ai].saturating_add(2);
                    if d < d2 {
                        r = src_reg[ai];
                        d2 = d;
                    }
                }
            }
            if r != NULL_REGION {
                dirty.push((i, r, d2));
            }
        }

        if dirty.is_empty() {
            break;
        }
        for &(i, r, d) in dirty.iter() {
            src_reg[i] = r;
            src_dist[i] = d;
        }
        stack.retain(|e| src_reg[e.index] == NULL_REGION);

        if level > 0 {
            iter += 1;
            if iter >= max_iter {
                break;
            }
        }
    }
}

/// Checks whether the edge of cell `i` towards `dir` separates it from its region.
fn is_solid_edge(layer: &TileCacheLayer, src_reg: &[u16], x: usize, y: usize, dir: usize) -> bool {
    let i = x + y * layer.width();
    let r = neighbour(layer, x, y, dir).map_or(NULL_REGION, |(_, _, ai)| src_reg[ai]);
    r != src_reg[i]
}

/// Walks the outline of the region owning cell (`x`, `y`) and records the
/// sequence of neighbouring region ids.
fn walk_outline(
    layer: &TileCacheLayer,
    src_reg: &[u16],
    mut x: usize,
    mut y: usize,
    mut dir: usize,
    cont: &mut Vec<u16>,
) {
    let start_dir = dir;
    let start_i = x + y * layer.width();
    let mut i = start_i;

    let mut cur_reg = neighbour(layer, x, y, dir).map_or(NULL_REGION, |(_, _, ai)| src_reg[ai]);
    cont.push(cur_reg);

    let mut iter = 0;
    loop {
        iter += 1;
        if iter >= MAX_OUTLINE_WALK {
            log::warn!("Region outline walk exceeded {MAX_OUTLINE_WALK} steps");
            break;
        }

        if is_solid_edge(layer, src_reg, x, y, dir) {
            let r = neighbour(layer, x, y, dir).map_or(NULL_REGION, |(_, _, ai)| src_reg[ai]);
            if r != cur_reg {
                cur_reg = r;
                cont.push(cur_reg);
            }
            dir = (dir + 1) & 0x3; // Rotate CW
        } else {
            let Some((nx, ny, ni)) = neighbour(layer, x, y, dir) else {
                // Should not happen.
                return;
            };
            x = nx;
            y = ny;
            i = ni;
            dir = (dir + 3) & 0x3; // Rotate CCW
        }

        if start_i == i && start_dir == dir {
            break;
        }
    }

    remove_adjacent_duplicates(cont);
}

/// Removes consecutive duplicates, treating the list as circular.
fn remove_adjacent_duplicates(cont: &mut Vec<u16>) {
    let mut j = 0;
    while cont.len() > 1 && j < cont.len() {
        let nj = (j + 1) % cont.len();
        if cont[j] == cont[nj] {
            cont.remove(j);
        } else {
            j += 1;
        }
    }
}

fn replace_neighbour(reg: &mut LayerRegion, old_id: u16, new_id: u16) {
    let mut changed = false;
    for c in reg.connections.iter_mut() {
        if *c == old_id {
            *c = new_id;
            changed = true;
        }
    }
    if changed {
        remove_adjacent_duplicates(&mut reg.connections);
    }
}

/// Regions may merge when they share an area type and a single boundary segment.
fn can_merge_with_region(rega: &LayerRegion, regb: &LayerRegion) -> bool {
    if rega.area_type != regb.area_type || rega.chunk_id != regb.chunk_id {
        return false;
    }
    rega.connections.iter().filter(|&&c| c == regb.id).count() <= 1
}

/// Splices the outline of region `b` into region `a`. Returns false if the
/// two outlines do not touch.
fn merge_regions(regions: &mut [LayerRegion], a: usize, b: usize) -> bool {
    let aid = regions[a].id;
    let bid = regions[b].id;

    let acon = regions[a].connections.clone();
    let bcon = std::mem::take(&mut regions[b].connections);

    let Some(insa) = acon.iter().position(|&c| c == bid) else {
        regions[b].connections = bcon;
        return false;
    };
    let Some(insb) = bcon.iter().position(|&c| c == aid) else {
        regions[b].connections = bcon;
        return false;
    };

    let merged = &mut regions[a].connections;
    merged.clear();
    let na = acon.len();
    for i in 0..na.saturating_sub(1) {
        merged.push(acon[(insa + 1 + i) % na]);
    }
    let nb = bcon.len();
    for i in 0..nb.saturating_sub(1) {
        merged.push(bcon[(insb + 1 + i) % nb]);
    }
    remove_adjacent_duplicates(merged);

    regions[a].cell_count += regions[b].cell_count;
    regions[a].border |= regions[b].border;
    regions[b].cell_count = 0;
    true
}

/// Merges small regions into the smallest neighbour they can be merged with.
fn merge_small_regions(regions: &mut [LayerRegion], merge_region_area: usize) {
    loop {
        let mut merge_count = 0;
        for i in 0..regions.len() {
            let reg = &regions[i];
            if reg.id == NULL_REGION || reg.cell_count == 0 {
                continue;
            }
            if reg.cell_count >= merge_region_area || reg.border {
                continue;
            }

            // Find smallest neighbour that connects to this one.
            let mut smallest = usize::MAX;
            let mut merge_id = reg.id;
            for &c in &reg.connections {
                if c == NULL_REGION {
                    continue;
                }
                let mreg = &regions[c as usize];
                if mreg.id == NULL_REGION || mreg.cell_count == 0 {
                    continue;
                }
                if mreg.cell_count < smallest
                    && can_merge_with_region(reg, mreg)
                    && can_merge_with_region(mreg, reg)
                {
                    smallest = mreg.cell_count;
                    merge_id = mreg.id;
                }
            }

            if merge_id == reg.id {
                continue;
            }
            let old_id = reg.id;
            if merge_regions(regions, merge_id as usize, i) {
                // Fixup regions pointing to the current region.
                for other in regions.iter_mut() {
                    if other.id == NULL_REGION {
                        continue;
                    }
                    if other.id == old_id {
                        other.id = merge_id;
                    }
                    replace_neighbour(other, old_id, merge_id);
                }
                merge_count += 1;
            }
        }
        if merge_count == 0 {
            break;
        }
    }
}

/// Builds regions using watershed partitioning of the distance field.
///
/// Writes `layer.regs` and `layer.reg_count` and returns the region count.
pub fn build_tile_cache_regions(
    alloc: &mut dyn TileCacheAlloc,
    layer: &mut TileCacheLayer,
    dfield: &TileCacheDistanceField,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<usize> {
    let w = layer.width();
    let h = layer.height();
    let grid = w * h;

    let mut src_reg = alloc_buffer(alloc, grid, NULL_REGION)?;
    let mut src_dist = alloc_buffer(alloc, grid, 0u16)?;
    let mut stack: Vec<LevelStackEntry> = alloc_with_capacity(alloc, 1024)?;
    let mut dirty: Vec<(usize, u16, u16)> = alloc_with_capacity(alloc, 1024)?;

    let mut region_id: u16 = 1;
    let mut level = (dfield.max_dist.saturating_add(1)) & !1;

    while level > 0 {
        level = level.saturating_sub(2);

        expand_regions(
            EXPAND_ITERS,
            level,
            layer,
            dfield,
            &mut src_reg,
            &mut src_dist,
            &mut stack,
            &mut dirty,
        );

        // Mark new regions with ids.
        for y in 0..h {
            for x in 0..w {
                let idx = x + y * w;
                if dfield.data[idx] < level
                    || src_reg[idx] != NULL_REGION
                    || layer.areas[idx] == TILECACHE_NULL_AREA
                {
                    continue;
                }
                let entry = LevelStackEntry::new(x, y, idx);
                if flood_region(
                    entry,
                    level,
                    region_id,
                    layer,
                    dfield,
                    &mut src_reg,
                    &mut src_dist,
                    &mut stack,
                ) {
                    if region_id >= MAX_REGION_ID {
                        log::error!("Watershed region ids overflowed at {region_id}");
                        return Err(Status::BufferTooSmall);
                    }
                    region_id += 1;
                }
            }
        }
    }

    // Claim whatever is left.
    expand_regions(
        EXPAND_ITERS * 8,
        0,
        layer,
        dfield,
        &mut src_reg,
        &mut src_dist,
        &mut stack,
        &mut dirty,
    );

    free_buffer(alloc, stack);
    free_buffer(alloc, dirty);
    free_buffer(alloc, src_dist);

    let nregs = region_id as usize;
    let mut regions = collect_regions(layer, &src_reg, nregs, |_, _| 0);

    // Find the outline of each region and its neighbours.
    for y in 0..h {
        for x in 0..w {
            let idx = x + y * w;
            let r = src_reg[idx] as usize;
            if r == NULL_REGION as usize || r >= nregs || !regions[r].connections.is_empty() {
                continue;
            }
            if let Some(dir) = (0..4).find(|&dir| is_solid_edge(layer, &src_reg, x, y, dir)) {
                let mut cont = Vec::new();
                walk_outline(layer, &src_reg, x, y, dir, &mut cont);
                regions[r].connections = cont;
            }
        }
    }

    remove_small_regions(&mut regions, min_region_area.max(0) as usize);
    merge_small_regions(&mut regions, merge_region_area.max(0) as usize);
    let reg_count = compact_region_ids(&mut regions);

    write_layer_regions(layer, &src_reg, &regions, reg_count);
    free_buffer(alloc, src_reg);

    log::debug!(
        "Watershed partitioned {}x{} layer into {} regions ({} before filtering)",
        w,
        h,
        reg_count,
        nregs.saturating_sub(1)
    );
    Ok(reg_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::HeapAllocator;
    use crate::distance_field::build_tile_cache_distance_field;
    use crate::test_helpers::{
        assert_regions_compacted, flat_layer, set_area, set_checkerboard_areas, set_null_area,
    };

    fn watershed(layer: &mut TileCacheLayer, min_area: i32, merge_area: i32) -> usize {
        let mut alloc = HeapAllocator::new();
        let dfield = build_tile_cache_distance_field(&mut alloc, layer).unwrap();
        build_tile_cache_regions(&mut alloc, layer, &dfield, min_area, merge_area).unwrap()
    }

    #[test]
    fn test_flat_layer_single_region() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 8, 8);
        let count = watershed(&mut layer, 0, 0);
        assert_eq!(count, 1);
        assert_eq!(layer.reg_count, 1);
        assert!(layer.regs.iter().all(|&r| r == 1));
    }

    #[test]
    fn test_null_cells_have_no_region() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 8, 8);
        set_null_area(&mut layer, 0, 0, 3, 3);
        let count = watershed(&mut layer, 0, 0);
        assert!(count >= 1);
        assert_regions_compacted(&layer);
        assert_eq!(layer.regs[0], 0);
        assert_eq!(layer.regs[2 + 2 * 8], 0);
        assert_ne!(layer.regs[7 + 7 * 8], 0);
    }

    #[test]
    fn test_small_island_is_removed() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 12, 12);
        // Ring of null cells isolating a 2x2 island in the middle.
        set_null_area(&mut layer, 3, 3, 9, 9);
        let mut island = flat_layer(&mut alloc, 12, 12);
        set_null_area(&mut island, 0, 0, 12, 5);
        set_null_area(&mut island, 0, 7, 12, 12);
        set_null_area(&mut island, 0, 5, 5, 7);
        set_null_area(&mut island, 7, 5, 12, 7);
        for y in 5..7 {
            for x in 5..7 {
                let idx = x + y * 12;
                layer.areas[idx] = island.areas[idx];
                layer.cons[idx] = island.cons[idx];
            }
        }

        watershed(&mut layer, 8, 0);
        assert_regions_compacted(&layer);
        for y in 5..7 {
            for x in 5..7 {
                assert_eq!(layer.regs[x + y * 12], 0, "island cell ({x}, {y})");
            }
        }
        // The outer ring touches the border and survives.
        assert_ne!(layer.regs[0], 0);
    }

    #[test]
    fn test_area_types_split_regions() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 10, 10);
        set_area(&mut layer, 5, 0, 10, 10, 7);
        let count = watershed(&mut layer, 0, 0);
        assert!(count >= 2);
        assert_regions_compacted(&layer);
        assert_ne!(layer.regs[0], layer.regs[9]);
    }

    #[test]
    fn test_merge_reduces_region_count() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 16, 16);
        // A wall with a gap produces two rooms joined by a corridor.
        set_null_area(&mut layer, 7, 0, 9, 7);
        set_null_area(&mut layer, 7, 9, 9, 16);
        let unmerged = watershed(&mut layer.clone(), 0, 0);
        let merged = watershed(&mut layer, 0, 400);
        assert!(merged <= unmerged);
        assert_regions_compacted(&layer);
    }

    #[test]
    fn test_region_id_overflow_is_buffer_too_small() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 256, 256);
        set_checkerboard_areas(&mut layer);
        // A solid corner block lifts the distance field above zero so the
        // level loop runs, the checkerboard then floods one region per cell.
        set_area(&mut layer, 0, 0, 16, 16, 1);
        let dfield = build_tile_cache_distance_field(&mut alloc, &layer).unwrap();
        assert!(dfield.max_dist > 0);
        let result = build_tile_cache_regions(&mut alloc, &mut layer, &dfield, 0, 0);
        assert_eq!(result, Err(Status::BufferTooSmall));
    }

    #[test]
    fn test_remove_adjacent_duplicates_wraps() {
        let mut cont = vec![1, 1, 2, 3, 3, 1];
        remove_adjacent_duplicates(&mut cont);
        assert_eq!(cont, vec![2, 3, 1]);
    }
}
