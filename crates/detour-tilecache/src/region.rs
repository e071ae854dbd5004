//! Region bookkeeping shared by the watershed and monotone builders

use crate::tile_cache_data::{TileCacheLayer, TILECACHE_NULL_AREA};

/// Region id of cells that belong to no region
pub(crate) const NULL_REGION: u16 = 0;

/// Largest usable region id. Contour tracing reserves `0xf800..` for portals.
pub(crate) const MAX_REGION_ID: u16 = 0xf7ff;

/// Transient region used while partitioning a layer
#[derive(Debug, Clone)]
pub(crate) struct LayerRegion {
    /// Current id. Merged regions point at the region that absorbed them.
    pub id: u16,
    pub cell_count: usize,
    pub area_type: u8,
    pub chunk_id: u16,
    /// Touches the grid edge or a portal
    pub border: bool,
    /// Neighbouring region ids, `NULL_REGION` for solid edges
    pub connections: Vec<u16>,
    pub visited: bool,
}

impl LayerRegion {
    pub fn new(id: u16) -> Self {
        Self {
            id,
            cell_count: 0,
            area_type: TILECACHE_NULL_AREA,
            chunk_id: 0,
            border: false,
            connections: Vec::new(),
            visited: false,
        }
    }
}

/// Checks whether cell (`x`, `y`) lies on the tile border.
#[inline]
pub(crate) fn is_border_cell(layer: &TileCacheLayer, x: usize, y: usize) -> bool {
    x == 0
        || y == 0
        || x + 1 == layer.width()
        || y + 1 == layer.height()
        || layer.portal_mask(x + y * layer.width()) != 0
}

/// Creates `nregs` regions and accumulates per-cell statistics from `src_reg`.
pub(crate) fn collect_regions(
    layer: &TileCacheLayer,
    src_reg: &[u16],
    nregs: usize,
    chunk_of: impl Fn(usize, usize) -> u16,
) -> Vec<LayerRegion> {
    let mut regions: Vec<LayerRegion> = (0..nregs).map(|i| LayerRegion::new(i as u16)).collect();
    let w = layer.width();
    for y in 0..layer.height() {
        for x in 0..w {
            let idx = x + y * w;
            let r = src_reg[idx] as usize;
            if r == NULL_REGION as usize || r >= nregs {
                continue;
            }
            let reg = &mut regions[r];
            reg.cell_count += 1;
            reg.area_type = layer.areas[idx];
            reg.chunk_id = chunk_of(x, y);
            reg.border |= is_border_cell(layer, x, y);
        }
    }
    regions
}

/// Deletes connected groups of regions smaller than `min_region_area` cells.
///
/// Groups are formed transitively over connections between regions of the
/// same area type. Groups touching the tile border are kept, their true size
/// is unknown.
pub(crate) fn remove_small_regions(regions: &mut [LayerRegion], min_region_area: usize) {
    let nregs = regions.len();
    for reg in regions.iter_mut() {
        reg.visited = false;
    }

    let mut stack = Vec::new();
    let mut trace = Vec::new();
    for i in 0..nregs {
        {
            let reg = &regions[i];
            if reg.id == NULL_REGION || reg.cell_count == 0 || reg.visited {
                continue;
            }
        }

        let area_type = regions[i].area_type;
        let mut connects_to_border = false;
        let mut cell_count = 0;
        stack.clear();
        trace.clear();

        regions[i].visited = true;
        stack.push(i);
        while let Some(ri) = stack.pop() {
            cell_count += regions[ri].cell_count;
            connects_to_border |= regions[ri].border;
            trace.push(ri);

            for j in 0..regions[ri].connections.len() {
                let nei = regions[ri].connections[j] as usize;
                if nei == NULL_REGION as usize || nei >= nregs {
                    continue;
                }
                let neireg = &mut regions[nei];
                if neireg.visited || neireg.id == NULL_REGION || neireg.area_type != area_type {
                    continue;
                }
                neireg.visited = true;
                stack.push(nei);
            }
        }

        if cell_count < min_region_area && !connects_to_border {
            log::debug!(
                "Removing {} region(s) with {} cells (minimum {})",
                trace.len(),
                cell_count,
                min_region_area
            );
            for &ri in &trace {
                regions[ri].cell_count = 0;
                regions[ri].id = NULL_REGION;
            }
        }
    }
}

/// Remaps surviving region ids to the dense range `1..=count`.
///
/// Ids are handed out in order of the first region carrying them.
pub(crate) fn compact_region_ids(regions: &mut [LayerRegion]) -> usize {
    let mut remap = vec![NULL_REGION; regions.len()];
    let mut next_id = 0u16;
    for i in 0..regions.len() {
        let id = regions[i].id as usize;
        if id == NULL_REGION as usize || id >= remap.len() {
            regions[i].id = NULL_REGION;
            continue;
        }
        if remap[id] == NULL_REGION {
            next_id += 1;
            remap[id] = next_id;
        }
        regions[i].id = remap[id];
    }
    next_id as usize
}

/// Writes the final region ids into `layer.regs`.
pub(crate) fn write_layer_regions(
    layer: &mut TileCacheLayer,
    src_reg: &[u16],
    regions: &[LayerRegion],
    reg_count: usize,
) {
    for (i, dst) in layer.regs.iter_mut().enumerate() {
        let r = src_reg[i] as usize;
        *dst = if layer.areas[i] == TILECACHE_NULL_AREA || r >= regions.len() {
            NULL_REGION
        } else {
            regions[r].id
        };
    }
    layer.reg_count = reg_count;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(id: u16, cells: usize, connections: &[u16]) -> LayerRegion {
        let mut reg = LayerRegion::new(id);
        reg.cell_count = cells;
        reg.area_type = 1;
        reg.connections = connections.to_vec();
        reg
    }

    #[test]
    fn test_remove_small_regions_counts_groups() {
        let mut regions = vec![
            LayerRegion::new(0),
            region(1, 3, &[0, 2]),
            region(2, 3, &[0, 1]),
            region(3, 2, &[0]),
        ];
        remove_small_regions(&mut regions, 5);
        // 1 and 2 form a group of 6 cells.
        assert_eq!(regions[1].id, 1);
        assert_eq!(regions[2].id, 2);
        assert_eq!(regions[3].id, NULL_REGION);
        assert_eq!(regions[3].cell_count, 0);
    }

    #[test]
    fn test_border_regions_survive_filtering() {
        let mut regions = vec![LayerRegion::new(0), region(1, 1, &[0])];
        regions[1].border = true;
        remove_small_regions(&mut regions, 100);
        assert_eq!(regions[1].id, 1);
    }

    #[test]
    fn test_groups_do_not_cross_area_types() {
        let mut regions = vec![
            LayerRegion::new(0),
            region(1, 3, &[2]),
            region(2, 3, &[1]),
        ];
        regions[2].area_type = 2;
        remove_small_regions(&mut regions, 5);
        assert_eq!(regions[1].id, NULL_REGION);
        assert_eq!(regions[2].id, NULL_REGION);
    }

    #[test]
    fn test_compact_region_ids_follows_merges() {
        let mut regions = vec![
            LayerRegion::new(0),
            region(0, 0, &[]),
            region(4, 5, &[]),
            region(3, 5, &[]),
            region(3, 5, &[]),
        ];
        let count = compact_region_ids(&mut regions);
        assert_eq!(count, 2);
        assert_eq!(regions[1].id, 0);
        assert_eq!(regions[2].id, 1);
        assert_eq!(regions[3].id, 2);
        assert_eq!(regions[4].id, 2);
    }
}
