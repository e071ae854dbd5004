//! Region clusters
//!
//! Regions that touch each other are grouped into clusters, the coarse
//! graph used by hierarchical path searches. The region map is derived while
//! tracing contours, the polygon map once the mesh exists.

use crate::alloc::{alloc_buffer, free_buffer, TileCacheAlloc};
use crate::contour::TileCacheContour;
use crate::poly_mesh::TileCachePolyMesh;
use crate::tile_cache_data::TILECACHE_NULL_AREA;
use smallvec::SmallVec;
use tilecache_common::Result;

/// Cluster id of regions and polygons without a cluster
pub const TILECACHE_NULL_CLUSTER: u16 = 0xffff;

/// Neighbouring region ids of one contour
pub(crate) type ContourLinks = SmallVec<[u16; 8]>;

/// Region and polygon to cluster mapping of one tile
#[derive(Debug, Clone, Default)]
pub struct TileCacheClusterSet {
    pub nclusters: usize,
    /// Cluster id of every region id, `0..=reg_count`
    pub reg_map: Vec<u16>,
    /// Cluster id of every polygon, filled by [`build_tile_cache_clusters`]
    pub poly_map: Vec<u16>,
}

impl TileCacheClusterSet {
    /// Number of entries in the region map
    pub fn nregs(&self) -> usize {
        self.reg_map.len()
    }

    pub fn npolys(&self) -> usize {
        self.poly_map.len()
    }

    pub fn release(self, alloc: &mut dyn TileCacheAlloc) {
        free_buffer(alloc, self.reg_map);
        free_buffer(alloc, self.poly_map);
    }
}

#[inline]
fn add_unique(list: &mut Vec<u16>, v: u16) {
    if !list.contains(&v) {
        list.push(v);
    }
}

/// Groups regions transitively over contour adjacency.
///
/// `links[i]` holds the neighbouring region ids of `contours[i]`. Cluster ids
/// are assigned in increasing region id order.
pub(crate) fn derive_region_clusters(
    alloc: &mut dyn TileCacheAlloc,
    reg_count: usize,
    contours: &[TileCacheContour],
    links: &[ContourLinks],
) -> Result<TileCacheClusterSet> {
    let nregs = if reg_count > 0 { reg_count + 1 } else { 0 };
    let mut reg_map = alloc_buffer(alloc, nregs, TILECACHE_NULL_CLUSTER)?;
    let mut nclusters = 0usize;

    let mut nei_regs: Vec<u16> = Vec::with_capacity(nregs);
    let mut new_nei_regs: Vec<u16> = Vec::with_capacity(nregs);

    for reg in 0..nregs {
        if reg_map[reg] != TILECACHE_NULL_CLUSTER {
            continue;
        }

        let cluster_id = nclusters as u16;
        let mut claimed = false;
        nei_regs.clear();

        // A region may own several contours.
        for (cont, cont_links) in contours.iter().zip(links) {
            if cont.reg as usize != reg || cont.area == TILECACHE_NULL_AREA {
                continue;
            }
            if !claimed {
                reg_map[reg] = cluster_id;
                nclusters += 1;
                claimed = true;
            }
            for &nei in cont_links {
                add_unique(&mut nei_regs, nei);
            }
        }

        while !nei_regs.is_empty() {
            new_nei_regs.clear();
            for &nei in &nei_regs {
                let nei = nei as usize;
                if nei >= nregs || reg_map[nei] != TILECACHE_NULL_CLUSTER {
                    continue;
                }
                for (cont, cont_links) in contours.iter().zip(links) {
                    if cont.reg as usize != nei || cont.area == TILECACHE_NULL_AREA {
                        continue;
                    }
                    reg_map[nei] = cluster_id;
                    for &n in cont_links {
                        add_unique(&mut new_nei_regs, n);
                    }
                }
            }
            std::mem::swap(&mut nei_regs, &mut new_nei_regs);
        }
    }

    log::debug!("Grouped {} regions into {} clusters", reg_count, nclusters);
    Ok(TileCacheClusterSet {
        nclusters,
        reg_map,
        poly_map: Vec::new(),
    })
}

/// Maps every polygon of `mesh` to the cluster of its region.
///
/// Polygons whose region lies outside the region map get cluster 0.
pub fn build_tile_cache_clusters(
    alloc: &mut dyn TileCacheAlloc,
    clusters: &mut TileCacheClusterSet,
    mesh: &TileCachePolyMesh,
) -> Result<()> {
    let mut poly_map = alloc_buffer(alloc, mesh.npolys, 0u16)?;
    for (dst, &reg) in poly_map.iter_mut().zip(&mesh.regs[..mesh.npolys]) {
        if let Some(&cluster) = clusters.reg_map.get(reg as usize) {
            *dst = cluster;
        }
    }
    let old = std::mem::replace(&mut clusters.poly_map, poly_map);
    free_buffer(alloc, old);
    Ok(())
}
