//! Region contour tracing and simplification
//!
//! Each region's outline is walked cell edge by cell edge, simplified, and
//! stored as `(x, y, z, flags)` vertices in grid units. The flag byte holds
//! the portal direction of the edge that starts at the vertex (`0x0f` for
//! none) and `0x80` when the vertex may be removed during meshing.

use crate::alloc::{alloc_buffer, alloc_with_capacity, free_buffer, grow_buffer, TileCacheAlloc};
use crate::cluster::{derive_region_clusters, ContourLinks, TileCacheClusterSet};
use crate::tile_cache_data::{TileCacheLayer, TILECACHE_NULL_AREA, TILECACHE_UNSET_REGION};
use tilecache_common::{dir_offset_x, dir_offset_y, Result, Status};

/// Neighbour id of an edge that leads nowhere
const SOLID_EDGE: u16 = 0xffff;
/// Neighbour ids at or above this value encode a portal direction
const PORTAL_EDGE: u16 = 0xf800;

/// Flag value of a vertex whose edge is not a portal
pub const CONTOUR_NO_PORTAL: u16 = 0x0f;
/// Vertex may be dropped by the polygon mesh builder
pub const CONTOUR_REMOVE_VERTEX: u16 = 0x80;

/// Simplified outline of one region
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TileCacheContour {
    /// `(x, y, z, flags)` per vertex
    pub verts: Vec<u16>,
    pub reg: u16,
    pub area: u8,
}

impl TileCacheContour {
    pub fn nverts(&self) -> usize {
        self.verts.len() / 4
    }

    #[inline]
    pub fn vert(&self, i: usize) -> &[u16] {
        &self.verts[i * 4..i * 4 + 4]
    }
}

/// All contours of one layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileCacheContourSet {
    pub conts: Vec<TileCacheContour>,
}

impl TileCacheContourSet {
    pub fn nconts(&self) -> usize {
        self.conts.len()
    }

    pub fn release(mut self, alloc: &mut dyn TileCacheAlloc) {
        for cont in self.conts.drain(..) {
            free_buffer(alloc, cont.verts);
        }
        free_buffer(alloc, self.conts);
    }
}

/// Scratch buffers for one contour walk
struct TempContour {
    /// `(x, y, z, neighbour region, neighbour area)` per raw vertex
    verts: Vec<u16>,
    /// Indices of the kept vertices
    poly: Vec<u16>,
    max_verts: usize,
}

impl TempContour {
    fn nverts(&self) -> usize {
        self.verts.len() / 5
    }

    fn vert(&self, i: usize) -> &[u16] {
        &self.verts[i * 5..i * 5 + 5]
    }

    /// Adds a raw vertex, extending the previous one when all three are axis aligned.
    ///
    /// Returns false when the scratch capacity is exhausted.
    fn append_vertex(&mut self, x: u16, y: u16, z: u16, reg: u16, area: u8) -> bool {
        let n = self.nverts();
        if n > 1 {
            let (pa, pb) = self.verts[(n - 2) * 5..n * 5].split_at_mut(5);
            if pb[3] == reg {
                if pa[0] == pb[0] && pb[0] == x {
                    // Aligned along x, update z.
                    pb[1] = y;
                    pb[2] = z;
                    return true;
                } else if pa[2] == pb[2] && pb[2] == z {
                    // Aligned along z, update x.
                    pb[0] = x;
                    pb[1] = y;
                    return true;
                }
            }
        }

        if n + 1 > self.max_verts {
            return false;
        }
        self.verts.extend_from_slice(&[x, y, z, reg, area as u16]);
        true
    }
}

/// Region and area across edge `dir` of cell (`x`, `y`).
fn neighbour_reg_and_area(layer: &TileCacheLayer, x: usize, y: usize, dir: usize) -> (u16, u8) {
    let w = layer.width();
    let idx = x + y * w;
    if !layer.is_connected(idx, dir) {
        if layer.portal_mask(idx) & (1 << dir) != 0 {
            return (PORTAL_EDGE + dir as u16, 0);
        }
        return (SOLID_EDGE, 0);
    }
    let nx = (x as i32 + dir_offset_x(dir)) as usize;
    let ny = (y as i32 + dir_offset_y(dir)) as usize;
    let nidx = nx + ny * w;
    (layer.regs[nidx], layer.areas[nidx])
}

/// Traces the outline starting at cell `idx`, consuming its boundary flags.
///
/// Returns false when the outline does not fit the scratch buffer.
fn walk_contour(
    layer: &TileCacheLayer,
    mut x: usize,
    mut y: usize,
    mut idx: usize,
    flags: &mut [u8],
    cont: &mut TempContour,
) -> bool {
    let w = layer.width();
    let h = layer.height();

    let mut dir = 0usize;
    while flags[idx] & (1 << dir) == 0 {
        dir += 1;
    }

    let start_dir = dir;
    let start_idx = idx;
    cont.verts.clear();

    let max_iter = w * h * 2;
    let mut iter = 0;
    while iter < max_iter {
        let (nei_reg, nei_area) = neighbour_reg_and_area(layer, x, y, dir);

        let mut nx = x;
        let mut ny = y;
        let ndir;

        if nei_reg != layer.regs[idx] {
            // Solid edge, emit the corner at the start of the edge.
            let (px, pz) = match dir {
                0 => (x, y + 1),
                1 => (x + 1, y + 1),
                2 => (x + 1, y),
                _ => (x, y),
            };
            if !cont.append_vertex(px as u16, layer.heights[idx], pz as u16, nei_reg, nei_area) {
                return false;
            }
            flags[idx] &= !(1 << dir);
            ndir = (dir + 1) & 0x3;
        } else {
            nx = (x as i32 + dir_offset_x(dir)) as usize;
            ny = (y as i32 + dir_offset_y(dir)) as usize;
            ndir = (dir + 3) & 0x3;
        }

        if iter > 0 && idx == start_idx && dir == start_dir {
            break;
        }

        x = nx;
        y = ny;
        dir = ndir;
        idx = x + y * w;
        iter += 1;
    }

    if iter >= max_iter {
        log::warn!(
            "Contour walk from cell {} gave up after {} steps",
            start_idx,
            max_iter
        );
    }

    // Remove last vertex if it is duplicate of the first one.
    let n = cont.nverts();
    if n > 1 {
        let (first, last) = (cont.vert(0), cont.vert(n - 1));
        if first[0] == last[0] && first[2] == last[2] {
            cont.verts.truncate((n - 1) * 5);
        }
    }
    true
}

/// Squared distance from (`x`, `z`) to segment p-q.
fn distance_pt_seg(x: i32, z: i32, px: i32, pz: i32, qx: i32, qz: i32) -> f32 {
    let pqx = (qx - px) as f32;
    let pqz = (qz - pz) as f32;
    let mut dx = (x - px) as f32;
    let mut dz = (z - pz) as f32;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);

    dx = px as f32 + t * pqx - x as f32;
    dz = pz as f32 + t * pqz - z as f32;
    dx * dx + dz * dz
}

/// Reduces the raw outline in `cont` to the vertices needed within `max_error`.
fn simplify_contour(area: u8, cont: &mut TempContour, max_error: f32) {
    cont.poly.clear();
    let nverts = cont.nverts();
    if nverts < 2 {
        // Corrupted, drop it.
        cont.verts.clear();
        return;
    }

    // Seed with the vertices where the neighbour changes.
    for i in 0..nverts {
        let j = (i + 1) % nverts;
        if cont.vert(j)[3] != cont.vert(i)[3] {
            cont.poly.push(i as u16);
        }
    }

    if cont.poly.len() < 2 {
        // No transitions, use the lower-left and upper-right vertices.
        let (mut llx, mut llz, mut lli) = (cont.verts[0], cont.verts[2], 0);
        let (mut urx, mut urz, mut uri) = (cont.verts[0], cont.verts[2], 0);
        for i in 1..nverts {
            let v = cont.vert(i);
            let (x, z) = (v[0], v[2]);
            if x < llx || (x == llx && z < llz) {
                llx = x;
                llz = z;
                lli = i;
            }
            if x > urx || (x == urx && z > urz) {
                urx = x;
                urz = z;
                uri = i;
            }
        }
        cont.poly.clear();
        cont.poly.push(lli as u16);
        cont.poly.push(uri as u16);
    }

    // Add points until all raw points are within tolerance.
    let max_error_sqr = max_error * max_error;
    let mut i = 0;
    while i < cont.poly.len() {
        let ii = (i + 1) % cont.poly.len();

        let ai = cont.poly[i] as usize;
        let ax = cont.verts[ai * 5] as i32;
        let az = cont.verts[ai * 5 + 2] as i32;

        let bi = cont.poly[ii] as usize;
        let bx = cont.verts[bi * 5] as i32;
        let bz = cont.verts[bi * 5 + 2] as i32;

        // Walk the segment in lexicographic order so opposite segments
        // produce the same deviation.
        let (mut ci, cinc, endi) = if bx > ax || (bx == ax && bz > az) {
            ((ai + 1) % nverts, 1, bi)
        } else {
            ((bi + nverts - 1) % nverts, nverts - 1, ai)
        };

        let mut maxd = 0.0f32;
        let mut maxi = None;

        // Tessellate only outer edges or edges between areas.
        let ci_reg = cont.verts[ci * 5 + 3];
        let ci_area = cont.verts[ci * 5 + 4] as u8;
        if area != ci_area || ci_reg == SOLID_EDGE {
            while ci != endi {
                let d = distance_pt_seg(
                    cont.verts[ci * 5] as i32,
                    cont.verts[ci * 5 + 2] as i32,
                    ax,
                    az,
                    bx,
                    bz,
                );
                if d > maxd {
                    maxd = d;
                    maxi = Some(ci);
                }
                ci = (ci + cinc) % nverts;
            }
        }

        match maxi {
            Some(mi) if maxd > max_error_sqr => cont.poly.insert(i + 1, mi as u16),
            _ => i += 1,
        }
    }

    // Rotate so the lowest raw index comes first, dropping zero-length segments.
    let npoly = cont.poly.len();
    let mut start = 0;
    for i in 1..npoly {
        if cont.poly[i] < cont.poly[start] {
            start = i;
        }
    }

    let mut simplified: Vec<u16> = Vec::with_capacity(npoly * 5);
    for i in 0..npoly {
        let src = cont.vert(cont.poly[(start + i) % npoly] as usize);
        let next = cont.vert(cont.poly[(start + i + 1) % npoly] as usize);
        if src[0] == next[0] && src[2] == next[2] {
            continue;
        }
        simplified.extend_from_slice(src);
    }
    cont.verts.clear();
    cont.verts.extend_from_slice(&simplified);
}

/// Height of the corner at grid point (`x`, `z`) and whether it may be removed.
///
/// The height is the highest of the up to four cells around the corner that
/// lie within `walkable_climb` of `y`. A corner is removable when the cells
/// around it belong to one region and share a single portal direction.
fn get_corner_height(
    layer: &TileCacheLayer,
    x: i32,
    y: i32,
    z: i32,
    walkable_climb: i32,
) -> (u16, bool) {
    let w = layer.width() as i32;
    let h = layer.height() as i32;

    let mut n = 0;
    let mut portal = 0xfu8;
    let mut height = 0u16;
    let mut preg = TILECACHE_UNSET_REGION;
    let mut all_same_reg = true;

    for dz in -1..=0 {
        for dx in -1..=0 {
            let px = x + dx;
            let pz = z + dz;
            if px < 0 || pz < 0 || px >= w || pz >= h {
                continue;
            }
            let idx = (px + pz * w) as usize;
            let lh = layer.heights[idx] as i32;
            if (lh - y).abs() <= walkable_climb && layer.areas[idx] != TILECACHE_NULL_AREA {
                height = height.max(lh as u16);
                portal &= layer.portal_mask(idx);
                if preg != TILECACHE_UNSET_REGION && preg != layer.regs[idx] {
                    all_same_reg = false;
                }
                preg = layer.regs[idx];
                n += 1;
            }
        }
    }

    let should_remove = n > 1 && portal.count_ones() == 1 && all_same_reg;
    (height, should_remove)
}

/// Twice the signed area of the xz outline, halved with rounding. Negative when backwards.
fn calc_area_of_polygon_2d(verts: &[u16]) -> i32 {
    let nverts = verts.len() / 4;
    let mut area = 0i32;
    let mut j = nverts.wrapping_sub(1);
    for i in 0..nverts {
        let vi = &verts[i * 4..];
        let vj = &verts[j * 4..];
        area += vi[0] as i32 * vj[2] as i32 - vj[0] as i32 * vi[2] as i32;
        j = i;
    }
    (area + 1) / 2
}

#[inline]
fn ileft(a: &[u16], b: &[u16], c: &[u16]) -> bool {
    let (ax, az) = (a[0] as i32, a[2] as i32);
    (b[0] as i32 - ax) * (c[2] as i32 - az) - (c[0] as i32 - ax) * (b[2] as i32 - az) <= 0
}

/// Closest pair (`ia` in `a`, `ib` in `b`) where `b[ib]` lies inside the corner at `a[ia]`.
fn get_closest_indices(a: &TileCacheContour, b: &TileCacheContour) -> Option<(usize, usize, i32)> {
    let na = a.nverts();
    let nb = b.nverts();
    let mut best: Option<(usize, usize, i32)> = None;
    for i in 0..na {
        let va = a.vert(i);
        let van = a.vert((i + 1) % na);
        let vap = a.vert((i + na - 1) % na);
        for j in 0..nb {
            let vb = b.vert(j);
            if ileft(vap, va, vb) && ileft(va, van, vb) {
                let dx = vb[0] as i32 - va[0] as i32;
                let dz = vb[2] as i32 - va[2] as i32;
                let d = dx * dx + dz * dz;
                if best.map_or(true, |(_, _, bd)| d < bd) {
                    best = Some((i, j, d));
                }
            }
        }
    }
    best
}

/// Splices `cb` into `ca` at vertices `ia` and `ib`, leaving `cb` empty.
fn merge_contours(
    alloc: &mut dyn TileCacheAlloc,
    ca: &mut TileCacheContour,
    cb: &mut TileCacheContour,
    ia: usize,
    ib: usize,
) -> Result<()> {
    let na = ca.nverts();
    let nb = cb.nverts();
    let mut verts = alloc_with_capacity(alloc, (na + nb + 2) * 4)?;

    for i in 0..=na {
        verts.extend_from_slice(ca.vert((ia + i) % na));
    }
    for i in 0..=nb {
        verts.extend_from_slice(cb.vert((ib + i) % nb));
    }

    free_buffer(alloc, std::mem::replace(&mut ca.verts, verts));
    free_buffer(alloc, std::mem::take(&mut cb.verts));
    Ok(())
}

/// Marks, per cell, the edges that do not lead into the same region.
fn mark_boundary_flags(layer: &TileCacheLayer, flags: &mut [u8]) {
    let w = layer.width();
    let h = layer.height();
    for y in 0..h {
        for x in 0..w {
            let idx = x + y * w;
            let ri = layer.regs[idx];
            if ri == TILECACHE_UNSET_REGION {
                flags[idx] = 0;
                continue;
            }

            let mut res = 0u8;
            for dir in 0..4 {
                let mut r = SOLID_EDGE;
                if layer.is_connected(idx, dir) {
                    let ax = x as i32 + dir_offset_x(dir);
                    let ay = y as i32 + dir_offset_y(dir);
                    if ax >= 0 && ay >= 0 && (ax as usize) < w && (ay as usize) < h {
                        r = layer.regs[ax as usize + ay as usize * w];
                    }
                }
                if r == ri {
                    res |= 1 << dir;
                }
            }
            // Inverse, mark non connected edges.
            flags[idx] = res ^ 0xf;
        }
    }
}

/// Traces the region outlines of `layer` and groups its regions into clusters.
///
/// `walkable_climb` is in height units, `max_error` in cells. Backwards
/// contours (holes traced as separate outlines of a split region) are
/// spliced into another contour of the same region.
///
/// There are no cell size or cell height parameters: contour vertices stay in
/// grid units and world scaling is left to the detail mesh stage.
pub fn build_tile_cache_contours(
    alloc: &mut dyn TileCacheAlloc,
    layer: &TileCacheLayer,
    walkable_climb: i32,
    max_error: f32,
) -> Result<(TileCacheContourSet, TileCacheClusterSet)> {
    let w = layer.width();
    let h = layer.height();

    let max_temp_verts = w * h;
    let mut temp = TempContour {
        verts: alloc_with_capacity(alloc, max_temp_verts * 5)?,
        poly: alloc_with_capacity(alloc, max_temp_verts)?,
        max_verts: max_temp_verts,
    };
    let mut flags = alloc_buffer(alloc, w * h, 0u8)?;
    mark_boundary_flags(layer, &mut flags);

    let mut conts: Vec<TileCacheContour> = alloc_with_capacity(alloc, layer.reg_count)?;
    let mut links: Vec<ContourLinks> = alloc_with_capacity(alloc, layer.reg_count)?;

    for y in 0..h {
        for x in 0..w {
            let idx = x + y * w;
            if flags[idx] == 0 || flags[idx] == 0xf {
                flags[idx] = 0;
                continue;
            }

            let ri = layer.regs[idx];
            if ri == TILECACHE_UNSET_REGION || ri == 0 {
                continue;
            }

            if !walk_contour(layer, x, y, idx, &mut flags, &mut temp) {
                log::error!(
                    "Contour of region {} exceeds {} vertices",
                    ri,
                    max_temp_verts
                );
                return Err(Status::BufferTooSmall);
            }

            simplify_contour(layer.areas[idx], &mut temp, max_error);

            let nverts = temp.nverts();
            let mut verts = alloc_buffer(alloc, nverts * 4, 0u16)?;
            let mut cont_links = ContourLinks::new();

            let mut j = nverts.wrapping_sub(1);
            for i in 0..nverts {
                let v = temp.vert(j);
                // The neighbour region is stored on the vertex that ends the segment.
                let nei = temp.vert(i)[3];
                let (lh, should_remove) =
                    get_corner_height(layer, v[0] as i32, v[1] as i32, v[2] as i32, walkable_climb);

                if nei != SOLID_EDGE && nei & PORTAL_EDGE == 0 {
                    cont_links.push(nei);
                }

                let mut flag = CONTOUR_NO_PORTAL;
                if nei != SOLID_EDGE && nei >= PORTAL_EDGE {
                    flag = nei - PORTAL_EDGE;
                }
                if should_remove {
                    flag |= CONTOUR_REMOVE_VERTEX;
                }

                verts[j * 4..j * 4 + 4].copy_from_slice(&[v[0], lh, v[2], flag]);
                j = i;
            }

            grow_buffer(alloc, &mut conts, 1, 16)?;
            grow_buffer(alloc, &mut links, 1, 16)?;
            conts.push(TileCacheContour {
                verts,
                reg: ri,
                area: layer.areas[idx],
            });
            links.push(cont_links);
        }
    }

    free_buffer(alloc, temp.verts);
    free_buffer(alloc, temp.poly);
    free_buffer(alloc, flags);

    merge_backwards_contours(alloc, &mut conts)?;

    let clusters = derive_region_clusters(alloc, layer.reg_count, &conts, &links)?;
    free_buffer(alloc, links);

    log::debug!(
        "Traced {} contours for {} regions ({} vertices)",
        conts.len(),
        layer.reg_count,
        conts.iter().map(|c| c.nverts()).sum::<usize>()
    );
    Ok((TileCacheContourSet { conts }, clusters))
}

/// Splices every backwards contour into the closest contour of the same region.
fn merge_backwards_contours(
    alloc: &mut dyn TileCacheAlloc,
    conts: &mut [TileCacheContour],
) -> Result<()> {
    for i in 0..conts.len() {
        if calc_area_of_polygon_2d(&conts[i].verts) >= 0 {
            continue;
        }

        // Several islands may share the region, pick the closest.
        let mut merge: Option<(usize, usize, usize, i32)> = None;
        for j in 0..conts.len() {
            if i == j || conts[j].nverts() == 0 || conts[j].reg != conts[i].reg {
                continue;
            }
            if let Some((ia, ib, d)) = get_closest_indices(&conts[j], &conts[i]) {
                if merge.map_or(true, |(_, _, _, bd)| d < bd) {
                    merge = Some((j, ia, ib, d));
                }
            }
        }

        match merge {
            Some((j, ia, ib, _)) => {
                let (ca, cb) = pair_mut(conts, j, i);
                merge_contours(alloc, ca, cb, ia, ib)?;
            }
            None => log::warn!(
                "Backwards contour of region {} has no partner to merge with",
                conts[i].reg
            ),
        }
    }
    Ok(())
}

/// Mutable references to two distinct elements.
fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    if a < b {
        let (lo, hi) = items.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = items.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::HeapAllocator;
    use crate::test_helpers::{add_edge_portals, flat_layer, set_null_area};

    /// Assigns every walkable cell to region 1.
    fn single_region(layer: &mut TileCacheLayer) {
        for i in 0..layer.regs.len() {
            layer.regs[i] = if layer.areas[i] == TILECACHE_NULL_AREA { 0 } else { 1 };
        }
        layer.reg_count = 1;
    }

    #[test]
    fn test_square_contour() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 8, 8);
        single_region(&mut layer);

        let (cset, clusters) = build_tile_cache_contours(&mut alloc, &layer, 1, 1.3).unwrap();
        assert_eq!(cset.nconts(), 1);
        let cont = &cset.conts[0];
        assert_eq!(cont.reg, 1);
        assert_eq!(cont.nverts(), 4);

        let mut corners: Vec<(u16, u16)> = (0..4).map(|i| (cont.vert(i)[0], cont.vert(i)[2])).collect();
        corners.sort();
        assert_eq!(corners, vec![(0, 0), (0, 8), (8, 0), (8, 8)]);
        for i in 0..4 {
            assert_eq!(cont.vert(i)[3], CONTOUR_NO_PORTAL);
        }
        assert!(calc_area_of_polygon_2d(&cont.verts) > 0);

        assert_eq!(clusters.nclusters, 1);
        assert_eq!(clusters.reg_map[1], 0);
    }

    #[test]
    fn test_portal_edges_are_flagged() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 4, 4);
        add_edge_portals(&mut layer);
        single_region(&mut layer);

        let (cset, _) = build_tile_cache_contours(&mut alloc, &layer, 1, 1.3).unwrap();
        let cont = &cset.conts[0];
        let mut dirs: Vec<u16> = (0..cont.nverts()).map(|i| cont.vert(i)[3] & 0x0f).collect();
        dirs.sort();
        dirs.dedup();
        assert_eq!(dirs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_two_regions_link_into_one_cluster() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 8, 4);
        for y in 0..4 {
            for x in 0..8 {
                layer.regs[x + y * 8] = if x < 4 { 1 } else { 2 };
            }
        }
        layer.reg_count = 2;

        let (cset, clusters) = build_tile_cache_contours(&mut alloc, &layer, 1, 1.3).unwrap();
        assert_eq!(cset.nconts(), 2);
        assert_eq!(clusters.nclusters, 1);
        assert_eq!(clusters.reg_map[1], clusters.reg_map[2]);
    }

    #[test]
    fn test_disjoint_regions_get_own_clusters() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 9, 4);
        set_null_area(&mut layer, 4, 0, 5, 4);
        for y in 0..4 {
            for x in 0..9 {
                let idx = x + y * 9;
                layer.regs[idx] = match x {
                    0..=3 => 1,
                    4 => 0,
                    _ => 2,
                };
            }
        }
        layer.reg_count = 2;

        let (cset, clusters) = build_tile_cache_contours(&mut alloc, &layer, 1, 1.3).unwrap();
        assert_eq!(cset.nconts(), 2);
        assert_eq!(clusters.nclusters, 2);
        assert_ne!(clusters.reg_map[1], clusters.reg_map[2]);
    }

    #[test]
    fn test_contours_are_closed_without_duplicates() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 10, 10);
        set_null_area(&mut layer, 3, 3, 6, 6);
        single_region(&mut layer);

        let (cset, _) = build_tile_cache_contours(&mut alloc, &layer, 1, 0.5).unwrap();
        for cont in &cset.conts {
            let n = cont.nverts();
            for i in 0..n {
                let a = cont.vert(i);
                let b = cont.vert((i + 1) % n);
                assert!(a[0] != b[0] || a[2] != b[2], "duplicate vertex at {i}");
            }
        }
    }

    #[test]
    fn test_hole_is_spliced_into_outline() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 10, 10);
        set_null_area(&mut layer, 3, 3, 6, 6);
        single_region(&mut layer);

        let (cset, _) = build_tile_cache_contours(&mut alloc, &layer, 1, 1.3).unwrap();
        // The hole is traced backwards and merged into the outer outline.
        let non_empty: Vec<&TileCacheContour> = cset.conts.iter().filter(|c| c.nverts() > 0).collect();
        assert_eq!(non_empty.len(), 1);
        assert_eq!(non_empty[0].nverts(), 4 + 4 + 2);
    }

    #[test]
    fn test_corner_height_takes_highest_cell() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 4, 4);
        single_region(&mut layer);
        layer.heights[1 + 1 * 4] = 2;
        let (height, remove) = get_corner_height(&layer, 2, 0, 2, 4);
        assert_eq!(height, 2);
        assert!(!remove);

        // Out of climb range, ignored.
        let (height, _) = get_corner_height(&layer, 2, 0, 2, 1);
        assert_eq!(height, 0);
    }

    #[test]
    fn test_corner_on_single_portal_is_removable() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 4, 4);
        add_edge_portals(&mut layer);
        single_region(&mut layer);
        // Corner between cells (1,0) and (2,0) on the -z edge.
        let (_, remove) = get_corner_height(&layer, 2, 0, 0, 1);
        assert!(remove);
        // Corner between cells (1,1), (2,1), (1,2) and (2,2) has no portal.
        let (_, remove) = get_corner_height(&layer, 2, 0, 2, 1);
        assert!(!remove);
        // Tile corner touches a single cell.
        let (_, remove) = get_corner_height(&layer, 0, 0, 0, 1);
        assert!(!remove);
    }

    #[test]
    fn test_outline_longer_than_cell_count_is_buffer_too_small() {
        // The four corners of a 3x1 strip do not fit a three vertex scratch buffer.
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 3, 1);
        single_region(&mut layer);

        let result = build_tile_cache_contours(&mut alloc, &layer, 1, 1.3);
        assert_eq!(result.unwrap_err(), Status::BufferTooSmall);
    }

    #[test]
    fn test_distance_pt_seg() {
        assert_eq!(distance_pt_seg(0, 1, 0, 0, 2, 0), 1.0);
        assert_eq!(distance_pt_seg(3, 0, 0, 0, 2, 0), 1.0);
        assert_eq!(distance_pt_seg(1, 0, 0, 0, 2, 0), 0.0);
    }

    #[test]
    fn test_polygon_area_sign() {
        let ccw = [0, 0, 0, 0, 0, 0, 4, 0, 4, 0, 4, 0, 4, 0, 0, 0];
        let cw = [0, 0, 0, 0, 4, 0, 0, 0, 4, 0, 4, 0, 0, 0, 4, 0];
        assert!(calc_area_of_polygon_2d(&ccw) != 0);
        assert_eq!(
            calc_area_of_polygon_2d(&ccw).signum(),
            -calc_area_of_polygon_2d(&cw).signum()
        );
    }
}
