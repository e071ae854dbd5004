//! Convex polygon mesh built from layer contours
//!
//! Every contour is ear-clipped into triangles, which are then greedily merged
//! into convex polygons of up to [`MAX_VERTS_PER_POLY`] vertices. Contour
//! vertices flagged for removal are dropped afterwards by re-triangulating the
//! hole they leave, and finally polygon adjacency is computed.

use crate::alloc::{alloc_buffer, alloc_with_capacity, free_buffer, TileCacheAlloc};
use crate::context::TileCacheLogContext;
use crate::contour::{TileCacheContourSet, CONTOUR_NO_PORTAL, CONTOUR_REMOVE_VERTEX};
use crate::tile_cache_data::{MAX_VERTS_PER_POLY, TILECACHE_NULL_AREA, TILECACHE_NULL_IDX};
use smallvec::SmallVec;
use tilecache_common::{intersect, left, left_on, vequal, Result, Status};

const NVP: usize = MAX_VERTS_PER_POLY;

/// Inline capacity of the vertex removal scratch lists
const MAX_REM_EDGES: usize = 48;

const VERTEX_BUCKET_COUNT: usize = 1 << 8;

/// Vertex indices are 16 bit and `0xffff` is the null index
const MAX_MESH_VERTS: usize = 0xfffe;

/// Marks an adjacency slot as a tile portal, the low bits hold the direction
pub const TILECACHE_PORTAL_FLAG: u16 = 0x8000;

/// Ear flag stored in the top bit of a triangulation index
const EAR_FLAG: u16 = 0x8000;

type Poly = [u16; NVP];

/// Polygon mesh of one layer in grid coordinates
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TileCachePolyMesh {
    /// Maximum vertices per polygon
    pub nvp: usize,
    pub nverts: usize,
    pub npolys: usize,
    /// `(x, y, z)` per vertex
    pub verts: Vec<u16>,
    /// `nvp` vertex indices followed by `nvp` neighbour slots per polygon
    pub polys: Vec<u16>,
    /// Per polygon flags, left zeroed for the caller
    pub flags: Vec<u16>,
    pub areas: Vec<u8>,
    pub regs: Vec<u16>,
}

impl Default for TileCachePolyMesh {
    fn default() -> Self {
        Self {
            nvp: NVP,
            nverts: 0,
            npolys: 0,
            verts: Vec::new(),
            polys: Vec::new(),
            flags: Vec::new(),
            areas: Vec::new(),
            regs: Vec::new(),
        }
    }
}

impl TileCachePolyMesh {
    /// Vertex indices and neighbour slots of polygon `i`
    #[inline]
    pub fn poly(&self, i: usize) -> &[u16] {
        &self.polys[i * NVP * 2..(i + 1) * NVP * 2]
    }

    #[inline]
    pub fn vert(&self, i: usize) -> &[u16] {
        &self.verts[i * 3..i * 3 + 3]
    }

    /// Number of vertices of polygon `i`
    pub fn poly_vert_count(&self, i: usize) -> usize {
        count_poly_verts(self.poly(i))
    }

    pub fn release(self, alloc: &mut dyn TileCacheAlloc) {
        free_buffer(alloc, self.verts);
        free_buffer(alloc, self.polys);
        free_buffer(alloc, self.flags);
        free_buffer(alloc, self.areas);
        free_buffer(alloc, self.regs);
    }

    fn poly_mut(&mut self, i: usize) -> &mut [u16] {
        &mut self.polys[i * NVP * 2..(i + 1) * NVP * 2]
    }

    /// Appends a polygon, failing once `max_polys` is reached.
    fn push_poly(&mut self, poly: &Poly, area: u8, reg: u16, max_polys: usize) -> Result<()> {
        if self.npolys >= max_polys {
            return Err(Status::BufferTooSmall);
        }
        let i = self.npolys;
        let dst = self.poly_mut(i);
        dst[..NVP].copy_from_slice(poly);
        dst[NVP..].fill(TILECACHE_NULL_IDX);
        self.areas[i] = area;
        self.regs[i] = reg;
        self.npolys += 1;
        Ok(())
    }

    /// Moves the last polygon into slot `i`.
    fn swap_remove_poly(&mut self, i: usize) {
        let last = self.npolys - 1;
        if i != last {
            self.polys
                .copy_within(last * NVP * 2..(last + 1) * NVP * 2, i * NVP * 2);
            self.areas[i] = self.areas[last];
            self.regs[i] = self.regs[last];
        }
        self.poly_mut(last).fill(TILECACHE_NULL_IDX);
        self.npolys -= 1;
    }
}

#[inline]
fn count_poly_verts(p: &[u16]) -> usize {
    p[..NVP]
        .iter()
        .position(|&v| v == TILECACHE_NULL_IDX)
        .unwrap_or(NVP)
}

#[inline]
fn prev(i: usize, n: usize) -> usize {
    if i > 0 {
        i - 1
    } else {
        n - 1
    }
}

#[inline]
fn next(i: usize, n: usize) -> usize {
    if i + 1 < n {
        i + 1
    } else {
        0
    }
}

fn compute_vertex_hash(x: u16, y: u16, z: u16) -> usize {
    const H1: u32 = 0x8da6b343;
    const H2: u32 = 0xd8163841;
    const H3: u32 = 0xcb1ab31f;
    let n = H1
        .wrapping_mul(x as u32)
        .wrapping_add(H2.wrapping_mul(y as u32))
        .wrapping_add(H3.wrapping_mul(z as u32));
    n as usize & (VERTEX_BUCKET_COUNT - 1)
}

/// Returns the index of the vertex at (`x`, `z`) within 2 height units of `y`, adding it if missing.
///
/// Fails with `BufferTooSmall` once [`MAX_MESH_VERTS`] vertices are stored.
fn add_vertex(
    x: u16,
    y: u16,
    z: u16,
    verts: &mut Vec<u16>,
    first_vert: &mut [u16; VERTEX_BUCKET_COUNT],
    next_vert: &mut [u16],
) -> Result<u16> {
    let bucket = compute_vertex_hash(x, 0, z);
    let mut i = first_vert[bucket];
    while i != TILECACHE_NULL_IDX {
        let v = mesh_vert(verts, i);
        if v[0] == x && v[2] == z && (v[1] as i32 - y as i32).abs() <= 2 {
            return Ok(i);
        }
        i = next_vert[i as usize];
    }

    let count = verts.len() / 3;
    if count >= MAX_MESH_VERTS {
        return Err(Status::BufferTooSmall);
    }
    let i = count as u16;
    verts.extend_from_slice(&[x, y, z]);
    next_vert[i as usize] = first_vert[bucket];
    first_vert[bucket] = i;
    Ok(i)
}

/// Vertex `idx` of a stride-4 vertex array, ignoring the ear flag.
#[inline]
fn tvert(verts: &[u16], idx: u16) -> &[u16] {
    let i = (idx & !EAR_FLAG) as usize * 4;
    &verts[i..i + 4]
}

/// Checks that (i, j) crosses no polygon edge, ignoring edges incident to i and j.
fn diagonalie(i: usize, j: usize, n: usize, verts: &[u16], indices: &[u16]) -> bool {
    let d0 = tvert(verts, indices[i]);
    let d1 = tvert(verts, indices[j]);

    for k in 0..n {
        let k1 = next(k, n);
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = tvert(verts, indices[k]);
        let p1 = tvert(verts, indices[k1]);
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

/// Checks that (i, j) is strictly inside the polygon near vertex i.
fn in_cone(i: usize, j: usize, n: usize, verts: &[u16], indices: &[u16]) -> bool {
    let vi = tvert(verts, indices[i]);
    let vj = tvert(verts, indices[j]);
    let vi1 = tvert(verts, indices[next(i, n)]);
    let vin1 = tvert(verts, indices[prev(i, n)]);

    // Convex vertex
    if left_on(vin1, vi, vi1) {
        return left(vi, vj, vin1) && left(vj, vi, vi1);
    }
    // Reflex vertex
    !(left_on(vi, vj, vi1) && left_on(vj, vi, vin1))
}

#[inline]
fn diagonal(i: usize, j: usize, n: usize, verts: &[u16], indices: &[u16]) -> bool {
    in_cone(i, j, n, verts, indices) && diagonalie(i, j, n, verts, indices)
}

/// Ear-clips the polygon `indices` over `verts` (stride 4), writing triangles to `tris`.
///
/// Always clips the ear with the shortest diagonal. Returns `Err` with the
/// number of triangles produced when no valid ear is left.
fn triangulate(
    verts: &[u16],
    indices: &mut Vec<u16>,
    tris: &mut Vec<u16>,
) -> std::result::Result<usize, usize> {
    tris.clear();
    let mut n = indices.len();

    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if diagonal(i, i2, n, verts, indices) {
            indices[i1] |= EAR_FLAG;
        }
    }

    while n > 3 {
        let mut min_len = -1i32;
        let mut mini = None;
        for i in 0..n {
            let i1 = next(i, n);
            if indices[i1] & EAR_FLAG == 0 {
                continue;
            }
            let p0 = tvert(verts, indices[i]);
            let p2 = tvert(verts, indices[next(i1, n)]);
            let dx = p2[0] as i32 - p0[0] as i32;
            let dz = p2[2] as i32 - p0[2] as i32;
            let len = dx * dx + dz * dz;
            if min_len < 0 || len < min_len {
                min_len = len;
                mini = Some(i);
            }
        }

        let Some(i) = mini else {
            return Err(tris.len() / 3);
        };
        let i1 = next(i, n);
        let i2 = next(i1, n);
        tris.extend_from_slice(&[
            indices[i] & !EAR_FLAG,
            indices[i1] & !EAR_FLAG,
            indices[i2] & !EAR_FLAG,
        ]);

        indices.remove(i1);
        n -= 1;

        let i1 = if i1 >= n { 0 } else { i1 };
        let i = prev(i1, n);
        // Update diagonal flags.
        if diagonal(prev(i, n), i1, n, verts, indices) {
            indices[i] |= EAR_FLAG;
        } else {
            indices[i] &= !EAR_FLAG;
        }
        if diagonal(i, next(i1, n), n, verts, indices) {
            indices[i1] |= EAR_FLAG;
        } else {
            indices[i1] &= !EAR_FLAG;
        }
    }

    tris.extend_from_slice(&[
        indices[0] & !EAR_FLAG,
        indices[1] & !EAR_FLAG,
        indices[2] & !EAR_FLAG,
    ]);
    Ok(tris.len() / 3)
}

#[inline]
fn mesh_vert(verts: &[u16], idx: u16) -> &[u16] {
    &verts[idx as usize * 3..idx as usize * 3 + 3]
}

/// Merge value of `pa` and `pb` with the shared edge indices, `None` when they cannot merge.
///
/// The value is the squared length of the shared edge.
fn get_poly_merge_value(pa: &Poly, pb: &Poly, verts: &[u16]) -> Option<(i32, usize, usize)> {
    let na = count_poly_verts(pa);
    let nb = count_poly_verts(pb);

    // Merged polygon would be too big.
    if na + nb - 2 > NVP {
        return None;
    }

    let mut shared = None;
    for i in 0..na {
        let (mut va0, mut va1) = (pa[i], pa[(i + 1) % na]);
        if va0 > va1 {
            std::mem::swap(&mut va0, &mut va1);
        }
        for j in 0..nb {
            let (mut vb0, mut vb1) = (pb[j], pb[(j + 1) % nb]);
            if vb0 > vb1 {
                std::mem::swap(&mut vb0, &mut vb1);
            }
            if va0 == vb0 && va1 == vb1 {
                shared = Some((i, j));
                break;
            }
        }
    }
    let (ea, eb) = shared?;

    let v = |idx: u16| mesh_vert(verts, idx);

    // The merged polygon must stay convex at both ends of the shared edge.
    let (va, vb, vc) = (pa[(ea + na - 1) % na], pa[ea], pb[(eb + 2) % nb]);
    if !left(v(va), v(vb), v(vc)) {
        return None;
    }
    let (va, vb, vc) = (pb[(eb + nb - 1) % nb], pb[eb], pa[(ea + 2) % na]);
    if !left(v(va), v(vb), v(vc)) {
        return None;
    }

    let (va, vb) = (v(pa[ea]), v(pa[(ea + 1) % na]));
    let dx = va[0] as i32 - vb[0] as i32;
    let dz = va[2] as i32 - vb[2] as i32;
    Some((dx * dx + dz * dz, ea, eb))
}

/// Replaces `pa` with the union of `pa` and `pb` joined across edges `ea` and `eb`.
fn merge_polys(pa: &mut Poly, pb: &Poly, ea: usize, eb: usize) {
    let na = count_poly_verts(pa);
    let nb = count_poly_verts(pb);

    let mut tmp = [TILECACHE_NULL_IDX; NVP];
    let mut n = 0;
    for i in 0..na - 1 {
        tmp[n] = pa[(ea + 1 + i) % na];
        n += 1;
    }
    for i in 0..nb - 1 {
        tmp[n] = pb[(eb + 1 + i) % nb];
        n += 1;
    }
    *pa = tmp;
}

/// Greedily merges the polygons sharing the longest edge until no merge is possible.
///
/// `tags` travel with their polygons.
fn merge_polygons<T: Copy>(polys: &mut Vec<Poly>, tags: &mut Vec<T>, verts: &[u16]) {
    loop {
        let mut best_value = 0;
        let mut best = None;
        for j in 0..polys.len().saturating_sub(1) {
            for k in j + 1..polys.len() {
                if let Some((value, ea, eb)) = get_poly_merge_value(&polys[j], &polys[k], verts) {
                    if value > best_value {
                        best_value = value;
                        best = Some((j, k, ea, eb));
                    }
                }
            }
        }

        let Some((pa, pb, ea, eb)) = best else {
            break;
        };
        let absorbed = polys[pb];
        merge_polys(&mut polys[pa], &absorbed, ea, eb);
        polys.swap_remove(pb);
        tags.swap_remove(pb);
    }
}

/// Edge bookkeeping for vertex removal: `[a, b, area, reg]`
type RemEdge = [u16; 4];

/// Checks whether removing vertex `rem` leaves a hole that can be re-triangulated.
fn can_remove_vertex(mesh: &TileCachePolyMesh, rem: u16) -> bool {
    let mut num_touched_verts = 0;
    let mut num_remaining_edges = 0;
    for i in 0..mesh.npolys {
        let p = mesh.poly(i);
        let nv = count_poly_verts(p);
        let num_removed = p[..nv].iter().filter(|&&v| v == rem).count();
        if num_removed > 0 {
            num_touched_verts += num_removed;
            num_remaining_edges += nv - (num_removed + 1);
        }
    }

    // Too few edges would remain to form a polygon, e.g. the tip of a lone triangle.
    if num_remaining_edges <= 2 {
        return false;
    }
    if num_touched_verts * 2 > MAX_REM_EDGES {
        return false;
    }

    // Edges touching the removed vertex with their share count.
    let mut edges: SmallVec<[[u16; 3]; MAX_REM_EDGES]> = SmallVec::new();
    for i in 0..mesh.npolys {
        let p = mesh.poly(i);
        let nv = count_poly_verts(p);
        let mut k = nv - 1;
        for j in 0..nv {
            if p[j] == rem || p[k] == rem {
                let (mut a, mut b) = (p[j], p[k]);
                if b == rem {
                    std::mem::swap(&mut a, &mut b);
                }
                let mut exists = false;
                for e in edges.iter_mut() {
                    if e[1] == b {
                        e[2] += 1;
                        exists = true;
                    }
                }
                if !exists {
                    edges.push([a, b, 1]);
                }
            }
            k = j;
        }
    }

    // More than two open edges means non-adjacent polygons share the vertex.
    let num_open_edges = edges.iter().filter(|e| e[2] < 2).count();
    num_open_edges <= 2
}

/// Removes vertex `rem` and re-triangulates the hole left by its polygons.
fn remove_vertex(mesh: &mut TileCachePolyMesh, rem: u16, max_polys: usize) -> Result<()> {
    let mut edges: SmallVec<[RemEdge; MAX_REM_EDGES]> = SmallVec::new();

    let mut i = 0;
    while i < mesh.npolys {
        let p = mesh.poly(i);
        let nv = count_poly_verts(p);
        if !p[..nv].contains(&rem) {
            i += 1;
            continue;
        }
        // Keep the edges that do not touch the removed vertex.
        let mut k = nv - 1;
        for j in 0..nv {
            if p[j] != rem && p[k] != rem {
                edges.push([p[k], p[j], mesh.areas[i] as u16, mesh.regs[i]]);
            }
            k = j;
        }
        mesh.swap_remove_poly(i);
    }

    // Remove the vertex and shift the indices above it.
    let r = rem as usize;
    mesh.verts.copy_within((r + 1) * 3..mesh.nverts * 3, r * 3);
    mesh.nverts -= 1;
    mesh.verts.truncate(mesh.nverts * 3);
    for i in 0..mesh.npolys {
        let p = mesh.poly_mut(i);
        let nv = count_poly_verts(p);
        for v in &mut p[..nv] {
            if *v > rem {
                *v -= 1;
            }
        }
    }
    for e in edges.iter_mut() {
        if e[0] > rem {
            e[0] -= 1;
        }
        if e[1] > rem {
            e[1] -= 1;
        }
    }

    if edges.is_empty() {
        return Ok(());
    }

    // Grow the hole boundary from both ends with connected segments.
    let mut hole: SmallVec<[u16; MAX_REM_EDGES]> = SmallVec::new();
    let mut htags: SmallVec<[(u8, u16); MAX_REM_EDGES]> = SmallVec::new();
    hole.push(edges[0][0]);
    htags.push((edges[0][2] as u8, edges[0][3]));

    while !edges.is_empty() {
        let mut matched = false;
        let mut i = 0;
        while i < edges.len() {
            let [ea, eb, area, reg] = edges[i];
            let tag = (area as u8, reg);
            let added = if hole[0] == eb {
                hole.insert(0, ea);
                htags.insert(0, tag);
                true
            } else if hole[hole.len() - 1] == ea {
                hole.push(eb);
                htags.push(tag);
                true
            } else {
                false
            };
            if added {
                edges.swap_remove(i);
                matched = true;
            } else {
                i += 1;
            }
        }
        if !matched {
            break;
        }
    }

    // Degenerate hole.
    if hole.len() < 3 {
        return Ok(());
    }

    let mut tverts: Vec<u16> = Vec::with_capacity(hole.len() * 4);
    for &hi in &hole {
        tverts.extend_from_slice(&mesh.verts[hi as usize * 3..hi as usize * 3 + 3]);
        tverts.push(0);
    }
    let mut tpoly: Vec<u16> = (0..hole.len() as u16).collect();
    let mut tris = Vec::with_capacity(hole.len() * 3);
    if let Err(ntris) = triangulate(&tverts, &mut tpoly, &mut tris) {
        log::warn!(
            "Hole of {} vertices left by vertex {} only yielded {} triangles",
            hole.len(),
            rem,
            ntris
        );
    }

    let mut polys: Vec<Poly> = Vec::with_capacity(tris.len() / 3);
    let mut tags: Vec<(u8, u16)> = Vec::with_capacity(tris.len() / 3);
    for t in tris.chunks_exact(3) {
        if t[0] != t[1] && t[0] != t[2] && t[1] != t[2] {
            let mut poly = [TILECACHE_NULL_IDX; NVP];
            poly[0] = hole[t[0] as usize];
            poly[1] = hole[t[1] as usize];
            poly[2] = hole[t[2] as usize];
            polys.push(poly);
            tags.push(htags[t[0] as usize]);
        }
    }
    if polys.is_empty() {
        return Ok(());
    }

    merge_polygons(&mut polys, &mut tags, &mesh.verts);

    for (poly, &(area, reg)) in polys.iter().zip(&tags) {
        mesh.push_poly(poly, area, reg, max_polys)?;
    }
    Ok(())
}

/// Edge shared by up to two polygons
#[derive(Debug, Clone, Copy)]
struct MeshEdge {
    vert: [u16; 2],
    poly_edge: [u16; 2],
    poly: [u16; 2],
}

#[inline]
fn overlap_range_exclusive(amin: u16, amax: u16, bmin: u16, bmax: u16) -> bool {
    !(amin >= bmax || amax <= bmin)
}

/// Fills the neighbour half of every polygon.
///
/// Open edges that lie on a contour portal get `TILECACHE_PORTAL_FLAG | dir`.
fn build_mesh_adjacency(
    alloc: &mut dyn TileCacheAlloc,
    mesh: &mut TileCachePolyMesh,
    lcset: &TileCacheContourSet,
) -> Result<()> {
    let npolys = mesh.npolys;
    let nverts = mesh.nverts;
    let max_edge_count = npolys * NVP;

    let mut first_edge = alloc_buffer(alloc, nverts, TILECACHE_NULL_IDX)?;
    let mut next_edge = alloc_buffer(alloc, max_edge_count, TILECACHE_NULL_IDX)?;
    let mut edges: Vec<MeshEdge> = alloc_with_capacity(alloc, max_edge_count)?;

    let edge_verts = |p: &[u16], j: usize| -> (u16, u16) {
        let v1 = if j + 1 >= NVP || p[j + 1] == TILECACHE_NULL_IDX {
            p[0]
        } else {
            p[j + 1]
        };
        (p[j], v1)
    };

    for i in 0..npolys {
        let t = mesh.poly(i);
        for j in 0..count_poly_verts(t) {
            let (v0, v1) = edge_verts(t, j);
            if v0 < v1 {
                next_edge[edges.len()] = first_edge[v0 as usize];
                first_edge[v0 as usize] = edges.len() as u16;
                edges.push(MeshEdge {
                    vert: [v0, v1],
                    poly_edge: [j as u16, 0xff],
                    poly: [i as u16, i as u16],
                });
            }
        }
    }

    for i in 0..npolys {
        let t = mesh.poly(i);
        for j in 0..count_poly_verts(t) {
            let (v0, v1) = edge_verts(t, j);
            if v0 <= v1 {
                continue;
            }
            let mut found = false;
            let mut e = first_edge[v1 as usize];
            while e != TILECACHE_NULL_IDX {
                let edge = &mut edges[e as usize];
                if edge.vert[1] == v0 && edge.poly[0] == edge.poly[1] {
                    edge.poly[1] = i as u16;
                    edge.poly_edge[1] = j as u16;
                    found = true;
                    break;
                }
                e = next_edge[e as usize];
            }
            if !found {
                // Open edge.
                next_edge[edges.len()] = first_edge[v1 as usize];
                first_edge[v1 as usize] = edges.len() as u16;
                edges.push(MeshEdge {
                    vert: [v1, v0],
                    poly_edge: [j as u16, 0xff],
                    poly: [i as u16, i as u16],
                });
            }
        }
    }

    // Mark portal edges.
    for cont in &lcset.conts {
        let n = cont.nverts();
        if n < 3 {
            continue;
        }
        let mut k = n - 1;
        for j in 0..n {
            let va = cont.vert(k);
            let vb = cont.vert(j);
            k = j;
            let dir = va[3] & 0xf;
            if dir == CONTOUR_NO_PORTAL {
                continue;
            }

            // Portals in x (dir 0, 2) run along z and vice versa.
            let (axis, span) = if dir == 0 || dir == 2 { (0, 2) } else { (2, 0) };
            let fixed = va[axis];
            let (smin, smax) = (va[span].min(vb[span]), va[span].max(vb[span]));

            for e in edges.iter_mut() {
                if e.poly[0] != e.poly[1] {
                    continue;
                }
                let eva = mesh.vert(e.vert[0] as usize);
                let evb = mesh.vert(e.vert[1] as usize);
                if eva[axis] == fixed && evb[axis] == fixed {
                    let (emin, emax) = (eva[span].min(evb[span]), eva[span].max(evb[span]));
                    if overlap_range_exclusive(smin, smax, emin, emax) {
                        e.poly_edge[1] = dir;
                    }
                }
            }
        }
    }

    // Store adjacency.
    for e in &edges {
        if e.poly[0] != e.poly[1] {
            mesh.poly_mut(e.poly[0] as usize)[NVP + e.poly_edge[0] as usize] = e.poly[1];
            mesh.poly_mut(e.poly[1] as usize)[NVP + e.poly_edge[1] as usize] = e.poly[0];
        } else if e.poly_edge[1] != 0xff {
            mesh.poly_mut(e.poly[0] as usize)[NVP + e.poly_edge[0] as usize] =
                TILECACHE_PORTAL_FLAG | e.poly_edge[1];
        }
    }

    free_buffer(alloc, first_edge);
    free_buffer(alloc, next_edge);
    free_buffer(alloc, edges);
    Ok(())
}

fn report(ctx: &mut Option<&mut dyn TileCacheLogContext>, message: &str) {
    log::error!("{}", message);
    if let Some(ctx) = ctx.as_mut() {
        ctx.log(message);
    }
}

/// Builds the polygon mesh of `lcset`.
///
/// Contours with fewer than 3 vertices or a null area are skipped. A contour
/// that cannot be fully triangulated contributes the triangles found so far.
pub fn build_tile_cache_poly_mesh(
    alloc: &mut dyn TileCacheAlloc,
    mut ctx: Option<&mut dyn TileCacheLogContext>,
    lcset: &TileCacheContourSet,
) -> Result<TileCachePolyMesh> {
    let usable = |i: usize| lcset.conts[i].nverts() >= 3 && lcset.conts[i].area != TILECACHE_NULL_AREA;

    let mut max_vertices = 0;
    let mut max_tris = 0;
    let mut max_verts_per_cont = 0;
    for (i, cont) in lcset.conts.iter().enumerate() {
        if !usable(i) {
            continue;
        }
        max_vertices += cont.nverts();
        max_tris += cont.nverts() - 2;
        max_verts_per_cont = max_verts_per_cont.max(cont.nverts());
    }

    let mut mesh = TileCachePolyMesh {
        nvp: NVP,
        nverts: 0,
        npolys: 0,
        verts: alloc_with_capacity(alloc, max_vertices * 3)?,
        polys: alloc_buffer(alloc, max_tris * NVP * 2, TILECACHE_NULL_IDX)?,
        flags: alloc_buffer(alloc, max_tris, 0u16)?,
        areas: alloc_buffer(alloc, max_tris, 0u8)?,
        regs: alloc_buffer(alloc, max_tris, TILECACHE_NULL_IDX)?,
    };

    let mut vflags = alloc_buffer(alloc, max_vertices, false)?;
    let mut first_vert = [TILECACHE_NULL_IDX; VERTEX_BUCKET_COUNT];
    let mut next_vert = alloc_buffer(alloc, max_vertices, 0u16)?;
    let mut indices: Vec<u16> = alloc_with_capacity(alloc, max_verts_per_cont)?;
    let mut tris: Vec<u16> = alloc_with_capacity(alloc, max_verts_per_cont * 3)?;
    let mut polys: Vec<Poly> = alloc_with_capacity(alloc, max_verts_per_cont)?;
    let mut tags: Vec<()> = Vec::new();

    for (ci, cont) in lcset.conts.iter().enumerate() {
        if !usable(ci) {
            continue;
        }
        let nverts = cont.nverts();

        indices.clear();
        indices.extend(0..nverts as u16);
        if let Err(ntris) = triangulate(&cont.verts, &mut indices, &mut tris) {
            log::warn!(
                "Contour {} of region {}: triangulation stopped after {} of {} triangles",
                ci,
                cont.reg,
                ntris,
                nverts - 2
            );
        }

        // Add and merge vertices.
        indices.clear();
        for j in 0..nverts {
            let v = cont.vert(j);
            let idx = add_vertex(v[0], v[1], v[2], &mut mesh.verts, &mut first_vert, &mut next_vert)
                .map_err(|status| {
                    report(
                        &mut ctx,
                        &format!("Too many vertices at contour {}: limit {}", ci, MAX_MESH_VERTS),
                    );
                    status
                })?;
            if v[3] & CONTOUR_REMOVE_VERTEX != 0 {
                vflags[idx as usize] = true;
            }
            indices.push(idx);
        }
        mesh.nverts = mesh.verts.len() / 3;

        polys.clear();
        for t in tris.chunks_exact(3) {
            if t[0] != t[1] && t[0] != t[2] && t[1] != t[2] {
                let mut poly = [TILECACHE_NULL_IDX; NVP];
                poly[0] = indices[t[0] as usize];
                poly[1] = indices[t[1] as usize];
                poly[2] = indices[t[2] as usize];
                polys.push(poly);
            }
        }
        if polys.is_empty() {
            continue;
        }

        tags.clear();
        tags.resize(polys.len(), ());
        merge_polygons(&mut polys, &mut tags, &mesh.verts);

        for poly in &polys {
            if mesh.push_poly(poly, cont.area, cont.reg, max_tris).is_err() {
                report(
                    &mut ctx,
                    &format!("Can't store polygons: {} polygons exceed limit {}", mesh.npolys + 1, max_tris),
                );
                return Err(Status::BufferTooSmall);
            }
        }
    }

    free_buffer(alloc, next_vert);
    free_buffer(alloc, indices);
    free_buffer(alloc, tris);
    free_buffer(alloc, polys);

    // Remove edge vertices.
    let mut i = 0;
    while i < mesh.nverts {
        if !vflags[i] || !can_remove_vertex(&mesh, i as u16) {
            i += 1;
            continue;
        }
        if let Err(status) = remove_vertex(&mut mesh, i as u16, max_tris) {
            report(
                &mut ctx,
                &format!("Vertex removal: too many polygons {} (max {})", mesh.npolys + 1, max_tris),
            );
            return Err(status);
        }
        vflags.remove(i);
    }
    free_buffer(alloc, vflags);

    build_mesh_adjacency(alloc, &mut mesh, lcset)?;

    mesh.polys.truncate(mesh.npolys * NVP * 2);
    mesh.flags.truncate(mesh.npolys);
    mesh.areas.truncate(mesh.npolys);
    mesh.regs.truncate(mesh.npolys);

    log::debug!(
        "Poly mesh: {} vertices, {} polygons from {} contours",
        mesh.nverts,
        mesh.npolys,
        lcset.nconts()
    );
    Ok(mesh)
}
