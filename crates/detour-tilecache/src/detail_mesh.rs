//! Height detail for the polygon mesh
//!
//! Every polygon gets a small triangle mesh that follows the layer surface:
//! boundary edges are tessellated and simplified first, so neighbouring
//! polygons agree on shared edges, then interior samples with the largest
//! height error are inserted into a Delaunay triangulation.

use std::collections::VecDeque;

use crate::alloc::{alloc_buffer, alloc_with_capacity, free_buffer, grow_buffer, TileCacheAlloc};
use crate::poly_mesh::TileCachePolyMesh;
use crate::tile_cache_data::{TileCacheLayer, TILECACHE_NULL_AREA, TILECACHE_NULL_IDX};
use smallvec::SmallVec;
use tilecache_common::{dir_offset_x, dir_offset_y, dist_point_segment_sqr_2d, sqr, Result, Status};

/// Marks a height patch cell that no flood fill reached
const UNSET_HEIGHT: u16 = 0xffff;

const MAX_VERTS: usize = 127;
/// Max triangles per polygon, Delaunay yields at most 2n-2-k
const MAX_TRIS: usize = 255;
const MAX_VERTS_PER_EDGE: usize = 32;

/// Output arrays grow by this many elements
const GROWTH_STEP: usize = 256;

const EV_UNDEF: i32 = -1;
const EV_HULL: i32 = -2;

/// Radius band treated as "on" the circumcircle when completing facets
const CIRCLE_TOLERANCE: f32 = 0.005;

/// Detail triangles of every polygon of a [`TileCachePolyMesh`]
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TileCachePolyMeshDetail {
    /// `(vert_base, vert_count, tri_base, tri_count)` per polygon
    pub meshes: Vec<u32>,
    /// World space `(x, y, z)` per vertex
    pub verts: Vec<f32>,
    /// Three local vertex indices and an edge flag byte per triangle
    pub tris: Vec<u8>,
    pub nmeshes: usize,
    pub nverts: usize,
    pub ntris: usize,
}

impl TileCachePolyMeshDetail {
    /// Sub-mesh header of polygon `i`
    #[inline]
    pub fn mesh(&self, i: usize) -> &[u32] {
        &self.meshes[i * 4..i * 4 + 4]
    }

    #[inline]
    pub fn vert(&self, i: usize) -> &[f32] {
        &self.verts[i * 3..i * 3 + 3]
    }

    #[inline]
    pub fn tri(&self, i: usize) -> &[u8] {
        &self.tris[i * 4..i * 4 + 4]
    }

    pub fn release(self, alloc: &mut dyn TileCacheAlloc) {
        free_buffer(alloc, self.meshes);
        free_buffer(alloc, self.verts);
        free_buffer(alloc, self.tris);
    }
}

/// Layer heights around one polygon
struct HeightPatch {
    data: Vec<u16>,
    xmin: i32,
    ymin: i32,
    width: i32,
    height: i32,
}

impl HeightPatch {
    #[inline]
    fn index(&self, x: i32, y: i32) -> usize {
        ((x - self.xmin) + (y - self.ymin) * self.width) as usize
    }

    #[inline]
    fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.xmin && x < self.xmin + self.width && y >= self.ymin && y < self.ymin + self.height
    }

    fn cells(&mut self) -> &mut [u16] {
        let n = (self.width * self.height) as usize;
        &mut self.data[..n]
    }
}

/// Flood fills the layer heights under `poly` into `hp`.
///
/// The fill is seeded at the layer cells closest to the polygon vertices and
/// first walks towards the polygon centre, so that the real fill starts on
/// the surface the polygon was built from and not on a layer overlapping it.
fn get_height_data(
    layer: &TileCacheLayer,
    poly: &[u16],
    verts: &[u16],
    hp: &mut HeightPatch,
    stack: &mut Vec<(i32, i32)>,
    queue: &mut VecDeque<(i32, i32)>,
) {
    const OFFSET: [(i32, i32); 9] = [
        (0, 0),
        (-1, -1),
        (0, -1),
        (1, -1),
        (1, 0),
        (1, 1),
        (0, 1),
        (-1, 1),
        (-1, 0),
    ];

    let w = layer.width() as i32;
    let cell = |x: i32, y: i32| (x + y * w) as usize;

    hp.cells().fill(0);
    stack.clear();

    let mut seeds: SmallVec<[(i32, i32); 8]> = SmallVec::new();
    for &vi in poly {
        let v = &verts[vi as usize * 3..vi as usize * 3 + 3];
        let mut best = None;
        let mut dmin = UNSET_HEIGHT as i32;
        for &(ox, oy) in &OFFSET {
            let ax = v[0] as i32 + ox;
            let ay = v[2] as i32 + oy;
            if !hp.contains(ax, ay) || layer.areas[cell(ax, ay)] == TILECACHE_NULL_AREA {
                continue;
            }
            let d = (v[1] as i32 - layer.heights[cell(ax, ay)] as i32).abs();
            if d < dmin {
                dmin = d;
                best = Some((ax, ay));
            }
        }
        if let Some(seed) = best {
            seeds.push(seed);
        }
    }

    let npoly = poly.len() as i32;
    let (mut pcx, mut pcy) = (0i32, 0i32);
    for &vi in poly {
        pcx += verts[vi as usize * 3] as i32;
        pcy += verts[vi as usize * 3 + 2] as i32;
    }
    pcx /= npoly;
    pcy /= npoly;

    for &(x, y) in &seeds {
        let idx = hp.index(x, y);
        hp.data[idx] = 1;
        stack.push((x, y));
    }

    // Walk to the centre of the polygon.
    let mut center = None;
    while let Some((cx, cy)) = stack.pop() {
        if (cx - pcx).abs() <= 1 && (cy - pcy).abs() <= 1 {
            center = Some((cx, cy));
            break;
        }
        let ci = cell(cx, cy);
        for dir in 0..4 {
            if !layer.is_connected(ci, dir) {
                continue;
            }
            let ax = cx + dir_offset_x(dir);
            let ay = cy + dir_offset_y(dir);
            if !hp.contains(ax, ay) {
                continue;
            }
            let idx = hp.index(ax, ay);
            if hp.data[idx] != 0 {
                continue;
            }
            hp.data[idx] = 1;
            stack.push((ax, ay));
        }
    }

    hp.cells().fill(UNSET_HEIGHT);
    queue.clear();
    match center {
        Some(c) => queue.push_back(c),
        None => queue.extend(seeds.iter().copied()),
    }
    for &(x, y) in queue.iter() {
        let idx = hp.index(x, y);
        hp.data[idx] = layer.heights[cell(x, y)];
    }

    while let Some((cx, cy)) = queue.pop_front() {
        let ci = cell(cx, cy);
        for dir in 0..4 {
            if !layer.is_connected(ci, dir) {
                continue;
            }
            let ax = cx + dir_offset_x(dir);
            let ay = cy + dir_offset_y(dir);
            if !hp.contains(ax, ay) {
                continue;
            }
            let idx = hp.index(ax, ay);
            if hp.data[idx] != UNSET_HEIGHT {
                continue;
            }
            hp.data[idx] = layer.heights[cell(ax, ay)];
            queue.push_back((ax, ay));
        }
    }
}

/// Patch height at a local position, in cells.
///
/// Unset cells borrow the closest valid 8-neighbour height, falling back to `fy`.
fn get_height(fx: f32, fy: f32, fz: f32, ics: f32, ch: f32, hp: &HeightPatch) -> u16 {
    let ix = ((fx * ics + 0.01).floor() as i32 - hp.xmin).clamp(0, hp.width - 1);
    let iz = ((fz * ics + 0.01).floor() as i32 - hp.ymin).clamp(0, hp.height - 1);
    let h = hp.data[(ix + iz * hp.width) as usize];
    if h != UNSET_HEIGHT {
        return h;
    }

    const OFFSET: [(i32, i32); 8] = [
        (-1, 0),
        (-1, -1),
        (0, -1),
        (1, -1),
        (1, 0),
        (1, 1),
        (0, 1),
        (-1, 1),
    ];
    let mut best = None;
    let mut dmin = f32::MAX;
    for &(ox, oz) in &OFFSET {
        let nx = ix + ox;
        let nz = iz + oz;
        if nx < 0 || nz < 0 || nx >= hp.width || nz >= hp.height {
            continue;
        }
        let nh = hp.data[(nx + nz * hp.width) as usize];
        if nh == UNSET_HEIGHT {
            continue;
        }
        let d = (nh as f32 * ch - fy).abs();
        if d < dmin {
            dmin = d;
            best = Some(nh);
        }
    }
    best.unwrap_or_else(|| (fy / ch).floor().max(0.0) as u16)
}

#[inline]
fn vdot2(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    a[0] * b[0] + a[2] * b[2]
}

#[inline]
fn vdist2(p: &[f32; 3], q: &[f32; 3]) -> f32 {
    let dx = q[0] - p[0];
    let dz = q[2] - p[2];
    (dx * dx + dz * dz).sqrt()
}

#[inline]
fn vcross2(p1: &[f32; 3], p2: &[f32; 3], p3: &[f32; 3]) -> f32 {
    let u1 = p2[0] - p1[0];
    let v1 = p2[2] - p1[2];
    let u2 = p3[0] - p1[0];
    let v2 = p3[2] - p1[2];
    u1 * v2 - v1 * u2
}

#[inline]
fn vsub(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Circumcircle centre and radius in the xz plane, `None` for collinear points
fn circum_circle(p1: &[f32; 3], p2: &[f32; 3], p3: &[f32; 3]) -> Option<([f32; 3], f32)> {
    const EPS: f32 = 1e-6;
    let cp = vcross2(p1, p2, p3);
    if cp.abs() <= EPS {
        return None;
    }
    let p1sq = vdot2(p1, p1);
    let p2sq = vdot2(p2, p2);
    let p3sq = vdot2(p3, p3);
    let c = [
        (p1sq * (p2[2] - p3[2]) + p2sq * (p3[2] - p1[2]) + p3sq * (p1[2] - p2[2])) / (2.0 * cp),
        0.0,
        (p1sq * (p3[0] - p2[0]) + p2sq * (p1[0] - p3[0]) + p3sq * (p2[0] - p1[0])) / (2.0 * cp),
    ];
    let r = vdist2(&c, p1);
    Some((c, r))
}

/// Vertical distance from `p` to triangle `abc`, `None` if `p` is outside it in xz
fn dist_pt_tri(p: &[f32; 3], a: &[f32; 3], b: &[f32; 3], c: &[f32; 3]) -> Option<f32> {
    const EPS: f32 = 1e-4;
    let v0 = vsub(c, a);
    let v1 = vsub(b, a);
    let v2 = vsub(p, a);

    let dot00 = vdot2(&v0, &v0);
    let dot01 = vdot2(&v0, &v1);
    let dot02 = vdot2(&v0, &v2);
    let dot11 = vdot2(&v1, &v1);
    let dot12 = vdot2(&v1, &v2);

    let denom = dot00 * dot11 - dot01 * dot01;
    if denom.abs() < f32::EPSILON {
        return None;
    }
    let inv_denom = 1.0 / denom;
    let u = (dot11 * dot02 - dot01 * dot12) * inv_denom;
    let v = (dot00 * dot12 - dot01 * dot02) * inv_denom;

    if u >= -EPS && v >= -EPS && (u + v) <= 1.0 + EPS {
        let y = a[1] + v0[1] * u + v1[1] * v;
        return Some((y - p[1]).abs());
    }
    None
}

/// Squared 3D distance from `pt` to segment `pq`
fn dist_pt_seg(pt: &[f32; 3], p: &[f32; 3], q: &[f32; 3]) -> f32 {
    let pq = vsub(q, p);
    let d = vsub(pt, p);
    let len = pq[0] * pq[0] + pq[1] * pq[1] + pq[2] * pq[2];
    let mut t = pq[0] * d[0] + pq[1] * d[1] + pq[2] * d[2];
    if len > 0.0 {
        t /= len;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = p[0] + t * pq[0] - pt[0];
    let dy = p[1] + t * pq[1] - pt[1];
    let dz = p[2] + t * pq[2] - pt[2];
    dx * dx + dy * dy + dz * dz
}

/// Smallest vertical distance from `p` to the triangles, `None` when no triangle covers `p`
fn dist_to_tri_mesh(p: &[f32; 3], verts: &[[f32; 3]], tris: &[[i32; 3]]) -> Option<f32> {
    tris.iter()
        .filter_map(|t| {
            dist_pt_tri(
                p,
                &verts[t[0] as usize],
                &verts[t[1] as usize],
                &verts[t[2] as usize],
            )
        })
        .min_by(|a, b| a.total_cmp(b))
}

/// Squared distance to the polygon boundary, negative inside
fn dist_to_poly(verts: &[[f32; 3]], p: &[f32; 3]) -> f32 {
    let mut dmin = f32::MAX;
    let mut inside = false;
    let n = verts.len();
    let mut j = n - 1;
    for i in 0..n {
        let vi = &verts[i];
        let vj = &verts[j];
        if (vi[2] > p[2]) != (vj[2] > p[2])
            && p[0] < (vj[0] - vi[0]) * (p[2] - vi[2]) / (vj[2] - vi[2]) + vi[0]
        {
            inside = !inside;
        }
        dmin = dmin.min(dist_point_segment_sqr_2d(p, vj, vi));
        j = i;
    }
    if inside {
        -dmin
    } else {
        dmin
    }
}

/// Delaunay edge: `[s, t, left face, right face]`
type DelaunayEdge = [i32; 4];

fn find_edge(edges: &[DelaunayEdge], s: i32, t: i32) -> Option<usize> {
    edges
        .iter()
        .position(|e| (e[0] == s && e[1] == t) || (e[0] == t && e[1] == s))
}

fn add_edge(edges: &mut Vec<DelaunayEdge>, max_edges: usize, s: i32, t: i32, l: i32, r: i32) {
    if edges.len() >= max_edges {
        log::error!("Delaunay: too many edges ({}/{})", edges.len(), max_edges);
        return;
    }
    if find_edge(edges, s, t).is_none() {
        edges.push([s, t, l, r]);
    }
}

fn update_left_face(e: &mut DelaunayEdge, s: i32, t: i32, f: i32) {
    if e[0] == s && e[1] == t && e[2] == EV_UNDEF {
        e[2] = f;
    } else if e[1] == s && e[0] == t && e[3] == EV_UNDEF {
        e[3] = f;
    }
}

fn overlap_seg_seg_2d(a: &[f32; 3], b: &[f32; 3], c: &[f32; 3], d: &[f32; 3]) -> bool {
    let a1 = vcross2(a, b, d);
    let a2 = vcross2(a, b, c);
    if a1 * a2 < 0.0 {
        let a3 = vcross2(c, d, a);
        let a4 = a3 + a2 - a1;
        if a3 * a4 < 0.0 {
            return true;
        }
    }
    false
}

fn overlap_edges(pts: &[[f32; 3]], edges: &[DelaunayEdge], s1: i32, t1: i32) -> bool {
    edges.iter().any(|e| {
        let (s0, t0) = (e[0], e[1]);
        // Same or connected edges do not overlap.
        if s0 == s1 || s0 == t1 || t0 == s1 || t0 == t1 {
            return false;
        }
        overlap_seg_seg_2d(
            &pts[s0 as usize],
            &pts[t0 as usize],
            &pts[s1 as usize],
            &pts[t1 as usize],
        )
    })
}

/// Closes the open side of edge `e` with the point whose circumcircle is empty.
fn complete_facet(
    pts: &[[f32; 3]],
    edges: &mut Vec<DelaunayEdge>,
    max_edges: usize,
    nfaces: &mut i32,
    e: usize,
) {
    const EPS: f32 = 1e-5;

    let edge = edges[e];
    let (s, t) = if edge[2] == EV_UNDEF {
        (edge[0], edge[1])
    } else if edge[3] == EV_UNDEF {
        (edge[1], edge[0])
    } else {
        return;
    };
    let ps = &pts[s as usize];
    let pt_t = &pts[t as usize];

    // Best point on the left of the edge.
    let mut best = None;
    let mut c = [0.0f32; 3];
    let mut r = -1.0f32;
    for u in 0..pts.len() as i32 {
        if u == s || u == t {
            continue;
        }
        let pu = &pts[u as usize];
        if vcross2(ps, pt_t, pu) <= EPS {
            continue;
        }
        if r < 0.0 {
            best = Some(u);
            if let Some((cc, rr)) = circum_circle(ps, pt_t, pu) {
                c = cc;
                r = rr;
            } else {
                c = *ps;
                r = 0.0;
            }
            continue;
        }
        let d = vdist2(&c, pu);
        if d > r * (1.0 + CIRCLE_TOLERANCE) {
            // Outside the current circumcircle.
            continue;
        }
        if d >= r * (1.0 - CIRCLE_TOLERANCE)
            && (overlap_edges(pts, edges, s, u) || overlap_edges(pts, edges, t, u))
        {
            // On the circle, and the new edges would cross existing ones.
            continue;
        }
        best = Some(u);
        if let Some((cc, rr)) = circum_circle(ps, pt_t, pu) {
            c = cc;
            r = rr;
        }
    }

    let Some(pt) = best else {
        update_left_face(&mut edges[e], s, t, EV_HULL);
        return;
    };

    update_left_face(&mut edges[e], s, t, *nfaces);

    match find_edge(edges, pt, s) {
        Some(ei) => update_left_face(&mut edges[ei], pt, s, *nfaces),
        None => add_edge(edges, max_edges, pt, s, *nfaces, EV_UNDEF),
    }
    match find_edge(edges, t, pt) {
        Some(ei) => update_left_face(&mut edges[ei], t, pt, *nfaces),
        None => add_edge(edges, max_edges, t, pt, *nfaces, EV_UNDEF),
    }
    *nfaces += 1;
}

/// Delaunay triangulation of `pts` bounded by `hull`
fn delaunay_hull(
    alloc: &mut dyn TileCacheAlloc,
    pts: &[[f32; 3]],
    hull: &[usize],
    tris: &mut Vec<[i32; 3]>,
    edges: &mut Vec<DelaunayEdge>,
) -> Result<()> {
    tris.clear();
    edges.clear();
    if hull.len() < 3 {
        return Ok(());
    }

    let max_edges = (pts.len() * 10).min(edges.capacity());
    let mut nfaces = 0i32;

    let mut j = hull.len() - 1;
    for i in 0..hull.len() {
        add_edge(edges, max_edges, hull[j] as i32, hull[i] as i32, EV_HULL, EV_UNDEF);
        j = i;
    }

    let mut current = 0;
    while current < edges.len() {
        if edges[current][2] == EV_UNDEF {
            complete_facet(pts, edges, max_edges, &mut nfaces, current);
        }
        if edges[current][3] == EV_UNDEF {
            complete_facet(pts, edges, max_edges, &mut nfaces, current);
        }
        current += 1;
    }

    grow_buffer(alloc, tris, nfaces as usize, GROWTH_STEP)?;
    tris.resize(nfaces as usize, [-1; 3]);
    for e in edges.iter() {
        if e[3] >= 0 {
            // Left face
            let t = &mut tris[e[3] as usize];
            if t[0] == -1 {
                t[0] = e[0];
                t[1] = e[1];
            } else if t[0] == e[1] {
                t[2] = e[0];
            } else if t[1] == e[0] {
                t[2] = e[1];
            }
        }
        if e[2] >= 0 {
            // Right
            let t = &mut tris[e[2] as usize];
            if t[0] == -1 {
                t[0] = e[1];
                t[1] = e[0];
            } else if t[0] == e[0] {
                t[2] = e[1];
            } else if t[1] == e[1] {
                t[2] = e[0];
            }
        }
    }

    let mut i = 0;
    while i < tris.len() {
        let t = tris[i];
        if t.contains(&-1) {
            log::warn!(
                "Delaunay: removing dangling face {} [{}, {}, {}]",
                i,
                t[0],
                t[1],
                t[2]
            );
            tris.swap_remove(i);
        } else {
            i += 1;
        }
    }
    Ok(())
}

/// Builds the detail triangles of one polygon into `verts` and `tris`.
#[allow(clippy::too_many_arguments)]
fn build_poly_detail(
    alloc: &mut dyn TileCacheAlloc,
    input: &[[f32; 3]],
    sample_dist: f32,
    sample_max_error: f32,
    ch: f32,
    ics: f32,
    hp: &HeightPatch,
    verts: &mut Vec<[f32; 3]>,
    tris: &mut Vec<[i32; 3]>,
    edges: &mut Vec<DelaunayEdge>,
    samples: &mut Vec<[i32; 4]>,
) -> Result<()> {
    let nin = input.len();
    let mut edge = [[0.0f32; 3]; MAX_VERTS_PER_EDGE + 1];
    let mut hull: SmallVec<[usize; MAX_VERTS]> = SmallVec::new();

    verts.clear();
    verts.extend_from_slice(input);

    if sample_dist > 0.0 {
        // Tessellate outlines, every edge in the same direction so neighbours agree.
        let mut j = nin - 1;
        for i in 0..nin {
            let (mut vj, mut vi) = (&input[j], &input[i]);
            let swapped = if (vj[0] - vi[0]).abs() < 1e-6 {
                vj[2] > vi[2]
            } else {
                vj[0] > vi[0]
            };
            if swapped {
                std::mem::swap(&mut vj, &mut vi);
            }

            let dx = vi[0] - vj[0];
            let dy = vi[1] - vj[1];
            let dz = vi[2] - vj[2];
            let d = (dx * dx + dz * dz).sqrt();
            let mut nn = 1 + (d / sample_dist).floor() as usize;
            nn = nn.min(MAX_VERTS_PER_EDGE - 1);
            if verts.len() + nn >= MAX_VERTS {
                nn = (MAX_VERTS - 1).saturating_sub(verts.len()).max(1);
            }

            for (k, pos) in edge.iter_mut().enumerate().take(nn + 1) {
                let u = k as f32 / nn as f32;
                pos[0] = vj[0] + dx * u;
                pos[1] = vj[1] + dy * u;
                pos[2] = vj[2] + dz * u;
                pos[1] = get_height(pos[0], pos[1], pos[2], ics, ch, hp) as f32 * ch;
            }

            // Douglas-Peucker against the max error.
            let mut idx = [0usize; MAX_VERTS_PER_EDGE];
            idx[1] = nn;
            let mut nidx = 2;
            let mut k = 0;
            while k < nidx - 1 {
                let a = idx[k];
                let b = idx[k + 1];
                let mut maxd = 0.0;
                let mut maxi = None;
                for m in a + 1..b {
                    let dev = dist_pt_seg(&edge[m], &edge[a], &edge[b]);
                    if dev > maxd {
                        maxd = dev;
                        maxi = Some(m);
                    }
                }
                match maxi {
                    Some(m) if maxd > sqr(sample_max_error) && nidx < MAX_VERTS_PER_EDGE => {
                        idx.copy_within(k + 1..nidx, k + 2);
                        idx[k + 1] = m;
                        nidx += 1;
                    }
                    _ => k += 1,
                }
            }

            hull.push(j);
            if swapped {
                for k in (1..nidx - 1).rev() {
                    hull.push(verts.len());
                    verts.push(edge[idx[k]]);
                }
            } else {
                for &k in &idx[1..nidx - 1] {
                    hull.push(verts.len());
                    verts.push(edge[k]);
                }
            }
            j = i;
        }
    } else {
        hull.extend(0..nin);
    }

    delaunay_hull(alloc, verts, &hull, tris, edges)?;

    if tris.is_empty() {
        log::warn!(
            "Detail mesh: could not triangulate polygon ({} verts), adding default data",
            verts.len()
        );
        grow_buffer(alloc, tris, verts.len(), GROWTH_STEP)?;
        for i in 2..verts.len() as i32 {
            tris.push([0, i - 1, i]);
        }
        return Ok(());
    }

    if sample_dist > 0.0 {
        let mut bmin = input[0];
        let mut bmax = input[0];
        for v in &input[1..] {
            for c in 0..3 {
                bmin[c] = bmin[c].min(v[c]);
                bmax[c] = bmax[c].max(v[c]);
            }
        }
        let x0 = (bmin[0] / sample_dist).floor() as i32;
        let x1 = (bmax[0] / sample_dist).ceil() as i32;
        let z0 = (bmin[2] / sample_dist).floor() as i32;
        let z1 = (bmax[2] / sample_dist).ceil() as i32;

        samples.clear();
        for z in z0..z1 {
            for x in x0..x1 {
                let pt = [
                    x as f32 * sample_dist,
                    (bmax[1] + bmin[1]) * 0.5,
                    z as f32 * sample_dist,
                ];
                // Keep samples away from the boundary.
                if dist_to_poly(input, &pt) > -sample_dist / 2.0 {
                    continue;
                }
                grow_buffer(alloc, samples, 1, GROWTH_STEP)?;
                let h = get_height(pt[0], pt[1], pt[2], ics, ch, hp);
                samples.push([x, h as i32, z, 0]);
            }
        }

        // Insert the sample with the largest error until all are within tolerance.
        for _ in 0..samples.len() {
            if verts.len() >= MAX_VERTS {
                break;
            }

            let mut best_pt = [0.0f32; 3];
            let mut best_d = 0.0;
            let mut best = None;
            for (i, s) in samples.iter().enumerate() {
                if s[3] != 0 {
                    continue;
                }
                let pt = [
                    s[0] as f32 * sample_dist,
                    s[1] as f32 * ch,
                    s[2] as f32 * sample_dist,
                ];
                let Some(d) = dist_to_tri_mesh(&pt, verts, tris) else {
                    continue;
                };
                if d > best_d {
                    best_d = d;
                    best = Some(i);
                    best_pt = pt;
                }
            }

            let Some(besti) = best else {
                break;
            };
            if best_d <= sample_max_error {
                break;
            }
            samples[besti][3] = 1;
            verts.push(best_pt);

            // Retriangulate with the new sample.
            delaunay_hull(alloc, verts, &hull, tris, edges)?;
        }
    }

    if tris.len() > MAX_TRIS {
        log::error!(
            "Detail mesh: shrinking triangle count from {} to max {}",
            tris.len(),
            MAX_TRIS
        );
        tris.truncate(MAX_TRIS);
    }
    Ok(())
}

/// Returns 1 when edge `va`-`vb` lies on the polygon boundary.
fn get_edge_flags(va: &[f32; 3], vb: &[f32; 3], vpoly: &[[f32; 3]]) -> u8 {
    let thr_sqr = sqr(0.001f32);
    let n = vpoly.len();
    let mut j = n - 1;
    for i in 0..n {
        if dist_point_segment_sqr_2d(va, &vpoly[j], &vpoly[i]) < thr_sqr
            && dist_point_segment_sqr_2d(vb, &vpoly[j], &vpoly[i]) < thr_sqr
        {
            return 1;
        }
        j = i;
    }
    0
}

/// Packs the boundary flag of each triangle edge into two bits.
fn get_tri_flags(va: &[f32; 3], vb: &[f32; 3], vc: &[f32; 3], vpoly: &[[f32; 3]]) -> u8 {
    get_edge_flags(va, vb, vpoly)
        | get_edge_flags(vb, vc, vpoly) << 2
        | get_edge_flags(vc, va, vpoly) << 4
}

/// Builds the detail mesh of `mesh` over the heights of `layer`.
///
/// Vertices are emitted in world space, relative to the layer's `bmin` and
/// lifted by one cell height. A `sample_dist` of zero disables tessellation.
pub fn build_tile_cache_poly_mesh_detail(
    alloc: &mut dyn TileCacheAlloc,
    cs: f32,
    ch: f32,
    sample_dist: f32,
    sample_max_error: f32,
    layer: &TileCacheLayer,
    mesh: &TileCachePolyMesh,
) -> Result<TileCachePolyMeshDetail> {
    if cs <= 0.0 || ch <= 0.0 {
        return Err(Status::InvalidParam);
    }
    let mut dmesh = TileCachePolyMeshDetail::default();
    if mesh.nverts == 0 || mesh.npolys == 0 {
        return Ok(dmesh);
    }

    let nvp = mesh.nvp;
    let orig = layer.header.bmin;
    let ics = 1.0 / cs;
    let width = layer.width() as i32;
    let height = layer.height() as i32;

    // Patch bounds of every polygon.
    let mut bounds = alloc_buffer(alloc, mesh.npolys * 4, 0i32)?;
    let mut npoly_verts = 0;
    let mut maxhw = 0;
    let mut maxhh = 0;
    for i in 0..mesh.npolys {
        let p = &mesh.poly(i)[..nvp];
        let (mut xmin, mut xmax, mut ymin, mut ymax) = (width, 0, height, 0);
        for &vi in p.iter().take_while(|&&v| v != TILECACHE_NULL_IDX) {
            let v = mesh.vert(vi as usize);
            xmin = xmin.min(v[0] as i32);
            xmax = xmax.max(v[0] as i32);
            ymin = ymin.min(v[2] as i32);
            ymax = ymax.max(v[2] as i32);
            npoly_verts += 1;
        }
        xmin = (xmin - 1).max(0);
        xmax = (xmax + 1).min(width);
        ymin = (ymin - 1).max(0);
        ymax = (ymax + 1).min(height);
        bounds[i * 4..i * 4 + 4].copy_from_slice(&[xmin, xmax, ymin, ymax]);
        if xmin >= xmax || ymin >= ymax {
            continue;
        }
        maxhw = maxhw.max(xmax - xmin);
        maxhh = maxhh.max(ymax - ymin);
    }

    let mut hp = HeightPatch {
        data: alloc_buffer(alloc, (maxhw * maxhh) as usize, 0u16)?,
        xmin: 0,
        ymin: 0,
        width: 0,
        height: 0,
    };

    let vcap = npoly_verts + npoly_verts / 2;
    let tcap = vcap * 2;
    dmesh.nmeshes = mesh.npolys;
    dmesh.meshes = alloc_buffer(alloc, mesh.npolys * 4, 0u32)?;
    dmesh.verts = alloc_with_capacity(alloc, vcap * 3)?;
    dmesh.tris = alloc_with_capacity(alloc, tcap * 4)?;

    let mut stack: Vec<(i32, i32)> = alloc_with_capacity(alloc, (maxhw * maxhh) as usize)?;
    let mut queue: VecDeque<(i32, i32)> = VecDeque::new();
    let mut verts: Vec<[f32; 3]> = alloc_with_capacity(alloc, MAX_VERTS)?;
    let mut tris: Vec<[i32; 3]> = alloc_with_capacity(alloc, MAX_TRIS)?;
    let mut edges: Vec<DelaunayEdge> = alloc_with_capacity(alloc, MAX_VERTS * 10)?;
    let mut samples: Vec<[i32; 4]> = alloc_with_capacity(alloc, GROWTH_STEP)?;
    let mut poly: SmallVec<[[f32; 3]; 8]> = SmallVec::new();

    for i in 0..mesh.npolys {
        let p = &mesh.poly(i)[..nvp];
        let npoly = p.iter().take_while(|&&v| v != TILECACHE_NULL_IDX).count();
        if npoly < 3 {
            continue;
        }
        let p = &p[..npoly];

        poly.clear();
        for &vi in p {
            let v = mesh.vert(vi as usize);
            poly.push([v[0] as f32 * cs, v[1] as f32 * ch, v[2] as f32 * cs]);
        }

        hp.xmin = bounds[i * 4];
        hp.ymin = bounds[i * 4 + 2];
        hp.width = bounds[i * 4 + 1] - bounds[i * 4];
        hp.height = bounds[i * 4 + 3] - bounds[i * 4 + 2];
        if hp.width <= 0 || hp.height <= 0 {
            continue;
        }
        get_height_data(layer, p, &mesh.verts, &mut hp, &mut stack, &mut queue);

        build_poly_detail(
            alloc,
            &poly,
            sample_dist,
            sample_max_error,
            ch,
            ics,
            &hp,
            &mut verts,
            &mut tris,
            &mut edges,
            &mut samples,
        )?;

        let mesh_base = i * 4;
        dmesh.meshes[mesh_base] = dmesh.nverts as u32;
        dmesh.meshes[mesh_base + 1] = verts.len() as u32;
        dmesh.meshes[mesh_base + 2] = dmesh.ntris as u32;
        dmesh.meshes[mesh_base + 3] = tris.len() as u32;

        grow_buffer(alloc, &mut dmesh.verts, verts.len() * 3, GROWTH_STEP * 3)?;
        for v in verts.iter() {
            dmesh.verts.extend_from_slice(&[
                v[0] + orig[0],
                v[1] + orig[1] + ch,
                v[2] + orig[2],
            ]);
        }
        dmesh.nverts += verts.len();

        grow_buffer(alloc, &mut dmesh.tris, tris.len() * 4, GROWTH_STEP * 4)?;
        for t in tris.iter() {
            let flags = get_tri_flags(
                &verts[t[0] as usize],
                &verts[t[1] as usize],
                &verts[t[2] as usize],
                &poly,
            );
            dmesh
                .tris
                .extend_from_slice(&[t[0] as u8, t[1] as u8, t[2] as u8, flags]);
        }
        dmesh.ntris += tris.len();
    }

    free_buffer(alloc, bounds);
    free_buffer(alloc, hp.data);
    free_buffer(alloc, stack);
    free_buffer(alloc, verts);
    free_buffer(alloc, tris);
    free_buffer(alloc, edges);
    free_buffer(alloc, samples);

    log::debug!(
        "Detail mesh: {} vertices, {} triangles for {} polygons",
        dmesh.nverts,
        dmesh.ntris,
        dmesh.nmeshes
    );
    Ok(dmesh)
}
