//! 2D geometry predicates on the XZ plane
//!
//! The integer predicates operate on quantized grid vertices stored as
//! `[x, y, z, ..]` slices, so they accept contour vertices (stride 4) and
//! mesh vertices (stride 3) alike. The `y` component is ignored.

/// Twice the signed area of the triangle (a, b, c) on the XZ plane.
#[inline]
pub fn area2(a: &[u16], b: &[u16], c: &[u16]) -> i32 {
    (b[0] as i32 - a[0] as i32) * (c[2] as i32 - a[2] as i32)
        - (c[0] as i32 - a[0] as i32) * (b[2] as i32 - a[2] as i32)
}

/// Returns true iff c is strictly to the left of the directed line through a to b.
#[inline]
pub fn left(a: &[u16], b: &[u16], c: &[u16]) -> bool {
    area2(a, b, c) < 0
}

/// Returns true iff c is to the left of, or on, the directed line through a to b.
#[inline]
pub fn left_on(a: &[u16], b: &[u16], c: &[u16]) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
pub fn collinear(a: &[u16], b: &[u16], c: &[u16]) -> bool {
    area2(a, b, c) == 0
}

/// Returns true iff ab properly intersects cd: they share a point interior
/// to both segments. Collinear configurations are excluded.
pub fn intersect_prop(a: &[u16], b: &[u16], c: &[u16], d: &[u16]) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// Returns true iff (a, b, c) are collinear and c lies on the closed segment ab.
pub fn between(a: &[u16], b: &[u16], c: &[u16]) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    // If ab not vertical, check betweenness on x; else on z.
    if a[0] != b[0] {
        (a[0] <= c[0] && c[0] <= b[0]) || (a[0] >= c[0] && c[0] >= b[0])
    } else {
        (a[2] <= c[2] && c[2] <= b[2]) || (a[2] >= c[2] && c[2] >= b[2])
    }
}

/// Returns true iff segments ab and cd intersect, properly or improperly.
pub fn intersect(a: &[u16], b: &[u16], c: &[u16], d: &[u16]) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

/// Checks whether two grid vertices share the same XZ position
#[inline]
pub fn vequal(a: &[u16], b: &[u16]) -> bool {
    a[0] == b[0] && a[2] == b[2]
}

/// Calculate the squared distance from a point to a line segment on the XZ plane.
pub fn dist_point_segment_sqr_2d(p: &[f32], a: &[f32], b: &[f32]) -> f32 {
    let pqx = b[0] - a[0];
    let pqz = b[2] - a[2];
    let mut dx = p[0] - a[0];
    let mut dz = p[2] - a[2];
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);
    dx = a[0] + t * pqx - p[0];
    dz = a[2] + t * pqz - p[2];
    dx * dx + dz * dz
}

/// Check if a point is inside a 2D polygon (on XZ plane).
///
/// Uses the even-odd crossing rule; `verts` holds `nverts` points with stride 3.
pub fn point_in_polygon_2d(p: &[f32], verts: &[f32], nverts: usize) -> bool {
    let mut inside = false;
    let mut j = nverts.wrapping_sub(1);
    for i in 0..nverts {
        let vi = &verts[i * 3..i * 3 + 3];
        let vj = &verts[j * 3..j * 3 + 3];
        if ((vi[2] > p[2]) != (vj[2] > p[2]))
            && (p[0] < (vj[0] - vi[0]) * (p[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}
