//! Area marking on decompressed layers
//!
//! Obstacles and annotations rewrite the area id of the layer cells they
//! cover before regions are built. Every shape is tested at the cell's world
//! space footprint, relative to the tile origin `orig`.

use glam::Vec3;

use crate::tile_cache_data::{TileCacheLayer, TILECACHE_NULL_AREA};
use tilecache_common::{point_in_polygon_2d, Result, Status};

/// Cell range covered by a shape's bounds, inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CellBounds {
    minx: i32,
    maxx: i32,
    miny: i32,
    maxy: i32,
    minz: i32,
    maxz: i32,
}

impl CellBounds {
    /// Grid footprint of `bmin`..`bmax`, `None` if it misses the layer.
    fn from_world(
        layer: &TileCacheLayer,
        orig: Vec3,
        cs: f32,
        ch: f32,
        bmin: Vec3,
        bmax: Vec3,
    ) -> Option<Self> {
        let ics = 1.0 / cs;
        let ich = 1.0 / ch;
        let w = layer.width() as i32;
        let h = layer.height() as i32;

        let lo = bmin - orig;
        let hi = bmax - orig;
        let minx = (lo.x * ics).floor() as i32;
        let maxx = (hi.x * ics).floor() as i32;
        let minz = (lo.z * ics).floor() as i32;
        let maxz = (hi.z * ics).floor() as i32;

        if maxx < 0 || minx >= w || maxz < 0 || minz >= h {
            return None;
        }

        Some(Self {
            minx: minx.max(0),
            maxx: maxx.min(w - 1),
            miny: (lo.y * ich).floor() as i32,
            maxy: (hi.y * ich).floor() as i32,
            minz: minz.max(0),
            maxz: maxz.min(h - 1),
        })
    }
}

/// Rewrites the cells inside `bounds` accepted by `inside`.
///
/// Null cells and cells outside the height range are skipped, as are cells
/// whose area differs from `filter` when one is given.
fn paint_cells(
    layer: &mut TileCacheLayer,
    bounds: CellBounds,
    area_id: u8,
    filter: Option<u8>,
    inside: impl Fn(i32, i32) -> bool,
) -> usize {
    let w = layer.width() as i32;
    let mut painted = 0;
    for z in bounds.minz..=bounds.maxz {
        for x in bounds.minx..=bounds.maxx {
            let idx = (x + z * w) as usize;
            let area = layer.areas[idx];
            if area == TILECACHE_NULL_AREA {
                continue;
            }
            if filter.is_some_and(|f| f != area) {
                continue;
            }
            let y = layer.heights[idx] as i32;
            if y < bounds.miny || y > bounds.maxy {
                continue;
            }
            if !inside(x, z) {
                continue;
            }
            layer.areas[idx] = area_id;
            painted += 1;
        }
    }
    painted
}

fn check_cell_size(cs: f32, ch: f32) -> Result<()> {
    if cs <= 0.0 || ch <= 0.0 {
        return Err(Status::InvalidParam);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn paint_cylinder(
    layer: &mut TileCacheLayer,
    orig: Vec3,
    cs: f32,
    ch: f32,
    pos: Vec3,
    radius: f32,
    height: f32,
    area_id: u8,
    filter: Option<u8>,
) -> Result<()> {
    check_cell_size(cs, ch)?;
    if radius < 0.0 || height < 0.0 {
        return Err(Status::InvalidParam);
    }
    let bmin = Vec3::new(pos.x - radius, pos.y, pos.z - radius);
    let bmax = Vec3::new(pos.x + radius, pos.y + height, pos.z + radius);
    let Some(bounds) = CellBounds::from_world(layer, orig, cs, ch, bmin, bmax) else {
        return Ok(());
    };

    // Inflated by half a cell so every touched cell is caught.
    let r2 = (radius / cs + 0.5).powi(2);
    let px = (pos.x - orig.x) / cs;
    let pz = (pos.z - orig.z) / cs;
    let painted = paint_cells(layer, bounds, area_id, filter, |x, z| {
        let dx = x as f32 + 0.5 - px;
        let dz = z as f32 + 0.5 - pz;
        dx * dx + dz * dz <= r2
    });
    log::debug!("Cylinder obstacle at {:?} marked {} cells", pos, painted);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn paint_box(
    layer: &mut TileCacheLayer,
    orig: Vec3,
    cs: f32,
    ch: f32,
    bmin: Vec3,
    bmax: Vec3,
    area_id: u8,
    filter: Option<u8>,
) -> Result<()> {
    check_cell_size(cs, ch)?;
    if bmin.cmpgt(bmax).any() {
        return Err(Status::InvalidParam);
    }
    let Some(bounds) = CellBounds::from_world(layer, orig, cs, ch, bmin, bmax) else {
        return Ok(());
    };
    let painted = paint_cells(layer, bounds, area_id, filter, |_, _| true);
    log::debug!("Box obstacle {:?}..{:?} marked {} cells", bmin, bmax, painted);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn paint_convex(
    layer: &mut TileCacheLayer,
    orig: Vec3,
    cs: f32,
    ch: f32,
    verts: &[Vec3],
    hmin: f32,
    hmax: f32,
    area_id: u8,
    filter: Option<u8>,
) -> Result<()> {
    check_cell_size(cs, ch)?;
    if verts.len() < 3 || hmin > hmax {
        return Err(Status::InvalidParam);
    }

    let (mut bmin, mut bmax) = (verts[0], verts[0]);
    for &v in &verts[1..] {
        bmin = bmin.min(v);
        bmax = bmax.max(v);
    }
    bmin.y = hmin;
    bmax.y = hmax;
    let Some(bounds) = CellBounds::from_world(layer, orig, cs, ch, bmin, bmax) else {
        return Ok(());
    };

    let flat: Vec<f32> = verts.iter().flat_map(|v| v.to_array()).collect();
    let painted = paint_cells(layer, bounds, area_id, filter, |x, z| {
        let p = [
            orig.x + (x as f32 + 0.5) * cs,
            0.0,
            orig.z + (z as f32 + 0.5) * cs,
        ];
        point_in_polygon_2d(&p, &flat, verts.len())
    });
    log::debug!(
        "Convex obstacle with {} vertices marked {} cells",
        verts.len(),
        painted
    );
    Ok(())
}

/// Marks the cells inside a vertical cylinder standing at `pos`.
#[allow(clippy::too_many_arguments)]
pub fn mark_cylinder_area(
    layer: &mut TileCacheLayer,
    orig: Vec3,
    cs: f32,
    ch: f32,
    pos: Vec3,
    radius: f32,
    height: f32,
    area_id: u8,
) -> Result<()> {
    paint_cylinder(layer, orig, cs, ch, pos, radius, height, area_id, None)
}

/// Marks the cells inside the axis aligned box `bmin`..`bmax`.
pub fn mark_box_area(
    layer: &mut TileCacheLayer,
    orig: Vec3,
    cs: f32,
    ch: f32,
    bmin: Vec3,
    bmax: Vec3,
    area_id: u8,
) -> Result<()> {
    paint_box(layer, orig, cs, ch, bmin, bmax, area_id, None)
}

/// Marks the cells whose centre lies inside the xz polygon `verts`, between `hmin` and `hmax`.
#[allow(clippy::too_many_arguments)]
pub fn mark_convex_area(
    layer: &mut TileCacheLayer,
    orig: Vec3,
    cs: f32,
    ch: f32,
    verts: &[Vec3],
    hmin: f32,
    hmax: f32,
    area_id: u8,
) -> Result<()> {
    paint_convex(layer, orig, cs, ch, verts, hmin, hmax, area_id, None)
}

/// Like [`mark_cylinder_area`], rewriting only cells of area `filter_area_id`.
#[allow(clippy::too_many_arguments)]
pub fn replace_cylinder_area(
    layer: &mut TileCacheLayer,
    orig: Vec3,
    cs: f32,
    ch: f32,
    pos: Vec3,
    radius: f32,
    height: f32,
    area_id: u8,
    filter_area_id: u8,
) -> Result<()> {
    paint_cylinder(layer, orig, cs, ch, pos, radius, height, area_id, Some(filter_area_id))
}

/// Like [`mark_box_area`], rewriting only cells of area `filter_area_id`.
#[allow(clippy::too_many_arguments)]
pub fn replace_box_area(
    layer: &mut TileCacheLayer,
    orig: Vec3,
    cs: f32,
    ch: f32,
    bmin: Vec3,
    bmax: Vec3,
    area_id: u8,
    filter_area_id: u8,
) -> Result<()> {
    paint_box(layer, orig, cs, ch, bmin, bmax, area_id, Some(filter_area_id))
}

/// Like [`mark_convex_area`], rewriting only cells of area `filter_area_id`.
#[allow(clippy::too_many_arguments)]
pub fn replace_convex_area(
    layer: &mut TileCacheLayer,
    orig: Vec3,
    cs: f32,
    ch: f32,
    verts: &[Vec3],
    hmin: f32,
    hmax: f32,
    area_id: u8,
    filter_area_id: u8,
) -> Result<()> {
    paint_convex(layer, orig, cs, ch, verts, hmin, hmax, area_id, Some(filter_area_id))
}

/// Replaces area `filter_area_id` with `area_id` over the whole layer.
pub fn replace_area(layer: &mut TileCacheLayer, area_id: u8, filter_area_id: u8) -> Result<()> {
    if filter_area_id == TILECACHE_NULL_AREA {
        return Ok(());
    }
    for area in layer.areas.iter_mut().filter(|a| **a == filter_area_id) {
        *area = area_id;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::HeapAllocator;
    use crate::test_helpers::{flat_layer, set_null_area};
    use crate::tile_cache_data::TILECACHE_WALKABLE_AREA;

    const OBSTACLE: u8 = 5;

    fn count(layer: &TileCacheLayer, area: u8) -> usize {
        layer.areas.iter().filter(|&&a| a == area).count()
    }

    #[test]
    fn test_mark_cylinder() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 16, 16);
        mark_cylinder_area(
            &mut layer,
            Vec3::ZERO,
            1.0,
            1.0,
            Vec3::new(8.0, 0.0, 8.0),
            2.0,
            4.0,
            OBSTACLE,
        )
        .unwrap();

        // The cell under the centre and its neighbours are covered, far cells are not.
        assert_eq!(layer.areas[8 + 8 * 16], OBSTACLE);
        assert_eq!(layer.areas[7 + 7 * 16], OBSTACLE);
        assert_eq!(layer.areas[0], TILECACHE_WALKABLE_AREA);
        assert_eq!(layer.areas[8 + 13 * 16], TILECACHE_WALKABLE_AREA);
        let marked = count(&layer, OBSTACLE);
        assert!(marked > 4 && marked < 36, "marked {marked}");
    }

    #[test]
    fn test_cylinder_height_range() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 8, 8);
        // Floor is at height 0, the cylinder floats above it.
        mark_cylinder_area(
            &mut layer,
            Vec3::ZERO,
            1.0,
            1.0,
            Vec3::new(4.0, 3.0, 4.0),
            2.0,
            2.0,
            OBSTACLE,
        )
        .unwrap();
        assert_eq!(count(&layer, OBSTACLE), 0);
    }

    #[test]
    fn test_mark_box_clamps_to_layer() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 8, 8);
        mark_box_area(
            &mut layer,
            Vec3::ZERO,
            1.0,
            1.0,
            Vec3::new(-4.0, -1.0, -4.0),
            Vec3::new(1.5, 1.0, 1.5),
            OBSTACLE,
        )
        .unwrap();
        assert_eq!(count(&layer, OBSTACLE), 4);
        assert_eq!(layer.areas[1 + 16], TILECACHE_WALKABLE_AREA);
    }

    #[test]
    fn test_shapes_outside_layer_are_ignored() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 8, 8);
        mark_box_area(
            &mut layer,
            Vec3::ZERO,
            1.0,
            1.0,
            Vec3::new(20.0, 0.0, 20.0),
            Vec3::new(24.0, 1.0, 24.0),
            OBSTACLE,
        )
        .unwrap();
        mark_cylinder_area(
            &mut layer,
            Vec3::ZERO,
            1.0,
            1.0,
            Vec3::new(-10.0, 0.0, 4.0),
            1.0,
            2.0,
            OBSTACLE,
        )
        .unwrap();
        assert_eq!(count(&layer, OBSTACLE), 0);
    }

    #[test]
    fn test_null_cells_are_kept() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 8, 8);
        set_null_area(&mut layer, 0, 0, 2, 2);
        mark_box_area(
            &mut layer,
            Vec3::ZERO,
            1.0,
            1.0,
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(3.5, 1.0, 3.5),
            OBSTACLE,
        )
        .unwrap();
        assert_eq!(count(&layer, TILECACHE_NULL_AREA), 4);
        assert_eq!(count(&layer, OBSTACLE), 12);
    }

    #[test]
    fn test_mark_convex() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 8, 8);
        let tri = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(8.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 8.0),
        ];
        mark_convex_area(&mut layer, Vec3::ZERO, 1.0, 1.0, &tri, -1.0, 1.0, OBSTACLE).unwrap();
        // Cells below the diagonal x + z < 8.
        for z in 0..8 {
            for x in 0..8 {
                let expected = if x + z < 7 { OBSTACLE } else { TILECACHE_WALKABLE_AREA };
                assert_eq!(layer.areas[x + z * 8], expected, "cell ({x}, {z})");
            }
        }
    }

    #[test]
    fn test_replace_respects_filter() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 8, 8);
        for x in 0..8 {
            layer.areas[x] = 2;
        }
        replace_box_area(
            &mut layer,
            Vec3::ZERO,
            1.0,
            1.0,
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(7.5, 1.0, 1.5),
            OBSTACLE,
            2,
        )
        .unwrap();
        assert_eq!(count(&layer, OBSTACLE), 8);
        assert_eq!(count(&layer, 2), 0);

        replace_cylinder_area(
            &mut layer,
            Vec3::ZERO,
            1.0,
            1.0,
            Vec3::new(4.0, 0.0, 4.0),
            8.0,
            1.0,
            1,
            OBSTACLE,
        )
        .unwrap();
        assert_eq!(count(&layer, 1), 8);
        assert_eq!(count(&layer, OBSTACLE), 0);

        let square = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(8.0, 0.0, 0.0),
            Vec3::new(8.0, 0.0, 8.0),
            Vec3::new(0.0, 0.0, 8.0),
        ];
        replace_convex_area(&mut layer, Vec3::ZERO, 1.0, 1.0, &square, 0.0, 1.0, 3, 1).unwrap();
        assert_eq!(count(&layer, 3), 8);
    }

    #[test]
    fn test_replace_area_everywhere() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 4, 4);
        replace_area(&mut layer, OBSTACLE, TILECACHE_WALKABLE_AREA).unwrap();
        assert_eq!(count(&layer, OBSTACLE), 16);
    }

    #[test]
    fn test_invalid_shapes() {
        let mut alloc = HeapAllocator::new();
        let mut layer = flat_layer(&mut alloc, 4, 4);
        let two = [Vec3::ZERO, Vec3::ONE];
        assert_eq!(
            mark_convex_area(&mut layer, Vec3::ZERO, 1.0, 1.0, &two, 0.0, 1.0, OBSTACLE),
            Err(Status::InvalidParam)
        );
        assert_eq!(
            mark_cylinder_area(&mut layer, Vec3::ZERO, 1.0, 1.0, Vec3::ONE, -1.0, 1.0, OBSTACLE),
            Err(Status::InvalidParam)
        );
        assert_eq!(
            mark_box_area(&mut layer, Vec3::ZERO, 0.0, 1.0, Vec3::ZERO, Vec3::ONE, OBSTACLE),
            Err(Status::InvalidParam)
        );
    }
}
