//! Cross-stage properties of the layer build pipeline

use proptest::prelude::*;

use crate::alloc::HeapAllocator;
use crate::config::{RegionPartitioning, TileCacheBuilderConfig};
use crate::context::BuildContext;
use crate::contour::{build_tile_cache_contours, TileCacheContourSet};
use crate::distance_field::build_tile_cache_distance_field;
use crate::monotone::{build_tile_cache_regions_chunky, build_tile_cache_regions_monotone};
use crate::poly_mesh::{build_tile_cache_poly_mesh, TileCachePolyMesh, TILECACHE_PORTAL_FLAG};
use crate::test_helpers::{
    add_edge_portals, assert_regions_compacted, flat_layer, set_area, set_null_area,
};
use crate::tile_cache_builder::{TileCacheBuildResult, TileCacheBuilder};
use crate::tile_cache_data::{TileCacheLayer, MAX_VERTS_PER_POLY, TILECACHE_NULL_IDX};
use crate::watershed::build_tile_cache_regions;
use tilecache_common::{dist_point_segment_sqr_2d, Result};

const PARTITIONINGS: [RegionPartitioning; 3] = [
    RegionPartitioning::Watershed,
    RegionPartitioning::Monotone,
    RegionPartitioning::Chunky,
];

fn config(partitioning: RegionPartitioning) -> TileCacheBuilderConfig {
    TileCacheBuilderConfig {
        cs: 1.0,
        ch: 1.0,
        min_region_area: 0,
        merge_region_area: 0,
        region_partitioning: partitioning,
        chunk_size: 8,
        detail_sample_dist: 2.0,
        ..Default::default()
    }
}

fn build(layer: &mut TileCacheLayer, config: TileCacheBuilderConfig) -> Result<TileCacheBuildResult> {
    let mut alloc = HeapAllocator::new();
    let mut ctx = BuildContext::new();
    TileCacheBuilder::new(config).build_layer(&mut alloc, layer, &mut ctx)
}

fn build_regions(
    layer: &mut TileCacheLayer,
    partitioning: RegionPartitioning,
    min_area: i32,
    merge_area: i32,
) -> usize {
    let mut alloc = HeapAllocator::new();
    match partitioning {
        RegionPartitioning::Watershed => {
            let dfield = build_tile_cache_distance_field(&mut alloc, layer).unwrap();
            build_tile_cache_regions(&mut alloc, layer, &dfield, min_area, merge_area).unwrap()
        }
        RegionPartitioning::Monotone => {
            build_tile_cache_regions_monotone(&mut alloc, layer, min_area, merge_area).unwrap()
        }
        RegionPartitioning::Chunky => {
            build_tile_cache_regions_chunky(&mut alloc, layer, min_area, merge_area, 8).unwrap()
        }
    }
}

/// Hand made layers covering holes, walls, mixed areas and portals
fn sample_layers(alloc: &mut HeapAllocator) -> Vec<TileCacheLayer> {
    let flat = flat_layer(alloc, 8, 8);

    let mut pillar = flat_layer(alloc, 12, 12);
    set_null_area(&mut pillar, 5, 5, 7, 7);

    let mut corner = flat_layer(alloc, 8, 8);
    set_null_area(&mut corner, 0, 0, 3, 3);

    let mut rooms = flat_layer(alloc, 16, 16);
    set_null_area(&mut rooms, 7, 0, 9, 7);
    set_null_area(&mut rooms, 7, 9, 9, 16);

    let mut mixed = flat_layer(alloc, 10, 10);
    set_area(&mut mixed, 5, 0, 10, 10, 7);

    let mut ramp = flat_layer(alloc, 10, 6);
    for y in 0..6 {
        for x in 0..10 {
            ramp.heights[x + y * 10] = x as u16;
        }
    }
    add_edge_portals(&mut ramp);

    vec![flat, pillar, corner, rooms, mixed, ramp]
}

fn collect_polys(mesh: &TileCachePolyMesh, i: usize) -> Vec<u16> {
    mesh.poly(i)[..mesh.poly_vert_count(i)].to_vec()
}

fn assert_contours_closed(cset: &TileCacheContourSet) {
    for (c, cont) in cset.conts.iter().enumerate() {
        let n = cont.nverts();
        if n == 0 {
            continue;
        }
        assert!(n >= 3, "contour {c} has {n} vertices");
        for i in 0..n {
            let a = cont.vert(i);
            let b = cont.vert((i + 1) % n);
            assert!(
                a[0] != b[0] || a[2] != b[2],
                "contour {c} repeats vertex ({}, {}) at {i}",
                a[0],
                a[2]
            );
        }
    }
}

/// Every region is outlined by at least one contour.
fn assert_regions_outlined(cset: &TileCacheContourSet, reg_count: usize) {
    for reg in 1..=reg_count {
        assert!(
            cset.conts.iter().any(|c| c.reg as usize == reg && c.nverts() > 0),
            "region {reg} has no contour"
        );
    }
}

fn assert_poly_vertex_bound(mesh: &TileCachePolyMesh) {
    for i in 0..mesh.npolys {
        let n = mesh.poly_vert_count(i);
        assert!((3..=MAX_VERTS_PER_POLY).contains(&n), "poly {i} has {n} vertices");
        assert!(collect_polys(mesh, i).iter().all(|&v| (v as usize) < mesh.nverts));
    }
}

fn assert_adjacency_symmetric(mesh: &TileCachePolyMesh) {
    let nvp = mesh.nvp;
    for a in 0..mesh.npolys {
        let pa = mesh.poly(a);
        let na = mesh.poly_vert_count(a);
        for j in 0..na {
            let nei = pa[nvp + j];
            if nei & TILECACHE_PORTAL_FLAG != 0 {
                continue;
            }
            let b = nei as usize;
            assert!(b < mesh.npolys, "poly {a} edge {j} points at {b}");
            let (v0, v1) = (pa[j], pa[(j + 1) % na]);
            let pb = mesh.poly(b);
            let nb = mesh.poly_vert_count(b);
            let k = (0..nb)
                .find(|&k| pb[k] == v1 && pb[(k + 1) % nb] == v0)
                .unwrap_or_else(|| panic!("poly {b} does not share edge {v0}-{v1} with {a}"));
            assert_eq!(pb[nvp + k] as usize, a, "poly {b} edge {k} does not point back at {a}");
        }
    }
}

#[test]
fn test_regions_are_compacted_on_sample_layers() {
    let mut alloc = HeapAllocator::new();
    for partitioning in PARTITIONINGS {
        for (n, mut layer) in sample_layers(&mut alloc).into_iter().enumerate() {
            let count = build_regions(&mut layer, partitioning, 0, 0);
            assert_eq!(count, layer.reg_count, "{partitioning:?} layer {n}");
            assert!(count >= 1, "{partitioning:?} layer {n}");
            assert_regions_compacted(&layer);
        }
    }
}

#[test]
fn test_enclosed_small_component_is_removed() {
    let mut alloc = HeapAllocator::new();
    for partitioning in PARTITIONINGS {
        let mut layer = flat_layer(&mut alloc, 12, 12);
        set_null_area(&mut layer, 3, 3, 9, 9);
        // Reconnect a 2x2 island in the middle of the null ring.
        for y in 5..7 {
            for x in 5..7 {
                let idx = x + y * 12;
                layer.areas[idx] = layer.areas[0];
                if x == 5 {
                    layer.cons[idx] |= 1 << 2;
                } else {
                    layer.cons[idx] |= 1 << 0;
                }
                if y == 5 {
                    layer.cons[idx] |= 1 << 1;
                } else {
                    layer.cons[idx] |= 1 << 3;
                }
            }
        }

        build_regions(&mut layer, partitioning, 8, 0);
        assert_regions_compacted(&layer);
        for y in 5..7 {
            for x in 5..7 {
                assert_eq!(layer.regs[x + y * 12], 0, "{partitioning:?} island ({x}, {y})");
            }
        }
        assert_ne!(layer.regs[0], 0, "{partitioning:?} border component removed");
    }
}

#[test]
fn test_contours_are_closed() {
    let mut alloc = HeapAllocator::new();
    for partitioning in PARTITIONINGS {
        for mut layer in sample_layers(&mut alloc) {
            build_regions(&mut layer, partitioning, 0, 0);
            let (cset, clusters) = build_tile_cache_contours(&mut alloc, &layer, 1, 1.3).unwrap();
            assert_regions_outlined(&cset, layer.reg_count);
            assert_eq!(clusters.nregs(), layer.reg_count + 1);
            assert_contours_closed(&cset);
        }
    }
}

#[test]
fn test_poly_mesh_vertex_bound_and_adjacency() {
    let mut alloc = HeapAllocator::new();
    for partitioning in PARTITIONINGS {
        for (n, mut layer) in sample_layers(&mut alloc).into_iter().enumerate() {
            let result = build(&mut layer, config(partitioning)).unwrap();
            assert!(result.mesh.npolys > 0, "{partitioning:?} layer {n}");
            assert_poly_vertex_bound(&result.mesh);
            assert_adjacency_symmetric(&result.mesh);
            assert_eq!(result.clusters.npolys(), result.mesh.npolys);
        }
    }
}

#[test]
fn test_detail_mesh_follows_polygon_boundary() {
    let mut alloc = HeapAllocator::new();
    for mut layer in sample_layers(&mut alloc) {
        let config = config(RegionPartitioning::Watershed);
        let max_error = config.detail_sample_max_error_world();
        let result = build(&mut layer, config).unwrap();
        let mesh = &result.mesh;
        let detail = result.detail.as_ref().unwrap();
        assert_eq!(detail.nmeshes, mesh.npolys);

        for i in 0..mesh.npolys {
            // Layers sit at the origin with unit cells.
            let outline: Vec<[f32; 3]> = collect_polys(mesh, i)
                .iter()
                .map(|&v| {
                    let p = mesh.vert(v as usize);
                    [p[0] as f32, p[1] as f32, p[2] as f32]
                })
                .collect();
            let n = outline.len();
            let perimeter: f32 = (0..n)
                .map(|j| {
                    let (a, b) = (outline[j], outline[(j + 1) % n]);
                    ((b[0] - a[0]).powi(2) + (b[2] - a[2]).powi(2)).sqrt()
                })
                .sum();
            let dist_to_outline = |p: &[f32]| {
                (0..n)
                    .map(|j| dist_point_segment_sqr_2d(p, &outline[j], &outline[(j + 1) % n]))
                    .fold(f32::MAX, f32::min)
                    .sqrt()
            };

            let m = detail.mesh(i);
            let (vbase, tbase, ntris) = (m[0] as usize, m[2] as usize, m[3] as usize);
            assert!(ntris >= n - 2, "poly {i} has {ntris} detail triangles");
            let mut boundary = 0.0f32;
            for t in tbase..tbase + ntris {
                let tri = detail.tri(t);
                for e in 0..3 {
                    if (tri[3] >> (e * 2)) & 0x3 == 0 {
                        continue;
                    }
                    let a = detail.vert(vbase + tri[e] as usize);
                    let b = detail.vert(vbase + tri[(e + 1) % 3] as usize);
                    assert!(dist_to_outline(a) <= max_error + 1e-3);
                    assert!(dist_to_outline(b) <= max_error + 1e-3);
                    boundary += ((b[0] - a[0]).powi(2) + (b[2] - a[2]).powi(2)).sqrt();
                }
            }
            assert!(
                boundary >= perimeter - 1e-3,
                "poly {i}: boundary {boundary} does not cover perimeter {perimeter}"
            );
        }
    }
}

#[test]
fn test_flat_layer_end_to_end() {
    let mut alloc = HeapAllocator::new();
    let mut layer = flat_layer(&mut alloc, 8, 8);

    let dfield = build_tile_cache_distance_field(&mut alloc, &layer).unwrap();
    let reg_count = build_tile_cache_regions(&mut alloc, &mut layer, &dfield, 0, 0).unwrap();
    assert_eq!(reg_count, 1);

    let (cset, _) = build_tile_cache_contours(&mut alloc, &layer, 1, 1.3).unwrap();
    assert_eq!(cset.nconts(), 1);
    assert_eq!(cset.conts[0].nverts(), 4);

    let mesh = build_tile_cache_poly_mesh(&mut alloc, None, &cset).unwrap();
    assert_eq!(mesh.npolys, 1);
    assert_eq!(mesh.nverts, 4);
    assert_eq!(mesh.poly_vert_count(0), 4);
    let poly = mesh.poly(0);
    assert!(poly[4..MAX_VERTS_PER_POLY].iter().all(|&v| v == TILECACHE_NULL_IDX));
}

#[test]
fn test_corner_hole_end_to_end() {
    let mut alloc = HeapAllocator::new();
    let mut layer = flat_layer(&mut alloc, 8, 8);
    set_null_area(&mut layer, 0, 0, 3, 3);

    let result = build(&mut layer, config(RegionPartitioning::Watershed)).unwrap();
    assert!(result.reg_count >= 1);
    assert_regions_compacted(&layer);
    for y in 0..3 {
        for x in 0..3 {
            assert_eq!(layer.regs[x + y * 8], 0);
        }
    }
    assert_regions_outlined(&result.contours, result.reg_count);
    assert_contours_closed(&result.contours);

    // An L shaped outline cannot be a single convex polygon.
    assert!(result.mesh.npolys >= 2);
    for v in 0..result.mesh.nverts {
        let p = result.mesh.vert(v);
        assert!(!(p[0] < 3 && p[2] < 3), "vertex ({}, {}) inside the hole", p[0], p[2]);
    }
    assert_poly_vertex_bound(&result.mesh);
    assert_adjacency_symmetric(&result.mesh);
}

fn obstacle_layer(width: usize, height: usize, holes: &[(usize, usize, usize, usize)]) -> TileCacheLayer {
    let mut alloc = HeapAllocator::new();
    let mut layer = flat_layer(&mut alloc, width, height);
    for &(x, y, w, h) in holes {
        let (x0, y0) = (x.min(width), y.min(height));
        set_null_area(&mut layer, x0, y0, (x0 + w).min(width), (y0 + h).min(height));
    }
    layer
}

fn holes() -> impl Strategy<Value = Vec<(usize, usize, usize, usize)>> {
    prop::collection::vec((0usize..20, 0usize..20, 1usize..6, 1usize..6), 0..4)
}

proptest! {
    #[test]
    fn prop_regions_compacted(
        width in 4usize..20,
        height in 4usize..20,
        holes in holes(),
        variant in 0usize..3,
    ) {
        let mut layer = obstacle_layer(width, height, &holes);
        let count = build_regions(&mut layer, PARTITIONINGS[variant], 0, 0);
        prop_assert_eq!(count, layer.reg_count);
        assert_regions_compacted(&layer);
    }

    #[test]
    fn prop_build_is_deterministic(
        width in 4usize..20,
        height in 4usize..20,
        holes in holes(),
        variant in 0usize..3,
    ) {
        let layer = obstacle_layer(width, height, &holes);
        let mut first_layer = layer.clone();
        let mut second_layer = layer;
        let first = build(&mut first_layer, config(PARTITIONINGS[variant]));
        let second = build(&mut second_layer, config(PARTITIONINGS[variant]));

        prop_assert_eq!(&first_layer.regs, &second_layer.regs);
        match (first, second) {
            (Ok(a), Ok(b)) => {
                prop_assert_eq!(a.reg_count, b.reg_count);
                prop_assert_eq!(a.contours, b.contours);
                prop_assert_eq!(a.mesh, b.mesh);
                prop_assert_eq!(a.clusters.poly_map, b.clusters.poly_map);
                prop_assert_eq!(a.detail, b.detail);
            }
            (Err(a), Err(b)) => prop_assert_eq!(a, b),
            (a, b) => prop_assert!(false, "runs disagree: {:?} vs {:?}", a.is_ok(), b.is_ok()),
        }
    }
}
