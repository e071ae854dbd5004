//! Pipeline driver turning one compressed layer into polygon meshes
//!
//! The stages run in a fixed order over a single layer: area marking for
//! obstacles, regions, contours, polygon mesh, clusters and the optional
//! detail mesh. Each stage is timed through the [`BuildContext`].

use glam::Vec3;

use crate::alloc::TileCacheAlloc;
use crate::area::{mark_box_area, mark_convex_area, mark_cylinder_area};
use crate::cluster::{build_tile_cache_clusters, TileCacheClusterSet};
use crate::compressor::TileCacheCompressor;
use crate::config::{RegionPartitioning, TileCacheBuilderConfig};
use crate::context::{BuildContext, TimerCategory};
use crate::contour::{build_tile_cache_contours, TileCacheContourSet};
use crate::detail_mesh::{build_tile_cache_poly_mesh_detail, TileCachePolyMeshDetail};
use crate::distance_field::build_tile_cache_distance_field;
use crate::monotone::{build_tile_cache_regions_chunky, build_tile_cache_regions_monotone};
use crate::poly_mesh::{build_tile_cache_poly_mesh, TileCachePolyMesh};
use crate::tile_cache_data::{decompress_tile_cache_layer, TileCacheLayer, TILECACHE_NULL_AREA};
use crate::watershed::build_tile_cache_regions;
use tilecache_common::Result;

/// Footprint of a dynamic obstacle
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum ObstacleShape {
    /// Vertical cylinder standing on `pos`
    Cylinder { pos: Vec3, radius: f32, height: f32 },
    /// Axis aligned box
    Box { bmin: Vec3, bmax: Vec3 },
    /// Convex xz polygon extruded between `hmin` and `hmax`
    Convex { verts: Vec<Vec3>, hmin: f32, hmax: f32 },
}

/// Obstacle stamped into a layer before its regions are built
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TileCacheObstacle {
    pub shape: ObstacleShape,
    /// Area written into covered cells, null by default
    pub area_id: u8,
}

impl TileCacheObstacle {
    pub fn cylinder(pos: Vec3, radius: f32, height: f32) -> Self {
        Self {
            shape: ObstacleShape::Cylinder {
                pos,
                radius,
                height,
            },
            area_id: TILECACHE_NULL_AREA,
        }
    }

    pub fn aabb(bmin: Vec3, bmax: Vec3) -> Self {
        Self {
            shape: ObstacleShape::Box { bmin, bmax },
            area_id: TILECACHE_NULL_AREA,
        }
    }

    pub fn convex(verts: Vec<Vec3>, hmin: f32, hmax: f32) -> Self {
        Self {
            shape: ObstacleShape::Convex { verts, hmin, hmax },
            area_id: TILECACHE_NULL_AREA,
        }
    }

    /// Marks covered cells with `area_id` instead of removing them.
    pub fn with_area(mut self, area_id: u8) -> Self {
        self.area_id = area_id;
        self
    }

    /// Writes the obstacle into `layer`.
    pub fn apply(&self, layer: &mut TileCacheLayer, orig: Vec3, cs: f32, ch: f32) -> Result<()> {
        match &self.shape {
            ObstacleShape::Cylinder {
                pos,
                radius,
                height,
            } => mark_cylinder_area(layer, orig, cs, ch, *pos, *radius, *height, self.area_id),
            ObstacleShape::Box { bmin, bmax } => {
                mark_box_area(layer, orig, cs, ch, *bmin, *bmax, self.area_id)
            }
            ObstacleShape::Convex { verts, hmin, hmax } => {
                mark_convex_area(layer, orig, cs, ch, verts, *hmin, *hmax, self.area_id)
            }
        }
    }
}

/// Everything built from one layer
#[derive(Debug, Clone, Default)]
pub struct TileCacheBuildResult {
    /// Number of regions found in the layer
    pub reg_count: usize,
    pub contours: TileCacheContourSet,
    pub clusters: TileCacheClusterSet,
    pub mesh: TileCachePolyMesh,
    /// Present when the detail mesh is enabled
    pub detail: Option<TileCachePolyMeshDetail>,
}

impl TileCacheBuildResult {
    /// True when the layer produced no polygons
    pub fn is_empty(&self) -> bool {
        self.mesh.npolys == 0
    }

    pub fn release(self, alloc: &mut dyn TileCacheAlloc) {
        self.contours.release(alloc);
        self.clusters.release(alloc);
        self.mesh.release(alloc);
        if let Some(detail) = self.detail {
            detail.release(alloc);
        }
    }
}

/// Builds polygon meshes from tile cache layers
#[derive(Debug, Clone)]
pub struct TileCacheBuilder {
    config: TileCacheBuilderConfig,
}

impl TileCacheBuilder {
    pub fn new(config: TileCacheBuilderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TileCacheBuilderConfig {
        &self.config
    }

    /// Runs one stage, timing it and logging a failure with the stage name.
    fn stage<T>(
        ctx: &mut BuildContext,
        category: TimerCategory,
        name: &str,
        f: impl FnOnce(&mut BuildContext) -> Result<T>,
    ) -> Result<T> {
        ctx.start_timer(category);
        let result = f(ctx);
        ctx.stop_timer(category);
        if let Err(status) = &result {
            ctx.log_error(format!("{} failed: {}", name, status));
        }
        result
    }

    fn verbose(&self, ctx: &mut BuildContext, message: impl Into<String>) {
        if self.config.verbose_logging {
            ctx.log_info(message);
        }
    }

    /// Decompresses `data`, stamps `obstacles` into it and builds the layer.
    pub fn build_from_compressed(
        &self,
        alloc: &mut dyn TileCacheAlloc,
        compressor: &dyn TileCacheCompressor,
        data: &[u8],
        obstacles: &[TileCacheObstacle],
        ctx: &mut BuildContext,
    ) -> Result<TileCacheBuildResult> {
        self.config.validate()?;
        ctx.start_timer(TimerCategory::Total);

        let result = self.build_compressed_inner(alloc, compressor, data, obstacles, ctx);

        ctx.stop_timer(TimerCategory::Total);
        if self.config.verbose_logging {
            ctx.log_timer_summary();
        }
        result
    }

    fn build_compressed_inner(
        &self,
        alloc: &mut dyn TileCacheAlloc,
        compressor: &dyn TileCacheCompressor,
        data: &[u8],
        obstacles: &[TileCacheObstacle],
        ctx: &mut BuildContext,
    ) -> Result<TileCacheBuildResult> {
        let mut layer = Self::stage(ctx, TimerCategory::Decompress, "Decompress", |_| {
            decompress_tile_cache_layer(alloc, compressor, data)
        })?;

        let orig = Vec3::from_array(layer.header.bmin);
        let (cs, ch) = (self.config.cs, self.config.ch);
        Self::stage(ctx, TimerCategory::AreaMarking, "Area marking", |_| {
            obstacles
                .iter()
                .try_for_each(|obstacle| obstacle.apply(&mut layer, orig, cs, ch))
        })?;
        self.verbose(
            ctx,
            format!(
                "Layer ({}, {}, {}): {} obstacles",
                layer.header.tx,
                layer.header.ty,
                layer.header.tlayer,
                obstacles.len()
            ),
        );

        let result = self.build_layer_inner(alloc, &mut layer, ctx);
        layer.release(alloc);
        result
    }

    /// Builds regions, contours, polygon mesh, clusters and detail mesh of `layer`.
    ///
    /// `layer.regs` and `layer.reg_count` are rewritten. A layer without
    /// walkable regions yields an empty result.
    pub fn build_layer(
        &self,
        alloc: &mut dyn TileCacheAlloc,
        layer: &mut TileCacheLayer,
        ctx: &mut BuildContext,
    ) -> Result<TileCacheBuildResult> {
        self.config.validate()?;
        ctx.start_timer(TimerCategory::Total);
        let result = self.build_layer_inner(alloc, layer, ctx);
        ctx.stop_timer(TimerCategory::Total);
        result
    }

    fn build_layer_inner(
        &self,
        alloc: &mut dyn TileCacheAlloc,
        layer: &mut TileCacheLayer,
        ctx: &mut BuildContext,
    ) -> Result<TileCacheBuildResult> {
        let config = &self.config;

        let reg_count = match config.region_partitioning {
            RegionPartitioning::Watershed => {
                let dfield = Self::stage(ctx, TimerCategory::DistanceField, "Distance field", |_| {
                    build_tile_cache_distance_field(alloc, layer)
                })?;
                let regions = Self::stage(ctx, TimerCategory::Regions, "Watershed regions", |_| {
                    build_tile_cache_regions(
                        alloc,
                        layer,
                        &dfield,
                        config.min_region_area,
                        config.merge_region_area,
                    )
                });
                dfield.release(alloc);
                regions?
            }
            RegionPartitioning::Monotone => {
                Self::stage(ctx, TimerCategory::Regions, "Monotone regions", |_| {
                    build_tile_cache_regions_monotone(
                        alloc,
                        layer,
                        config.min_region_area,
                        config.merge_region_area,
                    )
                })?
            }
            RegionPartitioning::Chunky => {
                Self::stage(ctx, TimerCategory::Regions, "Chunky regions", |_| {
                    build_tile_cache_regions_chunky(
                        alloc,
                        layer,
                        config.min_region_area,
                        config.merge_region_area,
                        config.chunk_size,
                    )
                })?
            }
        };
        self.verbose(ctx, format!("Regions: {}", reg_count));
        if reg_count == 0 {
            return Ok(TileCacheBuildResult::default());
        }

        let (contours, mut clusters) = Self::stage(ctx, TimerCategory::Contours, "Contours", |_| {
            build_tile_cache_contours(
                alloc,
                layer,
                config.walkable_climb,
                config.max_simplification_error,
            )
        })?;
        self.verbose(
            ctx,
            format!(
                "Contours: {}, clusters: {}",
                contours.nconts(),
                clusters.nclusters
            ),
        );
        if contours.nconts() == 0 {
            contours.release(alloc);
            clusters.release(alloc);
            return Ok(TileCacheBuildResult {
                reg_count,
                ..Default::default()
            });
        }

        let mesh = Self::stage(ctx, TimerCategory::PolyMesh, "Poly mesh", |ctx| {
            build_tile_cache_poly_mesh(alloc, Some(ctx), &contours)
        })?;
        self.verbose(
            ctx,
            format!("Poly mesh: {} verts, {} polys", mesh.nverts, mesh.npolys),
        );

        Self::stage(ctx, TimerCategory::Clusters, "Clusters", |_| {
            build_tile_cache_clusters(alloc, &mut clusters, &mesh)
        })?;

        let detail = if config.generate_detail_mesh {
            let detail = Self::stage(ctx, TimerCategory::DetailMesh, "Detail mesh", |_| {
                build_tile_cache_poly_mesh_detail(
                    alloc,
                    config.cs,
                    config.ch,
                    config.detail_sample_dist_world(),
                    config.detail_sample_max_error_world(),
                    layer,
                    &mesh,
                )
            })?;
            self.verbose(
                ctx,
                format!("Detail mesh: {} verts, {} tris", detail.nverts, detail.ntris),
            );
            Some(detail)
        } else {
            None
        };

        Ok(TileCacheBuildResult {
            reg_count,
            contours,
            clusters,
            mesh,
            detail,
        })
    }
}
