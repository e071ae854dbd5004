//! Configuration for building one tile cache layer

use tilecache_common::{Result, Status};

/// Algorithm used to split a layer into regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum RegionPartitioning {
    /// Distance field flooding, best quality polygons
    #[default]
    Watershed,
    /// Row sweeps over the whole layer, fastest
    Monotone,
    /// Row sweeps restricted to square chunks
    Chunky,
}

/// Parameters for [`TileCacheBuilder`](crate::TileCacheBuilder)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TileCacheBuilderConfig {
    /// Cell size on the xz plane
    pub cs: f32,
    /// Cell height
    pub ch: f32,
    /// Largest height step, in cells, that still connects two cells
    pub walkable_climb: i32,
    /// The maximum distance a simplified contour may deviate from the raw contour, in cells
    pub max_simplification_error: f32,
    /// Isolated regions smaller than this many cells are removed
    pub min_region_area: i32,
    /// Regions smaller than this many cells are merged into a neighbour
    pub merge_region_area: i32,
    pub region_partitioning: RegionPartitioning,
    /// Chunk edge length, in cells, for [`RegionPartitioning::Chunky`]
    pub chunk_size: i32,
    /// Whether to build the detail mesh
    pub generate_detail_mesh: bool,
    /// Sampling distance of the detail mesh, in cells. Zero disables sampling.
    pub detail_sample_dist: f32,
    /// The maximum distance the detail mesh may deviate from the layer, in cells
    pub detail_sample_max_error: f32,
    /// Logs per stage statistics through the build context
    pub verbose_logging: bool,
}

impl Default for TileCacheBuilderConfig {
    fn default() -> Self {
        Self {
            cs: 0.3,
            ch: 0.2,
            walkable_climb: 4,
            max_simplification_error: 1.3,
            min_region_area: 8,
            merge_region_area: 20,
            region_partitioning: RegionPartitioning::Watershed,
            chunk_size: 64,
            generate_detail_mesh: true,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            verbose_logging: false,
        }
    }
}

impl TileCacheBuilderConfig {
    /// Checks that the configuration can drive a build.
    pub fn validate(&self) -> Result<()> {
        if !(self.cs > 0.0 && self.ch > 0.0) {
            log::error!("Invalid cell size {} / cell height {}", self.cs, self.ch);
            return Err(Status::InvalidParam);
        }

        if self.walkable_climb < 0
            || self.max_simplification_error < 0.0
            || self.min_region_area < 0
            || self.merge_region_area < 0
            || self.detail_sample_dist < 0.0
            || self.detail_sample_max_error < 0.0
        {
            log::error!("Negative threshold in tile cache config: {:?}", self);
            return Err(Status::InvalidParam);
        }

        if self.chunk_size <= 0 {
            log::error!("Invalid chunk size {}", self.chunk_size);
            return Err(Status::InvalidParam);
        }

        Ok(())
    }

    /// World space sampling distance of the detail mesh
    pub fn detail_sample_dist_world(&self) -> f32 {
        if self.detail_sample_dist < 0.9 {
            0.0
        } else {
            self.cs * self.detail_sample_dist
        }
    }

    /// World space sampling error of the detail mesh
    pub fn detail_sample_max_error_world(&self) -> f32 {
        self.ch * self.detail_sample_max_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TileCacheBuilderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.region_partitioning, RegionPartitioning::Watershed);
        assert!((config.detail_sample_dist_world() - 1.8).abs() < 1e-5);
        assert!((config.detail_sample_max_error_world() - 0.2).abs() < 1e-5);
    }

    #[test]
    fn test_invalid_cell_size() {
        let config = TileCacheBuilderConfig {
            cs: 0.0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(Status::InvalidParam));

        let config = TileCacheBuilderConfig {
            ch: f32::NAN,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(Status::InvalidParam));
    }

    #[test]
    fn test_negative_thresholds() {
        let config = TileCacheBuilderConfig {
            min_region_area: -1,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(Status::InvalidParam));

        let config = TileCacheBuilderConfig {
            max_simplification_error: -0.5,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(Status::InvalidParam));
    }

    #[test]
    fn test_zero_chunk_size() {
        let config = TileCacheBuilderConfig {
            chunk_size: 0,
            region_partitioning: RegionPartitioning::Chunky,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(Status::InvalidParam));
    }

    #[test]
    fn test_small_sample_distance_disables_sampling() {
        let config = TileCacheBuilderConfig {
            detail_sample_dist: 0.5,
            ..Default::default()
        };
        assert_eq!(config.detail_sample_dist_world(), 0.0);
    }
}
