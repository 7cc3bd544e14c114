//! Pipeline configuration and builder
//!
//! Holds the setup-time shape of the geometry pipeline (resolution, dispatch
//! divisors, list capacities) and the runtime-adjustable device settings.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{PolyError, Result};

/// Depth camera resolution in the unbinned narrow field-of-view mode
pub const DEFAULT_WIDTH: u32 = 640;
/// Depth camera resolution in the unbinned narrow field-of-view mode
pub const DEFAULT_HEIGHT: u32 = 576;

/// Largest capacity a seed or record list may be configured with
///
/// Seed ids are packed into 21-bit fields; the all-ones value is reserved
/// as the "no seed" marker.
pub const MAX_CAPACITY: usize = (1 << 21) - 1;

/// Shape of the geometry pipeline, fixed at setup time
///
/// Every dispatch divisor is checked at build time to divide its extent
/// exactly, so no stage ever silently skips a remainder.
///
/// # Example
///
/// ```rust
/// use silhouette_delaunay::*;
///
/// let config = PipelineConfigBuilder::new()
///     .resolution(128, 96)
///     .block_size(32)
///     .max_points(2048)
///     .seed_batch(1024)
///     .build()
///     .unwrap();
///
/// assert_eq!(config.max_records, 2048);
/// ```
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Grid width in pixels
    pub width: u32,

    /// Grid height in pixels
    pub height: u32,

    /// Square block size for the 2D geometry stages
    pub block_size: u32,

    /// Square block size for the unprojection and edge-baking kernels
    pub image_block_size: u32,

    /// Capacity of the seed list
    ///
    /// Once reached, further seed candidates are dropped for the frame.
    pub max_points: usize,

    /// Capacity of the triangle/edge record list
    pub max_records: usize,

    /// Seeds handled per VoronoiAssignment work group
    pub seed_batch: usize,

    /// Half-size in pixels of the square neighborhood each seed scans
    ///
    /// Pixels farther than this from every seed stay unclaimed.
    pub cell_radius: u32,
}

impl PipelineConfig {
    /// Number of pixels in the grid
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Number of VoronoiAssignment work groups
    #[inline]
    pub fn seed_groups(&self) -> usize {
        self.max_points / self.seed_batch
    }

    /// Check every dispatch divisor and capacity
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PolyError::InvalidConfig(format!(
                "resolution must be non-zero (got {}x{})",
                self.width, self.height
            )));
        }
        for (name, block) in [
            ("block_size", self.block_size),
            ("image_block_size", self.image_block_size),
        ] {
            if block == 0 {
                return Err(PolyError::InvalidConfig(format!("{} must be non-zero", name)));
            }
            if self.width % block != 0 || self.height % block != 0 {
                return Err(PolyError::InvalidConfig(format!(
                    "{} {} does not evenly divide resolution {}x{}",
                    name, block, self.width, self.height
                )));
            }
        }
        if self.max_points == 0 || self.max_points > MAX_CAPACITY {
            return Err(PolyError::InvalidConfig(format!(
                "max_points must be in 1..={} (got {})",
                MAX_CAPACITY, self.max_points
            )));
        }
        if self.max_records == 0 || self.max_records > MAX_CAPACITY {
            return Err(PolyError::InvalidConfig(format!(
                "max_records must be in 1..={} (got {})",
                MAX_CAPACITY, self.max_records
            )));
        }
        if self.seed_batch == 0 || self.max_points % self.seed_batch != 0 {
            return Err(PolyError::InvalidConfig(format!(
                "seed_batch {} does not evenly divide max_points {}",
                self.seed_batch, self.max_points
            )));
        }
        if self.cell_radius == 0 {
            return Err(PolyError::InvalidConfig(
                "cell_radius must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            block_size: 32,
            image_block_size: 8,
            max_points: 1024,
            max_records: 1024,
            seed_batch: 512,
            cell_radius: 48,
        }
    }
}

/// Builder for creating a validated [`PipelineConfig`]
#[derive(Debug, Clone)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
    max_records: Option<usize>,
}

impl PipelineConfigBuilder {
    /// Create a new builder with default values
    ///
    /// Defaults:
    /// - resolution: 640x576
    /// - block_size: 32, image_block_size: 8
    /// - max_points: 1024, max_records: same as max_points
    /// - seed_batch: 512
    /// - cell_radius: 48
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            max_records: None,
        }
    }

    /// Set the grid resolution
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.config.width = width;
        self.config.height = height;
        self
    }

    /// Set the block size of the 2D geometry stages
    pub fn block_size(mut self, block: u32) -> Self {
        self.config.block_size = block;
        self
    }

    /// Set the block size of the unprojection kernels
    pub fn image_block_size(mut self, block: u32) -> Self {
        self.config.image_block_size = block;
        self
    }

    /// Set the seed list capacity
    pub fn max_points(mut self, max_points: usize) -> Self {
        self.config.max_points = max_points;
        self
    }

    /// Set the record list capacity
    ///
    /// If never called, the record capacity follows `max_points`.
    pub fn max_records(mut self, max_records: usize) -> Self {
        self.max_records = Some(max_records);
        self
    }

    /// Set how many seeds one VoronoiAssignment group handles
    pub fn seed_batch(mut self, batch: usize) -> Self {
        self.config.seed_batch = batch;
        self
    }

    /// Set the neighborhood half-size scanned per seed
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if radius is zero
    pub fn cell_radius(mut self, radius: u32) -> Result<Self> {
        if radius == 0 {
            return Err(PolyError::InvalidConfig(
                "cell_radius must be non-zero".to_string(),
            ));
        }
        self.config.cell_radius = radius;
        Ok(self)
    }

    /// Build the configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when a divisor does not split its extent
    /// exactly or a capacity is out of range.
    pub fn build(self) -> Result<PipelineConfig> {
        let mut config = self.config;
        config.max_records = self.max_records.unwrap_or(config.max_points);
        config.validate()?;
        Ok(config)
    }
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings the owner may change while capture is running
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceSettings {
    /// Depth samples beyond this distance in metres are discarded
    pub max_depth: f32,

    /// Depth step in metres between neighbors that counts as an edge
    pub edge_sensitivity: f32,
}

impl DeviceSettings {
    /// Create settings, rejecting non-positive values
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if either value is not a positive finite number
    pub fn new(max_depth: f32, edge_sensitivity: f32) -> Result<Self> {
        if !(max_depth.is_finite() && max_depth > 0.0) {
            return Err(PolyError::InvalidConfig(format!(
                "max_depth must be positive (got {})",
                max_depth
            )));
        }
        if !(edge_sensitivity.is_finite() && edge_sensitivity > 0.0) {
            return Err(PolyError::InvalidConfig(format!(
                "edge_sensitivity must be positive (got {})",
                edge_sensitivity
            )));
        }
        Ok(Self {
            max_depth,
            edge_sensitivity,
        })
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            max_depth: 3.0,
            edge_sensitivity: 0.1,
        }
    }
}
