//! Dispatch table
//!
//! Work-group shapes for every stage, resolved once when the pipeline is
//! built and handed to each stage explicitly.

use std::fmt;

use crate::config::PipelineConfig;
use crate::error::Result;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Reset,
    SeedExtraction,
    VoronoiAssignment,
    BoundaryModification,
    TriangulationExtraction,
}

impl Stage {
    /// Every stage, in the order the pipeline runs them
    pub const ORDER: [Stage; 5] = [
        Stage::Reset,
        Stage::SeedExtraction,
        Stage::VoronoiAssignment,
        Stage::BoundaryModification,
        Stage::TriangulationExtraction,
    ];

    /// Snake-case name used in log fields
    pub fn name(self) -> &'static str {
        match self {
            Stage::Reset => "reset",
            Stage::SeedExtraction => "seed_extraction",
            Stage::VoronoiAssignment => "voronoi_assignment",
            Stage::BoundaryModification => "boundary_modification",
            Stage::TriangulationExtraction => "triangulation_extraction",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A per-pixel dispatch over square blocks
///
/// Blocks are scheduled a row at a time: one work item covers `block`
/// full grid rows, so there are `groups_y` work items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDispatch {
    pub groups_x: u32,
    pub groups_y: u32,
    pub block: u32,
}

/// A per-element dispatch over fixed batches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearDispatch {
    pub groups: usize,
    pub batch: usize,
}

impl LinearDispatch {
    /// Element range covered by group `group`
    #[inline]
    pub fn range(&self, group: usize) -> std::ops::Range<usize> {
        group * self.batch..(group + 1) * self.batch
    }
}

/// Dispatch shape of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Grid(GridDispatch),
    Linear(LinearDispatch),
}

impl Dispatch {
    /// Total number of work groups
    pub fn group_count(&self) -> usize {
        match self {
            Dispatch::Grid(grid) => grid.groups_x as usize * grid.groups_y as usize,
            Dispatch::Linear(linear) => linear.groups,
        }
    }
}

/// Resolved dispatch shapes for every stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTable {
    pub(crate) pixels: GridDispatch,
    pub(crate) seeds: LinearDispatch,
}

impl DispatchTable {
    /// Resolve the table for a configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if any divisor leaves a remainder.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pixels: GridDispatch {
                groups_x: config.width / config.block_size,
                groups_y: config.height / config.block_size,
                block: config.block_size,
            },
            seeds: LinearDispatch {
                groups: config.seed_groups(),
                batch: config.seed_batch,
            },
        })
    }

    /// Dispatch shape of a stage
    pub fn get(&self, stage: Stage) -> Dispatch {
        match stage {
            Stage::VoronoiAssignment => Dispatch::Linear(self.seeds),
            Stage::Reset
            | Stage::SeedExtraction
            | Stage::BoundaryModification
            | Stage::TriangulationExtraction => Dispatch::Grid(self.pixels),
        }
    }
}
