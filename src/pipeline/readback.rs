//! CountReadback
//!
//! The append lists are sized for the worst case; how much of them a frame
//! filled is only known after the producing stages joined. The readback
//! clears a two-word counter buffer, copies each list's recorded length
//! into it, and reads it back before anything sizes a draw from the lists.

use super::seeds::SeedPoint;
use super::triangulate::TriangleRecord;
use crate::arena::AppendList;

/// Populated lengths of the pipeline's output lists for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineCounts {
    /// Seeds recorded, never above `max_points`
    pub seeds: usize,
    /// Triangle and edge records, never above `max_records`
    pub records: usize,
    /// Seed candidates dropped because the seed list was full
    pub dropped_seeds: usize,
    /// Distinct records dropped because the record list was full
    ///
    /// An overflowing adjacency map adds one on top and stops counting, so
    /// the value is a lower bound once that happens.
    pub dropped_records: usize,
}

impl PipelineCounts {
    /// Whether either list hit its capacity this frame
    #[inline]
    pub fn is_saturated(&self) -> bool {
        self.dropped_seeds > 0 || self.dropped_records > 0
    }
}

/// Counter buffer shared with the drawing stage
#[derive(Debug, Clone, Default)]
pub struct CountReadback {
    counters: [u32; 2],
}

impl CountReadback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy both list lengths into the counter buffer and read them back
    pub fn read(
        &mut self,
        seeds: &AppendList<SeedPoint>,
        records: &AppendList<TriangleRecord>,
    ) -> PipelineCounts {
        self.counters = [0; 2];
        self.counters[0] = seeds.recorded_len() as u32;
        self.counters[1] = records.recorded_len() as u32;
        PipelineCounts {
            seeds: self.counters[0] as usize,
            records: self.counters[1] as usize,
            dropped_seeds: seeds.dropped(),
            dropped_records: records.dropped(),
        }
    }

    /// `[seeds, records]` as of the last read
    #[inline]
    pub fn counters(&self) -> [u32; 2] {
        self.counters
    }
}
