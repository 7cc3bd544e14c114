//! Seed points and the SeedExtraction stage

use glam::Vec2;
use rayon::prelude::*;

use super::bindings::GridDispatch;
use crate::arena::{AppendList, Packed};
use crate::grid::Grid;

/// A seed at an integer pixel coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeedPoint {
    pub x: u32,
    pub y: u32,
}

impl SeedPoint {
    #[inline]
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Pixel coordinate as floats
    #[inline]
    pub fn position(self) -> Vec2 {
        Vec2::new(self.x as f32, self.y as f32)
    }
}

impl Packed for SeedPoint {
    #[inline]
    fn pack(self) -> u64 {
        (self.y as u64) << 32 | self.x as u64
    }

    #[inline]
    fn unpack(bits: u64) -> Self {
        Self {
            x: bits as u32,
            y: (bits >> 32) as u32,
        }
    }
}

/// Surfaces a [`SeedSource`] may read
#[derive(Debug, Clone, Copy)]
pub struct SeedInputs<'a> {
    /// 1.0 on tracked bodies, 0.0 on background
    pub body_index_map: &'a Grid<f32>,
    /// 1.0 on depth discontinuities
    pub edge_map: &'a Grid<f32>,
}

/// Strategy deciding which pixels become seeds
///
/// Called once per pixel, concurrently from many workers.
pub trait SeedSource: Send + Sync {
    fn is_candidate(&self, inputs: &SeedInputs<'_>, x: u32, y: u32) -> bool;
}

/// Seeds on the outline of tracked bodies and on depth edges inside them
///
/// A body pixel qualifies if one of its 4-neighbors is background or
/// outside the grid, or if its edge value exceeds `edge_threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilhouetteEdgeSeeds {
    pub edge_threshold: f32,
}

impl Default for SilhouetteEdgeSeeds {
    fn default() -> Self {
        Self {
            edge_threshold: 0.5,
        }
    }
}

#[inline]
fn is_body(value: f32) -> bool {
    value > 0.5
}

impl SeedSource for SilhouetteEdgeSeeds {
    fn is_candidate(&self, inputs: &SeedInputs<'_>, x: u32, y: u32) -> bool {
        let body = inputs.body_index_map;
        if !is_body(*body.at(x, y)) {
            return false;
        }
        let (x, y) = (x as i64, y as i64);
        let on_outline = [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)]
            .into_iter()
            .any(|(nx, ny)| !body.get(nx, ny).copied().is_some_and(is_body));
        on_outline || *inputs.edge_map.at(x as u32, y as u32) > self.edge_threshold
    }
}

/// Append every candidate pixel to `seeds` until it is full
pub(crate) fn extract(
    dispatch: GridDispatch,
    source: &dyn SeedSource,
    inputs: &SeedInputs<'_>,
    seeds: &AppendList<SeedPoint>,
) {
    let width = inputs.body_index_map.width();
    let height = inputs.body_index_map.height();
    (0..dispatch.groups_y).into_par_iter().for_each(|group| {
        let rows = group * dispatch.block..((group + 1) * dispatch.block).min(height);
        for y in rows {
            for x in 0..width {
                if source.is_candidate(inputs, x, y) {
                    // Full list: the candidate is counted as dropped
                    let _ = seeds.push(SeedPoint::new(x, y));
                }
            }
        }
    });
}
