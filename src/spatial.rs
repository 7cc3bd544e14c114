//! Spatial indexing for fast position-to-seed lookups
//!
//! This module is only available with the `spatial-index` feature.

use glam::Vec2;
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;

use crate::arena::AppendList;
use crate::pipeline::SeedPoint;

/// KD-tree over one frame's seed positions
///
/// The pipeline answers "which seed owns this pixel" through the cellular
/// map, but only on the pixel grid. The index answers it for arbitrary
/// sub-pixel positions, e.g. for effects that scatter particles over the
/// triangulation.
///
/// # Performance
///
/// - Construction: O(n log n)
/// - Query: O(log n)
#[derive(Clone)]
pub struct SeedIndex {
    tree: ImmutableKdTree<f32, usize, 2, 32>,
}

impl SeedIndex {
    /// Build an index over seed positions
    ///
    /// Returns `None` for an empty slice; a frame without seeds has nothing
    /// to look up.
    ///
    /// # Example
    ///
    /// ```
    /// use silhouette_delaunay::*;
    /// use glam::Vec2;
    ///
    /// let seeds = vec![Vec2::new(0.0, 0.0), Vec2::new(10.0, 0.0)];
    /// let index = SeedIndex::new(&seeds).unwrap();
    /// assert_eq!(index.find_nearest(Vec2::new(7.5, 1.0)), 1);
    /// ```
    pub fn new(positions: &[Vec2]) -> Option<Self> {
        if positions.is_empty() {
            return None;
        }
        let points: Vec<[f32; 2]> = positions.iter().map(|p| [p.x, p.y]).collect();
        Some(Self {
            tree: ImmutableKdTree::new_from_slice(&points),
        })
    }

    /// Build an index over the recorded seeds of a pipeline run
    pub fn from_seeds(seeds: &AppendList<SeedPoint>) -> Option<Self> {
        let positions: Vec<Vec2> = seeds.iter().map(SeedPoint::position).collect();
        Self::new(&positions)
    }

    /// Index of the seed nearest to `position`
    pub fn find_nearest(&self, position: Vec2) -> u32 {
        let result = self
            .tree
            .nearest_one::<SquaredEuclidean>(&[position.x, position.y]);
        result.item as u32
    }
}

impl std::fmt::Debug for SeedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedIndex").finish_non_exhaustive()
    }
}
