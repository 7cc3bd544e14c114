//! Cellular map and the VoronoiAssignment stage
//!
//! Each seed scans the square neighborhood of `cell_radius` pixels around
//! itself and claims every pixel it is closer to than the pixel's current
//! claimant. A claim is one `u64` word, squared distance in the high half
//! and seed index in the low half, updated with `fetch_min`. The smaller
//! word always wins, so the final map does not depend on the order seeds
//! run in, and equal distances go to the lower seed index.

use std::sync::atomic::{AtomicU64, Ordering};

use glam::Vec2;
use rayon::prelude::*;

use super::bindings::{GridDispatch, LinearDispatch};
use super::seeds::SeedPoint;
use crate::arena::AppendList;
use crate::grid::Grid;

const UNCLAIMED: u64 = u64::MAX;

/// Coordinate stored in the seed map for pixels no seed claimed
pub const NO_SEED_POSITION: Vec2 = Vec2::splat(-1.0);

/// The winning claim on a pixel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Claim {
    /// Index into the seed list
    pub seed: u32,
    /// Euclidean distance in pixels to that seed
    pub distance: f32,
}

#[inline]
fn encode(seed: u32, dist_sq: u64) -> u64 {
    (dist_sq.min(u32::MAX as u64 - 1) << 32) | seed as u64
}

#[inline]
fn decode(word: u64) -> Option<Claim> {
    (word != UNCLAIMED).then(|| Claim {
        seed: word as u32,
        distance: ((word >> 32) as f32).sqrt(),
    })
}

/// Per-pixel nearest-seed claims
#[derive(Debug)]
pub struct CellularMap {
    claims: Grid<AtomicU64>,
}

impl CellularMap {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            claims: Grid::from_fn(width, height, || AtomicU64::new(UNCLAIMED)),
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.claims.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.claims.height()
    }

    /// Claim on a pixel, `None` if unclaimed
    #[inline]
    pub fn claim_at(&self, x: u32, y: u32) -> Option<Claim> {
        decode(self.claims.at(x, y).load(Ordering::Acquire))
    }

    /// Seed index claiming a pixel; `None` outside the grid or if unclaimed
    #[inline]
    pub fn seed_at(&self, x: i64, y: i64) -> Option<u32> {
        let word = self.claims.get(x, y)?.load(Ordering::Acquire);
        (word != UNCLAIMED).then_some(word as u32)
    }

    /// Whether no pixel is claimed
    pub fn is_unclaimed(&self) -> bool {
        self.claims
            .as_slice()
            .par_iter()
            .all(|c| c.load(Ordering::Acquire) == UNCLAIMED)
    }

    /// Mark every pixel unclaimed
    pub(crate) fn reset(&mut self, dispatch: GridDispatch) {
        self.claims
            .par_bands_mut(dispatch.block)
            .for_each(|(_, band)| {
                for claim in band {
                    *claim.get_mut() = UNCLAIMED;
                }
            });
    }

    #[inline]
    fn claim(&self, x: u32, y: u32, seed: u32, dist_sq: u64) {
        self.claims
            .at(x, y)
            .fetch_min(encode(seed, dist_sq), Ordering::AcqRel);
    }
}

/// Run `work` for every recorded seed
///
/// Groups run in parallel, and every seed of a group is its own work item.
fn for_each_seed(
    dispatch: LinearDispatch,
    seeds: &AppendList<SeedPoint>,
    work: impl Fn(usize, SeedPoint) + Sync,
) {
    (0..dispatch.groups).into_par_iter().for_each(|group| {
        dispatch
            .range(group)
            .into_par_iter()
            .with_max_len(1)
            .for_each(|index| {
                // Slots past the recorded length hold no seed this frame
                if let Some(seed) = seeds.get(index) {
                    work(index, seed);
                }
            });
    });
}

/// Let every recorded seed claim its neighborhood
pub(crate) fn assign(
    dispatch: LinearDispatch,
    seeds: &AppendList<SeedPoint>,
    cell_radius: u32,
    cellular: &CellularMap,
) {
    let (width, height) = (cellular.width(), cellular.height());
    for_each_seed(dispatch, seeds, |index, seed| {
        let x0 = seed.x.saturating_sub(cell_radius);
        let y0 = seed.y.saturating_sub(cell_radius);
        let x1 = seed.x.saturating_add(cell_radius).min(width - 1);
        let y1 = seed.y.saturating_add(cell_radius).min(height - 1);
        for y in y0..=y1 {
            let dy = y.abs_diff(seed.y) as u64;
            for x in x0..=x1 {
                let dx = x.abs_diff(seed.x) as u64;
                cellular.claim(x, y, index as u32, dx * dx + dy * dy);
            }
        }
    });
}

/// Write each pixel's claiming seed coordinate into the seed map
pub(crate) fn resolve_seed_map(
    dispatch: GridDispatch,
    seeds: &AppendList<SeedPoint>,
    cellular: &CellularMap,
    seed_map: &mut Grid<Vec2>,
) {
    let width = seed_map.width();
    seed_map
        .par_bands_mut(dispatch.block)
        .for_each(|(row0, band)| {
            for (i, position) in band.iter_mut().enumerate() {
                let x = i as u32 % width;
                let y = row0 + i as u32 / width;
                *position = cellular
                    .claim_at(x, y)
                    .and_then(|claim| seeds.get(claim.seed as usize))
                    .map_or(NO_SEED_POSITION, SeedPoint::position);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: u32 = 32;

    fn grid_dispatch() -> GridDispatch {
        GridDispatch {
            groups_x: SIZE / 8,
            groups_y: SIZE / 8,
            block: 8,
        }
    }

    fn seed_list(points: &[(u32, u32)]) -> AppendList<SeedPoint> {
        let list = AppendList::with_capacity(8);
        for &(x, y) in points {
            list.push(SeedPoint::new(x, y));
        }
        list
    }

    fn linear(batch: usize) -> LinearDispatch {
        LinearDispatch {
            groups: 8 / batch,
            batch,
        }
    }

    #[test]
    fn test_seeds_of_one_group_run_concurrently() {
        use std::sync::atomic::AtomicUsize;
        use std::time::{Duration, Instant};

        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let seeds = seed_list(&[(1, 1), (2, 2)]);
        let started = AtomicUsize::new(0);
        let overlapped = AtomicUsize::new(0);
        let single_group = LinearDispatch { groups: 1, batch: 8 };

        pool.install(|| {
            for_each_seed(single_group, &seeds, |_, _| {
                started.fetch_add(1, Ordering::SeqCst);
                let deadline = Instant::now() + Duration::from_secs(5);
                while started.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
                    std::hint::spin_loop();
                }
                if started.load(Ordering::SeqCst) == 2 {
                    overlapped.fetch_add(1, Ordering::SeqCst);
                }
            });
        });
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(overlapped.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_claim_word_ordering() {
        assert!(encode(5, 3) < encode(1, 4));
        assert!(encode(1, 4) < encode(2, 4));
        assert!(encode(u32::MAX - 1, u64::MAX) < UNCLAIMED);
        assert_eq!(decode(UNCLAIMED), None);
        assert_eq!(
            decode(encode(3, 25)),
            Some(Claim {
                seed: 3,
                distance: 5.0
            })
        );
    }

    #[test]
    fn test_single_seed_claims_everything() {
        let seeds = seed_list(&[(10, 20)]);
        let cellular = CellularMap::new(SIZE, SIZE);
        assign(linear(4), &seeds, SIZE, &cellular);

        for y in 0..SIZE {
            for x in 0..SIZE {
                let claim = cellular.claim_at(x, y).unwrap();
                assert_eq!(claim.seed, 0);
                let expected = (Vec2::new(x as f32, y as f32) - Vec2::new(10.0, 20.0)).length();
                assert!((claim.distance - expected).abs() < 1e-4);
            }
        }
        // Distance grows moving away from the seed
        let row: Vec<f32> = (10..SIZE)
            .map(|x| cellular.claim_at(x, 20).unwrap().distance)
            .collect();
        assert!(row.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_radius_limits_claims() {
        let seeds = seed_list(&[(0, 0)]);
        let cellular = CellularMap::new(SIZE, SIZE);
        assign(linear(8), &seeds, 4, &cellular);
        assert!(cellular.claim_at(4, 4).is_some());
        assert!(cellular.claim_at(5, 0).is_none());
        assert_eq!(cellular.seed_at(-1, 0), None);
    }

    #[test]
    fn test_ties_go_to_lower_index() {
        // Pixel (8, 0) is 4 px from both seeds
        let seeds = seed_list(&[(12, 0), (4, 0)]);
        let cellular = CellularMap::new(SIZE, SIZE);
        assign(linear(1), &seeds, SIZE, &cellular);
        assert_eq!(cellular.seed_at(8, 0), Some(0));
        assert_eq!(cellular.seed_at(7, 0), Some(1));
    }

    #[test]
    fn test_assignment_deterministic() {
        let points = [(3, 4), (20, 9), (11, 28), (27, 27), (15, 15), (5, 22)];
        let reference = CellularMap::new(SIZE, SIZE);
        assign(linear(2), &seed_list(&points), 12, &reference);

        for batch in [1, 2, 4, 8] {
            let cellular = CellularMap::new(SIZE, SIZE);
            assign(linear(batch), &seed_list(&points), 12, &cellular);
            for y in 0..SIZE {
                for x in 0..SIZE {
                    assert_eq!(cellular.claim_at(x, y), reference.claim_at(x, y));
                }
            }
        }
    }

    #[test]
    fn test_reset_and_seed_map() {
        let seeds = seed_list(&[(2, 2), (30, 30)]);
        let mut cellular = CellularMap::new(SIZE, SIZE);
        assign(linear(8), &seeds, 3, &cellular);

        let mut seed_map = Grid::new(SIZE, SIZE, Vec2::ZERO);
        resolve_seed_map(grid_dispatch(), &seeds, &cellular, &mut seed_map);
        assert_eq!(*seed_map.at(1, 1), Vec2::new(2.0, 2.0));
        assert_eq!(*seed_map.at(29, 31), Vec2::new(30.0, 30.0));
        assert_eq!(*seed_map.at(16, 16), NO_SEED_POSITION);

        cellular.reset(grid_dispatch());
        assert!(cellular.is_unclaimed());
    }
}
