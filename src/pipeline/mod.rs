//! Silhouette triangulation pipeline
//!
//! Five data-parallel stages run in a fixed order every frame:
//!
//! 1. **Reset** - claims, seed map, adjacency map and both lists cleared
//! 2. **SeedExtraction** - silhouette pixels appended to the seed list
//! 3. **VoronoiAssignment** - each seed claims the pixels nearest to it
//! 4. **BoundaryModification** - pixels bordering another cell marked
//! 5. **TriangulationExtraction** - one record per adjacent seed pair or
//!    triple, deduplicated through the adjacency map
//!
//! followed by a [`CountReadback`] of how much of each list was filled.
//! Each stage joins before the next starts.

mod bindings;
mod boundary;
mod readback;
mod reset;
mod seeds;
mod triangulate;
mod voronoi;

pub use bindings::{Dispatch, DispatchTable, GridDispatch, LinearDispatch, Stage};
pub use readback::{CountReadback, PipelineCounts};
pub use seeds::{SeedInputs, SeedPoint, SeedSource, SilhouetteEdgeSeeds};
pub use triangulate::{ClaimOutcome, EdgeAdjacencyMap, TriangleRecord};
pub use voronoi::{CellularMap, Claim, NO_SEED_POSITION};

use glam::Vec2;
use tracing::{debug, trace, warn};

use crate::arena::AppendList;
use crate::config::PipelineConfig;
use crate::error::{PolyError, Result};
use crate::grid::Grid;

use reset::CycleState;

/// The geometry pipeline and every surface it owns
pub struct GeometryPipeline {
    config: PipelineConfig,
    dispatch: DispatchTable,
    seed_source: Box<dyn SeedSource>,
    cellular_map: CellularMap,
    seed_map: Grid<Vec2>,
    boundary_map: Grid<f32>,
    adjacency: EdgeAdjacencyMap,
    seeds: AppendList<SeedPoint>,
    records: AppendList<TriangleRecord>,
    readback: CountReadback,
    counts: PipelineCounts,
    saturated: bool,
}

impl GeometryPipeline {
    /// Allocate every surface and list at the configured size
    ///
    /// Seeds come from [`SilhouetteEdgeSeeds`] until another source is set.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let dispatch = DispatchTable::new(&config)?;
        let (width, height) = (config.width, config.height);
        debug!(?dispatch, "geometry pipeline ready");
        Ok(Self {
            config,
            dispatch,
            seed_source: Box::new(SilhouetteEdgeSeeds::default()),
            cellular_map: CellularMap::new(width, height),
            seed_map: Grid::new(width, height, NO_SEED_POSITION),
            boundary_map: Grid::new(width, height, 0.0),
            adjacency: EdgeAdjacencyMap::new(config.max_records),
            seeds: AppendList::with_capacity(config.max_points),
            records: AppendList::with_capacity(config.max_records),
            readback: CountReadback::new(),
            counts: PipelineCounts::default(),
            saturated: false,
        })
    }

    /// Replace the seed candidate strategy
    pub fn set_seed_source(&mut self, source: impl SeedSource + 'static) {
        self.seed_source = Box::new(source);
    }

    /// Run every stage over one frame's surfaces
    ///
    /// # Arguments
    ///
    /// * `inputs` - Body index and edge maps at the configured resolution
    ///
    /// # Returns
    ///
    /// The counts read back after the last stage. The same values stay
    /// available through [`GeometryPipeline::counts`] until the next run.
    ///
    /// # Example
    ///
    /// ```
    /// use silhouette_delaunay::*;
    ///
    /// let config = PipelineConfigBuilder::new()
    ///     .resolution(64, 64)
    ///     .block_size(16)
    ///     .image_block_size(8)
    ///     .max_points(256)
    ///     .seed_batch(128)
    ///     .build()
    ///     .unwrap();
    /// let mut pipeline = GeometryPipeline::new(config).unwrap();
    ///
    /// let body = Grid::new(64, 64, 0.0);
    /// let edges = Grid::new(64, 64, 0.0);
    /// let counts = pipeline
    ///     .run(&SeedInputs { body_index_map: &body, edge_map: &edges })
    ///     .unwrap();
    /// assert_eq!(counts.seeds, 0);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the input surfaces are not at the
    /// configured resolution. No stage runs in that case.
    pub fn run(&mut self, inputs: &SeedInputs<'_>) -> Result<PipelineCounts> {
        for (name, grid) in [
            ("body index map", inputs.body_index_map),
            ("edge map", inputs.edge_map),
        ] {
            if grid.width() != self.config.width || grid.height() != self.config.height {
                return Err(PolyError::InvalidConfig(format!(
                    "{} is {}x{}, pipeline is {}x{}",
                    name,
                    grid.width(),
                    grid.height(),
                    self.config.width,
                    self.config.height
                )));
            }
        }

        let pixels = self.dispatch.pixels;

        trace!(stage = %Stage::Reset);
        reset::reset(
            pixels,
            CycleState {
                cellular: &mut self.cellular_map,
                seed_map: &mut self.seed_map,
                adjacency: &mut self.adjacency,
                seeds: &mut self.seeds,
                records: &mut self.records,
            },
        );

        trace!(stage = %Stage::SeedExtraction);
        seeds::extract(pixels, self.seed_source.as_ref(), inputs, &self.seeds);
        // Parallel append order is arbitrary; ids follow scan order instead
        self.seeds.sort_recorded_by_key(|seed| (seed.y, seed.x));

        trace!(stage = %Stage::VoronoiAssignment);
        voronoi::assign(
            self.dispatch.seeds,
            &self.seeds,
            self.config.cell_radius,
            &self.cellular_map,
        );
        voronoi::resolve_seed_map(pixels, &self.seeds, &self.cellular_map, &mut self.seed_map);

        trace!(stage = %Stage::BoundaryModification);
        boundary::modify(pixels, &self.cellular_map, &mut self.boundary_map);

        trace!(stage = %Stage::TriangulationExtraction);
        triangulate::extract(
            pixels,
            &self.boundary_map,
            &self.cellular_map,
            &self.seeds,
            &self.adjacency,
            &self.records,
        );

        let counts = self.readback.read(&self.seeds, &self.records);
        if counts.is_saturated() && !self.saturated {
            warn!(
                dropped_seeds = counts.dropped_seeds,
                dropped_records = counts.dropped_records,
                "pipeline output truncated at capacity"
            );
        }
        self.saturated = counts.is_saturated();
        self.counts = counts;
        debug!(seeds = counts.seeds, records = counts.records, "pipeline cycle done");
        Ok(counts)
    }

    /// Configuration the surfaces were allocated for
    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Work-group shapes resolved at construction
    #[inline]
    pub fn dispatch_table(&self) -> &DispatchTable {
        &self.dispatch
    }

    /// Counts read back by the last run
    #[inline]
    pub fn counts(&self) -> PipelineCounts {
        self.counts
    }

    /// Counter buffer as a drawing stage reads it, `[seeds, records]`
    #[inline]
    pub fn counters(&self) -> [u32; 2] {
        self.readback.counters()
    }

    /// Winning claim per pixel from the last run
    #[inline]
    pub fn cellular_map(&self) -> &CellularMap {
        &self.cellular_map
    }

    /// Claiming seed's coordinate per pixel, [`NO_SEED_POSITION`] if unclaimed
    #[inline]
    pub fn seed_map(&self) -> &Grid<Vec2> {
        &self.seed_map
    }

    #[inline]
    pub fn boundary_map(&self) -> &Grid<f32> {
        &self.boundary_map
    }

    /// Seeds of the last run, sorted by row then column
    ///
    /// Record ids index this list.
    #[inline]
    pub fn seeds(&self) -> &AppendList<SeedPoint> {
        &self.seeds
    }

    /// Deduplicated edge and triangle records of the last run, unordered
    #[inline]
    pub fn records(&self) -> &AppendList<TriangleRecord> {
        &self.records
    }
}

impl std::fmt::Debug for GeometryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometryPipeline")
            .field("config", &self.config)
            .field("counts", &self.counts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfigBuilder;
    use std::collections::HashSet;

    const SIZE: u32 = 64;

    fn config(max_points: usize) -> PipelineConfig {
        config_with_records(max_points, 1024)
    }

    fn config_with_records(max_points: usize, max_records: usize) -> PipelineConfig {
        PipelineConfigBuilder::new()
            .resolution(SIZE, SIZE)
            .block_size(16)
            .image_block_size(8)
            .max_points(max_points)
            .max_records(max_records)
            .seed_batch(max_points / 4)
            .cell_radius(SIZE)
            .unwrap()
            .build()
            .unwrap()
    }

    /// Seeds exactly at the listed pixels
    struct FixedSeeds(Vec<(u32, u32)>);

    impl SeedSource for FixedSeeds {
        fn is_candidate(&self, _inputs: &SeedInputs<'_>, x: u32, y: u32) -> bool {
            self.0.contains(&(x, y))
        }
    }

    struct Surfaces {
        body: Grid<f32>,
        edges: Grid<f32>,
    }

    impl Surfaces {
        fn empty() -> Self {
            Self {
                body: Grid::new(SIZE, SIZE, 0.0),
                edges: Grid::new(SIZE, SIZE, 0.0),
            }
        }

        fn disc(radius: f32) -> Self {
            let mut surfaces = Self::empty();
            let center = Vec2::splat(SIZE as f32 * 0.5);
            for y in 0..SIZE {
                for x in 0..SIZE {
                    if (Vec2::new(x as f32, y as f32) - center).length() <= radius {
                        surfaces.body.set(x, y, 1.0);
                    }
                }
            }
            surfaces
        }

        fn inputs(&self) -> SeedInputs<'_> {
            SeedInputs {
                body_index_map: &self.body,
                edge_map: &self.edges,
            }
        }
    }

    fn run_fixed(points: &[(u32, u32)]) -> GeometryPipeline {
        let mut pipeline = GeometryPipeline::new(config(64)).unwrap();
        pipeline.set_seed_source(FixedSeeds(points.to_vec()));
        pipeline.run(&Surfaces::empty().inputs()).unwrap();
        pipeline
    }

    #[test]
    fn test_zero_seeds() {
        let mut pipeline = GeometryPipeline::new(config(64)).unwrap();
        let counts = pipeline.run(&Surfaces::empty().inputs()).unwrap();

        assert_eq!(counts, PipelineCounts::default());
        assert_eq!(pipeline.counters(), [0, 0]);
        assert!(pipeline.cellular_map().is_unclaimed());
        assert!(pipeline.boundary_map().as_slice().iter().all(|&b| b == 0.0));
        assert!(pipeline
            .seed_map()
            .as_slice()
            .iter()
            .all(|&p| p == NO_SEED_POSITION));
    }

    #[test]
    fn test_single_seed() {
        let pipeline = run_fixed(&[(40, 9)]);
        assert_eq!(pipeline.counts().seeds, 1);
        assert_eq!(pipeline.counts().records, 0);

        for y in 0..SIZE {
            for x in 0..SIZE {
                assert_eq!(pipeline.cellular_map().claim_at(x, y).unwrap().seed, 0);
                assert_eq!(*pipeline.seed_map().at(x, y), Vec2::new(40.0, 9.0));
            }
        }
        let outward: Vec<f32> = (40..SIZE)
            .map(|x| pipeline.cellular_map().claim_at(x, 30).unwrap().distance)
            .collect();
        assert!(outward.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_opposite_corners() {
        let pipeline = run_fixed(&[(0, 0), (SIZE - 1, SIZE - 1)]);
        let counts = pipeline.counts();
        assert_eq!(counts.seeds, 2);
        assert_eq!(counts.records, 1);
        assert_eq!(pipeline.records().get(0), Some(TriangleRecord::Edge([0, 1])));

        // Boundary pixels hug the anti-diagonal bisector
        let mid = (SIZE - 1) as i64;
        let mut marked = 0;
        for y in 0..SIZE {
            for x in 0..SIZE {
                if *pipeline.boundary_map().at(x, y) > 0.5 {
                    assert!((x as i64 + y as i64 - mid).abs() <= 1, "({}, {})", x, y);
                    marked += 1;
                }
            }
        }
        assert!(marked >= SIZE as usize);
        assert_eq!(*pipeline.boundary_map().at(31, 32), 1.0);
    }

    #[test]
    fn test_four_corners_tile_the_square() {
        let corners = [(16, 16), (48, 16), (16, 48), (48, 48)];
        let pipeline = run_fixed(&corners);
        let triangles: HashSet<[u32; 3]> = pipeline
            .records()
            .iter()
            .filter_map(|record| match record {
                TriangleRecord::Triangle(ids) => Some(ids),
                TriangleRecord::Edge(_) => None,
            })
            .collect();
        assert_eq!(triangles, HashSet::from([[0, 1, 3], [0, 2, 3]]));

        // Halves of the square, overlapping nowhere
        let area: f32 = triangles
            .iter()
            .map(|ids| {
                let [a, b, c] = ids.map(|id| pipeline.seeds().get(id as usize).unwrap().position());
                ((b - a).perp_dot(c - a) * 0.5).abs()
            })
            .sum();
        assert_eq!(area, 32.0 * 32.0);
    }

    #[test]
    fn test_shared_boundary_emits_one_edge() {
        // A long straight boundary between two cells
        let pipeline = run_fixed(&[(10, 32), (50, 32)]);
        let boundary_pixels = pipeline
            .boundary_map()
            .as_slice()
            .iter()
            .filter(|&&b| b > 0.5)
            .count();
        assert!(boundary_pixels >= 2 * SIZE as usize);
        assert_eq!(pipeline.counts().records, 1);
    }

    #[test]
    fn test_three_cells_make_a_triangle() {
        let pipeline = run_fixed(&[(8, 8), (56, 8), (32, 56)]);
        let records: HashSet<TriangleRecord> = pipeline.records().iter().collect();
        assert!(records.contains(&TriangleRecord::Triangle([0, 1, 2])));
        assert!(records.contains(&TriangleRecord::Edge([0, 1])));
        assert!(records.contains(&TriangleRecord::Edge([0, 2])));
        assert!(records.contains(&TriangleRecord::Edge([1, 2])));
        assert_eq!(records.len(), pipeline.counts().records);
    }

    #[test]
    fn test_records_unique() {
        let pipeline = {
            let mut pipeline = GeometryPipeline::new(config(256)).unwrap();
            pipeline.run(&Surfaces::disc(24.0).inputs()).unwrap();
            pipeline
        };
        let records = pipeline.records().to_vec();
        let unique: HashSet<TriangleRecord> = records.iter().copied().collect();
        assert_eq!(unique.len(), records.len());
        for record in &records {
            let ids = record.seeds();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            assert!(ids.iter().all(|&id| (id as usize) < pipeline.counts().seeds));
        }
    }

    #[test]
    fn test_circle_seeds_on_outline() {
        let mut pipeline = GeometryPipeline::new(config(256)).unwrap();
        let counts = pipeline.run(&Surfaces::disc(20.0).inputs()).unwrap();
        assert!(counts.seeds > 0);
        assert_eq!(counts.dropped_seeds, 0);
        let center = Vec2::splat(SIZE as f32 * 0.5);
        for seed in pipeline.seeds().iter() {
            let r = (seed.position() - center).length();
            assert!(r > 18.5 && r <= 20.0, "seed {:?} at radius {}", seed, r);
        }
        // Sorted by row, then column
        let seeds = pipeline.seeds().to_vec();
        assert!(seeds.windows(2).all(|w| (w[0].y, w[0].x) < (w[1].y, w[1].x)));
    }

    #[test]
    fn test_capacity_respected() {
        let mut pipeline = GeometryPipeline::new(config_with_records(32, 32)).unwrap();
        let counts = pipeline.run(&Surfaces::disc(28.0).inputs()).unwrap();
        assert_eq!(counts.seeds, 32);
        assert!(counts.dropped_seeds > 0);
        assert_eq!(counts.records, 32);
        assert!(counts.dropped_records > 0);
        assert!(pipeline.records().recorded_len() <= pipeline.records().capacity());
    }

    #[test]
    fn test_deterministic_across_runs() {
        let surfaces = Surfaces::disc(22.0);
        let mut first = GeometryPipeline::new(config(256)).unwrap();
        first.run(&surfaces.inputs()).unwrap();
        let mut second = GeometryPipeline::new(config(256)).unwrap();
        for _ in 0..3 {
            second.run(&surfaces.inputs()).unwrap();
        }

        assert_eq!(first.seeds().to_vec(), second.seeds().to_vec());
        for y in 0..SIZE {
            for x in 0..SIZE {
                assert_eq!(
                    first.cellular_map().claim_at(x, y),
                    second.cellular_map().claim_at(x, y)
                );
            }
        }
        let a: HashSet<TriangleRecord> = first.records().iter().collect();
        let b: HashSet<TriangleRecord> = second.records().iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_state_does_not_leak_between_frames() {
        let mut pipeline = GeometryPipeline::new(config(256)).unwrap();
        pipeline.run(&Surfaces::disc(22.0).inputs()).unwrap();
        assert!(pipeline.counts().records > 0);

        let counts = pipeline.run(&Surfaces::empty().inputs()).unwrap();
        assert_eq!(counts.seeds, 0);
        assert_eq!(counts.records, 0);
        assert!(pipeline.cellular_map().is_unclaimed());
    }

    #[test]
    fn test_wrong_input_size_rejected() {
        let mut pipeline = GeometryPipeline::new(config(64)).unwrap();
        let body = Grid::new(32, 32, 0.0);
        let edges = Grid::new(SIZE, SIZE, 0.0);
        let inputs = SeedInputs {
            body_index_map: &body,
            edge_map: &edges,
        };
        assert!(matches!(
            pipeline.run(&inputs),
            Err(PolyError::InvalidConfig(_))
        ));
    }

    #[cfg(feature = "spatial-index")]
    #[test]
    fn test_claims_match_nearest_seed() {
        use crate::spatial::SeedIndex;

        let mut pipeline = GeometryPipeline::new(config(256)).unwrap();
        pipeline.run(&Surfaces::disc(24.0).inputs()).unwrap();
        let positions: Vec<Vec2> = pipeline.seeds().iter().map(SeedPoint::position).collect();
        let index = SeedIndex::new(&positions).unwrap();

        for y in (0..SIZE).step_by(3) {
            for x in (0..SIZE).step_by(3) {
                let pixel = Vec2::new(x as f32, y as f32);
                let claim = pipeline.cellular_map().claim_at(x, y).unwrap();
                let nearest = index.find_nearest(pixel);
                let nearest_distance = (positions[nearest as usize] - pixel).length();
                // Equidistant seeds may resolve differently
                assert!((claim.distance - nearest_distance).abs() < 1e-3);
            }
        }
    }
}
