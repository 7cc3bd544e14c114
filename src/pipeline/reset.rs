//! Reset stage

use glam::Vec2;
use rayon::prelude::*;

use super::bindings::GridDispatch;
use super::seeds::SeedPoint;
use super::triangulate::{EdgeAdjacencyMap, TriangleRecord};
use super::voronoi::{CellularMap, NO_SEED_POSITION};
use crate::arena::AppendList;
use crate::grid::Grid;

/// Everything a pipeline cycle reads before it writes
pub(crate) struct CycleState<'a> {
    pub cellular: &'a mut CellularMap,
    pub seed_map: &'a mut Grid<Vec2>,
    pub adjacency: &'a mut EdgeAdjacencyMap,
    pub seeds: &'a mut AppendList<SeedPoint>,
    pub records: &'a mut AppendList<TriangleRecord>,
}

/// Return every surface and list to its start-of-cycle state
pub(crate) fn reset(dispatch: GridDispatch, state: CycleState<'_>) {
    state.cellular.reset(dispatch);
    state
        .seed_map
        .par_bands_mut(dispatch.block)
        .for_each(|(_, band)| band.fill(NO_SEED_POSITION));
    state.adjacency.reset();
    state.seeds.reset();
    state.records.reset();
}
