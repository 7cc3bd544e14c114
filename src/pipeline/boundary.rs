//! BoundaryModification stage

use rayon::prelude::*;

use super::bindings::GridDispatch;
use super::voronoi::CellularMap;
use crate::grid::Grid;

/// Mark claimed pixels that border another seed's cell
///
/// A pixel is marked 1.0 if a 4-neighbor is claimed by a different seed.
/// Unclaimed neighbors do not count.
pub(crate) fn modify(dispatch: GridDispatch, cellular: &CellularMap, boundary: &mut Grid<f32>) {
    let width = boundary.width();
    boundary
        .par_bands_mut(dispatch.block)
        .for_each(|(row0, band)| {
            for (i, marker) in band.iter_mut().enumerate() {
                let x = (i as u32 % width) as i64;
                let y = (row0 + i as u32 / width) as i64;
                let on_boundary = cellular.seed_at(x, y).is_some_and(|own| {
                    [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)]
                        .into_iter()
                        .filter_map(|(nx, ny)| cellular.seed_at(nx, ny))
                        .any(|other| other != own)
                });
                *marker = if on_boundary { 1.0 } else { 0.0 };
            }
        });
}
