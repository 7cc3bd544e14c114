//! Fixed-resolution 2D surfaces
//!
//! Every per-pixel map in the crate (color, positions, claims, boundaries)
//! is a row-major [`Grid`] of the configured resolution.

use rayon::prelude::*;

/// Row-major 2D surface of fixed size
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    width: u32,
    height: u32,
    data: Vec<T>,
}

impl<T: Clone> Grid<T> {
    /// Create a grid with every pixel set to `value`
    pub fn new(width: u32, height: u32, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }
}

impl<T> Grid<T> {
    /// Create a grid filling pixels from `f` in row-major order
    pub fn from_fn(width: u32, height: u32, f: impl FnMut() -> T) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            data: std::iter::repeat_with(f).take(len).collect(),
        }
    }

    /// Grid width in pixels
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in pixels
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Flat row-major pixel data
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    #[inline]
    pub fn index_of(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Get a pixel, or `None` outside the grid
    #[inline]
    pub fn get(&self, x: i64, y: i64) -> Option<&T> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        self.data.get(self.index_of(x as u32, y as u32))
    }

    #[inline]
    pub fn at(&self, x: u32, y: u32) -> &T {
        &self.data[self.index_of(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: T) {
        let idx = self.index_of(x, y);
        self.data[idx] = value;
    }
}

impl<T: Send> Grid<T> {
    /// Split the grid into horizontal bands of `block` rows for parallel writes
    ///
    /// Each item is `(first_row, band)`; a band owns its pixels exclusively.
    pub fn par_bands_mut(
        &mut self,
        block: u32,
    ) -> impl IndexedParallelIterator<Item = (u32, &mut [T])> + '_ {
        let band_len = (self.width as usize * block as usize).max(1);
        self.data
            .par_chunks_mut(band_len)
            .enumerate()
            .map(move |(i, band)| (i as u32 * block, band))
    }
}

impl<T: Clone + Send + Sync> Grid<T> {
    /// Reset every pixel to `value` in parallel
    pub fn fill(&mut self, value: T) {
        self.data.par_iter_mut().for_each(|px| *px = value.clone());
    }
}
