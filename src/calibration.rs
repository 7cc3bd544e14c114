//! Depth camera calibration and the XY ray table
//!
//! The XY table stores, for every depth pixel, the normalized image-plane
//! ray `(x, y)` such that a sample of depth `z` unprojects to
//! `(x * z, y * z, z)`. It depends only on the calibration, so it is built
//! once in the background after the device opens and shared read-only.

use std::sync::{Arc, OnceLock};

use glam::Vec2;
use rayon::prelude::*;
use tracing::{debug, info};

/// Undistortion fixed-point iterations per pixel
const UNDISTORT_ITERATIONS: usize = 20;

/// Residual (in normalized units) above which undistortion counts as failed
const UNDISTORT_TOLERANCE: f32 = 1e-4;

/// Pinhole intrinsics with two radial distortion terms
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub width: u32,
    pub height: u32,
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub k1: f32,
    pub k2: f32,
}

impl Calibration {
    /// Undistorted calibration with the principal point at the image center
    pub fn pinhole(width: u32, height: u32, focal: f32) -> Self {
        Self {
            width,
            height,
            fx: focal,
            fy: focal,
            cx: width as f32 * 0.5,
            cy: height as f32 * 0.5,
            k1: 0.0,
            k2: 0.0,
        }
    }

    /// Map a pixel to its normalized ray, or `None` if undistortion diverges
    pub fn pixel_to_ray(&self, u: f32, v: f32) -> Option<Vec2> {
        let distorted = Vec2::new((u - self.cx) / self.fx, (v - self.cy) / self.fy);
        let mut ray = distorted;
        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = ray.length_squared();
            let scale = 1.0 + self.k1 * r2 + self.k2 * r2 * r2;
            if scale <= 0.0 {
                return None;
            }
            ray = distorted / scale;
        }

        let r2 = ray.length_squared();
        let redistorted = ray * (1.0 + self.k1 * r2 + self.k2 * r2 * r2);
        let residual = (redistorted - distorted).length();
        (ray.is_finite() && residual < UNDISTORT_TOLERANCE).then_some(ray)
    }
}

/// Per-pixel normalized ray table
#[derive(Debug, Clone, PartialEq)]
pub struct XyTable {
    width: u32,
    height: u32,
    /// Interleaved `x, y` per pixel; NaN marks pixels with no valid ray
    data: Vec<f32>,
}

impl XyTable {
    /// Build the table for every pixel of the calibrated sensor
    pub fn build(calibration: &Calibration) -> Self {
        let width = calibration.width;
        let row_len = width as usize * 2;
        let mut data = vec![0.0f32; row_len * calibration.height as usize];

        data.par_chunks_mut(row_len.max(1))
            .enumerate()
            .for_each(|(v, row)| {
                for (u, xy) in row.chunks_exact_mut(2).enumerate() {
                    match calibration.pixel_to_ray(u as f32, v as f32) {
                        Some(ray) => {
                            xy[0] = ray.x;
                            xy[1] = ray.y;
                        }
                        None => {
                            xy[0] = f32::NAN;
                            xy[1] = f32::NAN;
                        }
                    }
                }
            });

        Self {
            width,
            height: calibration.height,
            data,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Interleaved ray data, two floats per pixel
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Ray for a pixel, `None` if the pixel has no valid ray
    #[inline]
    pub fn ray(&self, index: usize) -> Option<Vec2> {
        let ray = Vec2::new(self.data[index * 2], self.data[index * 2 + 1]);
        ray.is_finite().then_some(ray)
    }
}

/// Lazily built, immutable-once-ready XY table
///
/// Cloning the cache shares the same slot.
#[derive(Debug, Clone, Default)]
pub struct XyTableCache {
    slot: Arc<OnceLock<Arc<XyTable>>>,
}

impl XyTableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table on the rayon pool and publish it when done
    pub fn spawn_build(&self, calibration: Calibration) {
        let slot = self.slot.clone();
        rayon::spawn(move || {
            debug!(
                width = calibration.width,
                height = calibration.height,
                "building xy table"
            );
            let table = Arc::new(XyTable::build(&calibration));
            if slot.set(table).is_ok() {
                info!("xy table ready");
            }
        });
    }

    /// The table, or `None` while it is still being built
    #[inline]
    pub fn get(&self) -> Option<Arc<XyTable>> {
        self.slot.get().cloned()
    }
}
