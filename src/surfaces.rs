//! Per-frame image surfaces
//!
//! A locked frame's raw pixel buffers are copied into staging storage so
//! the frame can be released straight away. Two image kernels then build
//! the surfaces the geometry pipeline reads:
//!
//! - **Unproject** turns color, depth and body-index bytes into a color
//!   map, a metric depth map, a camera-space position map and a 0/1 body
//!   mask, using the calibration ray table.
//! - **BakeEdges** marks depth discontinuities in an edge map.
//!
//! Both kernels run over horizontal bands of `image_block_size` rows.

use glam::Vec4;
use rayon::prelude::*;

use crate::calibration::XyTable;
use crate::capture::LockedFrame;
use crate::config::PipelineConfig;
use crate::device::BODY_INDEX_BACKGROUND;
use crate::error::{PolyError, Result};
use crate::grid::Grid;
use crate::pipeline::SeedInputs;

/// Raw frame bytes, copied out of a locked frame
#[derive(Debug, Clone)]
struct Staging {
    color: Vec<u8>,
    depth: Vec<u8>,
    body_index: Vec<u8>,
}

/// Image surfaces derived from one frame
#[derive(Debug, Clone)]
pub struct FrameSurfaces {
    width: u32,
    height: u32,
    image_block_size: u32,
    staging: Staging,
    color_map: Grid<[u8; 4]>,
    depth_map: Grid<f32>,
    position_map: Grid<Vec4>,
    body_index_map: Grid<f32>,
    edge_map: Grid<f32>,
}

impl FrameSurfaces {
    /// Allocate surfaces at the configured resolution
    pub fn new(config: &PipelineConfig) -> Self {
        let (width, height) = (config.width, config.height);
        let pixels = config.pixel_count();
        Self {
            width,
            height,
            image_block_size: config.image_block_size,
            staging: Staging {
                color: vec![0; pixels * 4],
                depth: vec![0; pixels * 2],
                body_index: vec![BODY_INDEX_BACKGROUND; pixels],
            },
            color_map: Grid::new(width, height, [0; 4]),
            depth_map: Grid::new(width, height, 0.0),
            position_map: Grid::new(width, height, Vec4::ZERO),
            body_index_map: Grid::new(width, height, 0.0),
            edge_map: Grid::new(width, height, 0.0),
        }
    }

    /// Copy a locked frame's pixel buffers into staging
    ///
    /// # Errors
    ///
    /// Returns `BufferSize` if the frame's resolution or any channel's
    /// length does not match the configured resolution. Staging is left
    /// untouched in that case.
    pub fn upload(&mut self, frame: &LockedFrame<'_>) -> Result<()> {
        let pixels = self.width as usize * self.height as usize;
        if frame.width != self.width || frame.height != self.height {
            return Err(PolyError::BufferSize {
                channel: "depth",
                expected: pixels * 2,
                actual: frame.width as usize * frame.height as usize * 2,
            });
        }
        for (channel, expected, actual) in [
            ("color", pixels * 4, frame.color.len()),
            ("depth", pixels * 2, frame.depth.len()),
            ("body index", pixels, frame.body_index.len()),
        ] {
            if expected != actual {
                return Err(PolyError::BufferSize {
                    channel,
                    expected,
                    actual,
                });
            }
        }

        self.staging.color.copy_from_slice(frame.color);
        self.staging.depth.copy_from_slice(frame.depth);
        self.staging.body_index.copy_from_slice(frame.body_index);
        Ok(())
    }

    /// Run the Unproject kernel over the staged frame
    ///
    /// Depth samples that are zero, farther than `max_depth` metres, or on
    /// a pixel without a calibration ray are invalid: their depth is 0 and
    /// their position is `Vec4::ZERO`. Valid positions carry `w = 1`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the ray table was built for another
    /// resolution.
    pub fn unproject(&mut self, xy_table: &XyTable, max_depth: f32) -> Result<()> {
        if xy_table.width() != self.width || xy_table.height() != self.height {
            return Err(PolyError::InvalidConfig(format!(
                "xy table is {}x{}, surfaces are {}x{}",
                xy_table.width(),
                xy_table.height(),
                self.width,
                self.height
            )));
        }

        let width = self.width as usize;
        let block = self.image_block_size;
        let staging = &self.staging;
        self.color_map
            .par_bands_mut(block)
            .zip(self.depth_map.par_bands_mut(block))
            .zip(self.position_map.par_bands_mut(block))
            .zip(self.body_index_map.par_bands_mut(block))
            .for_each(|((((row0, color), (_, depth)), (_, position)), (_, body))| {
                let base = row0 as usize * width;
                for local in 0..color.len() {
                    let i = base + local;

                    let bgra = &staging.color[i * 4..i * 4 + 4];
                    color[local] = [bgra[2], bgra[1], bgra[0], bgra[3]];

                    let mm = u16::from_le_bytes([staging.depth[i * 2], staging.depth[i * 2 + 1]]);
                    let z = mm as f32 * 0.001;
                    match xy_table.ray(i).filter(|_| mm > 0 && z <= max_depth) {
                        Some(ray) => {
                            depth[local] = z;
                            position[local] = Vec4::new(ray.x * z, ray.y * z, z, 1.0);
                        }
                        None => {
                            depth[local] = 0.0;
                            position[local] = Vec4::ZERO;
                        }
                    }

                    body[local] = if staging.body_index[i] == BODY_INDEX_BACKGROUND {
                        0.0
                    } else {
                        1.0
                    };
                }
            });
        Ok(())
    }

    /// Run the BakeEdges kernel over the depth map
    ///
    /// A pixel with valid depth is an edge (1.0) if a 4-neighbor inside the
    /// grid has no valid depth or differs by more than `edge_sensitivity`
    /// metres.
    pub fn bake_edges(&mut self, edge_sensitivity: f32) {
        let width = self.width;
        let block = self.image_block_size;
        let depth_map = &self.depth_map;
        self.edge_map
            .par_bands_mut(block)
            .for_each(|(row0, band)| {
                for (local, edge) in band.iter_mut().enumerate() {
                    let x = (local % width as usize) as i64;
                    let y = row0 as i64 + (local / width as usize) as i64;
                    let d = *depth_map.at(x as u32, y as u32);
                    let discontinuous = d > 0.0
                        && [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)]
                            .into_iter()
                            .filter_map(|(nx, ny)| depth_map.get(nx, ny))
                            .any(|&n| n <= 0.0 || (n - d).abs() > edge_sensitivity);
                    *edge = if discontinuous { 1.0 } else { 0.0 };
                }
            });
    }

    /// Surfaces the seed extraction stage reads
    pub fn seed_inputs(&self) -> SeedInputs<'_> {
        SeedInputs {
            body_index_map: &self.body_index_map,
            edge_map: &self.edge_map,
        }
    }

    /// RGBA color in depth camera geometry
    #[inline]
    pub fn color_map(&self) -> &Grid<[u8; 4]> {
        &self.color_map
    }

    /// Depth in metres, 0 where invalid
    #[inline]
    pub fn depth_map(&self) -> &Grid<f32> {
        &self.depth_map
    }

    /// Camera-space position, `w = 0` where invalid
    #[inline]
    pub fn position_map(&self) -> &Grid<Vec4> {
        &self.position_map
    }

    /// 1.0 on tracked bodies, 0.0 on background
    #[inline]
    pub fn body_index_map(&self) -> &Grid<f32> {
        &self.body_index_map
    }

    #[inline]
    pub fn edge_map(&self) -> &Grid<f32> {
        &self.edge_map
    }
}
