//! In-process synthetic depth camera
//!
//! Renders a single disc-shaped subject in front of a flat background and
//! tracks it as one body. The subject wanders by a seeded random jitter so
//! runs are reproducible. Every image it hands out is counted on allocation
//! and on release, which makes buffer leaks visible in tests.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glam::{Quat, Vec2, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{
    BodyTracker, Capture, DepthDevice, DeviceBackend, Image, ImageFormat, TrackerResult,
    BODY_INDEX_BACKGROUND,
};
use crate::calibration::Calibration;
use crate::config::{DeviceSettings, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use crate::error::{PolyError, Result};
use crate::skeleton::{Body, JointConfidence};

/// Scene and timing of the synthetic camera
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    /// Subject disc radius in pixels
    pub subject_radius: f32,
    pub subject_depth_mm: u16,
    pub background_depth_mm: u16,
    /// Time opening the device takes
    pub open_delay: Duration,
    /// Time one blocking capture takes
    pub frame_interval: Duration,
    /// The tracker yields a result for every n-th capture
    pub track_every: u32,
    /// Maximum per-capture offset of the subject center, in pixels
    pub jitter: f32,
    pub seed: u64,
    /// Report zero installed devices when false
    pub installed: bool,
    /// Fail every capture after this many succeeded
    pub fail_after: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            subject_radius: 120.0,
            subject_depth_mm: 1500,
            background_depth_mm: 5000,
            open_delay: Duration::ZERO,
            frame_interval: Duration::from_millis(33),
            track_every: 1,
            jitter: 2.0,
            seed: 42,
            installed: true,
            fail_after: None,
        }
    }
}

/// Counters shared between the synthetic device and its owner
#[derive(Debug, Default)]
pub struct SyntheticStats {
    captures: AtomicU64,
    images_allocated: AtomicUsize,
    images_released: AtomicUsize,
    settings_applied: AtomicUsize,
    last_max_depth: AtomicU32,
}

impl SyntheticStats {
    /// Captures delivered so far
    pub fn captures(&self) -> u64 {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn images_allocated(&self) -> usize {
        self.images_allocated.load(Ordering::SeqCst)
    }

    pub fn images_released(&self) -> usize {
        self.images_released.load(Ordering::SeqCst)
    }

    /// Images handed out and not yet released
    pub fn images_outstanding(&self) -> usize {
        self.images_allocated() - self.images_released()
    }

    /// How many times settings were pushed to the device
    pub fn settings_applied(&self) -> usize {
        self.settings_applied.load(Ordering::SeqCst)
    }

    /// `max_depth` of the most recently applied settings
    pub fn last_max_depth(&self) -> Option<f32> {
        (self.settings_applied() > 0)
            .then(|| f32::from_bits(self.last_max_depth.load(Ordering::SeqCst)))
    }

    fn lease(
        self: &Arc<Self>,
        format: ImageFormat,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> Result<Image> {
        let image = Image::new(format, width, height, data)?;
        self.images_allocated.fetch_add(1, Ordering::SeqCst);
        let stats = self.clone();
        Ok(image.with_release_hook(move || {
            stats.images_released.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// Backend exposing one synthetic device
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    config: SyntheticConfig,
    stats: Arc<SyntheticStats>,
}

impl SyntheticBackend {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            stats: Arc::new(SyntheticStats::default()),
        }
    }

    /// Counters for the devices this backend opens
    pub fn stats(&self) -> Arc<SyntheticStats> {
        self.stats.clone()
    }

    fn calibration(&self) -> Calibration {
        let focal = self.config.width as f32 * 0.8;
        Calibration::pinhole(self.config.width, self.config.height, focal)
    }
}

impl DeviceBackend for SyntheticBackend {
    fn installed_count(&self) -> usize {
        usize::from(self.config.installed)
    }

    fn open(&self) -> Result<Box<dyn DepthDevice>> {
        if !self.config.installed {
            return Err(PolyError::NoDevice);
        }
        std::thread::sleep(self.config.open_delay);
        Ok(Box::new(SyntheticDevice {
            config: self.config.clone(),
            calibration: self.calibration(),
            stats: self.stats.clone(),
            rng: ChaCha8Rng::seed_from_u64(self.config.seed),
        }))
    }

    fn open_tracker(&self, calibration: &Calibration) -> Result<Box<dyn BodyTracker>> {
        Ok(Box::new(SyntheticTracker {
            calibration: *calibration,
            background_depth_mm: self.config.background_depth_mm,
            track_every: self.config.track_every.max(1),
            stats: self.stats.clone(),
            enqueued: 0,
            pending: None,
        }))
    }
}

struct SyntheticDevice {
    config: SyntheticConfig,
    calibration: Calibration,
    stats: Arc<SyntheticStats>,
    rng: ChaCha8Rng,
}

impl DepthDevice for SyntheticDevice {
    fn calibration(&self) -> Calibration {
        self.calibration
    }

    fn capture(&mut self) -> Result<Capture> {
        let delivered = self.stats.captures();
        if self.config.fail_after.is_some_and(|limit| delivered >= limit) {
            return Err(PolyError::Device("synthetic device disconnected".to_string()));
        }
        std::thread::sleep(self.config.frame_interval);

        let (width, height) = (self.config.width, self.config.height);
        let jitter = self.config.jitter.abs();
        let center = Vec2::new(width as f32, height as f32) * 0.5
            + Vec2::new(
                self.rng.gen_range(-jitter..=jitter),
                self.rng.gen_range(-jitter..=jitter),
            );
        let radius_sq = self.config.subject_radius * self.config.subject_radius;

        let pixels = width as usize * height as usize;
        let mut depth = Vec::with_capacity(pixels * 2);
        let mut color = Vec::with_capacity(pixels * 4);
        for v in 0..height {
            for u in 0..width {
                let inside = (Vec2::new(u as f32, v as f32) - center).length_squared() <= radius_sq;
                let mm = if inside {
                    self.config.subject_depth_mm
                } else {
                    self.config.background_depth_mm
                };
                depth.extend_from_slice(&mm.to_le_bytes());
                let bgra = if inside {
                    [40, 120, 220, 255]
                } else {
                    [64, 64, 64, 255]
                };
                color.extend_from_slice(&bgra);
            }
        }

        let capture = Capture {
            color: self
                .stats
                .lease(ImageFormat::ColorBgra32, width, height, color)?,
            depth: self.stats.lease(ImageFormat::Depth16, width, height, depth)?,
        };
        self.stats.captures.fetch_add(1, Ordering::SeqCst);
        Ok(capture)
    }

    fn color_to_depth(&mut self, capture: &Capture) -> Result<Image> {
        // Both cameras share one geometry here, so the transform is a copy
        self.stats.lease(
            ImageFormat::ColorBgra32,
            capture.color.width(),
            capture.color.height(),
            capture.color.data().to_vec(),
        )
    }

    fn apply_settings(&mut self, settings: &DeviceSettings) -> Result<()> {
        self.stats
            .last_max_depth
            .store(settings.max_depth.to_bits(), Ordering::SeqCst);
        self.stats.settings_applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct PendingResult {
    body_index: Vec<u8>,
    width: u32,
    height: u32,
    bodies: Vec<Body>,
}

struct SyntheticTracker {
    calibration: Calibration,
    background_depth_mm: u16,
    track_every: u32,
    stats: Arc<SyntheticStats>,
    enqueued: u64,
    pending: Option<PendingResult>,
}

impl BodyTracker for SyntheticTracker {
    fn enqueue(&mut self, capture: &Capture) -> Result<()> {
        self.enqueued += 1;
        if self.enqueued % self.track_every as u64 != 0 {
            return Ok(());
        }

        let depth = &capture.depth;
        let width = depth.width();
        let mut body_index = Vec::with_capacity(depth.data().len() / 2);
        let mut sum = Vec2::ZERO;
        let mut depth_sum = 0.0f32;
        let mut count = 0u32;
        for (i, sample) in depth.data().chunks_exact(2).enumerate() {
            let mm = u16::from_le_bytes([sample[0], sample[1]]);
            if mm > 0 && mm < self.background_depth_mm {
                body_index.push(0);
                sum += Vec2::new((i as u32 % width) as f32, (i as u32 / width) as f32);
                depth_sum += mm as f32 * 0.001;
                count += 1;
            } else {
                body_index.push(BODY_INDEX_BACKGROUND);
            }
        }

        let mut bodies = Vec::new();
        if count > 0 {
            let centroid = sum / count as f32;
            let z = depth_sum / count as f32;
            if let Some(ray) = self.calibration.pixel_to_ray(centroid.x, centroid.y) {
                let mut body = Body::new(1);
                for joint in &mut body.joints {
                    joint.position = Vec3::new(ray.x * z, ray.y * z, z);
                    joint.orientation = Quat::IDENTITY;
                    joint.confidence = JointConfidence::Medium;
                }
                bodies.push(body);
            }
        }

        self.pending = Some(PendingResult {
            body_index,
            width,
            height: depth.height(),
            bodies,
        });
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<TrackerResult>> {
        let Some(pending) = self.pending.take() else {
            return Ok(None);
        };
        let body_index = self.stats.lease(
            ImageFormat::BodyIndex8,
            pending.width,
            pending.height,
            pending.body_index,
        )?;
        Ok(Some(TrackerResult {
            body_index,
            bodies: pending.bodies,
        }))
    }
}
