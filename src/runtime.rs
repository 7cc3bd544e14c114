//! Owner-held capture and geometry loop
//!
//! [`PolyRuntime`] ties everything together: it starts the capture thread,
//! and each call to [`PolyRuntime::tick`] takes at most one fresh frame
//! through the image kernels and the geometry pipeline. Nothing in a tick
//! waits on the capture thread.
//!
//! # Example
//!
//! ```rust,no_run
//! use silhouette_delaunay::*;
//!
//! let backend = SyntheticBackend::new(SyntheticConfig::default());
//! let mut runtime = PolyRuntime::start(
//!     backend,
//!     PipelineConfig::default(),
//!     DeviceSettings::default(),
//! )
//! .unwrap();
//!
//! for _ in 0..100 {
//!     if let TickOutcome::Processed(counts) = runtime.tick().unwrap() {
//!         println!("{} seeds, {} records", counts.seeds, counts.records);
//!     }
//! }
//! runtime.shutdown().unwrap();
//! ```

use tracing::{debug, trace};

use crate::capture::{CaptureChannels, CaptureDriver};
use crate::config::{DeviceSettings, PipelineConfig};
use crate::device::DeviceBackend;
use crate::error::Result;
use crate::pipeline::{GeometryPipeline, PipelineCounts, SeedSource};
use crate::skeleton::{SkeletonSink, SkeletonSnapshot};
use crate::surfaces::FrameSurfaces;

/// Why a tick did no work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The calibration ray table is still being built
    CalibrationPending,
    /// No complete frame arrived since the last tick
    NoFrame,
}

/// Result of one [`PolyRuntime::tick`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    Processed(PipelineCounts),
}

struct NullSink;

impl SkeletonSink for NullSink {
    fn update(&mut self, _snapshot: &SkeletonSnapshot) {}
}

/// Capture thread plus geometry pipeline, driven by the owner's loop
pub struct PolyRuntime {
    driver: CaptureDriver,
    channels: CaptureChannels,
    surfaces: FrameSurfaces,
    pipeline: GeometryPipeline,
    frames_processed: u64,
}

impl PolyRuntime {
    /// Build the pipeline and spawn the capture thread
    ///
    /// # Arguments
    ///
    /// * `backend` - Device backend the capture thread opens its camera from
    /// * `config` - Resolution, dispatch shapes and list capacities
    /// * `settings` - Initial depth range and edge sensitivity
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a configuration that does not validate,
    /// or `Spawn` if the thread cannot be created. A missing device is
    /// reported by the first [`PolyRuntime::tick`] after the thread gives
    /// up.
    pub fn start<B: DeviceBackend>(
        backend: B,
        config: PipelineConfig,
        settings: DeviceSettings,
    ) -> Result<Self> {
        let pipeline = GeometryPipeline::new(config)?;
        let surfaces = FrameSurfaces::new(&config);
        let (driver, channels) = CaptureDriver::start(backend, settings)?;
        debug!(width = config.width, height = config.height, "runtime started");
        Ok(Self {
            driver,
            channels,
            surfaces,
            pipeline,
            frames_processed: 0,
        })
    }

    /// Process the newest frame, if there is one
    ///
    /// # Errors
    ///
    /// Returns `CaptureStopped` once the capture thread has died; frames
    /// will not resume and the runtime should be shut down. Returns
    /// `BufferSize` for a frame whose buffers do not match the configured
    /// resolution; that frame is released and the next tick proceeds
    /// normally.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        self.tick_with_sink(&mut NullSink)
    }

    /// [`PolyRuntime::tick`], handing synced skeletons to `sink`
    pub fn tick_with_sink(&mut self, sink: &mut impl SkeletonSink) -> Result<TickOutcome> {
        self.driver.check_alive()?;

        let Some(xy_table) = self.driver.xy_table() else {
            trace!("calibration table not ready");
            return Ok(TickOutcome::Skipped(SkipReason::CalibrationPending));
        };

        let uploaded = match self.channels.frames.lock_last_frame() {
            Some(frame) => self.surfaces.upload(&frame),
            None => return Ok(TickOutcome::Skipped(SkipReason::NoFrame)),
        };

        self.channels.skeleton.sync();
        let snapshot = self.channels.skeleton.snapshot();
        if snapshot.body_count() > 0 {
            sink.update(snapshot);
        }

        // The pixels are staged; the device gets its buffers back now
        self.channels.frames.release_last_frame();
        uploaded?;

        let settings = self.driver.settings();
        self.surfaces.unproject(&xy_table, settings.max_depth)?;
        self.surfaces.bake_edges(settings.edge_sensitivity);

        let counts = self.pipeline.run(&self.surfaces.seed_inputs())?;
        self.frames_processed += 1;
        Ok(TickOutcome::Processed(counts))
    }

    /// Publish new device settings
    ///
    /// The capture thread applies them after its current capture; the
    /// image kernels use them from the next tick.
    pub fn set_settings(&self, settings: DeviceSettings) {
        self.driver.set_settings(settings);
    }

    pub fn settings(&self) -> DeviceSettings {
        self.driver.settings()
    }

    /// Replace the seed candidate strategy
    pub fn set_seed_source(&mut self, source: impl SeedSource + 'static) {
        self.pipeline.set_seed_source(source);
    }

    /// Stop capturing and release every outstanding frame
    ///
    /// Blocks for up to one in-flight capture.
    ///
    /// # Errors
    ///
    /// Returns the error the capture thread died with, if it died before
    /// being asked to stop.
    pub fn shutdown(mut self) -> Result<()> {
        self.channels.frames.release_last_frame();
        debug!(frames = self.frames_processed, "runtime shutting down");
        self.driver.shutdown()
    }

    #[inline]
    pub fn pipeline(&self) -> &GeometryPipeline {
        &self.pipeline
    }

    #[inline]
    pub fn surfaces(&self) -> &FrameSurfaces {
        &self.surfaces
    }

    /// The consumer-side skeleton buffer as of the last tick
    #[inline]
    pub fn skeleton(&self) -> &SkeletonSnapshot {
        self.channels.skeleton.snapshot()
    }

    /// Frames that made it through the pipeline
    #[inline]
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }
}

impl std::fmt::Debug for PolyRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolyRuntime")
            .field("pipeline", &self.pipeline)
            .field("frames_processed", &self.frames_processed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfigBuilder;
    use crate::device::{SyntheticBackend, SyntheticConfig};
    use crate::error::PolyError;
    use crate::pipeline::{SeedInputs, TriangleRecord};
    use std::time::{Duration, Instant};

    fn config() -> PipelineConfig {
        PipelineConfigBuilder::new()
            .resolution(64, 64)
            .block_size(32)
            .image_block_size(8)
            .max_points(256)
            .seed_batch(128)
            .max_records(1024)
            .cell_radius(64)
            .unwrap()
            .build()
            .unwrap()
    }

    fn synthetic() -> SyntheticConfig {
        SyntheticConfig {
            width: 64,
            height: 64,
            subject_radius: 20.0,
            frame_interval: Duration::from_millis(1),
            jitter: 0.0,
            ..Default::default()
        }
    }

    /// Tick until a frame is processed or the tick fails
    fn tick_until_processed(
        runtime: &mut PolyRuntime,
        sink: &mut impl SkeletonSink,
    ) -> Result<PipelineCounts> {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let TickOutcome::Processed(counts) = runtime.tick_with_sink(sink)? {
                return Ok(counts);
            }
            assert!(Instant::now() < deadline, "no frame processed in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[derive(Default)]
    struct CountingSink {
        updates: usize,
        last_bodies: usize,
    }

    impl SkeletonSink for CountingSink {
        fn update(&mut self, snapshot: &SkeletonSnapshot) {
            self.updates += 1;
            self.last_bodies = snapshot.body_count();
        }
    }

    #[test]
    fn test_frames_are_triangulated() {
        let backend = SyntheticBackend::new(synthetic());
        let stats = backend.stats();
        let mut runtime = PolyRuntime::start(backend, config(), DeviceSettings::default()).unwrap();
        let mut sink = CountingSink::default();

        for _ in 0..3 {
            let counts = tick_until_processed(&mut runtime, &mut sink).unwrap();
            assert!(counts.seeds > 0 && counts.seeds <= 256);
            assert!(counts.records > 0 && counts.records <= 1024);
            assert_eq!(counts.dropped_seeds, 0);
        }
        assert_eq!(runtime.frames_processed(), 3);
        assert!(sink.updates >= 3);
        assert_eq!(sink.last_bodies, 1);
        assert_eq!(runtime.skeleton().body_count(), 1);

        // The subject is in range, the background beyond max_depth
        let surfaces = runtime.surfaces();
        assert!((surfaces.depth_map().at(32, 32) - 1.5).abs() < 1e-3);
        assert_eq!(*surfaces.depth_map().at(0, 0), 0.0);
        assert_eq!(*surfaces.body_index_map().at(32, 32), 1.0);

        runtime.shutdown().unwrap();
        assert_eq!(stats.images_outstanding(), 0);
    }

    #[test]
    fn test_ticks_skip_until_calibrated() {
        let backend = SyntheticBackend::new(SyntheticConfig {
            open_delay: Duration::from_millis(300),
            ..synthetic()
        });
        let mut runtime = PolyRuntime::start(backend, config(), DeviceSettings::default()).unwrap();

        // The device is still opening, so no ray table exists yet
        assert_eq!(
            runtime.tick().unwrap(),
            TickOutcome::Skipped(SkipReason::CalibrationPending)
        );
        assert_eq!(runtime.frames_processed(), 0);

        tick_until_processed(&mut runtime, &mut NullSink).unwrap();
        assert_eq!(runtime.frames_processed(), 1);
        runtime.shutdown().unwrap();
    }

    #[test]
    fn test_tick_without_new_frame_is_noop() {
        let backend = SyntheticBackend::new(SyntheticConfig {
            frame_interval: Duration::from_millis(500),
            ..synthetic()
        });
        let mut runtime = PolyRuntime::start(backend, config(), DeviceSettings::default()).unwrap();

        let counts = tick_until_processed(&mut runtime, &mut NullSink).unwrap();
        // The next capture is still in flight
        assert_eq!(
            runtime.tick().unwrap(),
            TickOutcome::Skipped(SkipReason::NoFrame)
        );
        assert_eq!(runtime.frames_processed(), 1);
        assert_eq!(runtime.pipeline().counts(), counts);
        runtime.shutdown().unwrap();
    }

    #[test]
    fn test_frames_without_body_index_are_skipped() {
        let backend = SyntheticBackend::new(SyntheticConfig {
            track_every: u32::MAX,
            ..synthetic()
        });
        let stats = backend.stats();
        let mut runtime = PolyRuntime::start(backend, config(), DeviceSettings::default()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while runtime.tick().unwrap() == TickOutcome::Skipped(SkipReason::CalibrationPending) {
            assert!(Instant::now() < deadline, "calibration never finished");
            std::thread::sleep(Duration::from_millis(1));
        }
        while stats.captures() < 10 {
            assert!(Instant::now() < deadline, "device stalled");
            assert_eq!(
                runtime.tick().unwrap(),
                TickOutcome::Skipped(SkipReason::NoFrame)
            );
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(runtime.frames_processed(), 0);
        runtime.shutdown().unwrap();
        assert_eq!(stats.images_outstanding(), 0);
    }

    #[test]
    fn test_missing_device_surfaces_on_tick() {
        let backend = SyntheticBackend::new(SyntheticConfig {
            installed: false,
            ..synthetic()
        });
        let mut runtime = PolyRuntime::start(backend, config(), DeviceSettings::default()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        let err = loop {
            match runtime.tick() {
                Ok(outcome) => assert!(matches!(outcome, TickOutcome::Skipped(_))),
                Err(err) => break err,
            }
            assert!(Instant::now() < deadline, "capture thread never reported");
            std::thread::sleep(Duration::from_millis(1));
        };
        match err {
            PolyError::CaptureStopped(cause) => assert!(matches!(*cause, PolyError::NoDevice)),
            other => panic!("unexpected error: {:?}", other),
        }
        // Still dead on the next tick
        assert!(runtime.tick().is_err());
        runtime.shutdown().unwrap();
    }

    #[test]
    fn test_device_failure_is_fatal() {
        let backend = SyntheticBackend::new(SyntheticConfig {
            fail_after: Some(20),
            ..synthetic()
        });
        let stats = backend.stats();
        let mut runtime = PolyRuntime::start(backend, config(), DeviceSettings::default()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        let err = loop {
            if let Err(err) = runtime.tick() {
                break err;
            }
            assert!(Instant::now() < deadline, "device failure never surfaced");
            std::thread::sleep(Duration::from_millis(1));
        };
        assert!(matches!(err, PolyError::CaptureStopped(ref cause) if matches!(**cause, PolyError::Device(_))));
        runtime.shutdown().unwrap();
        assert_eq!(stats.images_outstanding(), 0);
    }

    #[test]
    fn test_settings_reach_device() {
        let backend = SyntheticBackend::new(synthetic());
        let stats = backend.stats();
        let runtime = PolyRuntime::start(backend, config(), DeviceSettings::default()).unwrap();

        let updated = DeviceSettings::new(2.25, 0.05).unwrap();
        runtime.set_settings(updated);
        assert_eq!(runtime.settings(), updated);

        let deadline = Instant::now() + Duration::from_secs(10);
        while stats.last_max_depth() != Some(2.25) {
            assert!(Instant::now() < deadline, "settings never applied");
            std::thread::sleep(Duration::from_millis(1));
        }
        runtime.shutdown().unwrap();
    }

    /// Seeds at two opposite corners, whatever the frame shows
    struct CornerSeeds;

    impl SeedSource for CornerSeeds {
        fn is_candidate(&self, inputs: &SeedInputs<'_>, x: u32, y: u32) -> bool {
            let (w, h) = (inputs.body_index_map.width(), inputs.body_index_map.height());
            (x, y) == (0, 0) || (x, y) == (w - 1, h - 1)
        }
    }

    #[test]
    fn test_custom_seed_source() {
        let backend = SyntheticBackend::new(synthetic());
        let mut runtime = PolyRuntime::start(backend, config(), DeviceSettings::default()).unwrap();
        runtime.set_seed_source(CornerSeeds);

        let counts = tick_until_processed(&mut runtime, &mut NullSink).unwrap();
        assert_eq!(counts.seeds, 2);
        assert_eq!(counts.records, 1);
        assert_eq!(
            runtime.pipeline().records().get(0),
            Some(TriangleRecord::Edge([0, 1]))
        );
        runtime.shutdown().unwrap();
    }
}
