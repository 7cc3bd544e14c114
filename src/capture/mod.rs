//! Background frame capture
//!
//! [`CaptureDriver::start`] spawns a dedicated thread that owns the device
//! for its whole life. Each iteration it blocks on one capture, feeds the
//! body tracker without waiting, forwards any finished tracking result to
//! the skeleton bridge, and pushes the frame tuple into the latest-wins
//! handoff. The consumer side of both channels is returned to the caller.
//!
//! Shutdown is cooperative: a flag checked once per iteration, so stopping
//! takes up to one in-flight capture. A thread that ends for any other
//! reason (no device at startup, a device error) is a liveness fault the
//! owner observes through [`CaptureDriver::check_alive`].

mod frame;
mod handoff;

pub use frame::{Frame, LockedFrame};
pub use handoff::{frame_handoff, FramePublisher, FrameReceiver};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::calibration::{XyTable, XyTableCache};
use crate::config::DeviceSettings;
use crate::device::DeviceBackend;
use crate::error::{PolyError, Result};
use crate::skeleton::{skeleton_bridge, SkeletonPublisher, SkeletonReceiver, SkeletonSnapshot};

/// Device settings shared between the owner and the capture thread
///
/// Writers bump a generation counter; the capture thread only looks at the
/// settings when the generation moved, and never waits for the lock.
#[derive(Debug)]
pub struct SettingsCell {
    generation: AtomicU64,
    settings: RwLock<DeviceSettings>,
}

impl SettingsCell {
    pub fn new(settings: DeviceSettings) -> Self {
        Self {
            generation: AtomicU64::new(1),
            settings: RwLock::new(settings),
        }
    }

    /// Replace the settings
    pub fn store(&self, settings: DeviceSettings) {
        *self.settings.write() = settings;
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Current settings
    pub fn load(&self) -> DeviceSettings {
        *self.settings.read()
    }

    /// Settings newer than generation `seen`, without blocking
    ///
    /// Updates `seen` on success. Returns `None` if nothing changed or a
    /// writer holds the lock right now; the change is picked up later.
    pub fn try_load_newer(&self, seen: &mut u64) -> Option<DeviceSettings> {
        let generation = self.generation.load(Ordering::Acquire);
        if generation == *seen {
            return None;
        }
        let settings = *self.settings.try_read()?;
        *seen = generation;
        Some(settings)
    }
}

/// Consumer ends of the capture thread's channels
#[derive(Debug)]
pub struct CaptureChannels {
    pub frames: FrameReceiver,
    pub skeleton: SkeletonReceiver,
}

struct CaptureContext {
    terminate: Arc<AtomicBool>,
    settings: Arc<SettingsCell>,
    xy_table: XyTableCache,
    frames: FramePublisher,
    skeleton: SkeletonPublisher,
}

/// Owner of the capture thread
pub struct CaptureDriver {
    terminate: Arc<AtomicBool>,
    settings: Arc<SettingsCell>,
    xy_table: XyTableCache,
    frames: FramePublisher,
    handle: Option<JoinHandle<Result<()>>>,
}

impl CaptureDriver {
    /// Spawn the capture thread for the backend's default device
    ///
    /// Returns immediately. Whether a device was actually found is only
    /// known once the thread runs; see [`CaptureDriver::check_alive`].
    pub fn start<B: DeviceBackend>(
        backend: B,
        settings: DeviceSettings,
    ) -> Result<(Self, CaptureChannels)> {
        let (frame_publisher, frame_receiver) = frame_handoff();
        let (skeleton_publisher, skeleton_receiver) = skeleton_bridge();
        let terminate = Arc::new(AtomicBool::new(false));
        let settings = Arc::new(SettingsCell::new(settings));
        let xy_table = XyTableCache::new();

        let context = CaptureContext {
            terminate: terminate.clone(),
            settings: settings.clone(),
            xy_table: xy_table.clone(),
            frames: frame_publisher.clone(),
            skeleton: skeleton_publisher,
        };
        let handle = thread::Builder::new()
            .name("depth-capture".to_string())
            .spawn(move || {
                let result = capture_loop(backend, &context);
                if let Err(err) = &result {
                    error!(error = %err, "capture thread terminated");
                }
                result
            })?;

        Ok((
            Self {
                terminate,
                settings,
                xy_table,
                frames: frame_publisher,
                handle: Some(handle),
            },
            CaptureChannels {
                frames: frame_receiver,
                skeleton: skeleton_receiver,
            },
        ))
    }

    /// The calibration table, once the background build finished
    #[inline]
    pub fn xy_table(&self) -> Option<Arc<XyTable>> {
        self.xy_table.get()
    }

    /// Publish new settings to the capture thread
    pub fn set_settings(&self, settings: DeviceSettings) {
        self.settings.store(settings);
    }

    pub fn settings(&self) -> DeviceSettings {
        self.settings.load()
    }

    /// Fail if the capture thread is no longer running
    ///
    /// The first call after the thread ended reports why it ended.
    pub fn check_alive(&mut self) -> Result<()> {
        if self.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        let cause = match self.handle.take().map(join_capture_thread) {
            Some(Err(err)) => err,
            _ => PolyError::Device("capture loop is not running".to_string()),
        };
        Err(PolyError::CaptureStopped(Box::new(cause)))
    }

    /// Stop the capture thread and release every buffered frame
    ///
    /// Blocks until the thread observes the stop flag, i.e. up to one
    /// capture. Returns the error the thread died with, if it died early.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.terminate.store(true, Ordering::Release);
        let result = match self.handle.take() {
            Some(handle) => join_capture_thread(handle),
            None => Ok(()),
        };
        let drained = self.frames.drain();
        debug!(drained, "capture stopped");
        result
    }
}

impl Drop for CaptureDriver {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(err) = self.stop() {
                warn!(error = %err, "capture thread ended with an error");
            }
        }
    }
}

fn join_capture_thread(handle: JoinHandle<Result<()>>) -> Result<()> {
    handle.join().unwrap_or(Err(PolyError::CapturePanicked))
}

fn capture_loop<B: DeviceBackend>(backend: B, context: &CaptureContext) -> Result<()> {
    if backend.installed_count() == 0 {
        return Err(PolyError::NoDevice);
    }

    let mut device = backend.open()?;
    let calibration = device.calibration();
    info!(
        width = calibration.width,
        height = calibration.height,
        "capture device opened"
    );

    context.xy_table.spawn_build(calibration);
    let mut tracker = backend.open_tracker(&calibration)?;

    let mut settings_seen = 0;
    if let Some(settings) = context.settings.try_load_newer(&mut settings_seen) {
        device.apply_settings(&settings)?;
    }

    let mut bodies = SkeletonSnapshot::default();
    let mut captured: u64 = 0;
    while !context.terminate.load(Ordering::Acquire) {
        let capture = device.capture()?;
        let color = device.color_to_depth(&capture)?;

        tracker.enqueue(&capture)?;
        let body_index = match tracker.poll()? {
            Some(result) => {
                bodies.copy_from_bodies(&result.bodies);
                context.skeleton.publish(&bodies);
                Some(result.body_index)
            }
            None => None,
        };

        context.frames.push(Frame {
            capture,
            color,
            body_index,
        });
        captured += 1;

        if let Some(settings) = context.settings.try_load_newer(&mut settings_seen) {
            debug!(?settings, "applying device settings");
            device.apply_settings(&settings)?;
        }
    }

    info!(captured, "capture thread stopping");
    Ok(())
}
