//! Sensor and body-tracking collaborators
//!
//! The capture loop talks to hardware only through these traits. A
//! [`DeviceBackend`] enumerates and opens devices; the opened
//! [`DepthDevice`] produces synchronized captures; the [`BodyTracker`]
//! consumes captures asynchronously and hands back body-index maps and
//! skeletons when it gets to them.

mod synthetic;

pub use synthetic::{SyntheticBackend, SyntheticConfig, SyntheticStats};

use std::fmt;

use crate::calibration::Calibration;
use crate::config::DeviceSettings;
use crate::error::{PolyError, Result};
use crate::skeleton::Body;

/// Value of a body-index pixel that belongs to no tracked body
pub const BODY_INDEX_BACKGROUND: u8 = 255;

/// Pixel layout of an [`Image`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// 8-bit blue, green, red, alpha
    ColorBgra32,
    /// Little-endian u16 millimetres, 0 = no sample
    Depth16,
    /// One byte per pixel, [`BODY_INDEX_BACKGROUND`] = no body
    BodyIndex8,
}

impl ImageFormat {
    #[inline]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ImageFormat::ColorBgra32 => 4,
            ImageFormat::Depth16 => 2,
            ImageFormat::BodyIndex8 => 1,
        }
    }

    pub(crate) fn channel_name(self) -> &'static str {
        match self {
            ImageFormat::ColorBgra32 => "color",
            ImageFormat::Depth16 => "depth",
            ImageFormat::BodyIndex8 => "body index",
        }
    }
}

/// A sensor image backed by a device-owned buffer
///
/// The buffer is handed back to the device when the image is dropped: an
/// attached release hook runs exactly once at that point.
pub struct Image {
    format: ImageFormat,
    width: u32,
    height: u32,
    data: Box<[u8]>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Image {
    /// Wrap a pixel buffer, checking its length against the dimensions
    ///
    /// # Errors
    ///
    /// Returns `BufferSize` if `data` does not hold exactly
    /// `width * height` pixels of `format`.
    pub fn new(format: ImageFormat, width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(PolyError::BufferSize {
                channel: format.channel_name(),
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            format,
            width,
            height,
            data: data.into_boxed_slice(),
            release: None,
        })
    }

    /// Run `hook` when this image is dropped
    pub fn with_release_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    #[inline]
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// One synchronized color + depth capture
#[derive(Debug)]
pub struct Capture {
    /// Color image in the color camera's own geometry
    pub color: Image,
    pub depth: Image,
}

/// Output of the body tracker for one capture
#[derive(Debug)]
pub struct TrackerResult {
    /// Per-pixel body index in depth geometry
    pub body_index: Image,
    pub bodies: Vec<Body>,
}

/// Enumerates and opens capture devices
pub trait DeviceBackend: Send + 'static {
    /// Number of devices attached to the host
    fn installed_count(&self) -> usize;

    /// Open the default device with its cameras started
    fn open(&self) -> Result<Box<dyn DepthDevice>>;

    /// Create a body tracker for an opened device
    fn open_tracker(&self, calibration: &Calibration) -> Result<Box<dyn BodyTracker>>;
}

/// An opened depth camera
pub trait DepthDevice: Send {
    /// Depth camera calibration
    fn calibration(&self) -> Calibration;

    /// Block until the next synchronized capture is available
    fn capture(&mut self) -> Result<Capture>;

    /// Reproject the capture's color image into depth camera geometry
    fn color_to_depth(&mut self, capture: &Capture) -> Result<Image>;

    /// Apply changed settings without blocking the capture loop
    fn apply_settings(&mut self, settings: &DeviceSettings) -> Result<()> {
        let _ = settings;
        Ok(())
    }
}

/// Asynchronous body tracker
pub trait BodyTracker: Send {
    /// Queue a capture for tracking; must not block
    fn enqueue(&mut self, capture: &Capture) -> Result<()>;

    /// Take a finished result, if any, without waiting
    fn poll(&mut self) -> Result<Option<TrackerResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_image_size_checked() {
        let image = Image::new(ImageFormat::Depth16, 4, 2, vec![0; 16]);
        assert!(image.is_ok());

        let image = Image::new(ImageFormat::Depth16, 4, 2, vec![0; 8]);
        match image {
            Err(PolyError::BufferSize {
                channel,
                expected,
                actual,
            }) => {
                assert_eq!(channel, "depth");
                assert_eq!(expected, 16);
                assert_eq!(actual, 8);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_release_hook_runs_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let image = Image::new(ImageFormat::BodyIndex8, 2, 2, vec![255; 4])
            .unwrap()
            .with_release_hook(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(image);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
