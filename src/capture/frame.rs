//! Captured frame tuples

use crate::device::{Capture, Image};

/// Everything the capture thread produced for one capture
///
/// Owned by the capture thread until pushed into the handoff, then by the
/// handoff, then by the consumer's lock slot. Dropping a frame returns all
/// of its images to the device.
#[derive(Debug)]
pub struct Frame {
    pub capture: Capture,
    /// Color reprojected into depth camera geometry
    pub color: Image,
    /// Present only when the tracker had a result ready for this capture
    pub body_index: Option<Image>,
}

impl Frame {
    /// Whether every channel the pipeline reads is present
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.body_index.is_some()
    }

    /// Borrow the pixel data of a complete frame
    pub fn view(&self) -> Option<LockedFrame<'_>> {
        let body_index = self.body_index.as_ref()?;
        Some(LockedFrame {
            width: self.capture.depth.width(),
            height: self.capture.depth.height(),
            color: self.color.data(),
            depth: self.capture.depth.data(),
            body_index: body_index.data(),
        })
    }
}

/// Pixel data of the frame currently locked by the consumer
#[derive(Debug, Clone, Copy)]
pub struct LockedFrame<'a> {
    pub width: u32,
    pub height: u32,
    /// BGRA, four bytes per pixel
    pub color: &'a [u8],
    /// Little-endian u16 millimetres
    pub depth: &'a [u8],
    /// One byte per pixel
    pub body_index: &'a [u8],
}
