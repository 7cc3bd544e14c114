//! Latest-wins frame handoff
//!
//! A single-slot queue between the capture thread and the consumer. The
//! producer never waits: pushing a frame while an older one is still queued
//! releases the older one immediately. The consumer never waits either: a
//! tick with nothing new simply gets `None`.
//!
//! The consumer keeps at most one frame "locked" while it copies the pixel
//! data out, and must release it before the next frame can be taken.

use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use tracing::{debug, trace};

use super::frame::{Frame, LockedFrame};

/// Create a connected publisher/receiver pair
pub fn frame_handoff() -> (FramePublisher, FrameReceiver) {
    let queue = Arc::new(ArrayQueue::new(1));
    (
        FramePublisher {
            queue: queue.clone(),
        },
        FrameReceiver {
            queue,
            locked: None,
        },
    )
}

/// Producer side of the handoff
#[derive(Debug, Clone)]
pub struct FramePublisher {
    queue: Arc<ArrayQueue<Frame>>,
}

impl FramePublisher {
    /// Queue a frame, releasing whatever frame it supersedes
    pub fn push(&self, frame: Frame) {
        if let Some(stale) = self.queue.force_push(frame) {
            trace!("superseded unconsumed frame");
            drop(stale);
        }
    }

    /// Release every queued frame, returning how many there were
    pub fn drain(&self) -> usize {
        let mut released = 0;
        while let Some(frame) = self.queue.pop() {
            drop(frame);
            released += 1;
        }
        released
    }

    /// Frames currently waiting for the consumer
    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// Consumer side of the handoff
#[derive(Debug)]
pub struct FrameReceiver {
    queue: Arc<ArrayQueue<Frame>>,
    locked: Option<Frame>,
}

impl FrameReceiver {
    /// Lock the newest frame for reading
    ///
    /// Returns the already-locked frame if it has not been released yet.
    /// Otherwise takes the pending frame, if any. A frame without its
    /// body-index channel is released on the spot and the call returns
    /// `None`.
    pub fn lock_last_frame(&mut self) -> Option<LockedFrame<'_>> {
        if self.locked.is_none() {
            let frame = self.queue.pop()?;
            if !frame.is_complete() {
                debug!("discarding frame without body index");
                return None;
            }
            self.locked = Some(frame);
        }
        self.locked.as_ref().and_then(Frame::view)
    }

    /// Release the locked frame; a no-op when nothing is locked
    pub fn release_last_frame(&mut self) {
        self.locked = None;
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.is_some()
    }

    /// Frames currently waiting to be locked
    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}
