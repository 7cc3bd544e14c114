//! Tracked bodies and the skeleton bridge
//!
//! Body tracking results arrive on the capture thread at their own pace. The
//! bridge moves them to the consumer as whole snapshots: the capture thread
//! fills a frame-local snapshot, publishes it by copying it into the shared
//! slot under a lock, and the consumer copies the slot into its own buffer
//! once per tick. Neither side ever sees a half-written snapshot, and the
//! consumer only ever `try_lock`s, so it cannot be stalled by the producer.

use std::sync::Arc;

use glam::{Quat, Vec3};
use parking_lot::Mutex;

/// Number of joints reported per tracked body
pub const JOINT_COUNT: usize = 32;

/// How much the tracker trusts a joint estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JointConfidence {
    /// Joint is out of range or not observed
    #[default]
    None,
    /// Joint is predicted rather than observed
    Low,
    /// Joint is observed
    Medium,
    High,
}

/// A single skeletal joint in camera space
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Joint {
    /// Position in metres
    pub position: Vec3,
    pub orientation: Quat,
    pub confidence: JointConfidence,
}

/// One tracked body
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    /// Tracker-assigned id, stable while the subject stays in view
    pub id: u32,
    pub joints: [Joint; JOINT_COUNT],
}

impl Body {
    /// Create a body with every joint unobserved
    pub fn new(id: u32) -> Self {
        Self {
            id,
            joints: [Joint::default(); JOINT_COUNT],
        }
    }
}

/// All bodies tracked in one capture
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SkeletonSnapshot {
    pub bodies: Vec<Body>,
}

impl SkeletonSnapshot {
    #[inline]
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Replace the contents with `bodies`, reusing the allocation
    pub fn copy_from_bodies(&mut self, bodies: &[Body]) {
        self.bodies.clear();
        self.bodies.extend_from_slice(bodies);
    }
}

/// Receiver of synced skeletons, e.g. a rig driven by the tracked bodies
pub trait SkeletonSink {
    /// Called with the consumer-side snapshot whenever it holds at least one body
    fn update(&mut self, snapshot: &SkeletonSnapshot);
}

#[derive(Debug, Default)]
struct Published {
    sequence: u64,
    snapshot: SkeletonSnapshot,
}

/// Create a connected publisher/receiver pair
pub fn skeleton_bridge() -> (SkeletonPublisher, SkeletonReceiver) {
    let slot = Arc::new(Mutex::new(Published::default()));
    (
        SkeletonPublisher { slot: slot.clone() },
        SkeletonReceiver {
            slot,
            local: SkeletonSnapshot::default(),
            seen: 0,
        },
    )
}

/// Capture-thread side of the bridge
#[derive(Debug, Clone)]
pub struct SkeletonPublisher {
    slot: Arc<Mutex<Published>>,
}

impl SkeletonPublisher {
    /// Publish a complete snapshot, superseding any unsynced one
    pub fn publish(&self, snapshot: &SkeletonSnapshot) {
        let mut slot = self.slot.lock();
        slot.snapshot.clone_from(snapshot);
        slot.sequence += 1;
    }
}

/// Consumer side of the bridge
#[derive(Debug)]
pub struct SkeletonReceiver {
    slot: Arc<Mutex<Published>>,
    local: SkeletonSnapshot,
    seen: u64,
}

impl SkeletonReceiver {
    /// Copy a newer snapshot into the local buffer, if one was published
    ///
    /// Returns `true` when the local buffer changed. If the publisher holds
    /// the slot at this moment the sync is skipped until the next tick.
    pub fn sync(&mut self) -> bool {
        let Some(slot) = self.slot.try_lock() else {
            return false;
        };
        if slot.sequence == self.seen {
            return false;
        }
        self.local.clone_from(&slot.snapshot);
        self.seen = slot.sequence;
        true
    }

    /// Whether any tracking result has been received yet
    #[inline]
    pub fn is_running(&self) -> bool {
        self.seen > 0
    }

    /// The last synced snapshot
    #[inline]
    pub fn snapshot(&self) -> &SkeletonSnapshot {
        &self.local
    }
}
