//! Epoch-scoped append lists
//!
//! An [`AppendList`] is a fixed-capacity, index-addressed output buffer with
//! an atomic write cursor. Parallel work items append concurrently; the
//! list never grows, and candidates arriving after it is full are counted
//! and dropped. The contract per pipeline cycle is:
//!
//! 1. [`AppendList::reset`] at the start of the cycle
//! 2. concurrent [`AppendList::push`] during the producing stage
//! 3. [`AppendList::recorded_len`] read back once the stage has joined
//!
//! Values are stored as packed `u64` words so slots can be written without
//! locks from any worker.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A value that fits in one 64-bit slot
pub trait Packed: Copy {
    /// Encode into a slot word
    fn pack(self) -> u64;
    /// Decode from a slot word written by [`Packed::pack`]
    fn unpack(bits: u64) -> Self;
}

/// Fixed-capacity append list with an atomic write count
pub struct AppendList<T> {
    slots: Box<[AtomicU64]>,
    count: AtomicUsize,
    dropped: AtomicUsize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Packed> AppendList<T> {
    /// Allocate a list with room for exactly `capacity` values
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Start a new epoch: nothing recorded, nothing dropped
    pub fn reset(&mut self) {
        *self.count.get_mut() = 0;
        *self.dropped.get_mut() = 0;
    }

    /// Append a value, returning its index
    ///
    /// Returns `None` once the list is full; the value is discarded.
    pub fn push(&self, value: T) -> Option<usize> {
        let capacity = self.slots.len();
        match self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            }) {
            Ok(index) => {
                self.slots[index].store(value.pack(), Ordering::Release);
                Some(index)
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Number of values recorded this epoch, never above capacity
    #[inline]
    pub fn recorded_len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.recorded_len() == 0
    }

    /// Number of candidates rejected because the list was full
    #[inline]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Count a value rejected before it reached the list
    #[inline]
    pub(crate) fn note_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_saturated(&self) -> bool {
        self.recorded_len() == self.capacity()
    }

    /// Read a recorded value
    #[inline]
    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.recorded_len() {
            return None;
        }
        Some(T::unpack(self.slots[index].load(Ordering::Acquire)))
    }

    /// Iterate the recorded values in slot order
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.slots[..self.recorded_len()]
            .iter()
            .map(|slot| T::unpack(slot.load(Ordering::Acquire)))
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }

    /// Reorder the recorded values by a key
    ///
    /// Needs exclusive access, so it can only run between stages.
    pub fn sort_recorded_by_key<K: Ord>(&mut self, mut key: impl FnMut(&T) -> K) {
        let len = *self.count.get_mut();
        let mut values: Vec<T> = self.slots[..len]
            .iter_mut()
            .map(|slot| T::unpack(*slot.get_mut()))
            .collect();
        values.sort_unstable_by_key(|v| key(v));
        for (slot, value) in self.slots.iter_mut().zip(values) {
            *slot.get_mut() = value.pack();
        }
    }
}

impl<T> std::fmt::Debug for AppendList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppendList")
            .field("capacity", &self.slots.len())
            .field("count", &self.count.load(Ordering::Relaxed))
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}
