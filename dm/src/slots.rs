//! Bounded slot pools for inbound and outbound transfers
//!
//! A pool is a capacity plus an atomic counter. Acquisition is a single
//! compare-and-increment that either admits or rejects; there is no waiting
//! inside the pool. Callers that are rejected park their work elsewhere.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

/// A fixed-capacity counter of concurrent transfers in one direction
pub struct SlotPool {
    label: &'static str,
    capacity: usize,
    in_use: AtomicUsize,
    peak: AtomicUsize,
}

impl SlotPool {
    /// Create a pool with the given capacity
    pub fn new(label: &'static str, capacity: usize) -> Self {
        debug!(label, capacity, "SlotPool::new: called");
        Self {
            label,
            capacity,
            in_use: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Try to take one slot without blocking
    ///
    /// Returns `true` if the slot was obtained.
    pub fn try_acquire(&self) -> bool {
        let acquired = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n < self.capacity { Some(n + 1) } else { None }
            });

        match acquired {
            Ok(previous) => {
                self.peak.fetch_max(previous + 1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                debug!(label = self.label, capacity = self.capacity, "SlotPool::try_acquire: pool full");
                false
            }
        }
    }

    /// Give one slot back
    ///
    /// # Panics
    ///
    /// Panics if the pool has no slot in use. That is an accounting bug in the
    /// caller and is never clamped.
    pub fn release(&self) {
        let released = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        if released.is_err() {
            panic!("{} slot pool released while empty", self.label);
        }
    }

    /// Try to take a slot and wrap it in a permit that releases on drop
    pub fn try_permit(self: &Arc<Self>) -> Option<SlotPermit> {
        if self.try_acquire() {
            Some(SlotPermit { pool: Arc::clone(self) })
        } else {
            None
        }
    }

    /// Slots currently held
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Highest number of slots ever held at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for SlotPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPool")
            .field("label", &self.label)
            .field("capacity", &self.capacity)
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// One held slot; the slot goes back to its pool when the permit is dropped
///
/// Every exit path of a transfer drops its permit exactly once, so the
/// acquire/release pairing holds without callers remembering to release.
pub struct SlotPermit {
    pool: Arc<SlotPool>,
}

impl fmt::Debug for SlotPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPermit").field("pool", &self.pool.label).finish()
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.pool.release();
    }
}
