//! The time wheel: 60 buckets keyed by second-of-minute.
//!
//! The poller pushes jobs whose trigger falls inside the lookahead window;
//! the ring sweeper drains the bucket for the current second (and the one
//! before it). Buckets hold no absolute minute, so every bucket must be
//! drained at least once per revolution.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use jobwheel_core::JobId;

pub const WHEEL_SLOTS: u32 = 60;

/// Bucket for an epoch-millisecond trigger instant: `(ms / 1000) mod 60`.
pub fn slot_for(trigger_ms: i64) -> u32 {
    (trigger_ms.div_euclid(1000).rem_euclid(WHEEL_SLOTS as i64)) as u32
}

#[derive(Default)]
struct WheelSlots {
    slots: HashMap<u32, Vec<JobId>>,
    /// Reverse index: which bucket a pending job sits in.
    index: HashMap<JobId, u32>,
}

/// Concurrent second-of-minute ring buffer shared by poller and sweeper.
#[derive(Default)]
pub struct TimeWheel {
    inner: Mutex<WheelSlots>,
}

impl TimeWheel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WheelSlots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `job_id` in `slot`.
    ///
    /// Returns `false` without modifying the wheel when the job is already
    /// pending in any slot.
    pub fn push(&self, slot: u32, job_id: JobId) -> bool {
        let slot = slot % WHEEL_SLOTS;
        let mut wheel = self.lock();
        if wheel.index.contains_key(&job_id) {
            return false;
        }
        wheel.index.insert(job_id, slot);
        wheel.slots.entry(slot).or_default().push(job_id);
        true
    }

    /// Remove and return everything queued in `slot`.
    pub fn drain(&self, slot: u32) -> Vec<JobId> {
        let slot = slot % WHEEL_SLOTS;
        let mut wheel = self.lock();
        let ids = wheel.slots.remove(&slot).unwrap_or_default();
        for id in &ids {
            wheel.index.remove(id);
        }
        ids
    }

    /// The slot `job_id` is pending in, if any.
    pub fn slot_of(&self, job_id: JobId) -> Option<u32> {
        self.lock().index.get(&job_id).copied()
    }

    pub fn pending(&self) -> usize {
        self.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// Snapshot of one slot's contents without draining it.
    pub fn peek(&self, slot: u32) -> Vec<JobId> {
        self.lock()
            .slots
            .get(&(slot % WHEEL_SLOTS))
            .cloned()
            .unwrap_or_default()
    }
}
