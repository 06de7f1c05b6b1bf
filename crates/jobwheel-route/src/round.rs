//! Round-robin routing with a per-job cursor.

use std::sync::atomic::AtomicI64;

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;

use jobwheel_core::JobId;

use crate::lfu::expire_window;
use crate::router::ExecutorRouter;

const CURSOR_CEILING: u64 = 1_000_000;
/// New cursors start at a random offset so jobs don't all begin on the
/// first address.
const CURSOR_SEED: u64 = 100;

pub struct RoundRouter {
    cursors: DashMap<JobId, u64>,
    valid_until: AtomicI64,
}

impl Default for RoundRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRouter {
    pub fn new() -> Self {
        Self {
            cursors: DashMap::new(),
            valid_until: AtomicI64::new(0),
        }
    }

    pub fn select_at(&self, job_id: JobId, addresses: &[String], now_ms: i64) -> Option<String> {
        if addresses.is_empty() {
            return None;
        }
        expire_window(&self.cursors, &self.valid_until, now_ms);

        let mut cursor = self
            .cursors
            .entry(job_id)
            .or_insert_with(|| rand::rng().random_range(0..CURSOR_SEED));
        if *cursor > CURSOR_CEILING {
            *cursor = rand::rng().random_range(0..CURSOR_SEED);
        }
        let idx = (*cursor % addresses.len() as u64) as usize;
        *cursor += 1;
        Some(addresses[idx].clone())
    }
}

impl ExecutorRouter for RoundRouter {
    fn select_address(&self, job_id: JobId, addresses: &[String]) -> Option<String> {
        self.select_at(job_id, addresses, Utc::now().timestamp_millis())
    }
}
