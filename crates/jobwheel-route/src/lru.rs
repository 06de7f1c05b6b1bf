//! Least-recently-used routing: the executor a job has waited longest to
//! use goes next.

use std::sync::atomic::AtomicI64;

use chrono::Utc;
use dashmap::DashMap;

use jobwheel_core::JobId;

use crate::lfu::expire_window;
use crate::router::ExecutorRouter;

pub struct LruRouter {
    /// Per job, addresses from least to most recently selected.
    order: DashMap<JobId, Vec<String>>,
    valid_until: AtomicI64,
}

impl Default for LruRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl LruRouter {
    pub fn new() -> Self {
        Self {
            order: DashMap::new(),
            valid_until: AtomicI64::new(0),
        }
    }

    pub fn select_at(&self, job_id: JobId, addresses: &[String], now_ms: i64) -> Option<String> {
        if addresses.is_empty() {
            return None;
        }
        expire_window(&self.order, &self.valid_until, now_ms);

        let mut entry = self.order.entry(job_id).or_default();
        let order = entry.value_mut();
        for address in addresses {
            if !order.contains(address) {
                order.push(address.clone());
            }
        }
        order.retain(|a| addresses.contains(a));

        // Oldest first; selecting it moves it to the back.
        let selected = order.remove(0);
        order.push(selected.clone());
        Some(selected)
    }
}

impl ExecutorRouter for LruRouter {
    fn select_address(&self, job_id: JobId, addresses: &[String]) -> Option<String> {
        self.select_at(job_id, addresses, Utc::now().timestamp_millis())
    }
}
