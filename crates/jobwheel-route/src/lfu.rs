//! Least-frequently-used routing: each job prefers the executor it has
//! picked the fewest times in the current 24 h window.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use tracing::debug;

use jobwheel_core::JobId;

use crate::router::ExecutorRouter;

/// Usage counts are dropped wholesale after this long.
pub(crate) const CACHE_VALID_MS: i64 = 24 * 60 * 60 * 1000;
/// Counters above this are reseeded.
const COUNT_CEILING: u32 = 1_000_000;

/// Clear `map` when `now_ms` has passed `valid_until`, then push the expiry
/// out one window. Only the caller that wins the swap clears.
pub(crate) fn expire_window<K, V>(map: &DashMap<K, V>, valid_until: &AtomicI64, now_ms: i64)
where
    K: Eq + std::hash::Hash,
{
    let current = valid_until.load(Ordering::Acquire);
    if now_ms > current
        && valid_until
            .compare_exchange(current, now_ms + CACHE_VALID_MS, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    {
        map.clear();
        debug!("route cache window expired, counters cleared");
    }
}

pub struct LfuRouter {
    /// job id -> (address -> times selected)
    usage: DashMap<JobId, HashMap<String, u32>>,
    valid_until: AtomicI64,
}

impl Default for LfuRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl LfuRouter {
    pub fn new() -> Self {
        Self {
            usage: DashMap::new(),
            valid_until: AtomicI64::new(0),
        }
    }

    /// Selection as of `now_ms`.
    ///
    /// New or overflowing addresses are seeded with a random count in
    /// `[0, candidates)` so early traffic spreads out. Ties go to the
    /// lexicographically smallest address.
    pub fn select_at(&self, job_id: JobId, addresses: &[String], now_ms: i64) -> Option<String> {
        if addresses.is_empty() {
            return None;
        }
        expire_window(&self.usage, &self.valid_until, now_ms);

        let mut entry = self.usage.entry(job_id).or_default();
        let counts = entry.value_mut();

        let mut rng = rand::rng();
        let seed_range = u32::try_from(addresses.len()).unwrap_or(u32::MAX);
        for address in addresses {
            let fresh = matches!(counts.get(address), Some(&c) if c <= COUNT_CEILING);
            if !fresh {
                counts.insert(address.clone(), rng.random_range(0..seed_range));
            }
        }
        counts.retain(|address, _| addresses.contains(address));

        let selected = counts
            .iter()
            .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(address, _)| address.clone())?;
        if let Some(count) = counts.get_mut(&selected) {
            *count += 1;
        }
        Some(selected)
    }
}

impl ExecutorRouter for LfuRouter {
    fn select_address(&self, job_id: JobId, addresses: &[String]) -> Option<String> {
        self.select_at(job_id, addresses, Utc::now().timestamp_millis())
    }
}
