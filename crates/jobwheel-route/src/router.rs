use rand::Rng;

use jobwheel_core::{JobId, RouteStrategy};

use crate::{hash::ConsistentHashRouter, lfu::LfuRouter, lru::LruRouter, round::RoundRouter};

/// Selects one executor address for a trigger.
///
/// Implementations may keep per-job state and update it on every call.
/// `None` means there is no eligible executor.
pub trait ExecutorRouter: Send + Sync {
    fn select_address(&self, job_id: JobId, addresses: &[String]) -> Option<String>;
}

/// The closed set of strategies, chosen by `executor.route_strategy`.
pub enum ExecutorRoute {
    First,
    Last,
    Random,
    Round(RoundRouter),
    ConsistentHash(ConsistentHashRouter),
    LeastFrequentlyUsed(LfuRouter),
    LeastRecentlyUsed(LruRouter),
}

impl ExecutorRoute {
    pub fn new(strategy: RouteStrategy) -> Self {
        match strategy {
            RouteStrategy::First => ExecutorRoute::First,
            RouteStrategy::Last => ExecutorRoute::Last,
            RouteStrategy::Random => ExecutorRoute::Random,
            RouteStrategy::Round => ExecutorRoute::Round(RoundRouter::new()),
            RouteStrategy::ConsistentHash => {
                ExecutorRoute::ConsistentHash(ConsistentHashRouter::new())
            }
            RouteStrategy::LeastFrequentlyUsed => {
                ExecutorRoute::LeastFrequentlyUsed(LfuRouter::new())
            }
            RouteStrategy::LeastRecentlyUsed => ExecutorRoute::LeastRecentlyUsed(LruRouter::new()),
        }
    }

    pub fn strategy(&self) -> RouteStrategy {
        match self {
            ExecutorRoute::First => RouteStrategy::First,
            ExecutorRoute::Last => RouteStrategy::Last,
            ExecutorRoute::Random => RouteStrategy::Random,
            ExecutorRoute::Round(_) => RouteStrategy::Round,
            ExecutorRoute::ConsistentHash(_) => RouteStrategy::ConsistentHash,
            ExecutorRoute::LeastFrequentlyUsed(_) => RouteStrategy::LeastFrequentlyUsed,
            ExecutorRoute::LeastRecentlyUsed(_) => RouteStrategy::LeastRecentlyUsed,
        }
    }
}

impl ExecutorRouter for ExecutorRoute {
    fn select_address(&self, job_id: JobId, addresses: &[String]) -> Option<String> {
        match self {
            ExecutorRoute::First => addresses.first().cloned(),
            ExecutorRoute::Last => addresses.last().cloned(),
            ExecutorRoute::Random => {
                if addresses.is_empty() {
                    return None;
                }
                let idx = rand::rng().random_range(0..addresses.len());
                Some(addresses[idx].clone())
            }
            ExecutorRoute::Round(r) => r.select_address(job_id, addresses),
            ExecutorRoute::ConsistentHash(r) => r.select_address(job_id, addresses),
            ExecutorRoute::LeastFrequentlyUsed(r) => r.select_address(job_id, addresses),
            ExecutorRoute::LeastRecentlyUsed(r) => r.select_address(job_id, addresses),
        }
    }
}
