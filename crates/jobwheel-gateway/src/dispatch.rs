//! The trigger pool: consumes [`TriggerRequest`]s from the scheduler and
//! calls the selected executor.
//!
//! Two bounded pools. A job whose triggers keep running long is moved to
//! the slow pool for the rest of the minute so it can't starve the others.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use jobwheel_core::{JobId, JobwheelConfig};
use jobwheel_route::{
    ExecutorDirectory, ExecutorResponse, ExecutorRoute, ExecutorRouter, RouteError, TriggerParam,
};
use jobwheel_scheduler::{JobStore, SchedulerError, TriggerRequest};

/// A trigger slower than this counts against its job.
const SLOW_TRIGGER: Duration = Duration::from_millis(500);
/// Slow triggers per minute before a job moves to the slow pool.
const SLOW_THRESHOLD: u32 = 10;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error(transparent)]
    Store(#[from] SchedulerError),

    #[error(transparent)]
    Route(#[from] RouteError),
}

/// Parse an `"index/total"` sharding param. Anything malformed, or an index
/// outside `0..total`, is treated as unsharded (`0/1`).
pub fn parse_sharding(param: Option<&str>) -> (u32, u32) {
    let parsed = param.and_then(|p| {
        let (index, total) = p.split_once('/')?;
        let index: u32 = index.trim().parse().ok()?;
        let total: u32 = total.trim().parse().ok()?;
        (total > 0 && index < total).then_some((index, total))
    });
    parsed.unwrap_or((0, 1))
}

pub struct TriggerPool {
    store: Mutex<JobStore>,
    route: ExecutorRoute,
    directory: ExecutorDirectory,
    fast: Arc<Semaphore>,
    slow: Arc<Semaphore>,
    fast_size: u32,
    slow_size: u32,
    /// job id -> slow triggers in `minute`.
    slow_counts: DashMap<JobId, u32>,
    minute: AtomicI64,
}

impl TriggerPool {
    pub fn new(store: JobStore, config: &JobwheelConfig) -> Self {
        let fast_size = config.scheduler.fast_pool_size();
        let slow_size = config.scheduler.slow_pool_size();
        Self {
            store: Mutex::new(store),
            route: ExecutorRoute::new(config.executor.route_strategy),
            directory: ExecutorDirectory::new(
                config.executor.access_token.clone(),
                Duration::from_secs(config.executor.timeout_secs),
            ),
            fast: Arc::new(Semaphore::new(fast_size)),
            slow: Arc::new(Semaphore::new(slow_size)),
            fast_size: u32::try_from(fast_size).unwrap_or(u32::MAX),
            slow_size: u32::try_from(slow_size).unwrap_or(u32::MAX),
            slow_counts: DashMap::new(),
            minute: AtomicI64::new(0),
        }
    }

    /// Forget slow counts from earlier minutes.
    fn roll_minute(&self, now_ms: i64) {
        let minute = now_ms.div_euclid(60_000);
        let current = self.minute.load(Ordering::Acquire);
        if minute != current
            && self
                .minute
                .compare_exchange(current, minute, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.slow_counts.clear();
        }
    }

    pub fn is_slow_at(&self, job_id: JobId, now_ms: i64) -> bool {
        self.roll_minute(now_ms);
        self.slow_counts
            .get(&job_id)
            .is_some_and(|count| *count > SLOW_THRESHOLD)
    }

    pub fn record_cost_at(&self, job_id: JobId, cost: Duration, now_ms: i64) {
        self.roll_minute(now_ms);
        if cost > SLOW_TRIGGER {
            *self.slow_counts.entry(job_id).or_insert(0) += 1;
        }
    }

    /// Consume requests until the sender side is dropped, then wait for
    /// in-flight triggers.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<TriggerRequest>) {
        info!(
            fast = self.fast_size,
            slow = self.slow_size,
            strategy = %self.route.strategy(),
            "trigger pool started"
        );
        while let Some(request) = rx.recv().await {
            let job_id = request.job_id;
            let pool = if self.is_slow_at(job_id, now_ms()) {
                debug!(job_id, "using slow trigger pool");
                Arc::clone(&self.slow)
            } else {
                Arc::clone(&self.fast)
            };
            let Ok(permit) = pool.acquire_owned().await else {
                break;
            };

            let this = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                let started = Instant::now();
                if let Err(e) = this.trigger(request).await {
                    warn!(job_id, error = %e, "trigger failed");
                }
                this.record_cost_at(job_id, started.elapsed(), now_ms());
            });
        }

        // Taking every permit means every spawned trigger has finished.
        let _ = self.fast.acquire_many(self.fast_size).await;
        let _ = self.slow.acquire_many(self.slow_size).await;
        info!("trigger pool stopped");
    }

    /// Run one trigger against one executor.
    pub async fn trigger(&self, request: TriggerRequest) -> Result<ExecutorResponse, TriggerError> {
        let target = self
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .trigger_target(request.job_id)?;

        let fail_retry_count = if request.fail_retry_count >= 0 {
            request.fail_retry_count
        } else {
            target.fail_retry_count
        };
        let candidates = match request.address_list {
            Some(list) if !list.is_empty() => list,
            _ => target.executor_addresses,
        };
        let (broadcast_index, broadcast_total) = parse_sharding(request.sharding_param.as_deref());

        let address = self
            .route
            .select_address(request.job_id, &candidates)
            .filter(|a| !a.trim().is_empty())
            .ok_or(RouteError::NoEligibleExecutor {
                job_id: request.job_id,
            })?;
        let client = self.directory.resolve(&address)?;

        let param = TriggerParam {
            job_id: request.job_id,
            trigger_id: Uuid::new_v4(),
            executor_handler: target.executor_handler,
            executor_params: request.executor_param.or(target.executor_param),
            executor_timeout: target.executor_timeout,
            broadcast_index,
            broadcast_total,
            trigger_time: now_ms(),
        };
        let response = client.run(&param).await?;
        info!(
            job_id = request.job_id,
            trigger_type = %request.trigger_type,
            trigger_id = %param.trigger_id,
            address = %client.address(),
            fail_retry_count,
            "job triggered"
        );
        Ok(response)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
