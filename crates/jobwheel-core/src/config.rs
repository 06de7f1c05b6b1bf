use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::RouteStrategy;

pub const DEFAULT_TRIGGER_POOL_FAST_MAX: usize = 200;
pub const DEFAULT_TRIGGER_POOL_SLOW_MAX: usize = 100;
/// Reads per pool slot over one lookahead window (~50 ms per dispatch).
pub const DEFAULT_PRE_READ_FACTOR: usize = 20;
pub const DEFAULT_RING_DRAIN_GRACE_SECS: u64 = 8;
pub const DEFAULT_STOP_GRACE_MS: u64 = 1000;
pub const DEFAULT_DISPATCH_QUEUE_CAPACITY: usize = 4096;
pub const DEFAULT_EXECUTOR_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 10_000;

/// Top-level config (jobwheel.toml + JOBWHEEL_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobwheelConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: ScheduleConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// How long a coordinator waits on the schedule lock before the
    /// iteration fails and is retried.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Poller, sweeper and trigger pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Concurrent triggers in the fast pool. Values below 200 are raised to 200.
    #[serde(default = "default_fast_max")]
    pub trigger_pool_fast_max: usize,
    /// Concurrent triggers in the slow pool. Values below 100 are raised to 100.
    #[serde(default = "default_slow_max")]
    pub trigger_pool_slow_max: usize,
    #[serde(default = "default_pre_read_factor")]
    pub pre_read_factor: usize,
    /// Pause between raising the stop flag and interrupting a loop's sleep.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Upper bound on how long shutdown waits for buffered wheel entries.
    #[serde(default = "default_ring_drain_grace_secs")]
    pub ring_drain_grace_secs: u64,
    #[serde(default = "default_dispatch_queue_capacity")]
    pub dispatch_queue_capacity: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            trigger_pool_fast_max: DEFAULT_TRIGGER_POOL_FAST_MAX,
            trigger_pool_slow_max: DEFAULT_TRIGGER_POOL_SLOW_MAX,
            pre_read_factor: DEFAULT_PRE_READ_FACTOR,
            stop_grace_ms: DEFAULT_STOP_GRACE_MS,
            ring_drain_grace_secs: DEFAULT_RING_DRAIN_GRACE_SECS,
            dispatch_queue_capacity: DEFAULT_DISPATCH_QUEUE_CAPACITY,
        }
    }
}

impl ScheduleConfig {
    pub fn fast_pool_size(&self) -> usize {
        self.trigger_pool_fast_max.max(DEFAULT_TRIGGER_POOL_FAST_MAX)
    }

    pub fn slow_pool_size(&self) -> usize {
        self.trigger_pool_slow_max.max(DEFAULT_TRIGGER_POOL_SLOW_MAX)
    }

    /// Row limit for one poller scan: total pool capacity times the
    /// per-slot read factor.
    pub fn pre_read_count(&self) -> usize {
        (self.fast_pool_size() + self.slow_pool_size()) * self.pre_read_factor.max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Shared credential presented to every executor.
    pub access_token: Option<String>,
    #[serde(default)]
    pub route_strategy: RouteStrategy,
    #[serde(default = "default_executor_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            route_strategy: RouteStrategy::default(),
            timeout_secs: DEFAULT_EXECUTOR_TIMEOUT_SECS,
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.jobwheel/jobwheel.db", home)
}
fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}
fn default_fast_max() -> usize {
    DEFAULT_TRIGGER_POOL_FAST_MAX
}
fn default_slow_max() -> usize {
    DEFAULT_TRIGGER_POOL_SLOW_MAX
}
fn default_pre_read_factor() -> usize {
    DEFAULT_PRE_READ_FACTOR
}
fn default_stop_grace_ms() -> u64 {
    DEFAULT_STOP_GRACE_MS
}
fn default_ring_drain_grace_secs() -> u64 {
    DEFAULT_RING_DRAIN_GRACE_SECS
}
fn default_dispatch_queue_capacity() -> usize {
    DEFAULT_DISPATCH_QUEUE_CAPACITY
}
fn default_executor_timeout_secs() -> u64 {
    DEFAULT_EXECUTOR_TIMEOUT_SECS
}

impl JobwheelConfig {
    /// Load config from a TOML file with JOBWHEEL_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `JOBWHEEL_SCHEDULER__TRIGGER_POOL_FAST_MAX=400`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: JobwheelConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("JOBWHEEL_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        let sched = &config.scheduler;
        if sched.trigger_pool_fast_max < DEFAULT_TRIGGER_POOL_FAST_MAX
            || sched.trigger_pool_slow_max < DEFAULT_TRIGGER_POOL_SLOW_MAX
        {
            warn!(
                fast = sched.trigger_pool_fast_max,
                slow = sched.trigger_pool_slow_max,
                "trigger pool sizes below minimum are raised to {}/{}",
                DEFAULT_TRIGGER_POOL_FAST_MAX,
                DEFAULT_TRIGGER_POOL_SLOW_MAX
            );
        }

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.jobwheel/jobwheel.toml", home)
}
