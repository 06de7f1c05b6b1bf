use serde::{Deserialize, Serialize};

use jobwheel_core::{JobId, TriggerStatus, TriggerType};

/// The scheduling view of a `jobs` row: the fields the poller reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Seconds-resolution cron expression, validated lazily on recomputation.
    pub schedule_cron: String,
    pub trigger_status: TriggerStatus,
    /// Epoch milliseconds of the previous planned trigger; 0 = none.
    pub trigger_last_time: i64,
    /// Epoch milliseconds of the next planned trigger; 0 = none.
    pub trigger_next_time: i64,
}

/// Fields accepted when a job is created through the admin surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewJob {
    pub job_desc: String,
    pub schedule_cron: String,
    pub executor_handler: String,
    pub executor_param: Option<String>,
    /// Registered worker addresses, e.g. `http://10.0.0.5:9999`.
    pub executor_addresses: Vec<String>,
    /// Per-run timeout in seconds forwarded to the worker; 0 = none.
    pub executor_timeout: i64,
    pub fail_retry_count: i32,
    /// Start scheduling immediately (computes the first `trigger_next_time`).
    pub enabled: bool,
}

/// Everything the dispatch path needs to call a worker for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerTarget {
    pub job_id: JobId,
    pub executor_handler: String,
    pub executor_param: Option<String>,
    pub executor_addresses: Vec<String>,
    pub executor_timeout: i64,
    pub fail_retry_count: i32,
}

/// A request handed to the trigger dispatch boundary.
///
/// The scheduler never observes completion; submission is fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub job_id: JobId,
    pub trigger_type: TriggerType,
    /// `-1` means "use the job's configured retry count".
    pub fail_retry_count: i32,
    /// `"index/total"` for broadcast sharding.
    pub sharding_param: Option<String>,
    /// Overrides the job's stored executor param when set.
    pub executor_param: Option<String>,
    /// Overrides the job's registered addresses when set.
    pub address_list: Option<Vec<String>>,
}

impl TriggerRequest {
    /// The form every scheduler-originated trigger takes.
    pub fn cron(job_id: JobId) -> Self {
        Self {
            job_id,
            trigger_type: TriggerType::Cron,
            fail_retry_count: -1,
            sharding_param: None,
            executor_param: None,
            address_list: None,
        }
    }

    /// An operator-initiated run, optionally overriding the stored param and
    /// registered addresses.
    pub fn manual(
        job_id: JobId,
        executor_param: Option<String>,
        address_list: Option<Vec<String>>,
    ) -> Self {
        Self {
            trigger_type: TriggerType::Manual,
            executor_param,
            address_list,
            ..Self::cron(job_id)
        }
    }
}

/// Split a stored comma-separated address column, dropping blanks.
pub fn split_addresses(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(String::from)
        .collect()
}
