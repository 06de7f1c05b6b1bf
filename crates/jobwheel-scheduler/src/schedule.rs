use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use jobwheel_core::TriggerStatus;

use crate::{
    error::{Result, SchedulerError},
    types::JobRecord,
};

/// Parse a seconds-resolution cron expression (6 fields, optional 7th year).
///
/// `?` is accepted in the day fields and treated as `*`.
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let normalised = expression.trim().replace('?', "*");
    Schedule::from_str(&normalised).map_err(|e| SchedulerError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Earliest instant strictly after `after_ms` matching `expression`, in epoch ms.
///
/// `Ok(None)` when the expression has no further occurrences.
pub fn next_valid_time(expression: &str, after_ms: i64) -> Result<Option<i64>> {
    let schedule = parse_cron(expression)?;
    let from: DateTime<Utc> = DateTime::from_timestamp_millis(after_ms)
        .ok_or(SchedulerError::InvalidTimestamp(after_ms))?;
    Ok(schedule.after(&from).next().map(|dt| dt.timestamp_millis()))
}

/// Advance `job` to its next trigger after `from_ms`.
///
/// When the expression is exhausted the job is stopped and both timestamps
/// are zeroed; only an external edit brings it back.
pub fn refresh_next_valid_time(job: &mut JobRecord, from_ms: i64) -> Result<()> {
    match next_valid_time(&job.schedule_cron, from_ms)? {
        Some(next) => {
            job.trigger_last_time = job.trigger_next_time;
            job.trigger_next_time = next;
        }
        None => stop_job(job),
    }
    Ok(())
}

/// Terminal state shared by exhausted and unparseable expressions.
pub fn stop_job(job: &mut JobRecord) {
    job.trigger_status = TriggerStatus::Stopped;
    job.trigger_last_time = 0;
    job.trigger_next_time = 0;
}
