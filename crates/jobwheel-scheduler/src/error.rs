use thiserror::Error;

use jobwheel_core::JobId;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The cron expression could not be parsed.
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    /// An epoch-millisecond value outside chrono's representable range.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    /// The schedule lock sentinel row is missing or could not be taken.
    #[error("Schedule lock unavailable: {0}")]
    LockUnavailable(String),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: JobId },

    /// `start()` was called on a scheduler that is already running.
    #[error("Scheduler already started")]
    AlreadyStarted,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
