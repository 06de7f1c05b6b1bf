use thiserror::Error;

use jobwheel_core::JobId;

#[derive(Debug, Error)]
pub enum RouteError {
    /// Null or blank executor address.
    #[error("Invalid executor address: '{0}'")]
    InvalidAddress(String),

    /// The route strategy had no candidate to choose from.
    #[error("No eligible executor for job {job_id}")]
    NoEligibleExecutor { job_id: JobId },

    #[error("Executor transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The executor answered with a non-success code.
    #[error("Executor returned code {code}: {msg}")]
    Executor { code: i32, msg: String },
}

pub type Result<T> = std::result::Result<T, RouteError>;
