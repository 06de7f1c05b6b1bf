//! `jobwheel-core`: identifiers, enums and configuration shared by every
//! jobwheel crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::JobwheelConfig;
pub use error::{CoreError, Result};
pub use types::{JobId, RouteStrategy, TriggerStatus, TriggerType};
