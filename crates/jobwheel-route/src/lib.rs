//! `jobwheel-route`: worker selection and the executor client directory.
//!
//! [`router::ExecutorRoute`] picks one address out of a job's registered
//! executors according to the configured [`jobwheel_core::RouteStrategy`].
//! [`directory::ExecutorDirectory`] turns that address into a cached
//! [`directory::ExecutorClient`].

pub mod directory;
pub mod error;
pub mod hash;
pub mod lfu;
pub mod lru;
pub mod round;
pub mod router;

pub use directory::{ExecutorClient, ExecutorDirectory, ExecutorResponse, TriggerParam};
pub use error::{Result, RouteError};
pub use router::{ExecutorRoute, ExecutorRouter};
