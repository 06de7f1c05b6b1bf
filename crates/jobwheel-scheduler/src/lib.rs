//! `jobwheel-scheduler`: the scheduling core of the coordinator.
//!
//! # Overview
//!
//! Jobs live in a SQLite `jobs` table. The [`engine::SchedulePoller`] takes the
//! cluster-wide schedule lock once per second, reads every running job due
//! within the next five seconds, and sorts each into one of three paths:
//!
//! | Distance from now            | Action                                             |
//! |------------------------------|----------------------------------------------------|
//! | more than 5 s overdue        | misfire: skipped, next trigger computed from now   |
//! | overdue by at most 5 s       | dispatched immediately                             |
//! | not yet due                  | queued in the [`ring::TimeWheel`] at its second    |
//!
//! The [`engine::RingSweeper`] drains the wheel every second and submits the
//! queued jobs to a [`dispatch::TriggerDispatch`]. [`engine::JobScheduler`]
//! owns both loops and performs the staged shutdown.

pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ring;
pub mod schedule;
pub mod types;

pub use db::JobStore;
pub use dispatch::TriggerDispatch;
pub use engine::{JobScheduler, LifecycleProbe, PollOutcome, RingSweeper, SchedulePoller};
pub use error::{Result, SchedulerError};
pub use ring::TimeWheel;
pub use types::{JobRecord, NewJob, TriggerRequest, TriggerTarget};
