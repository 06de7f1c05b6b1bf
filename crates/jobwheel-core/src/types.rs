use serde::{Deserialize, Serialize};

/// Primary key of a row in the `jobs` table.
pub type JobId = i64;

/// Whether the scheduler should consider a job at all.
///
/// Stored as an integer column: `1` = running, `0` = stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    Stopped,
    Running,
}

impl TriggerStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            TriggerStatus::Stopped => 0,
            TriggerStatus::Running => 1,
        }
    }

    /// Any non-zero value counts as running.
    pub fn from_i64(v: i64) -> Self {
        if v == 0 {
            TriggerStatus::Stopped
        } else {
            TriggerStatus::Running
        }
    }

    pub fn is_running(self) -> bool {
        self == TriggerStatus::Running
    }
}

/// What caused a trigger to be submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Fired by the scheduling poller or the ring sweeper.
    Cron,
    /// Fired once by an operator, outside the schedule.
    Manual,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerType::Cron => "cron",
            TriggerType::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// Worker-selection algorithm used when a job has several registered executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteStrategy {
    First,
    Last,
    Round,
    Random,
    ConsistentHash,
    #[default]
    LeastFrequentlyUsed,
    LeastRecentlyUsed,
}

impl std::fmt::Display for RouteStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RouteStrategy::First => "first",
            RouteStrategy::Last => "last",
            RouteStrategy::Round => "round",
            RouteStrategy::Random => "random",
            RouteStrategy::ConsistentHash => "consistent-hash",
            RouteStrategy::LeastFrequentlyUsed => "least-frequently-used",
            RouteStrategy::LeastRecentlyUsed => "least-recently-used",
        };
        write!(f, "{s}")
    }
}
