//! Request priorities and their age-amplified scores.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Priority of a queued request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// Weight, per-attempt timeout and retry budget of a priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityConfig {
    pub weight: u32,
    pub timeout_ms: u64,
    /// Informational only. The request queue drops a request after
    /// `QueueConfig::max_retries` failures whatever its priority.
    pub retries: u32,
}

impl Priority {
    pub const fn config(self) -> PriorityConfig {
        match self {
            Priority::High => PriorityConfig {
                weight: 3,
                timeout_ms: 5000,
                retries: 5,
            },
            Priority::Medium => PriorityConfig {
                weight: 2,
                timeout_ms: 10_000,
                retries: 3,
            },
            Priority::Low => PriorityConfig {
                weight: 1,
                timeout_ms: 15_000,
                retries: 2,
            },
        }
    }

    pub fn timeout(self) -> Duration {
        Duration::from_millis(self.config().timeout_ms)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        })
    }
}

/// `weight * (1 + age_ms / 1000)`: waiting raises a request's score.
pub fn score(priority: Priority, age_ms: u64) -> f64 {
    f64::from(priority.config().weight) * (1.0 + age_ms as f64 / 1000.0)
}
