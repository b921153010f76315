use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do when a unit fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the remaining units on the first failure
    #[default]
    FailFast,
    /// Let every unit finish, then report all failures together
    CollectAll,
}

/// Configuration for the execution coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum units executing at once for one statement
    pub max_parallelism: usize,
    /// Per-unit timeout in milliseconds, 0 disables it
    pub unit_timeout_ms: u64,
    pub failure_policy: FailurePolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 16,
            unit_timeout_ms: 30_000,
            failure_policy: FailurePolicy::FailFast,
        }
    }
}

impl ExecutorConfig {
    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism;
        self
    }

    pub fn with_unit_timeout_ms(mut self, unit_timeout_ms: u64) -> Self {
        self.unit_timeout_ms = unit_timeout_ms;
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn unit_timeout(&self) -> Option<Duration> {
        (self.unit_timeout_ms > 0).then(|| Duration::from_millis(self.unit_timeout_ms))
    }

    /// At least one permit, whatever was configured.
    pub fn permits(&self) -> usize {
        self.max_parallelism.max(1)
    }
}
