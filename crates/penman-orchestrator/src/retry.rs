use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configures how failed task attempts are retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts a task gets, counting the first one.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately. Used by tests and dry runs.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    /// Whether a task that has been claimed `attempt_count` times may run again.
    pub fn allows_another_attempt(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_retries
    }

    /// Delay before retry number `retry` (zero-based): `min(base * 2^retry, max)`.
    pub fn backoff(&self, retry: u32) -> Duration {
        Duration::from_millis(compute_backoff(self, retry))
    }
}

/// Computes the backoff delay for a given retry using exponential backoff
/// capped at `backoff_max_ms`.
fn compute_backoff(policy: &RetryPolicy, retry: u32) -> u64 {
    let delay = policy
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(retry));
    delay.min(policy.backoff_max_ms)
}
