use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the orchestrator, read from the `[orchestrator]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Total attempts per task.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Deadline for a single pipeline step unless the step sets its own.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    /// Running tasks older than this are recovered by the watchdog.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Minimum tasks settled in one sweep before the strategy is re-tuned.
    /// Zero disables auto-adjustment.
    #[serde(default = "default_adjust_after")]
    pub adjust_after: usize,
    /// Maximum calendar entries scheduled per call.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_stale_after_secs() -> u64 {
    3600
}

fn default_adjust_after() -> usize {
    5
}

fn default_batch_limit() -> usize {
    5
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            step_timeout_secs: default_step_timeout_secs(),
            stale_after_secs: default_stale_after_secs(),
            adjust_after: default_adjust_after(),
            batch_limit: default_batch_limit(),
        }
    }
}

impl OrchestratorConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base_ms: self.backoff_base_ms,
            backoff_max_ms: self.backoff_max_ms,
        }
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.adjust_after, 5);
        assert_eq!(config.batch_limit, 5);
        assert_eq!(config.step_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{"max_retries": 5, "stale_after_secs": 60}"#).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.stale_after(), Duration::from_secs(60));
        assert_eq!(config.backoff_base_ms, 500);
    }
}
