use crate::executor::{Executor, Outcome};
use chrono::{DateTime, Utc};
use penman_core::{PenmanResult, TaskStatus};
use penman_store::{TaskQuery, TaskStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Recovers tasks left `running` by a sweep that died mid-flight.
///
/// A stale task goes through the same failure path as a failed step, so it
/// is retried with backoff while attempts remain and failed otherwise.
pub struct Watchdog {
    tasks: Arc<dyn TaskStore>,
    executor: Arc<Executor>,
}

impl Watchdog {
    pub fn new(tasks: Arc<dyn TaskStore>, executor: Arc<Executor>) -> Self {
        Self { tasks, executor }
    }

    /// Recover the agent's tasks that started before `now - stale_after`.
    /// Returns how many were moved.
    pub async fn recover(
        &self,
        agent_id: &str,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> PenmanResult<usize> {
        let cutoff = now
            - chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::zero());
        let running = self
            .tasks
            .query_by_agent(agent_id, TaskQuery::with_status(TaskStatus::Running))
            .await?;

        let mut recovered = 0;
        for task in running {
            let started = match task.started_at {
                Some(at) if at >= cutoff => continue,
                Some(at) => at.to_rfc3339(),
                None => "an unknown time".to_string(),
            };
            warn!(
                task_id = %task.id,
                agent_id = %agent_id,
                started = %started,
                "Recovering stale running task"
            );
            let error = format!(
                "stale: running since {started}, exceeded {}s",
                stale_after.as_secs()
            );
            match self.executor.retry_or_fail(&task, error, true).await? {
                Outcome::Lost => {}
                _ => recovered += 1,
            }
        }

        if recovered > 0 {
            info!(agent_id = %agent_id, recovered, "Watchdog recovered stale tasks");
        }
        Ok(recovered)
    }
}
