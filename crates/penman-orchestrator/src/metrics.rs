use penman_core::{AgentMetrics, PenmanResult, QueueStatus, Task, TaskStatus};
use penman_store::{TaskQuery, TaskStore};
use std::sync::Arc;

/// Recomputes agent health from the task set on every call.
///
/// Nothing here is incremental, so the result is always consistent with the
/// store no matter how many sweeps, retries or restarts happened.
pub struct MetricsAggregator {
    tasks: Arc<dyn TaskStore>,
}

impl MetricsAggregator {
    pub fn new(tasks: Arc<dyn TaskStore>) -> Self {
        Self { tasks }
    }

    pub async fn metrics(&self, agent_id: &str) -> PenmanResult<AgentMetrics> {
        let tasks = self.tasks.query_by_agent(agent_id, TaskQuery::all()).await?;
        Ok(aggregate(&tasks))
    }
}

/// Per-status queue counts, straight from the store.
pub struct QueueStatusReporter {
    tasks: Arc<dyn TaskStore>,
}

impl QueueStatusReporter {
    pub fn new(tasks: Arc<dyn TaskStore>) -> Self {
        Self { tasks }
    }

    pub async fn status(&self, agent_id: &str) -> PenmanResult<QueueStatus> {
        self.tasks.count_by_status(agent_id).await
    }
}

/// Fold a task set into an [`AgentMetrics`] snapshot.
pub fn aggregate(tasks: &[Task]) -> AgentMetrics {
    let counts: QueueStatus = tasks.iter().map(|t| t.status).collect();
    let complete: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Complete)
        .collect();

    let settled = counts.complete + counts.failed;
    let success_rate = if settled == 0 {
        0.0
    } else {
        counts.complete as f64 / settled as f64
    };

    let scores: Vec<f64> = complete.iter().filter_map(|t| t.quality_score).collect();
    let durations: Vec<f64> = complete
        .iter()
        .filter_map(|t| t.execution_time())
        .map(|d| d.num_milliseconds() as f64)
        .collect();

    AgentMetrics {
        success_rate,
        avg_quality_score: mean(&scores),
        avg_execution_time_ms: mean(&durations),
        articles_in_review: counts.review,
        failed_tasks: counts.failed,
        completed_tasks: counts.complete,
        total_tasks: counts.total(),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
