use crate::retry::RetryPolicy;
use chrono::Utc;
use penman_core::{Agent, ErrorKind, PenmanError, PenmanResult, Task, TaskStatus};
use penman_pipeline::{Generator, Pipelines, StepRecord, StepRequest, StepStatus};
use penman_store::{TaskStore, TaskUpdate};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How one execution of a claimed task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Review,
    Failed,
    /// Put back in the queue with a backoff marker.
    Requeued,
    /// Another writer moved the task first; nothing was written.
    Lost,
}

impl Outcome {
    /// Whether the task reached a terminal or review state.
    pub fn is_settled(self) -> bool {
        matches!(self, Outcome::Completed | Outcome::Review | Outcome::Failed)
    }

    fn from_status(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Complete => Outcome::Completed,
            TaskStatus::Review => Outcome::Review,
            TaskStatus::Failed => Outcome::Failed,
            TaskStatus::Queued => Outcome::Requeued,
            TaskStatus::Running => Outcome::Lost,
        }
    }
}

/// Drives a claimed task through the pipeline for its kind.
pub struct Executor {
    tasks: Arc<dyn TaskStore>,
    generator: Arc<dyn Generator>,
    pipelines: Arc<Pipelines>,
    policy: RetryPolicy,
    step_timeout: Duration,
}

impl Executor {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        generator: Arc<dyn Generator>,
        pipelines: Arc<Pipelines>,
        policy: RetryPolicy,
        step_timeout: Duration,
    ) -> Self {
        Self {
            tasks,
            generator,
            pipelines,
            policy,
            step_timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run every step of the task's pipeline in order and settle the task.
    ///
    /// `task` must be the record returned by the claim, i.e. `running`.
    /// Step failures never surface as `Err`; only store failures do.
    pub async fn execute(&self, agent: &Agent, task: Task) -> PenmanResult<Outcome> {
        let mut prior: Vec<StepRecord> = Vec::new();

        for spec in self.pipelines.steps_for(task.kind) {
            if let Some(gate) = spec.gate {
                if !agent.autonomy.permits(gate) {
                    info!(
                        task_id = %task.id,
                        agent_id = %agent.id,
                        step = %spec.name,
                        gate = %gate,
                        "Step needs human approval, parking task in review"
                    );
                    return self.finish(&task, TaskStatus::Review, &prior).await;
                }
            }

            let request = StepRequest {
                task_id: task.id,
                agent_id: task.agent_id.clone(),
                step: spec.name.clone(),
                kind: task.kind,
                payload: task.payload.clone(),
                prior: prior.clone(),
            };
            let timeout = spec.timeout(self.step_timeout);

            let response = match tokio::time::timeout(timeout, self.generator.run_step(&request))
                .await
            {
                Err(_) => Err(PenmanError::Timeout(format!(
                    "step '{}' exceeded {:?}",
                    spec.name, timeout
                ))),
                Ok(Err(e)) if e.is_transient() => Err(e),
                Ok(Err(e)) => Err(PenmanError::Upstream(e.to_string())),
                Ok(Ok(resp)) => resp.validate(spec).map(|()| resp),
            };

            let response = match response {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(
                        task_id = %task.id,
                        step = %spec.name,
                        attempt = task.attempt_count,
                        error = %e,
                        "Step failed"
                    );
                    return self.retry_or_fail(&task, e.to_string(), true).await;
                }
            };

            match response.status {
                StepStatus::Success => prior.push(response.into_record(&spec.name)),
                StepStatus::Failure => {
                    let permanent = response.permanent;
                    let error = format!(
                        "step '{}': {}",
                        spec.name,
                        response.error.unwrap_or_default()
                    );
                    warn!(
                        task_id = %task.id,
                        step = %spec.name,
                        attempt = task.attempt_count,
                        permanent,
                        error = %error,
                        "Step reported failure"
                    );
                    return self.retry_or_fail(&task, error, !permanent).await;
                }
                StepStatus::NeedsReview => {
                    prior.push(response.into_record(&spec.name));
                    return self.finish(&task, TaskStatus::Review, &prior).await;
                }
            }
        }

        let target = match final_quality(&prior) {
            Some(score) if score < agent.strategy.quality_threshold => {
                info!(
                    task_id = %task.id,
                    quality_score = score,
                    threshold = agent.strategy.quality_threshold,
                    "Quality below threshold, sending to review"
                );
                TaskStatus::Review
            }
            _ => TaskStatus::Complete,
        };
        self.finish(&task, target, &prior).await
    }

    /// Route a failed attempt: back to the queue with backoff while attempts
    /// remain and the failure is retryable, otherwise to `failed`.
    pub async fn retry_or_fail(
        &self,
        task: &Task,
        error: String,
        retryable: bool,
    ) -> PenmanResult<Outcome> {
        let now = Utc::now();
        if retryable && self.policy.allows_another_attempt(task.attempt_count) {
            let delay = self.policy.backoff(task.attempt_count.saturating_sub(1));
            let after = now
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            info!(
                task_id = %task.id,
                attempt = task.attempt_count,
                delay_ms = delay.as_millis() as u64,
                "Requeueing task with backoff"
            );
            self.swap(
                task,
                TaskStatus::Queued,
                TaskUpdate::new().last_error(error).process_after(after),
            )
            .await
        } else {
            self.swap(
                task,
                TaskStatus::Failed,
                TaskUpdate::new().last_error(error).completed_at(now),
            )
            .await
        }
    }

    async fn finish(
        &self,
        task: &Task,
        target: TaskStatus,
        prior: &[StepRecord],
    ) -> PenmanResult<Outcome> {
        let update = TaskUpdate::new()
            .result(prior.iter().rev().find_map(|r| r.result.clone()))
            .quality_score(final_quality(prior))
            .completed_at(Utc::now());
        self.swap(task, target, update).await
    }

    /// Compare-and-swap from `running`; losing the race is not an error.
    async fn swap(
        &self,
        task: &Task,
        target: TaskStatus,
        update: TaskUpdate,
    ) -> PenmanResult<Outcome> {
        match self
            .tasks
            .update_status(task.id, TaskStatus::Running, target, update)
            .await
        {
            Ok(updated) => {
                info!(
                    task_id = %task.id,
                    agent_id = %task.agent_id,
                    status = %updated.status,
                    attempt = updated.attempt_count,
                    "Task settled"
                );
                Ok(Outcome::from_status(updated.status))
            }
            Err(e) if e.kind() == ErrorKind::Conflict => {
                warn!(
                    task_id = %task.id,
                    target = %target,
                    error = %e,
                    "Task was moved by another writer, dropping result"
                );
                Ok(Outcome::Lost)
            }
            Err(e) => Err(e),
        }
    }
}

/// Score of the last step that reported one.
fn final_quality(records: &[StepRecord]) -> Option<f64> {
    records.iter().rev().find_map(|r| r.quality_score)
}
