use crate::calendar::calendar_tasks;
use crate::config::OrchestratorConfig;
use crate::executor::Executor;
use crate::metrics::{MetricsAggregator, QueueStatusReporter};
use crate::scheduler::{Scheduler, Sweep};
use crate::strategy;
use crate::watchdog::Watchdog;
use chrono::Utc;
use penman_core::{
    transition, Agent, AgentMetrics, AgentStatus, CalendarEntry, ErrorKind, NewTask, PenmanError,
    PenmanResult, QueueStatus, ReviewDecision, Strategy, Task, TaskId, TaskStatus,
};
use penman_pipeline::{Generator, Pipelines};
use penman_store::{AgentStore, TaskQuery, TaskStore, TaskUpdate};
use std::sync::Arc;
use tracing::{info, warn};

/// The single entry point for driving agents and their task queues.
///
/// Owns no state of its own beyond configuration: tasks and agents live in
/// the stores, so any number of facades (or processes) can share them.
pub struct Orchestrator {
    config: OrchestratorConfig,
    tasks: Arc<dyn TaskStore>,
    agents: Arc<dyn AgentStore>,
    scheduler: Scheduler,
    watchdog: Watchdog,
    metrics: MetricsAggregator,
    reporter: QueueStatusReporter,
}

impl Orchestrator {
    /// Build a facade over one store that holds both tasks and agents.
    pub fn new<S>(
        store: Arc<S>,
        generator: Arc<dyn Generator>,
        pipelines: Pipelines,
        config: OrchestratorConfig,
    ) -> Self
    where
        S: TaskStore + AgentStore + 'static,
    {
        Self::with_stores(store.clone(), store, generator, pipelines, config)
    }

    pub fn with_stores(
        tasks: Arc<dyn TaskStore>,
        agents: Arc<dyn AgentStore>,
        generator: Arc<dyn Generator>,
        pipelines: Pipelines,
        config: OrchestratorConfig,
    ) -> Self {
        let executor = Arc::new(Executor::new(
            tasks.clone(),
            generator,
            Arc::new(pipelines),
            config.retry_policy(),
            config.step_timeout(),
        ));

        Self {
            scheduler: Scheduler::new(tasks.clone(), agents.clone(), executor.clone()),
            watchdog: Watchdog::new(tasks.clone(), executor),
            metrics: MetricsAggregator::new(tasks.clone()),
            reporter: QueueStatusReporter::new(tasks.clone()),
            config,
            tasks,
            agents,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // --- Agents ---

    /// Create or replace an agent.
    pub async fn register_agent(&self, agent: Agent) -> PenmanResult<()> {
        self.agents.put_agent(&agent).await?;
        info!(agent_id = %agent.id, name = %agent.name, "Agent registered");
        Ok(())
    }

    pub async fn get_agent(&self, agent_id: &str) -> PenmanResult<Agent> {
        self.agents
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| PenmanError::agent_not_found(agent_id))
    }

    pub async fn list_agents(&self) -> PenmanResult<Vec<Agent>> {
        self.agents.list_agents().await
    }

    /// Pause, resume or stop an agent. Only active agents are swept.
    pub async fn set_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> PenmanResult<Agent> {
        let agent = self.agents.set_agent_status(agent_id, status).await?;
        info!(agent_id = %agent_id, status = %status, "Agent status changed");
        Ok(agent)
    }

    // --- Tasks ---

    /// Queue a `write` task for an agent.
    pub async fn enqueue(
        &self,
        agent_id: &str,
        payload: serde_json::Value,
        priority: i32,
    ) -> PenmanResult<TaskId> {
        self.submit(NewTask::new(agent_id, payload).with_priority(priority))
            .await
    }

    pub async fn submit(&self, new_task: NewTask) -> PenmanResult<TaskId> {
        self.get_agent(&new_task.agent_id).await?;
        let task = new_task.into_task();
        self.tasks.insert(&task).await?;
        info!(
            task_id = %task.id,
            agent_id = %task.agent_id,
            kind = %task.kind,
            priority = task.priority,
            "Task queued"
        );
        Ok(task.id)
    }

    /// Run one sweep for the agent and return how many tasks settled.
    ///
    /// Afterwards the agent's run time and cached metrics are refreshed, and
    /// the strategy is re-tuned when the sweep settled at least
    /// `adjust_after` tasks. A paused or stopped agent is left untouched.
    pub async fn run_loop(&self, agent_id: &str, max_tasks: usize) -> PenmanResult<usize> {
        let processed = match self.scheduler.run_loop(agent_id, max_tasks).await? {
            Sweep::Skipped => return Ok(0),
            Sweep::Ran { processed } => processed,
        };

        self.agents.record_run(agent_id, Utc::now()).await?;
        let metrics = self.metrics(agent_id).await?;
        let adjust_after = self.config.adjust_after;
        if adjust_after > 0 && processed >= adjust_after {
            self.apply_adjustment(agent_id, &metrics).await?;
        }

        Ok(processed)
    }

    /// Remove a `queued` or `failed` task.
    pub async fn cancel(&self, task_id: TaskId) -> PenmanResult<()> {
        let task = self.tasks.delete_if_cancellable(task_id).await?;
        info!(task_id = %task_id, agent_id = %task.agent_id, status = %task.status, "Task cancelled");
        Ok(())
    }

    pub async fn approve(&self, task_id: TaskId) -> PenmanResult<Task> {
        self.resolve_review(task_id, ReviewDecision::Approve).await
    }

    pub async fn reject(&self, task_id: TaskId, reason: impl Into<String>) -> PenmanResult<Task> {
        self.resolve_review(task_id, ReviewDecision::reject(reason))
            .await
    }

    /// Move a task out of `review`, to `complete` on approval or `failed`
    /// on rejection.
    pub async fn resolve_review(
        &self,
        task_id: TaskId,
        decision: ReviewDecision,
    ) -> PenmanResult<Task> {
        let task = self.get_task(task_id).await?;
        let not_in_review = |status: TaskStatus| {
            PenmanError::InvalidState(format!("task {task_id} is {status}, not in review"))
        };
        if task.status != TaskStatus::Review {
            return Err(not_in_review(task.status));
        }

        let target = transition(TaskStatus::Review, decision.event())?;
        let mut update = TaskUpdate::new();
        if task.completed_at.is_none() {
            update = update.completed_at(Utc::now());
        }
        if let Some(reason) = decision.reason() {
            update = update.last_error(reason);
        }

        match self
            .tasks
            .update_status(task_id, TaskStatus::Review, target, update)
            .await
        {
            Ok(task) => {
                info!(task_id = %task_id, status = %task.status, "Review resolved");
                Ok(task)
            }
            Err(e) if e.kind() == ErrorKind::Conflict => {
                warn!(task_id = %task_id, error = %e, "Task left review concurrently");
                let status = self.get_task(task_id).await?.status;
                Err(not_in_review(status))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_task(&self, task_id: TaskId) -> PenmanResult<Task> {
        self.tasks
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| PenmanError::task_not_found(task_id))
    }

    /// An agent's tasks in selection order, optionally filtered by status.
    pub async fn list_tasks(
        &self,
        agent_id: &str,
        status: Option<TaskStatus>,
    ) -> PenmanResult<Vec<Task>> {
        let query = match status {
            Some(status) => TaskQuery::with_status(status),
            None => TaskQuery::all(),
        };
        self.tasks.query_by_agent(agent_id, query).await
    }

    // --- Reporting ---

    pub async fn status(&self, agent_id: &str) -> PenmanResult<QueueStatus> {
        self.reporter.status(agent_id).await
    }

    /// Recompute the agent's metrics and cache the snapshot on the agent.
    pub async fn metrics(&self, agent_id: &str) -> PenmanResult<AgentMetrics> {
        let metrics = self.metrics.metrics(agent_id).await?;
        self.agents.cache_metrics(agent_id, &metrics).await?;
        Ok(metrics)
    }

    // --- Maintenance ---

    /// Put tasks stuck in `running` longer than `stale_after_secs` back
    /// through the failure path.
    pub async fn recover_stale(&self, agent_id: &str) -> PenmanResult<usize> {
        self.watchdog
            .recover(agent_id, self.config.stale_after(), Utc::now())
            .await
    }

    /// Re-tune the agent's strategy from fresh metrics.
    pub async fn adjust_strategy(&self, agent_id: &str) -> PenmanResult<Strategy> {
        let metrics = self.metrics(agent_id).await?;
        self.apply_adjustment(agent_id, &metrics).await
    }

    /// Queue `write` tasks for the first `batch_limit` calendar entries.
    pub async fn schedule(
        &self,
        agent_id: &str,
        entries: &[CalendarEntry],
    ) -> PenmanResult<Vec<TaskId>> {
        self.get_agent(agent_id).await?;
        let mut ids = Vec::new();
        for new_task in calendar_tasks(agent_id, entries, self.config.batch_limit)? {
            ids.push(self.submit(new_task).await?);
        }
        info!(
            agent_id = %agent_id,
            scheduled = ids.len(),
            skipped = entries.len() - ids.len(),
            "Calendar scheduled"
        );
        Ok(ids)
    }

    async fn apply_adjustment(
        &self,
        agent_id: &str,
        metrics: &AgentMetrics,
    ) -> PenmanResult<Strategy> {
        let agent = self.get_agent(agent_id).await?;
        let next = strategy::adjust(&agent.strategy, metrics);
        if next == agent.strategy {
            return Ok(next);
        }
        self.agents.update_strategy(agent_id, &next).await?;
        info!(
            agent_id = %agent_id,
            success_rate = metrics.success_rate,
            avg_quality = metrics.avg_quality_score,
            articles_per_week = next.articles_per_week,
            quality_threshold = next.quality_threshold,
            "Strategy adjusted"
        );
        Ok(next)
    }
}
