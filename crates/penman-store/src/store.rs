use async_trait::async_trait;
use chrono::{DateTime, Utc};
use penman_core::{
    Agent, AgentMetrics, AgentStatus, PenmanResult, QueueStatus, Strategy, Task, TaskId,
    TaskStatus,
};

/// Filter for [`TaskStore::query_by_agent`].
///
/// Results are always ordered priority descending, then creation time
/// ascending, then insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskQuery {
    /// Only tasks in this status.
    pub status: Option<TaskStatus>,
    /// Exclude tasks whose backoff marker is later than this instant.
    pub ready_at: Option<DateTime<Utc>>,
    /// Maximum number of rows.
    pub limit: Option<usize>,
}

impl TaskQuery {
    /// Every task of the agent.
    pub fn all() -> Self {
        Self::default()
    }

    /// Tasks in one status.
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Queued tasks that are claimable at `now`, in selection order.
    pub fn claimable(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::Queued),
            ready_at: Some(now),
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// In-memory version of the filter, shared by stores that filter in Rust.
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        match (self.ready_at, task.process_after) {
            (Some(now), Some(after)) => after <= now,
            _ => true,
        }
    }
}

/// Field writes applied atomically together with a status change.
///
/// `None` leaves a field untouched. The doubly optional fields use
/// `Some(None)` to clear a value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub attempt_count: Option<u32>,
    pub last_error: Option<Option<String>>,
    pub result: Option<serde_json::Value>,
    pub quality_score: Option<f64>,
    pub process_after: Option<Option<DateTime<Utc>>>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(Some(at));
        self
    }

    pub fn last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(Some(error.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.last_error = Some(None);
        self
    }

    pub fn result(mut self, result: Option<serde_json::Value>) -> Self {
        self.result = result;
        self
    }

    pub fn quality_score(mut self, score: Option<f64>) -> Self {
        self.quality_score = score;
        self
    }

    pub fn process_after(mut self, at: DateTime<Utc>) -> Self {
        self.process_after = Some(Some(at));
        self
    }

    /// Write the requested fields onto `task`.
    pub fn apply(&self, task: &mut Task) {
        if let Some(at) = self.started_at {
            task.started_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            task.completed_at = at;
        }
        if let Some(n) = self.attempt_count {
            task.attempt_count = n;
        }
        if let Some(err) = &self.last_error {
            task.last_error.clone_from(err);
        }
        if let Some(result) = &self.result {
            task.result = Some(result.clone());
        }
        if let Some(score) = self.quality_score {
            task.quality_score = Some(score);
        }
        if let Some(at) = self.process_after {
            task.process_after = at;
        }
    }
}

/// Durable, atomically updatable task records.
///
/// Every status change is a single conditional write against the currently
/// stored status. Implementations must never overwrite a record whose stored
/// status differs from the caller's expectation.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task.
    async fn insert(&self, task: &Task) -> PenmanResult<()>;

    /// Look a task up by id.
    async fn get_by_id(&self, id: TaskId) -> PenmanResult<Option<Task>>;

    /// Tasks belonging to `agent_id`, filtered and ordered per [`TaskQuery`].
    async fn query_by_agent(&self, agent_id: &str, query: TaskQuery) -> PenmanResult<Vec<Task>>;

    /// Compare-and-swap the status from `expected` to `new`, applying `update`.
    ///
    /// Fails with `NotFound` for an unknown id, `InvalidState` when the table
    /// has no `expected -> new` transition, and `Conflict` when the stored
    /// status is no longer `expected`.
    async fn update_status(
        &self,
        id: TaskId,
        expected: TaskStatus,
        new: TaskStatus,
        update: TaskUpdate,
    ) -> PenmanResult<Task>;

    /// Claim a queued task: the `queued -> running` swap, additionally
    /// conditioned on the owning agent having fewer than `running_cap`
    /// running tasks and the task being past its backoff marker.
    ///
    /// Increments the attempt counter, stamps `started_at = now` and clears
    /// the backoff marker. Any unmet condition yields `Conflict`.
    async fn claim(&self, id: TaskId, running_cap: usize, now: DateTime<Utc>)
        -> PenmanResult<Task>;

    /// Delete a task only if it is queued or failed; returns the removed record.
    async fn delete_if_cancellable(&self, id: TaskId) -> PenmanResult<Task>;

    /// Per-status counts for one agent.
    async fn count_by_status(&self, agent_id: &str) -> PenmanResult<QueueStatus> {
        let tasks = self.query_by_agent(agent_id, TaskQuery::all()).await?;
        Ok(tasks.iter().map(|t| t.status).collect())
    }
}

/// Externally configured agents, readable by the orchestrator.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Insert or replace an agent definition.
    async fn put_agent(&self, agent: &Agent) -> PenmanResult<()>;

    async fn get_agent(&self, id: &str) -> PenmanResult<Option<Agent>>;

    /// All agents, ordered by id.
    async fn list_agents(&self) -> PenmanResult<Vec<Agent>>;

    async fn set_agent_status(&self, id: &str, status: AgentStatus) -> PenmanResult<Agent>;

    async fn update_strategy(&self, id: &str, strategy: &Strategy) -> PenmanResult<Agent>;

    /// Stamp the end of a sweep.
    async fn record_run(&self, id: &str, at: DateTime<Utc>) -> PenmanResult<()>;

    /// Replace the cached metrics snapshot.
    async fn cache_metrics(&self, id: &str, metrics: &AgentMetrics) -> PenmanResult<()>;
}

/// Order used for every task listing.
pub(crate) fn selection_order(a: &(u64, &Task), b: &(u64, &Task)) -> std::cmp::Ordering {
    b.1.priority
        .cmp(&a.1.priority)
        .then(a.1.created_at.cmp(&b.1.created_at))
        .then(a.0.cmp(&b.0))
}
