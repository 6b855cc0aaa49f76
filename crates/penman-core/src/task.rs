use crate::agent::AgentId;
use crate::{PenmanError, PenmanResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a [`Task`].
pub type TaskId = Uuid;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting to be claimed by a sweep.
    Queued,
    /// Claimed and being driven through the pipeline.
    Running,
    /// Finished successfully. Terminal.
    Complete,
    /// Gave up. Terminal.
    Failed,
    /// Waiting for a human approve/reject decision.
    Review,
}

impl TaskStatus {
    /// Every status, in reporting order.
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Complete,
        TaskStatus::Failed,
        TaskStatus::Review,
    ];

    /// Stable lowercase name, also used as the stored representation.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
            TaskStatus::Review => "review",
        }
    }

    /// `complete` and `failed` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }

    /// Whether a sweep outcome in this status counts as processed.
    pub fn is_settled(self) -> bool {
        self.is_terminal() || self == TaskStatus::Review
    }

    /// Only queued and failed tasks may be cancelled.
    pub fn is_cancellable(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = PenmanError;

    fn from_str(s: &str) -> PenmanResult<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "complete" => Ok(TaskStatus::Complete),
            "failed" => Ok(TaskStatus::Failed),
            "review" => Ok(TaskStatus::Review),
            other => Err(PenmanError::InvalidState(format!(
                "unknown task status '{other}'"
            ))),
        }
    }
}

/// What kind of content job a task is. Selects the pipeline that runs it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Keyword and topic research.
    Research,
    /// Draft a complete article.
    #[default]
    Write,
    /// Improve an existing article.
    Optimize,
    /// Add internal links.
    Link,
    /// Update stale content.
    Refresh,
    /// Publish an approved article.
    Publish,
}

impl TaskKind {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Research => "research",
            TaskKind::Write => "write",
            TaskKind::Optimize => "optimize",
            TaskKind::Link => "link",
            TaskKind::Refresh => "refresh",
            TaskKind::Publish => "publish",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = PenmanError;

    fn from_str(s: &str) -> PenmanResult<Self> {
        match s.to_lowercase().as_str() {
            "research" => Ok(TaskKind::Research),
            "write" => Ok(TaskKind::Write),
            "optimize" => Ok(TaskKind::Optimize),
            "link" => Ok(TaskKind::Link),
            "refresh" => Ok(TaskKind::Refresh),
            "publish" => Ok(TaskKind::Publish),
            other => Err(PenmanError::Config(format!("unknown task kind '{other}'"))),
        }
    }
}

/// A task in an agent's backlog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub agent_id: AgentId,
    #[serde(default)]
    pub kind: TaskKind,
    /// Opaque job description handed to every pipeline step.
    pub payload: serde_json::Value,
    pub priority: i32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of times the task has been claimed.
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Opaque reference to what the pipeline produced (draft id, URL, ...).
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub quality_score: Option<f64>,
    /// Backoff marker: not claimable before this instant.
    #[serde(default)]
    pub process_after: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a fresh queued task.
    pub fn new(
        agent_id: impl Into<AgentId>,
        kind: TaskKind,
        payload: serde_json::Value,
        priority: i32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            kind,
            payload,
            priority,
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            attempt_count: 0,
            last_error: None,
            result: None,
            quality_score: None,
            process_after: None,
        }
    }

    /// Queued and past any backoff marker.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Queued && self.process_after.map_or(true, |at| at <= now)
    }

    /// Wall-clock time between the last claim and completion.
    pub fn execution_time(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }
}

/// Request to add a task to an agent's backlog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub agent_id: AgentId,
    #[serde(default)]
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
}

impl NewTask {
    pub fn new(agent_id: impl Into<AgentId>, payload: serde_json::Value) -> Self {
        Self {
            agent_id: agent_id.into(),
            kind: TaskKind::default(),
            payload,
            priority: 0,
        }
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Materialize the queued task record.
    pub fn into_task(self) -> Task {
        Task::new(self.agent_id, self.kind, self.payload, self.priority)
    }
}

/// Per-status task counts for one agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queued: usize,
    pub running: usize,
    pub complete: usize,
    pub failed: usize,
    pub review: usize,
}

impl QueueStatus {
    /// Count one task in the given status.
    pub fn record(&mut self, status: TaskStatus) {
        self.add(status, 1);
    }

    /// Count `n` tasks in the given status.
    pub fn add(&mut self, status: TaskStatus, n: usize) {
        *self.slot(status) += n;
    }

    /// Count for a single status.
    pub fn get(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Queued => self.queued,
            TaskStatus::Running => self.running,
            TaskStatus::Complete => self.complete,
            TaskStatus::Failed => self.failed,
            TaskStatus::Review => self.review,
        }
    }

    pub fn total(&self) -> usize {
        self.queued + self.running + self.complete + self.failed + self.review
    }

    fn slot(&mut self, status: TaskStatus) -> &mut usize {
        match status {
            TaskStatus::Queued => &mut self.queued,
            TaskStatus::Running => &mut self.running,
            TaskStatus::Complete => &mut self.complete,
            TaskStatus::Failed => &mut self.failed,
            TaskStatus::Review => &mut self.review,
        }
    }
}

impl FromIterator<TaskStatus> for QueueStatus {
    fn from_iter<I: IntoIterator<Item = TaskStatus>>(iter: I) -> Self {
        let mut status = QueueStatus::default();
        for s in iter {
            status.record(s);
        }
        status
    }
}
