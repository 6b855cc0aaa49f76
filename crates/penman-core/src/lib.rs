//! Core types and error definitions for the Penman content orchestrator.
//!
//! This crate provides the foundational types shared across all Penman crates,
//! including the error taxonomy, the task and agent data model, and the task
//! status state machine.
//!
//! # Main types
//!
//! - [`PenmanError`] — Unified error enum for all Penman subsystems.
//! - [`PenmanResult`] — Convenience alias for `Result<T, PenmanError>`.
//! - [`ErrorKind`] — Caller-facing classification of a [`PenmanError`].
//! - [`Task`] — One unit of pipeline work belonging to an agent.
//! - [`Agent`] — A configured content-production persona.
//! - [`state::transition`] — The only legal way to change a [`TaskStatus`].

/// Agent configuration, strategy, autonomy, and cached metrics.
pub mod agent;
/// Review decisions for human-in-the-loop gates.
pub mod review;
/// Task status state machine.
pub mod state;
/// Task records and queue snapshots.
pub mod task;

pub use agent::{
    Agent, AgentId, AgentMetrics, AgentStatus, Autonomy, CalendarEntry, ContentFormat, Strategy,
};
pub use review::ReviewDecision;
pub use state::{transition, TaskEvent};
pub use task::{NewTask, QueueStatus, Task, TaskId, TaskKind, TaskStatus};

// --- Error types ---

/// Top-level error type for the Penman framework.
///
/// Each variant maps onto one [`ErrorKind`], which is what callers of the
/// orchestrator facade are expected to match on.
#[derive(Debug, thiserror::Error)]
pub enum PenmanError {
    /// A task or agent does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation is not allowed in the record's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A status change that the state machine does not allow.
    #[error("Invalid transition: cannot apply '{event}' to a {from} task")]
    InvalidTransition {
        /// Status the task was in.
        from: TaskStatus,
        /// Event that was requested.
        event: TaskEvent,
    },

    /// A compare-and-swap lost against a concurrent writer.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A pipeline step exceeded its maximum duration.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The generation provider failed or was unreachable.
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// A step produced output that violates its result schema.
    #[error("Invalid step output: {0}")]
    InvalidOutput(String),

    /// The task store could not be reached or failed mid-operation.
    #[error("Store error: {0}")]
    Store(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`PenmanError`].
pub type PenmanResult<T> = Result<T, PenmanError>;

/// Caller-facing error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The referenced task or agent does not exist.
    NotFound,
    /// The record is not in a state that allows the operation.
    InvalidState,
    /// Lost a race against a concurrent writer.
    Conflict,
    /// A step ran past its deadline.
    Timeout,
    /// The provider or the store failed.
    UpstreamFailure,
    /// Bad configuration.
    Config,
    /// Serialization or local I/O failure.
    Internal,
}

impl PenmanError {
    /// Classify this error into the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PenmanError::NotFound(_) => ErrorKind::NotFound,
            PenmanError::InvalidState(_) | PenmanError::InvalidTransition { .. } => {
                ErrorKind::InvalidState
            }
            PenmanError::Conflict(_) => ErrorKind::Conflict,
            PenmanError::Timeout(_) => ErrorKind::Timeout,
            PenmanError::Upstream(_) | PenmanError::InvalidOutput(_) | PenmanError::Store(_) => {
                ErrorKind::UpstreamFailure
            }
            PenmanError::Config(_) => ErrorKind::Config,
            PenmanError::Json(_) | PenmanError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether a step failure with this error may succeed on a later attempt.
    ///
    /// Timeouts, provider failures and schema violations are transient;
    /// everything else is treated as permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PenmanError::Timeout(_) | PenmanError::Upstream(_) | PenmanError::InvalidOutput(_)
        )
    }

    /// Shorthand for a missing task.
    pub fn task_not_found(id: TaskId) -> Self {
        PenmanError::NotFound(format!("task {id}"))
    }

    /// Shorthand for a missing agent.
    pub fn agent_not_found(id: &str) -> Self {
        PenmanError::NotFound(format!("agent {id}"))
    }
}
