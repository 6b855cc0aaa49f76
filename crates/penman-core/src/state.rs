//! The fixed table of legal task status transitions.
//!
//! Every status change in the system, in memory or in a store, is computed
//! here first. Anything not in the table is rejected with
//! [`PenmanError::InvalidTransition`].

use crate::task::TaskStatus;
use crate::{PenmanError, PenmanResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Something that happens to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEvent {
    /// A sweep took the task.
    Claim,
    /// The whole pipeline succeeded.
    Succeed,
    /// A retryable failure with attempts left.
    Retry,
    /// A permanent failure, or retries exhausted.
    Fail,
    /// A quality or autonomy gate tripped.
    RequestReview,
    /// A human accepted the reviewed output.
    Approve,
    /// A human rejected the reviewed output.
    Reject,
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskEvent::Claim => "claim",
            TaskEvent::Succeed => "succeed",
            TaskEvent::Retry => "retry",
            TaskEvent::Fail => "fail",
            TaskEvent::RequestReview => "request_review",
            TaskEvent::Approve => "approve",
            TaskEvent::Reject => "reject",
        };
        f.write_str(name)
    }
}

const TABLE: [(TaskStatus, TaskEvent, TaskStatus); 7] = [
    (TaskStatus::Queued, TaskEvent::Claim, TaskStatus::Running),
    (TaskStatus::Running, TaskEvent::Succeed, TaskStatus::Complete),
    (TaskStatus::Running, TaskEvent::Retry, TaskStatus::Queued),
    (TaskStatus::Running, TaskEvent::Fail, TaskStatus::Failed),
    (TaskStatus::Running, TaskEvent::RequestReview, TaskStatus::Review),
    (TaskStatus::Review, TaskEvent::Approve, TaskStatus::Complete),
    (TaskStatus::Review, TaskEvent::Reject, TaskStatus::Failed),
];

/// Apply `event` to a task in status `from`.
pub fn transition(from: TaskStatus, event: TaskEvent) -> PenmanResult<TaskStatus> {
    TABLE
        .iter()
        .find(|(f, e, _)| *f == from && *e == event)
        .map(|(_, _, to)| *to)
        .ok_or(PenmanError::InvalidTransition { from, event })
}

/// The event that moves a task from `from` to `to`, if the table has one.
pub fn event_between(from: TaskStatus, to: TaskStatus) -> Option<TaskEvent> {
    TABLE
        .iter()
        .find(|(f, _, t)| *f == from && *t == to)
        .map(|(_, e, _)| *e)
}

/// Reject a raw `from -> to` write that the table does not allow.
///
/// Stores call this before a compare-and-swap so that a caller bypassing
/// [`transition`] still cannot produce an illegal status.
pub fn ensure_legal(from: TaskStatus, to: TaskStatus) -> PenmanResult<TaskEvent> {
    event_between(from, to).ok_or_else(|| {
        PenmanError::InvalidState(format!("no transition from {from} to {to}"))
    })
}
