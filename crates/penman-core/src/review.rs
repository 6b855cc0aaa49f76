//! Review decisions for human-in-the-loop (HITL) gates.
//!
//! A task that trips a quality or autonomy gate parks in `review` until a
//! reviewer approves or rejects it. These types are shared by the
//! orchestrator facade and the CLI.

use crate::state::TaskEvent;
use serde::{Deserialize, Serialize};

/// The decision made by a human reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Reject { reason: String },
}

impl ReviewDecision {
    pub fn reject(reason: impl Into<String>) -> Self {
        ReviewDecision::Reject {
            reason: reason.into(),
        }
    }

    /// State machine event this decision applies.
    pub fn event(&self) -> TaskEvent {
        match self {
            ReviewDecision::Approve => TaskEvent::Approve,
            ReviewDecision::Reject { .. } => TaskEvent::Reject,
        }
    }

    /// Reason to record as the task's last error, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ReviewDecision::Approve => None,
            ReviewDecision::Reject { reason } => Some(reason),
        }
    }
}
