pub mod command;
pub mod scripted;

use crate::step::{StepRequest, StepResponse};
use async_trait::async_trait;
use penman_core::PenmanResult;

/// Trait for content generation backends.
///
/// A generator runs one named pipeline step for a task and reports how it
/// went. Steps must be idempotent: a task may be retried after a timeout
/// even though the step eventually completed upstream.
///
/// An `Err` means the backend itself failed (process crashed, transport
/// error) and is treated as a retryable upstream failure. A step that ran
/// but did not succeed returns `Ok` with a failure [`StepResponse`].
#[async_trait]
pub trait Generator: Send + Sync {
    async fn run_step(&self, request: &StepRequest) -> PenmanResult<StepResponse>;
}
