//! The step pipeline a task is driven through, and the generators that run it.
//!
//! A pipeline is an ordered list of [`StepSpec`]s selected by the task's
//! [`TaskKind`](penman_core::TaskKind). Each step is handed to a
//! [`Generator`], whose [`StepResponse`] is validated against the step's
//! schema before the orchestrator acts on it.

pub mod backends;
pub mod config;
pub mod pipeline;
pub mod step;

pub use backends::command::CommandGenerator;
pub use backends::scripted::ScriptedGenerator;
pub use backends::Generator;
pub use config::{GeneratorConfig, PipelineConfig, StepSpec};
pub use pipeline::Pipelines;
pub use step::{StepRecord, StepRequest, StepResponse, StepStatus};
