use crate::config::{PipelineConfig, StepSpec};
use penman_core::{PenmanError, PenmanResult, TaskKind};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Pipelines by task kind.
///
/// Starts from the built-in pipelines and lets configuration replace the
/// steps for individual kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipelines {
    by_kind: HashMap<TaskKind, Vec<StepSpec>>,
}

impl Default for Pipelines {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Pipelines {
    /// The stock pipelines.
    ///
    /// Writing goes research, outline, draft, humanize, optimize; the final
    /// step's quality score decides between complete and review. Publishing
    /// is gated on the agent's publish autonomy.
    pub fn builtin() -> Self {
        let mut by_kind = HashMap::new();
        by_kind.insert(
            TaskKind::Research,
            vec![StepSpec::new("research").gated(TaskKind::Research)],
        );
        by_kind.insert(
            TaskKind::Write,
            vec![
                StepSpec::new("research").gated(TaskKind::Research),
                StepSpec::new("outline").gated(TaskKind::Write),
                StepSpec::new("draft").gated(TaskKind::Write),
                StepSpec::new("humanize").gated(TaskKind::Write),
                StepSpec::new("optimize").gated(TaskKind::Optimize),
            ],
        );
        by_kind.insert(
            TaskKind::Optimize,
            vec![StepSpec::new("optimize").gated(TaskKind::Optimize)],
        );
        by_kind.insert(
            TaskKind::Link,
            vec![StepSpec::new("link").gated(TaskKind::Link)],
        );
        by_kind.insert(
            TaskKind::Refresh,
            vec![
                StepSpec::new("refresh").gated(TaskKind::Refresh),
                StepSpec::new("optimize").gated(TaskKind::Optimize),
            ],
        );
        by_kind.insert(
            TaskKind::Publish,
            vec![StepSpec::new("publish").gated(TaskKind::Publish)],
        );
        Self { by_kind }
    }

    /// A single pipeline used for every kind. Handy in tests.
    pub fn uniform(steps: Vec<StepSpec>) -> PenmanResult<Self> {
        validate_steps(TaskKind::Write, &steps)?;
        let by_kind = [
            TaskKind::Research,
            TaskKind::Write,
            TaskKind::Optimize,
            TaskKind::Link,
            TaskKind::Refresh,
            TaskKind::Publish,
        ]
        .into_iter()
        .map(|kind| (kind, steps.clone()))
        .collect();
        Ok(Self { by_kind })
    }

    /// Built-in pipelines overridden by `configs`.
    pub fn from_configs(configs: Vec<PipelineConfig>) -> PenmanResult<Self> {
        let mut pipelines = Self::builtin();
        let mut seen = HashSet::new();
        for config in configs {
            if !seen.insert(config.kind) {
                return Err(PenmanError::Config(format!(
                    "pipeline for '{}' defined twice",
                    config.kind
                )));
            }
            validate_steps(config.kind, &config.steps)?;
            debug!(kind = %config.kind, steps = config.steps.len(), "Pipeline overridden");
            pipelines.by_kind.insert(config.kind, config.steps);
        }
        Ok(pipelines)
    }

    /// Steps for a task kind, in execution order.
    pub fn steps_for(&self, kind: TaskKind) -> &[StepSpec] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }
}

fn validate_steps(kind: TaskKind, steps: &[StepSpec]) -> PenmanResult<()> {
    if steps.is_empty() {
        return Err(PenmanError::Config(format!(
            "pipeline for '{kind}' has no steps"
        )));
    }
    let mut names = HashSet::new();
    for step in steps {
        if step.name.trim().is_empty() {
            return Err(PenmanError::Config(format!(
                "pipeline for '{kind}' has a step without a name"
            )));
        }
        if !names.insert(step.name.as_str()) {
            return Err(PenmanError::Config(format!(
                "pipeline for '{kind}' repeats step '{}'",
                step.name
            )));
        }
        if step.timeout_secs == Some(0) {
            return Err(PenmanError::Config(format!(
                "step '{}' has a zero timeout",
                step.name
            )));
        }
    }
    Ok(())
}
