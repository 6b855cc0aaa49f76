use penman_core::TaskKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// One step of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    /// Autonomy flag that must be enabled for this step to run unattended.
    /// When the agent has it disabled the task is parked in review instead.
    #[serde(default)]
    pub gate: Option<TaskKind>,
    /// Overrides the orchestrator-wide step timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Keys a successful result object must contain.
    #[serde(default)]
    pub required_fields: Vec<String>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gate: None,
            timeout_secs: None,
            required_fields: Vec::new(),
        }
    }

    pub fn gated(mut self, kind: TaskKind) -> Self {
        self.gate = Some(kind);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Effective timeout for this step.
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_secs.map_or(default, Duration::from_secs)
    }
}

/// The steps run for one task kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub kind: TaskKind,
    pub steps: Vec<StepSpec>,
}

/// How to launch the external generator process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl GeneratorConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_step_timeout_override() {
        let default = Duration::from_secs(120);
        assert_eq!(StepSpec::new("draft").timeout(default), default);
        assert_eq!(
            StepSpec::new("draft").with_timeout_secs(5).timeout(default),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_pipeline_from_toml() {
        let config: PipelineConfig = toml::from_str(
            r#"
            kind = "publish"

            [[steps]]
            name = "render"
            required_fields = ["html"]

            [[steps]]
            name = "publish"
            gate = "publish"
            timeout_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.kind, TaskKind::Publish);
        assert_eq!(config.steps.len(), 2);
        assert_eq!(config.steps[0].required_fields, vec!["html"]);
        assert_eq!(config.steps[1].gate, Some(TaskKind::Publish));
        assert_eq!(config.steps[1].timeout_secs, Some(30));
    }

    #[test]
    fn test_generator_from_toml() {
        let config: GeneratorConfig = toml::from_str(
            r#"
            program = "python3"
            args = ["-m", "writer"]
            env = { WRITER_MODEL = "large" }
            "#,
        )
        .unwrap();
        assert_eq!(config.args, vec!["-m", "writer"]);
        assert_eq!(config.env.get("WRITER_MODEL").unwrap(), "large");
        assert!(config.working_dir.is_none());
    }
}
