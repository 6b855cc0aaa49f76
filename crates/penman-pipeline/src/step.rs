use crate::config::StepSpec;
use penman_core::{AgentId, PenmanError, PenmanResult, TaskId, TaskKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome class reported by a generator for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    NeedsReview,
}

/// What a generator is asked to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRequest {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    /// Name of the step within the pipeline.
    pub step: String,
    pub kind: TaskKind,
    /// The task payload, unchanged.
    pub payload: Value,
    /// Records of the steps that already succeeded in this attempt.
    #[serde(default)]
    pub prior: Vec<StepRecord>,
}

/// A completed step, fed forward to later steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub status: StepStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub quality_score: Option<f64>,
}

/// What a generator reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub status: StepStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Quality score in `0..=100`, if the step scores its output.
    #[serde(default)]
    pub quality_score: Option<f64>,
    /// A failure that no retry can fix.
    #[serde(default)]
    pub permanent: bool,
}

impl StepResponse {
    pub fn success(result: Value) -> Self {
        Self {
            status: StepStatus::Success,
            result: Some(result),
            error: None,
            quality_score: None,
            permanent: false,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failure,
            result: None,
            error: Some(error.into()),
            quality_score: None,
            permanent: false,
        }
    }

    pub fn permanent_failure(error: impl Into<String>) -> Self {
        Self {
            permanent: true,
            ..Self::failure(error)
        }
    }

    pub fn needs_review(result: Value) -> Self {
        Self {
            status: StepStatus::NeedsReview,
            ..Self::success(result)
        }
    }

    pub fn with_quality(mut self, score: f64) -> Self {
        self.quality_score = Some(score);
        self
    }

    /// Check the response against the step's result schema.
    ///
    /// Violations are reported as [`PenmanError::InvalidOutput`], which the
    /// executor retries like any other transient failure.
    pub fn validate(&self, spec: &StepSpec) -> PenmanResult<()> {
        let invalid = |msg: String| {
            Err(PenmanError::InvalidOutput(format!(
                "step '{}': {msg}",
                spec.name
            )))
        };

        if let Some(score) = self.quality_score {
            if !score.is_finite() || !(0.0..=100.0).contains(&score) {
                return invalid(format!("quality score {score} outside 0..=100"));
            }
        }

        match self.status {
            StepStatus::Failure => {
                if self.error.as_deref().map_or(true, str::is_empty) {
                    return invalid("failure without an error message".into());
                }
            }
            StepStatus::Success | StepStatus::NeedsReview => {
                if self.permanent {
                    return invalid("only failures can be permanent".into());
                }
                if self.error.is_some() {
                    return invalid(format!("{:?} response carries an error", self.status));
                }
            }
        }

        if self.status == StepStatus::Success && !spec.required_fields.is_empty() {
            let Some(object) = self.result.as_ref().and_then(Value::as_object) else {
                return invalid("result must be an object".into());
            };
            if let Some(missing) = spec
                .required_fields
                .iter()
                .find(|field| !object.contains_key(field.as_str()))
            {
                return invalid(format!("missing required field '{missing}'"));
            }
        }

        Ok(())
    }

    /// Record this response as a finished step.
    pub fn into_record(self, step: impl Into<String>) -> StepRecord {
        StepRecord {
            step: step.into(),
            status: self.status,
            result: self.result,
            quality_score: self.quality_score,
        }
    }
}
