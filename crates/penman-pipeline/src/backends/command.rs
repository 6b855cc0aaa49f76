use super::Generator;
use crate::config::GeneratorConfig;
use crate::step::{StepRequest, StepResponse};
use async_trait::async_trait;
use penman_core::{PenmanError, PenmanResult};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

/// External-process generator.
///
/// Spawns the configured program once per step, writes the JSON-encoded
/// [`StepRequest`] to its stdin and reads a [`StepResponse`] from the last
/// JSON line of its stdout. Earlier stdout lines are free-form log output.
/// The child is killed if the step future is dropped, e.g. on timeout.
pub struct CommandGenerator {
    config: GeneratorConfig,
}

impl CommandGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    async fn run_step(&self, request: &StepRequest) -> PenmanResult<StepResponse> {
        let mut cmd = tokio::process::Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .env("PENMAN_TASK_ID", request.task_id.to_string())
            .env("PENMAN_AGENT_ID", &request.agent_id)
            .env("PENMAN_STEP", &request.step)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        tracing::info!(
            task_id = %request.task_id,
            step = %request.step,
            program = %self.config.program,
            "Generator: spawning step process"
        );

        let mut child = cmd.spawn().map_err(|e| {
            PenmanError::Upstream(format!(
                "failed to run generator '{}': {e}",
                self.config.program
            ))
        })?;

        let mut input = serde_json::to_vec(request)?;
        input.push(b'\n');
        if let Some(mut stdin) = child.stdin.take() {
            // A generator that exits without reading stdin is not an error by itself.
            if let Err(e) = stdin.write_all(&input).await {
                tracing::debug!(error = %e, "Generator closed stdin early");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PenmanError::Upstream(format!("generator process failed: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(PenmanError::Upstream(format!(
                "generator step '{}' failed (exit {}): {}",
                request.step,
                output.status.code().unwrap_or(-1),
                truncate(stderr.trim(), 500)
            )));
        }

        let response: StepResponse = stdout
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str(line.trim()).ok())
            .ok_or_else(|| {
                PenmanError::InvalidOutput(format!(
                    "could not parse generator output for step '{}': {}",
                    request.step,
                    truncate(&stdout, 500)
                ))
            })?;

        tracing::debug!(
            task_id = %request.task_id,
            step = %request.step,
            status = ?response.status,
            quality_score = ?response.quality_score,
            "Generator: response received"
        );

        Ok(response)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
