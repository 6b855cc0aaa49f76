use crate::engine::Orchestrator;
use chrono::{DateTime, Utc};
use cron::Schedule;
use penman_core::{PenmanError, PenmanResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// A cron schedule that fires sweeps for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepTrigger {
    pub agent_id: String,
    pub cron_expression: String,
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_max_tasks() -> usize {
    5
}

fn default_enabled() -> bool {
    true
}

impl SweepTrigger {
    pub fn new(agent_id: impl Into<String>, cron_expression: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            cron_expression: cron_expression.into(),
            max_tasks: default_max_tasks(),
            enabled: true,
        }
    }

    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }
}

/// Fires [`SweepTrigger`]s on their cron schedules.
#[derive(Debug)]
pub struct SweepScheduler {
    triggers: Vec<SweepTrigger>,
}

impl SweepScheduler {
    pub fn new(triggers: Vec<SweepTrigger>) -> Self {
        Self { triggers }
    }

    /// Parse a cron expression.
    ///
    /// Uses the 7-field format: sec min hour day-of-month month day-of-week year.
    pub fn parse_cron(cron_expr: &str) -> PenmanResult<Schedule> {
        Schedule::from_str(cron_expr).map_err(|e| {
            PenmanError::Config(format!("Invalid cron expression '{cron_expr}': {e}"))
        })
    }

    /// First fire time strictly after `after`.
    pub fn next_fire_after(cron_expr: &str, after: DateTime<Utc>) -> PenmanResult<DateTime<Utc>> {
        let schedule = Self::parse_cron(cron_expr)?;
        schedule.after(&after).next().ok_or_else(|| {
            PenmanError::Config(format!(
                "Cron expression '{cron_expr}' has no upcoming fire times"
            ))
        })
    }

    pub fn next_fire_time(cron_expr: &str) -> PenmanResult<DateTime<Utc>> {
        Self::next_fire_after(cron_expr, Utc::now())
    }

    pub fn enabled_triggers(&self) -> Vec<&SweepTrigger> {
        self.triggers.iter().filter(|t| t.enabled).collect()
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    /// Reject any enabled trigger whose expression does not parse.
    pub fn validate(&self) -> PenmanResult<()> {
        for trigger in self.enabled_triggers() {
            Self::parse_cron(&trigger.cron_expression)?;
        }
        Ok(())
    }

    /// Start the trigger loop.
    ///
    /// The spawned task sleeps until the nearest fire time, then runs one
    /// sweep for every trigger due within a 1-second tolerance window. Sweep
    /// errors are logged and never stop the loop.
    pub fn start(self, orchestrator: Arc<Orchestrator>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            // Fire times up to here have been handled.
            let mut handled_until = Utc::now();
            loop {
                let enabled = self.enabled_triggers();
                if enabled.is_empty() {
                    tracing::info!("Triggers: none enabled, sleeping 60s");
                    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                    continue;
                }

                let cursor = handled_until.max(Utc::now());
                let mut due: Vec<(&SweepTrigger, DateTime<Utc>)> = Vec::new();
                for trigger in enabled {
                    match Self::next_fire_after(&trigger.cron_expression, cursor) {
                        Ok(next) => due.push((trigger, next)),
                        Err(e) => tracing::warn!(
                            agent_id = %trigger.agent_id,
                            error = %e,
                            "Triggers: skipping trigger with bad cron expression"
                        ),
                    }
                }

                let Some(nearest) = due.iter().map(|(_, at)| *at).min() else {
                    tracing::warn!("Triggers: no valid cron expressions, sleeping 60s");
                    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                    continue;
                };

                let now = Utc::now();
                if nearest > now {
                    let wait = (nearest - now).to_std().unwrap_or_default();
                    tracing::debug!(wait_ms = wait.as_millis() as u64, "Triggers: sleeping until next fire");
                    tokio::time::sleep(wait).await;
                }

                let fire_threshold = nearest + chrono::Duration::seconds(1);
                for (trigger, fire_time) in due.iter().filter(|(_, at)| *at <= fire_threshold) {
                    tracing::info!(
                        agent_id = %trigger.agent_id,
                        fire_time = %fire_time,
                        "Triggers: firing sweep"
                    );
                    match orchestrator
                        .run_loop(&trigger.agent_id, trigger.max_tasks)
                        .await
                    {
                        Ok(processed) => tracing::info!(
                            agent_id = %trigger.agent_id,
                            processed,
                            "Triggers: sweep done"
                        ),
                        Err(e) => tracing::error!(
                            agent_id = %trigger.agent_id,
                            error = %e,
                            "Triggers: sweep failed"
                        ),
                    }
                }
                handled_until = fire_threshold;
            }
        })
    }
}
