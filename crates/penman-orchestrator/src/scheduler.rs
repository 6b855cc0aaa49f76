use crate::executor::{Executor, Outcome};
use chrono::Utc;
use penman_core::{ErrorKind, PenmanError, PenmanResult};
use penman_store::{AgentStore, TaskQuery, TaskStore};
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

/// What one sweep did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    /// The agent is paused or stopped; nothing was touched.
    Skipped,
    /// The sweep ran.
    Ran {
        /// Tasks that reached `complete`, `failed` or `review`.
        processed: usize,
    },
}

impl Sweep {
    /// Settled task count, zero for a skipped sweep.
    pub fn processed(self) -> usize {
        match self {
            Sweep::Skipped => 0,
            Sweep::Ran { processed } => processed,
        }
    }
}

/// One bounded sweep over an agent's queue.
///
/// All coordination with other sweeps, in this process or another one
/// sharing the store, goes through the store's atomic `claim`.
pub struct Scheduler {
    tasks: Arc<dyn TaskStore>,
    agents: Arc<dyn AgentStore>,
    executor: Arc<Executor>,
}

impl Scheduler {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        agents: Arc<dyn AgentStore>,
        executor: Arc<Executor>,
    ) -> Self {
        Self {
            tasks,
            agents,
            executor,
        }
    }

    /// Select up to `max_tasks - running` ready tasks and run them with at
    /// most `concurrency_limit` in flight. The next candidate is claimed, in
    /// selection order, whenever a slot frees up.
    ///
    /// A store failure stops further claims. It is returned once the tasks
    /// already in flight have settled.
    pub async fn run_loop(&self, agent_id: &str, max_tasks: usize) -> PenmanResult<Sweep> {
        let agent = self
            .agents
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| PenmanError::agent_not_found(agent_id))?;
        if !agent.is_active() {
            debug!(agent_id = %agent_id, status = %agent.status, "Agent not active, skipping sweep");
            return Ok(Sweep::Skipped);
        }

        let running = self.tasks.count_by_status(agent_id).await?.running;
        let slots = max_tasks.saturating_sub(running);
        let width = agent.concurrency_limit.saturating_sub(running);
        if slots == 0 || width == 0 {
            debug!(agent_id = %agent_id, running, slots, width, "No free slots");
            return Ok(Sweep::Ran { processed: 0 });
        }

        let candidates = self
            .tasks
            .query_by_agent(agent_id, TaskQuery::claimable(Utc::now()).limit(slots))
            .await?;

        let agent = Arc::new(agent);
        let mut in_flight = JoinSet::new();
        let mut store_error: Option<PenmanError> = None;
        let mut dispatched = 0;
        let mut processed = 0;

        for candidate in candidates {
            while in_flight.len() >= width {
                match in_flight.join_next().await {
                    Some(joined) => settle(agent_id, joined, &mut processed, &mut store_error),
                    None => break,
                }
            }
            if store_error.is_some() {
                break;
            }

            match self
                .tasks
                .claim(candidate.id, agent.concurrency_limit, Utc::now())
                .await
            {
                Ok(task) => {
                    debug!(
                        task_id = %task.id,
                        priority = task.priority,
                        attempt = task.attempt_count,
                        "Claimed task"
                    );
                    let executor = self.executor.clone();
                    let agent = agent.clone();
                    in_flight.spawn(async move { executor.execute(&agent, task).await });
                    dispatched += 1;
                }
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    debug!(task_id = %candidate.id, error = %e, "Claim lost, skipping");
                }
                Err(e) => {
                    error!(agent_id = %agent_id, error = %e, "Claim failed, aborting sweep");
                    store_error = Some(e);
                    break;
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            settle(agent_id, joined, &mut processed, &mut store_error);
        }

        if let Some(e) = store_error {
            return Err(e);
        }

        info!(agent_id = %agent_id, dispatched, processed, "Sweep finished");
        Ok(Sweep::Ran { processed })
    }
}

fn settle(
    agent_id: &str,
    joined: Result<PenmanResult<Outcome>, JoinError>,
    processed: &mut usize,
    store_error: &mut Option<PenmanError>,
) {
    match joined {
        Ok(Ok(outcome)) if outcome.is_settled() => *processed += 1,
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            error!(agent_id = %agent_id, error = %e, "Task execution hit a store error");
            store_error.get_or_insert(e);
        }
        Err(e) => {
            error!(agent_id = %agent_id, error = %e, "Task execution panicked");
        }
    }
}
