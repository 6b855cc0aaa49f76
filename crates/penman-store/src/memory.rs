use crate::store::{selection_order, AgentStore, TaskQuery, TaskStore, TaskUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use penman_core::state::ensure_legal;
use penman_core::{
    Agent, AgentId, AgentMetrics, AgentStatus, PenmanError, PenmanResult, Strategy, Task, TaskId,
    TaskStatus,
};
use std::collections::HashMap;
use tracing::debug;

struct Entry {
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, Entry>,
    agents: HashMap<AgentId, Agent>,
    next_seq: u64,
}

impl Inner {
    fn running_for(&self, agent_id: &str) -> usize {
        self.tasks
            .values()
            .filter(|e| e.task.agent_id == agent_id && e.task.status == TaskStatus::Running)
            .count()
    }

    fn agent_mut(&mut self, id: &str) -> PenmanResult<&mut Agent> {
        self.agents
            .get_mut(id)
            .ok_or_else(|| PenmanError::agent_not_found(id))
    }
}

/// Process-local store. Every operation takes one mutex, so each
/// compare-and-swap is trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert(&self, task: &Task) -> PenmanResult<()> {
        let mut inner = self.inner.lock();
        if inner.tasks.contains_key(&task.id) {
            return Err(PenmanError::Conflict(format!("task {} already exists", task.id)));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.tasks.insert(
            task.id,
            Entry {
                seq,
                task: task.clone(),
            },
        );
        Ok(())
    }

    async fn get_by_id(&self, id: TaskId) -> PenmanResult<Option<Task>> {
        Ok(self.inner.lock().tasks.get(&id).map(|e| e.task.clone()))
    }

    async fn query_by_agent(&self, agent_id: &str, query: TaskQuery) -> PenmanResult<Vec<Task>> {
        let inner = self.inner.lock();
        let mut rows: Vec<(u64, &Task)> = inner
            .tasks
            .values()
            .filter(|e| e.task.agent_id == agent_id && query.matches(&e.task))
            .map(|e| (e.seq, &e.task))
            .collect();
        rows.sort_by(selection_order);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(rows.into_iter().take(limit).map(|(_, t)| t.clone()).collect())
    }

    async fn update_status(
        &self,
        id: TaskId,
        expected: TaskStatus,
        new: TaskStatus,
        update: TaskUpdate,
    ) -> PenmanResult<Task> {
        ensure_legal(expected, new)?;
        let mut inner = self.inner.lock();
        let entry = inner
            .tasks
            .get_mut(&id)
            .ok_or_else(|| PenmanError::task_not_found(id))?;
        if entry.task.status != expected {
            return Err(PenmanError::Conflict(format!(
                "task {id} is {}, expected {expected}",
                entry.task.status
            )));
        }
        update.apply(&mut entry.task);
        entry.task.status = new;
        debug!(task_id = %id, from = %expected, to = %new, "Task status swapped");
        Ok(entry.task.clone())
    }

    async fn claim(
        &self,
        id: TaskId,
        running_cap: usize,
        now: DateTime<Utc>,
    ) -> PenmanResult<Task> {
        let mut inner = self.inner.lock();
        let agent_id = match inner.tasks.get(&id) {
            Some(e) if e.task.status != TaskStatus::Queued => {
                return Err(PenmanError::Conflict(format!(
                    "task {id} is {}, expected queued",
                    e.task.status
                )))
            }
            Some(e) if !e.task.is_ready(now) => {
                return Err(PenmanError::Conflict(format!("task {id} is backing off")))
            }
            Some(e) => e.task.agent_id.clone(),
            None => return Err(PenmanError::task_not_found(id)),
        };
        if inner.running_for(&agent_id) >= running_cap {
            return Err(PenmanError::Conflict(format!(
                "agent {agent_id} is at its running cap of {running_cap}"
            )));
        }
        let entry = inner
            .tasks
            .get_mut(&id)
            .ok_or_else(|| PenmanError::task_not_found(id))?;
        let task = &mut entry.task;
        task.status = TaskStatus::Running;
        task.started_at = Some(now);
        task.completed_at = None;
        task.process_after = None;
        task.attempt_count += 1;
        Ok(task.clone())
    }

    async fn delete_if_cancellable(&self, id: TaskId) -> PenmanResult<Task> {
        let mut inner = self.inner.lock();
        let status = inner
            .tasks
            .get(&id)
            .map(|e| e.task.status)
            .ok_or_else(|| PenmanError::task_not_found(id))?;
        if !status.is_cancellable() {
            return Err(PenmanError::InvalidState(format!(
                "cannot cancel a {status} task"
            )));
        }
        inner
            .tasks
            .remove(&id)
            .map(|e| e.task)
            .ok_or_else(|| PenmanError::task_not_found(id))
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn put_agent(&self, agent: &Agent) -> PenmanResult<()> {
        self.inner
            .lock()
            .agents
            .insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> PenmanResult<Option<Agent>> {
        Ok(self.inner.lock().agents.get(id).cloned())
    }

    async fn list_agents(&self) -> PenmanResult<Vec<Agent>> {
        let mut agents: Vec<Agent> = self.inner.lock().agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    async fn set_agent_status(&self, id: &str, status: AgentStatus) -> PenmanResult<Agent> {
        let mut inner = self.inner.lock();
        let agent = inner.agent_mut(id)?;
        agent.status = status;
        Ok(agent.clone())
    }

    async fn update_strategy(&self, id: &str, strategy: &Strategy) -> PenmanResult<Agent> {
        let mut inner = self.inner.lock();
        let agent = inner.agent_mut(id)?;
        agent.strategy = strategy.clone();
        Ok(agent.clone())
    }

    async fn record_run(&self, id: &str, at: DateTime<Utc>) -> PenmanResult<()> {
        self.inner.lock().agent_mut(id)?.last_run_at = Some(at);
        Ok(())
    }

    async fn cache_metrics(&self, id: &str, metrics: &AgentMetrics) -> PenmanResult<()> {
        self.inner.lock().agent_mut(id)?.metrics = Some(metrics.clone());
        Ok(())
    }
}
