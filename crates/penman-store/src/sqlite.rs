use crate::migrations;
use crate::store::{AgentStore, TaskQuery, TaskStore, TaskUpdate};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use penman_core::state::ensure_legal;
use penman_core::{
    Agent, AgentMetrics, AgentStatus, PenmanError, PenmanResult, QueueStatus, Strategy, Task,
    TaskId, TaskStatus,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const TASK_COLUMNS: &str = "id, agent_id, kind, payload, priority, status, created_at, \
     started_at, completed_at, attempt_count, last_error, result, quality_score, process_after";

const AGENT_COLUMNS: &str =
    "id, name, status, concurrency_limit, strategy, autonomy, metrics, created_at, last_run_at";

/// How long a writer waits on another process's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed store.
///
/// Status changes run inside `BEGIN IMMEDIATE` transactions and finish with
/// an `UPDATE ... WHERE id = ? AND status = ?`, so independent processes
/// sharing the database file never both win the same swap.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories
    /// and applying pending migrations.
    pub fn open(path: &Path) -> PenmanResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(store_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(store_err)?;
        migrations::migrate(&conn).map_err(store_err)?;
        info!(path = %path.display(), "Opened task database");
        Ok(Self::from_connection(conn))
    }

    /// A private in-memory database, mostly for tests.
    pub fn open_in_memory() -> PenmanResult<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        migrations::migrate(&conn).map_err(store_err)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run blocking database work off the async runtime.
    async fn with_conn<T, F>(&self, f: F) -> PenmanResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> PenmanResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut *guard)
        })
        .await
        .map_err(|e| PenmanError::Store(format!("database worker failed: {e}")))?
    }
}

fn store_err(e: rusqlite::Error) -> PenmanError {
    PenmanError::Store(e.to_string())
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Fixed-width RFC 3339, so stored timestamps compare correctly as text.
fn fmt_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> PenmanResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| PenmanError::Store(format!("bad timestamp '{raw}': {e}")))
}

fn parse_opt_ts(raw: Option<String>) -> PenmanResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

// --- Tasks ---

struct TaskRow {
    id: String,
    agent_id: String,
    kind: String,
    payload: String,
    priority: i32,
    status: String,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    attempt_count: u32,
    last_error: Option<String>,
    result: Option<String>,
    quality_score: Option<f64>,
    process_after: Option<String>,
}

fn read_task_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        kind: row.get(2)?,
        payload: row.get(3)?,
        priority: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
        attempt_count: row.get(9)?,
        last_error: row.get(10)?,
        result: row.get(11)?,
        quality_score: row.get(12)?,
        process_after: row.get(13)?,
    })
}

impl TaskRow {
    fn into_task(self) -> PenmanResult<Task> {
        Ok(Task {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| PenmanError::Store(format!("bad task id '{}': {e}", self.id)))?,
            agent_id: self.agent_id,
            kind: self.kind.parse()?,
            payload: serde_json::from_str(&self.payload)?,
            priority: self.priority,
            status: self.status.parse()?,
            created_at: parse_ts(&self.created_at)?,
            started_at: parse_opt_ts(self.started_at)?,
            completed_at: parse_opt_ts(self.completed_at)?,
            attempt_count: self.attempt_count,
            last_error: self.last_error,
            result: self.result.as_deref().map(serde_json::from_str).transpose()?,
            quality_score: self.quality_score,
            process_after: parse_opt_ts(self.process_after)?,
        })
    }
}

fn load_task(conn: &Connection, id: TaskId) -> PenmanResult<Option<Task>> {
    let row = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id.to_string()],
            read_task_row,
        )
        .optional()
        .map_err(store_err)?;
    row.map(TaskRow::into_task).transpose()
}

/// Write the mutable fields of `task`, conditioned on the stored status.
fn swap_task(conn: &Connection, task: &Task, expected: TaskStatus) -> PenmanResult<()> {
    let result = task.result.as_ref().map(serde_json::to_string).transpose()?;
    let changed = conn
        .execute(
            "UPDATE tasks SET status = ?2, started_at = ?3, completed_at = ?4, attempt_count = ?5,
                 last_error = ?6, result = ?7, quality_score = ?8, process_after = ?9
             WHERE id = ?1 AND status = ?10",
            params![
                task.id.to_string(),
                task.status.as_str(),
                task.started_at.map(fmt_ts),
                task.completed_at.map(fmt_ts),
                task.attempt_count,
                task.last_error,
                result,
                task.quality_score,
                task.process_after.map(fmt_ts),
                expected.as_str(),
            ],
        )
        .map_err(store_err)?;
    if changed == 1 {
        Ok(())
    } else {
        Err(PenmanError::Conflict(format!(
            "task {} is no longer {expected}",
            task.id
        )))
    }
}

fn conflict(task: &Task, expected: TaskStatus) -> PenmanError {
    PenmanError::Conflict(format!(
        "task {} is {}, expected {expected}",
        task.id, task.status
    ))
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn insert(&self, task: &Task) -> PenmanResult<()> {
        let task = task.clone();
        self.with_conn(move |conn| {
            let result = task.result.as_ref().map(serde_json::to_string).transpose()?;
            conn.execute(
                &format!(
                    "INSERT INTO tasks ({TASK_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    task.id.to_string(),
                    task.agent_id,
                    task.kind.as_str(),
                    serde_json::to_string(&task.payload)?,
                    task.priority,
                    task.status.as_str(),
                    fmt_ts(task.created_at),
                    task.started_at.map(fmt_ts),
                    task.completed_at.map(fmt_ts),
                    task.attempt_count,
                    task.last_error,
                    result,
                    task.quality_score,
                    task.process_after.map(fmt_ts),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    PenmanError::Conflict(format!("task {} already exists", task.id))
                } else {
                    store_err(e)
                }
            })?;
            Ok(())
        })
        .await
    }

    async fn get_by_id(&self, id: TaskId) -> PenmanResult<Option<Task>> {
        self.with_conn(move |conn| load_task(conn, id)).await
    }

    async fn query_by_agent(&self, agent_id: &str, query: TaskQuery) -> PenmanResult<Vec<Task>> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE agent_id = ?1");
            let mut args = vec![agent_id];
            if let Some(status) = query.status {
                args.push(status.as_str().to_string());
                sql.push_str(&format!(" AND status = ?{}", args.len()));
            }
            if let Some(now) = query.ready_at {
                args.push(fmt_ts(now));
                sql.push_str(&format!(
                    " AND (process_after IS NULL OR process_after <= ?{})",
                    args.len()
                ));
            }
            sql.push_str(" ORDER BY priority DESC, created_at ASC, seq ASC");
            if let Some(limit) = query.limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }

            let mut stmt = conn.prepare(&sql).map_err(store_err)?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), read_task_row)
                .map_err(store_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(store_err)?;
            rows.into_iter().map(TaskRow::into_task).collect()
        })
        .await
    }

    async fn update_status(
        &self,
        id: TaskId,
        expected: TaskStatus,
        new: TaskStatus,
        update: TaskUpdate,
    ) -> PenmanResult<Task> {
        ensure_legal(expected, new)?;
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(store_err)?;
            let mut task = load_task(&tx, id)?.ok_or_else(|| PenmanError::task_not_found(id))?;
            if task.status != expected {
                return Err(conflict(&task, expected));
            }
            update.apply(&mut task);
            task.status = new;
            swap_task(&tx, &task, expected)?;
            tx.commit().map_err(store_err)?;
            debug!(task_id = %id, from = %expected, to = %new, "Task status swapped");
            Ok(task)
        })
        .await
    }

    async fn claim(
        &self,
        id: TaskId,
        running_cap: usize,
        now: DateTime<Utc>,
    ) -> PenmanResult<Task> {
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(store_err)?;
            let mut task = load_task(&tx, id)?.ok_or_else(|| PenmanError::task_not_found(id))?;
            if task.status != TaskStatus::Queued {
                return Err(conflict(&task, TaskStatus::Queued));
            }
            if !task.is_ready(now) {
                return Err(PenmanError::Conflict(format!("task {id} is backing off")));
            }
            let running: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM tasks WHERE agent_id = ?1 AND status = 'running'",
                    params![task.agent_id],
                    |row| row.get(0),
                )
                .map_err(store_err)?;
            if usize::try_from(running).unwrap_or(usize::MAX) >= running_cap {
                return Err(PenmanError::Conflict(format!(
                    "agent {} is at its running cap of {running_cap}",
                    task.agent_id
                )));
            }
            task.status = TaskStatus::Running;
            task.started_at = Some(now);
            task.completed_at = None;
            task.process_after = None;
            task.attempt_count += 1;
            swap_task(&tx, &task, TaskStatus::Queued)?;
            tx.commit().map_err(store_err)?;
            Ok(task)
        })
        .await
    }

    async fn delete_if_cancellable(&self, id: TaskId) -> PenmanResult<Task> {
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(store_err)?;
            let task = load_task(&tx, id)?.ok_or_else(|| PenmanError::task_not_found(id))?;
            if !task.status.is_cancellable() {
                return Err(PenmanError::InvalidState(format!(
                    "cannot cancel a {} task",
                    task.status
                )));
            }
            tx.execute(
                "DELETE FROM tasks WHERE id = ?1 AND status IN ('queued', 'failed')",
                params![id.to_string()],
            )
            .map_err(store_err)?;
            tx.commit().map_err(store_err)?;
            Ok(task)
        })
        .await
    }

    async fn count_by_status(&self, agent_id: &str) -> PenmanResult<QueueStatus> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT status, COUNT(*) FROM tasks WHERE agent_id = ?1 GROUP BY status")
                .map_err(store_err)?;
            let rows = stmt
                .query_map(params![agent_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(store_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(store_err)?;

            let mut counts = QueueStatus::default();
            for (status, n) in rows {
                counts.add(status.parse()?, usize::try_from(n).unwrap_or(0));
            }
            Ok(counts)
        })
        .await
    }
}

// --- Agents ---

struct AgentRow {
    id: String,
    name: String,
    status: String,
    concurrency_limit: i64,
    strategy: String,
    autonomy: String,
    metrics: Option<String>,
    created_at: String,
    last_run_at: Option<String>,
}

fn read_agent_row(row: &Row<'_>) -> rusqlite::Result<AgentRow> {
    Ok(AgentRow {
        id: row.get(0)?,
        name: row.get(1)?,
        status: row.get(2)?,
        concurrency_limit: row.get(3)?,
        strategy: row.get(4)?,
        autonomy: row.get(5)?,
        metrics: row.get(6)?,
        created_at: row.get(7)?,
        last_run_at: row.get(8)?,
    })
}

impl AgentRow {
    fn into_agent(self) -> PenmanResult<Agent> {
        Ok(Agent {
            id: self.id,
            name: self.name,
            status: self.status.parse()?,
            concurrency_limit: usize::try_from(self.concurrency_limit).unwrap_or(0),
            strategy: serde_json::from_str(&self.strategy)?,
            autonomy: serde_json::from_str(&self.autonomy)?,
            metrics: self.metrics.as_deref().map(serde_json::from_str).transpose()?,
            created_at: parse_ts(&self.created_at)?,
            last_run_at: parse_opt_ts(self.last_run_at)?,
        })
    }
}

fn load_agent(conn: &Connection, id: &str) -> PenmanResult<Option<Agent>> {
    let row = conn
        .query_row(
            &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"),
            params![id],
            read_agent_row,
        )
        .optional()
        .map_err(store_err)?;
    row.map(AgentRow::into_agent).transpose()
}

/// Run a single-row agent update and reload the record.
fn update_agent(
    conn: &Connection,
    id: &str,
    sql: &str,
    value: Option<String>,
) -> PenmanResult<Agent> {
    let changed = conn.execute(sql, params![id, value]).map_err(store_err)?;
    if changed == 0 {
        return Err(PenmanError::agent_not_found(id));
    }
    load_agent(conn, id)?.ok_or_else(|| PenmanError::agent_not_found(id))
}

#[async_trait]
impl AgentStore for SqliteStore {
    async fn put_agent(&self, agent: &Agent) -> PenmanResult<()> {
        let agent = agent.clone();
        self.with_conn(move |conn| {
            let metrics = agent.metrics.as_ref().map(serde_json::to_string).transpose()?;
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO agents ({AGENT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    agent.id,
                    agent.name,
                    agent.status.as_str(),
                    i64::try_from(agent.concurrency_limit).unwrap_or(i64::MAX),
                    serde_json::to_string(&agent.strategy)?,
                    serde_json::to_string(&agent.autonomy)?,
                    metrics,
                    fmt_ts(agent.created_at),
                    agent.last_run_at.map(fmt_ts),
                ],
            )
            .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn get_agent(&self, id: &str) -> PenmanResult<Option<Agent>> {
        let id = id.to_string();
        self.with_conn(move |conn| load_agent(conn, &id)).await
    }

    async fn list_agents(&self) -> PenmanResult<Vec<Agent>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {AGENT_COLUMNS} FROM agents ORDER BY id"))
                .map_err(store_err)?;
            let rows = stmt
                .query_map([], read_agent_row)
                .map_err(store_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(store_err)?;
            rows.into_iter().map(AgentRow::into_agent).collect()
        })
        .await
    }

    async fn set_agent_status(&self, id: &str, status: AgentStatus) -> PenmanResult<Agent> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            update_agent(
                conn,
                &id,
                "UPDATE agents SET status = ?2 WHERE id = ?1",
                Some(status.as_str().to_string()),
            )
        })
        .await
    }

    async fn update_strategy(&self, id: &str, strategy: &Strategy) -> PenmanResult<Agent> {
        let id = id.to_string();
        let strategy = serde_json::to_string(strategy)?;
        self.with_conn(move |conn| {
            update_agent(
                conn,
                &id,
                "UPDATE agents SET strategy = ?2 WHERE id = ?1",
                Some(strategy),
            )
        })
        .await
    }

    async fn record_run(&self, id: &str, at: DateTime<Utc>) -> PenmanResult<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            update_agent(
                conn,
                &id,
                "UPDATE agents SET last_run_at = ?2 WHERE id = ?1",
                Some(fmt_ts(at)),
            )
            .map(|_| ())
        })
        .await
    }

    async fn cache_metrics(&self, id: &str, metrics: &AgentMetrics) -> PenmanResult<()> {
        let id = id.to_string();
        let metrics = serde_json::to_string(metrics)?;
        self.with_conn(move |conn| {
            update_agent(
                conn,
                &id,
                "UPDATE agents SET metrics = ?2 WHERE id = ?1",
                Some(metrics),
            )
            .map(|_| ())
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use penman_core::{ErrorKind, TaskKind};
    use serde_json::json;

    #[test]
    fn test_timestamps_sort_as_text() {
        let early = Utc::now();
        let late = early + chrono::Duration::milliseconds(1);
        assert!(fmt_ts(early) < fmt_ts(late));
        assert_eq!(parse_ts(&fmt_ts(early)).unwrap(), early);
    }

    #[test]
    fn test_open_creates_wal_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("penman.db");
        let _store = SqliteStore::open(&path).unwrap();
        assert!(path.exists());

        let conn = Connection::open(&path).unwrap();
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_task_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut task = Task::new("a", TaskKind::Research, json!({"keyword": "rust"}), 3);
        task.quality_score = Some(71.5);
        store.insert(&task).await.unwrap();

        let loaded = store.get_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(loaded, task);

        let err = store.insert(&task).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_claim_conflicts_when_not_queued() {
        let store = SqliteStore::open_in_memory().unwrap();
        let task = Task::new("a", TaskKind::Write, json!({}), 0);
        store.insert(&task).await.unwrap();

        let claimed = store.claim(task.id, 1, Utc::now()).await.unwrap();
        assert_eq!(claimed.attempt_count, 1);
        let err = store.claim(task.id, 1, Utc::now()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_unknown_agent_update() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.record_run("ghost", Utc::now()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
