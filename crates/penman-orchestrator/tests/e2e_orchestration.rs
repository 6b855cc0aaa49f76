//! End-to-end orchestration tests.
//!
//! Drives agents through the facade with scripted generators and checks
//! selection order, concurrency caps, retries, review gates, recovery and
//! cross-process safety over SQLite.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use penman_core::{
    Agent, AgentStatus, ErrorKind, PenmanError, PenmanResult, Strategy, Task, TaskId, TaskStatus,
};
use penman_orchestrator::*;
use penman_pipeline::{
    Generator, Pipelines, ScriptedGenerator, StepRequest, StepResponse, StepSpec,
};
use penman_store::{MemoryStore, SqliteStore, TaskQuery, TaskStore, TaskUpdate};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Retries immediately so a test can drive every attempt with `run_loop`.
fn no_backoff() -> OrchestratorConfig {
    OrchestratorConfig {
        backoff_base_ms: 0,
        backoff_max_ms: 0,
        ..OrchestratorConfig::default()
    }
}

fn one_step() -> Pipelines {
    Pipelines::uniform(vec![StepSpec::new("draft")]).unwrap()
}

async fn setup(
    generator: Arc<dyn Generator>,
    pipelines: Pipelines,
    config: OrchestratorConfig,
    agent: Agent,
) -> (Arc<MemoryStore>, Orchestrator) {
    let store = Arc::new(MemoryStore::new());
    let orch = Orchestrator::new(store.clone(), generator, pipelines, config);
    orch.register_agent(agent).await.unwrap();
    (store, orch)
}

fn agent(limit: usize) -> Agent {
    Agent::new("blog", "Blog writer").with_concurrency_limit(limit)
}

/// Task ids in the order the generator first saw them.
fn call_order(generator: &ScriptedGenerator) -> Vec<TaskId> {
    let mut seen = Vec::new();
    for call in generator.calls() {
        if !seen.contains(&call.task_id) {
            seen.push(call.task_id);
        }
    }
    seen
}

/// Records the largest number of running tasks seen from inside a step.
struct RunningCountGenerator {
    store: Arc<MemoryStore>,
    max_running: AtomicUsize,
    calls: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl Generator for RunningCountGenerator {
    async fn run_step(&self, request: &StepRequest) -> PenmanResult<StepResponse> {
        let running = self.store.count_by_status(&request.agent_id).await?.running;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(StepResponse::success(json!({"ok": true})))
    }
}

/// Task store whose claims can be made to fail like an unreachable database.
struct FlakyStore {
    inner: Arc<MemoryStore>,
    fail_claims: AtomicBool,
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn insert(&self, task: &Task) -> PenmanResult<()> {
        self.inner.insert(task).await
    }

    async fn get_by_id(&self, id: TaskId) -> PenmanResult<Option<Task>> {
        self.inner.get_by_id(id).await
    }

    async fn query_by_agent(&self, agent_id: &str, query: TaskQuery) -> PenmanResult<Vec<Task>> {
        self.inner.query_by_agent(agent_id, query).await
    }

    async fn update_status(
        &self,
        id: TaskId,
        expected: TaskStatus,
        new: TaskStatus,
        update: TaskUpdate,
    ) -> PenmanResult<Task> {
        self.inner.update_status(id, expected, new, update).await
    }

    async fn claim(
        &self,
        id: TaskId,
        running_cap: usize,
        now: DateTime<Utc>,
    ) -> PenmanResult<Task> {
        if self.fail_claims.load(Ordering::SeqCst) {
            return Err(PenmanError::Store("database is locked".into()));
        }
        self.inner.claim(id, running_cap, now).await
    }

    async fn delete_if_cancellable(&self, id: TaskId) -> PenmanResult<Task> {
        self.inner.delete_if_cancellable(id).await
    }
}

// ---------------------------------------------------------------------------
// Selection order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_claims_highest_priority_first() {
    let generator = Arc::new(ScriptedGenerator::new());
    let (_, orch) = setup(generator.clone(), one_step(), no_backoff(), agent(3)).await;

    let p5 = orch.enqueue("blog", json!({"n": 5}), 5).await.unwrap();
    let p1 = orch.enqueue("blog", json!({"n": 1}), 1).await.unwrap();
    let p9 = orch.enqueue("blog", json!({"n": 9}), 9).await.unwrap();

    assert_eq!(orch.run_loop("blog", 3).await.unwrap(), 3);
    assert_eq!(call_order(&generator), vec![p9, p5, p1]);
}

#[tokio::test]
async fn test_default_agent_sweep_runs_past_concurrency_limit() {
    let generator = Arc::new(ScriptedGenerator::new());
    let blog = Agent::new("blog", "Blog writer");
    assert_eq!(blog.concurrency_limit, 2);
    let (_, orch) = setup(generator.clone(), one_step(), no_backoff(), blog).await;

    let p5 = orch.enqueue("blog", json!({"n": 5}), 5).await.unwrap();
    let p1 = orch.enqueue("blog", json!({"n": 1}), 1).await.unwrap();
    let p9 = orch.enqueue("blog", json!({"n": 9}), 9).await.unwrap();

    assert_eq!(orch.run_loop("blog", 3).await.unwrap(), 3);
    assert_eq!(call_order(&generator), vec![p9, p5, p1]);
    assert_eq!(orch.status("blog").await.unwrap().queued, 0);
}

#[tokio::test]
async fn test_equal_priorities_are_fifo() {
    let generator = Arc::new(ScriptedGenerator::new());
    let (_, orch) = setup(generator.clone(), one_step(), no_backoff(), agent(1)).await;

    let mut ids = Vec::new();
    for n in 0..3 {
        ids.push(orch.enqueue("blog", json!({"n": n}), 2).await.unwrap());
    }
    for _ in 0..3 {
        assert_eq!(orch.run_loop("blog", 1).await.unwrap(), 1);
    }
    assert_eq!(call_order(&generator), ids);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_running_never_exceeds_concurrency_limit() {
    let store = Arc::new(MemoryStore::new());
    let counter = Arc::new(RunningCountGenerator {
        store: store.clone(),
        max_running: AtomicUsize::new(0),
        calls: AtomicUsize::new(0),
        delay: Duration::from_millis(20),
    });
    let orch = Arc::new(Orchestrator::new(
        store.clone(),
        counter.clone(),
        one_step(),
        no_backoff(),
    ));
    orch.register_agent(agent(2)).await.unwrap();
    for _ in 0..5 {
        orch.enqueue("blog", json!({}), 0).await.unwrap();
    }

    let mut processed = 0;
    for _ in 0..10 {
        let sweeps: Vec<_> = (0..3)
            .map(|_| {
                let orch = orch.clone();
                tokio::spawn(async move { orch.run_loop("blog", 5).await })
            })
            .collect();
        for sweep in sweeps {
            processed += sweep.await.unwrap().unwrap();
        }
        if processed == 5 {
            break;
        }
    }

    assert_eq!(processed, 5);
    assert_eq!(counter.calls.load(Ordering::SeqCst), 5);
    assert!(counter.max_running.load(Ordering::SeqCst) <= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sweeps_never_double_claim() {
    let generator = Arc::new(ScriptedGenerator::new());
    generator.delay("draft", Duration::from_millis(20));
    let store = Arc::new(MemoryStore::new());
    let orch = Arc::new(Orchestrator::new(
        store.clone(),
        generator.clone(),
        one_step(),
        no_backoff(),
    ));
    orch.register_agent(agent(20)).await.unwrap();
    for _ in 0..20 {
        orch.enqueue("blog", json!({}), 0).await.unwrap();
    }

    let a = tokio::spawn({
        let orch = orch.clone();
        async move { orch.run_loop("blog", 20).await }
    });
    let b = tokio::spawn({
        let orch = orch.clone();
        async move { orch.run_loop("blog", 20).await }
    });
    let total = a.await.unwrap().unwrap() + b.await.unwrap().unwrap();
    assert_eq!(total, 20);

    let mut per_task: HashMap<TaskId, usize> = HashMap::new();
    for call in generator.calls() {
        *per_task.entry(call.task_id).or_default() += 1;
    }
    assert_eq!(per_task.len(), 20);
    assert!(per_task.values().all(|&n| n == 1));

    for task in orch.list_tasks("blog", None).await.unwrap() {
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.attempt_count, 1);
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cancel_rules() {
    let generator = Arc::new(ScriptedGenerator::new());
    let config = OrchestratorConfig {
        max_retries: 1,
        ..no_backoff()
    };
    let (store, orch) = setup(generator.clone(), one_step(), config, agent(2)).await;

    // queued: removed and never scheduled
    let queued = orch.enqueue("blog", json!({}), 0).await.unwrap();
    orch.cancel(queued).await.unwrap();
    assert_eq!(orch.get_task(queued).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(orch.run_loop("blog", 2).await.unwrap(), 0);

    // running: refused
    let running = orch.enqueue("blog", json!({}), 0).await.unwrap();
    store.claim(running, 2, Utc::now()).await.unwrap();
    let err = orch.cancel(running).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(orch.get_task(running).await.unwrap().status, TaskStatus::Running);

    // failed: removed
    generator.push("draft", StepResponse::failure("503"));
    let failed = orch.enqueue("blog", json!({}), 0).await.unwrap();
    orch.run_loop("blog", 2).await.unwrap();
    assert_eq!(orch.get_task(failed).await.unwrap().status, TaskStatus::Failed);
    orch.cancel(failed).await.unwrap();

    // unknown
    let err = orch.cancel(uuid::Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ---------------------------------------------------------------------------
// Retries and failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fails_twice_then_completes() {
    let generator = Arc::new(ScriptedGenerator::new());
    generator
        .push("draft", StepResponse::failure("rate limited"))
        .push_error("draft", "connection reset");
    let (_, orch) = setup(generator, one_step(), no_backoff(), agent(1)).await;
    let id = orch.enqueue("blog", json!({"topic": "X"}), 0).await.unwrap();

    assert_eq!(orch.run_loop("blog", 1).await.unwrap(), 0);
    let task = orch.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert!(task.last_error.unwrap().contains("rate limited"));

    assert_eq!(orch.run_loop("blog", 1).await.unwrap(), 0);
    assert_eq!(orch.run_loop("blog", 1).await.unwrap(), 1);

    let task = orch.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert_eq!(task.attempt_count, 3);
    assert!(task.last_error.unwrap().contains("connection reset"));
}

#[tokio::test]
async fn test_permanent_failure_skips_retries() {
    let generator = Arc::new(ScriptedGenerator::new());
    generator.push("draft", StepResponse::permanent_failure("topic is banned"));
    let (_, orch) = setup(generator, one_step(), no_backoff(), agent(1)).await;
    let id = orch.enqueue("blog", json!({}), 0).await.unwrap();

    assert_eq!(orch.run_loop("blog", 1).await.unwrap(), 1);
    let task = orch.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempt_count, 1);
    assert!(task.completed_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout_requeues() {
    let generator = Arc::new(ScriptedGenerator::new());
    generator.delay("draft", Duration::from_secs(30));
    let pipelines = Pipelines::uniform(vec![StepSpec::new("draft").with_timeout_secs(1)]).unwrap();
    let (_, orch) = setup(generator, pipelines, OrchestratorConfig::default(), agent(1)).await;
    let id = orch.enqueue("blog", json!({}), 0).await.unwrap();

    assert_eq!(orch.run_loop("blog", 1).await.unwrap(), 0);
    let task = orch.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert!(task.last_error.unwrap().contains("Timeout"));
    // Default backoff keeps it out of the very next sweep.
    assert!(task.process_after.unwrap() > Utc::now());
}

#[tokio::test]
async fn test_schema_violation_is_retried() {
    let generator = Arc::new(ScriptedGenerator::new());
    generator
        .push("draft", StepResponse::success(json!({"words": 1200})))
        .push("draft", StepResponse::success(json!({"draft_id": "d-7"})));
    let pipelines =
        Pipelines::uniform(vec![StepSpec::new("draft").with_required_fields(["draft_id"])])
            .unwrap();
    let (_, orch) = setup(generator, pipelines, no_backoff(), agent(1)).await;
    let id = orch.enqueue("blog", json!({}), 0).await.unwrap();

    assert_eq!(orch.run_loop("blog", 1).await.unwrap(), 0);
    let task = orch.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert!(task.last_error.unwrap().contains("draft_id"));

    assert_eq!(orch.run_loop("blog", 1).await.unwrap(), 1);
    let task = orch.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert_eq!(task.result, Some(json!({"draft_id": "d-7"})));
    assert_eq!(task.attempt_count, 2);
}

#[tokio::test]
async fn test_store_failure_aborts_sweep() {
    let memory = Arc::new(MemoryStore::new());
    let flaky = Arc::new(FlakyStore {
        inner: memory.clone(),
        fail_claims: AtomicBool::new(true),
    });
    let orch = Orchestrator::with_stores(
        flaky.clone(),
        memory.clone(),
        Arc::new(ScriptedGenerator::new()),
        one_step(),
        no_backoff(),
    );
    orch.register_agent(agent(2)).await.unwrap();
    let id = orch.enqueue("blog", json!({}), 0).await.unwrap();

    let err = orch.run_loop("blog", 2).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
    assert_eq!(orch.get_task(id).await.unwrap().status, TaskStatus::Queued);

    flaky.fail_claims.store(false, Ordering::SeqCst);
    assert_eq!(orch.run_loop("blog", 2).await.unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Review
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_low_quality_goes_to_review_then_approve() {
    let generator = Arc::new(ScriptedGenerator::new());
    generator.push(
        "draft",
        StepResponse::success(json!({"draft_id": "d-1"})).with_quality(60.0),
    );
    let (_, orch) = setup(generator, one_step(), no_backoff(), agent(1)).await;
    let id = orch.enqueue("blog", json!({}), 0).await.unwrap();

    assert_eq!(orch.run_loop("blog", 1).await.unwrap(), 1);
    let task = orch.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Review);
    assert_eq!(task.quality_score, Some(60.0));
    assert_eq!(orch.status("blog").await.unwrap().review, 1);

    let approved = orch.approve(id).await.unwrap();
    assert_eq!(approved.status, TaskStatus::Complete);
    assert_eq!(approved.result, Some(json!({"draft_id": "d-1"})));

    // Already resolved.
    assert_eq!(orch.approve(id).await.unwrap_err().kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn test_publish_gate_then_reject() {
    let generator = Arc::new(ScriptedGenerator::new());
    let (_, orch) = setup(
        generator.clone(),
        Pipelines::builtin(),
        no_backoff(),
        agent(1),
    )
    .await;
    let id = orch
        .submit(
            penman_core::NewTask::new("blog", json!({"article_id": "a-1"}))
                .with_kind(penman_core::TaskKind::Publish),
        )
        .await
        .unwrap();

    assert_eq!(orch.run_loop("blog", 1).await.unwrap(), 1);
    assert_eq!(orch.get_task(id).await.unwrap().status, TaskStatus::Review);
    assert_eq!(generator.calls_for("publish"), 0);

    let rejected = orch.reject(id, "not ready for launch").await.unwrap();
    assert_eq!(rejected.status, TaskStatus::Failed);
    assert_eq!(rejected.last_error.as_deref(), Some("not ready for launch"));
}

// ---------------------------------------------------------------------------
// Metrics and strategy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_metrics_from_mixed_outcomes() {
    let generator = Arc::new(ScriptedGenerator::new());
    generator
        .push("draft", StepResponse::success(json!({})).with_quality(80.0))
        .push("draft", StepResponse::success(json!({})).with_quality(90.0))
        .push("draft", StepResponse::success(json!({})).with_quality(70.0))
        .push("draft", StepResponse::permanent_failure("plagiarism detected"));
    let lenient = agent(1).with_strategy(Strategy {
        quality_threshold: 50.0,
        ..Strategy::default()
    });
    let config = OrchestratorConfig {
        adjust_after: 0,
        ..no_backoff()
    };
    let (_, orch) = setup(generator, one_step(), config, lenient).await;
    for _ in 0..4 {
        orch.enqueue("blog", json!({}), 0).await.unwrap();
    }
    for _ in 0..4 {
        assert_eq!(orch.run_loop("blog", 1).await.unwrap(), 1);
    }

    let metrics = orch.metrics("blog").await.unwrap();
    assert!((metrics.success_rate - 0.75).abs() < 1e-9);
    assert!((metrics.avg_quality_score - 80.0).abs() < 1e-9);
    assert_eq!(metrics.completed_tasks, 3);
    assert_eq!(metrics.failed_tasks, 1);
    assert_eq!(metrics.total_tasks, 4);

    let cached = orch.get_agent("blog").await.unwrap().metrics.unwrap();
    assert_eq!(cached, metrics);
}

#[tokio::test]
async fn test_end_to_end_single_task() {
    let (_, orch) = setup(
        Arc::new(ScriptedGenerator::new()),
        Pipelines::builtin(),
        no_backoff(),
        agent(2),
    )
    .await;

    let id = orch.enqueue("blog", json!({"topic": "X"}), 5).await.unwrap();
    assert_eq!(orch.get_task(id).await.unwrap().status, TaskStatus::Queued);

    assert_eq!(orch.run_loop("blog", 1).await.unwrap(), 1);
    let task = orch.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert!(task.started_at.is_some() && task.completed_at.is_some());

    let metrics = orch.metrics("blog").await.unwrap();
    assert!((metrics.success_rate - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_adjust_strategy_on_poor_results() {
    let generator = Arc::new(
        ScriptedGenerator::new().with_fallback(StepResponse::permanent_failure("bad")),
    );
    let (_, orch) = setup(generator, one_step(), no_backoff(), agent(1)).await;
    orch.enqueue("blog", json!({}), 0).await.unwrap();
    orch.run_loop("blog", 1).await.unwrap();

    let next = orch.adjust_strategy("blog").await.unwrap();
    assert_eq!(next.articles_per_week, 2);
    // avg quality 0 < 75 so the threshold rises by 10 instead of 5.
    assert!((next.quality_threshold - 85.0).abs() < 1e-9);
    assert_eq!(orch.get_agent("blog").await.unwrap().strategy, next);
}

#[tokio::test]
async fn test_default_agent_busy_sweep_auto_adjusts() {
    let generator = Arc::new(ScriptedGenerator::new().with_fallback(
        StepResponse::success(json!({"ok": true})).with_quality(95.0),
    ));
    let blog = Agent::new("blog", "Blog writer");
    assert_eq!(blog.strategy.articles_per_week, 3);
    let (_, orch) = setup(generator, one_step(), no_backoff(), blog).await;
    for _ in 0..10 {
        orch.enqueue("blog", json!({}), 0).await.unwrap();
    }

    assert_eq!(orch.run_loop("blog", 5).await.unwrap(), 5);
    let agent = orch.get_agent("blog").await.unwrap();
    assert_eq!(agent.strategy.articles_per_week, 4);
    assert_eq!(orch.status("blog").await.unwrap().queued, 5);
}

// ---------------------------------------------------------------------------
// Agents, recovery, triggers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_paused_agent_is_skipped() {
    let (_, orch) = setup(
        Arc::new(ScriptedGenerator::new()),
        one_step(),
        no_backoff(),
        agent(2),
    )
    .await;
    orch.enqueue("blog", json!({}), 0).await.unwrap();

    orch.set_agent_status("blog", AgentStatus::Paused).await.unwrap();
    assert_eq!(orch.run_loop("blog", 2).await.unwrap(), 0);
    assert_eq!(orch.status("blog").await.unwrap().queued, 1);
    let paused = orch.get_agent("blog").await.unwrap();
    assert!(paused.last_run_at.is_none());
    assert!(paused.metrics.is_none());

    orch.set_agent_status("blog", AgentStatus::Active).await.unwrap();
    assert_eq!(orch.run_loop("blog", 2).await.unwrap(), 1);
}

#[tokio::test]
async fn test_stale_running_task_is_recovered() {
    let (store, orch) = setup(
        Arc::new(ScriptedGenerator::new()),
        one_step(),
        no_backoff(),
        agent(2),
    )
    .await;
    let id = orch.enqueue("blog", json!({}), 0).await.unwrap();
    store
        .claim(id, 2, Utc::now() - chrono::Duration::hours(3))
        .await
        .unwrap();

    assert_eq!(orch.recover_stale("blog").await.unwrap(), 1);
    let task = orch.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert!(task.last_error.unwrap().starts_with("stale:"));

    // The recovered task runs normally on the next sweep.
    assert_eq!(orch.run_loop("blog", 2).await.unwrap(), 1);
    assert_eq!(orch.get_task(id).await.unwrap().attempt_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_trigger_fires_sweeps() {
    let store = Arc::new(MemoryStore::new());
    let orch = Arc::new(Orchestrator::new(
        store,
        Arc::new(ScriptedGenerator::new()),
        one_step(),
        no_backoff(),
    ));
    orch.register_agent(agent(1)).await.unwrap();
    let id = orch.enqueue("blog", json!({}), 0).await.unwrap();

    let handle = SweepScheduler::new(vec![SweepTrigger::new("blog", "* * * * * * *")])
        .start(orch.clone());

    let mut status = TaskStatus::Queued;
    for _ in 0..50 {
        status = orch.get_task(id).await.unwrap().status;
        if status == TaskStatus::Complete {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    handle.abort();
    assert_eq!(status, TaskStatus::Complete);
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sqlite_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(&tmp.path().join("penman.db")).unwrap());
    let orch = Orchestrator::new(
        store,
        Arc::new(ScriptedGenerator::new()),
        Pipelines::builtin(),
        no_backoff(),
    );
    orch.register_agent(agent(2)).await.unwrap();

    let low = orch.enqueue("blog", json!({"topic": "low"}), 1).await.unwrap();
    let high = orch.enqueue("blog", json!({"topic": "high"}), 9).await.unwrap();

    assert_eq!(orch.run_loop("blog", 1).await.unwrap(), 1);
    assert_eq!(orch.get_task(high).await.unwrap().status, TaskStatus::Complete);
    assert_eq!(orch.get_task(low).await.unwrap().status, TaskStatus::Queued);

    let status = orch.status("blog").await.unwrap();
    assert_eq!((status.queued, status.complete), (1, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_shared_by_two_orchestrators() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("penman.db");

    let generator = Arc::new(ScriptedGenerator::new());
    generator.delay("draft", Duration::from_millis(10));
    let first = Arc::new(Orchestrator::new(
        Arc::new(SqliteStore::open(&path).unwrap()),
        generator.clone(),
        one_step(),
        no_backoff(),
    ));
    let second = Arc::new(Orchestrator::new(
        Arc::new(SqliteStore::open(&path).unwrap()),
        generator.clone(),
        one_step(),
        no_backoff(),
    ));
    first.register_agent(agent(3)).await.unwrap();
    for _ in 0..9 {
        first.enqueue("blog", json!({}), 0).await.unwrap();
    }

    let mut processed = 0;
    for _ in 0..10 {
        let a = tokio::spawn({
            let orch = first.clone();
            async move { orch.run_loop("blog", 3).await }
        });
        let b = tokio::spawn({
            let orch = second.clone();
            async move { orch.run_loop("blog", 3).await }
        });
        processed += a.await.unwrap().unwrap() + b.await.unwrap().unwrap();
        if processed == 9 {
            break;
        }
    }

    assert_eq!(processed, 9);
    let mut per_task: HashMap<TaskId, usize> = HashMap::new();
    for call in generator.calls() {
        *per_task.entry(call.task_id).or_default() += 1;
    }
    assert_eq!(per_task.len(), 9);
    assert!(per_task.values().all(|&n| n == 1));
}
