//! Scheduling, execution and health tracking for content agents.
//!
//! A sweep ([`Orchestrator::run_loop`]) claims an agent's highest-priority
//! ready tasks through the store's atomic claim, runs each through the
//! pipeline for its kind, and settles it as complete, failed, requeued with
//! backoff, or parked for human review.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Facade over scheduling, review, reporting and maintenance.
//! - [`Scheduler`] — One bounded, concurrency-safe sweep over an agent's queue.
//! - [`Executor`] — Drives a claimed task through its pipeline.
//! - [`RetryPolicy`] — Attempt limit and exponential backoff.
//! - [`SweepScheduler`] — Cron triggers that fire sweeps.

/// Content calendar to task conversion.
pub mod calendar;
/// Orchestrator configuration.
pub mod config;
/// The orchestrator facade.
pub mod engine;
/// Pipeline execution for a claimed task.
pub mod executor;
/// Metrics and queue status reporting.
pub mod metrics;
/// Retry and backoff policy.
pub mod retry;
/// Bounded sweeps over an agent's queue.
pub mod scheduler;
/// Strategy auto-adjustment.
pub mod strategy;
/// Cron-driven sweep triggers.
pub mod trigger;
/// Stale running-task recovery.
pub mod watchdog;

pub use calendar::calendar_tasks;
pub use config::OrchestratorConfig;
pub use engine::Orchestrator;
pub use executor::{Executor, Outcome};
pub use metrics::{aggregate, MetricsAggregator, QueueStatusReporter};
pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, Sweep};
pub use trigger::{SweepScheduler, SweepTrigger};
pub use watchdog::Watchdog;
