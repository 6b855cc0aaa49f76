//! Task and agent persistence for the Penman orchestrator.
//!
//! The [`TaskStore`] compare-and-swap operations are the only serialization
//! point the scheduler relies on. Two implementations ship here:
//!
//! - [`MemoryStore`] — a single-process store guarded by one mutex.
//! - [`SqliteStore`] — a durable store whose writes run in `IMMEDIATE`
//!   transactions, so several processes can share one database file.

/// In-memory store.
pub mod memory;
/// SQLite schema migrations.
pub mod migrations;
/// SQLite-backed store.
pub mod sqlite;
/// Store contracts and query/update types.
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{AgentStore, TaskQuery, TaskStore, TaskUpdate};
