use rusqlite::Connection;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// Run all pending migrations on the database.
///
/// Uses `PRAGMA user_version` to track which migrations have been applied.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        migrate_v0_to_v1(conn)?;
    }

    if version < 2 {
        migrate_v1_to_v2(conn)?;
    }

    Ok(())
}

fn migrate_v0_to_v1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE agents (
            id                  TEXT PRIMARY KEY,
            name                TEXT NOT NULL,
            status              TEXT NOT NULL,
            concurrency_limit   INTEGER NOT NULL,
            strategy            TEXT NOT NULL,
            autonomy            TEXT NOT NULL,
            metrics             TEXT,
            created_at          TEXT NOT NULL,
            last_run_at         TEXT
        );

        CREATE TABLE tasks (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            id              TEXT NOT NULL UNIQUE,
            agent_id        TEXT NOT NULL,
            kind            TEXT NOT NULL,
            payload         TEXT NOT NULL,
            priority        INTEGER NOT NULL,
            status          TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            started_at      TEXT,
            completed_at    TEXT,
            attempt_count   INTEGER NOT NULL DEFAULT 0,
            last_error      TEXT,
            result          TEXT,
            quality_score   REAL
        );

        CREATE INDEX idx_tasks_agent_status ON tasks(agent_id, status);

        PRAGMA user_version = 1;
        ",
    )?;
    Ok(())
}

fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        ALTER TABLE tasks ADD COLUMN process_after TEXT;

        CREATE INDEX idx_tasks_selection
            ON tasks(agent_id, status, priority DESC, created_at, seq);

        PRAGMA user_version = 2;
        ",
    )?;
    Ok(())
}
