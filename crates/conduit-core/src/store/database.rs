//! SQLite connection wrapper and schema migration.
//!
//! Grounded in the teacher's `storage::Database` (referenced throughout
//! `storage::sessions::SessionManager` but not itself present in the
//! retrieved pack) — the connection-wrapper shape and on-open migration
//! approach are inferred from call-site usage in `sessions.rs`.

use rusqlite::Connection;

use crate::error::{EngineError, Result};

pub struct Database {
    conn: Connection,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    run_id                  TEXT PRIMARY KEY,
    goal                    TEXT NOT NULL,
    agent_profile_id        TEXT NOT NULL,
    status                  TEXT NOT NULL,
    context                 TEXT NOT NULL DEFAULT '{}',
    steps                   TEXT NOT NULL DEFAULT '[]',
    tool_calls              TEXT NOT NULL DEFAULT '[]',
    stream_tokens           INTEGER NOT NULL DEFAULT 0,
    pending_tool_call       TEXT,
    checkpoint_step_index   INTEGER,
    answer                  TEXT,
    error                   TEXT,
    request_id              TEXT,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL,
    completed_at            TEXT
);

CREATE TABLE IF NOT EXISTS run_events (
    event_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id      TEXT NOT NULL,
    event_type  TEXT NOT NULL,
    payload     TEXT NOT NULL,
    FOREIGN KEY (run_id) REFERENCES runs(run_id)
);

CREATE INDEX IF NOT EXISTS idx_run_events_run_id ON run_events(run_id, event_id);
CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
CREATE INDEX IF NOT EXISTS idx_runs_created_at ON runs(created_at);
"#;

impl Database {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(EngineError::Store)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(EngineError::Store)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(EngineError::Store)?;
        conn.execute_batch(SCHEMA).map_err(EngineError::Store)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(EngineError::Store)?;
        conn.execute_batch(SCHEMA).map_err(EngineError::Store)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}
