//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` — safe to
//! re-run on every server startup. Produces a convergent result.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// Idempotent; safe to call on every startup.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS project (
    id                TEXT PRIMARY KEY NOT NULL,
    name              TEXT NOT NULL,
    path              TEXT NOT NULL,
    approvals_enabled INTEGER,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS session (
    id            TEXT PRIMARY KEY NOT NULL,
    project_id    TEXT NOT NULL,
    name          TEXT NOT NULL,
    last_message  TEXT NOT NULL DEFAULT '',
    message_count INTEGER NOT NULL DEFAULT 0,
    is_active     INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS message (
    id         TEXT PRIMARY KEY NOT NULL,
    session_id TEXT NOT NULL,
    role       TEXT NOT NULL CHECK(role IN ('user','assistant')),
    content    TEXT NOT NULL,
    thinking   TEXT NOT NULL DEFAULT '',
    tool_uses  TEXT NOT NULL DEFAULT '[]',
    usage      TEXT,
    cost_usd   REAL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS credential (
    id           TEXT PRIMARY KEY NOT NULL,
    name         TEXT NOT NULL,
    service      TEXT,
    env_var      TEXT NOT NULL UNIQUE,
    secret_value TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS project_env_var (
    id           TEXT PRIMARY KEY NOT NULL,
    project_id   TEXT NOT NULL,
    env_var      TEXT NOT NULL,
    secret_value TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    UNIQUE(project_id, env_var)
);

CREATE TABLE IF NOT EXISTS project_excluded_credential (
    id         TEXT PRIMARY KEY NOT NULL,
    project_id TEXT NOT NULL,
    env_var    TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(project_id, env_var)
);

CREATE TABLE IF NOT EXISTS setting (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_message_session ON message(session_id, created_at);
CREATE INDEX IF NOT EXISTS idx_session_project ON session(project_id, updated_at);
";

    for statement in ddl.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
