//! Session repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::Result;

use super::db::Database;

/// Session record as stored and served to the frontend.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, sqlx::FromRow)]
#[serde(rename_all = "snake_case")]
pub struct SessionRecord {
    /// Session identifier; doubles as the CLI session id.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Display name; starts as a placeholder until title generation runs.
    pub name: String,
    /// Preview of the most recent assistant message.
    pub last_message: String,
    /// Number of completed exchanges.
    pub message_count: i64,
    /// Soft-delete flag.
    pub is_active: bool,
    /// Creation timestamp (RFC 3339).
    pub created_at: String,
    /// Last update timestamp (RFC 3339).
    pub updated_at: String,
}

/// Repository wrapper around `SQLite` for session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new session record.
    ///
    /// When `session_id` is `None` a fresh UUID is generated.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(
        &self,
        project_id: &str,
        name: &str,
        session_id: Option<String>,
    ) -> Result<SessionRecord> {
        let id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO session (id, project_id, name, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(project_id)
        .bind(name)
        .bind(&now)
        .bind(&now)
        .execute(self.db.as_ref())
        .await?;

        Ok(SessionRecord {
            id,
            project_id: project_id.to_owned(),
            name: name.to_owned(),
            last_message: String::new(),
            message_count: 0,
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Fetch an active session by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let record = sqlx::query_as::<_, SessionRecord>(
            "SELECT * FROM session WHERE id = ? AND is_active = 1",
        )
        .bind(session_id)
        .fetch_optional(self.db.as_ref())
        .await?;
        Ok(record)
    }

    /// Whether an active session exists — the continuation signal for chat.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn exists(&self, session_id: &str) -> Result<bool> {
        Ok(self.get(session_id).await?.is_some())
    }

    /// Bump message count and store the latest assistant preview.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn update_after_message(&self, session_id: &str, preview: &str) -> Result<()> {
        sqlx::query(
            "UPDATE session
             SET last_message = ?, message_count = message_count + 1, updated_at = ?
             WHERE id = ?",
        )
        .bind(preview)
        .bind(Utc::now().to_rfc3339())
        .bind(session_id)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Rename a session (used by the title side task).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn rename(&self, session_id: &str, name: &str) -> Result<()> {
        sqlx::query("UPDATE session SET name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(Utc::now().to_rfc3339())
            .bind(session_id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }
}
