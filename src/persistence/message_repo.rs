//! Message repository for `SQLite` persistence.
//!
//! Stores the accumulated assistant message a task runner persists on every
//! terminal path, plus the user messages the chat layer records before
//! starting a task.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::models::task::ToolInvocation;
use crate::{AppError, Result};

use super::db::Database;

/// A new message to persist.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Session the message belongs to.
    pub session_id: String,
    /// `user` or `assistant`.
    pub role: String,
    /// Response or prompt text.
    pub content: String,
    /// Accumulated reasoning text (assistant only).
    pub thinking: String,
    /// Accumulated tool invocations (assistant only).
    pub tool_uses: Vec<ToolInvocation>,
    /// Final token usage, passed through verbatim.
    pub usage: Option<serde_json::Value>,
    /// Final cost in USD.
    pub cost_usd: Option<f64>,
}

impl NewMessage {
    /// Convenience constructor for a user message.
    #[must_use]
    pub fn user(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            role: "user".into(),
            content: content.into(),
            thinking: String::new(),
            tool_uses: Vec::new(),
            usage: None,
            cost_usd: None,
        }
    }
}

/// Message record row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "snake_case")]
pub struct MessageRecord {
    /// Message identifier.
    pub id: String,
    /// Session the message belongs to.
    pub session_id: String,
    /// `user` or `assistant`.
    pub role: String,
    /// Response or prompt text.
    pub content: String,
    /// Reasoning text.
    pub thinking: String,
    /// Tool invocations as stored JSON.
    pub tool_uses: String,
    /// Token usage as stored JSON.
    pub usage: Option<String>,
    /// Cost in USD.
    pub cost_usd: Option<f64>,
    /// Creation timestamp (RFC 3339).
    pub created_at: String,
}

/// Repository wrapper around `SQLite` for message records.
#[derive(Clone)]
pub struct MessageRepo {
    db: Arc<Database>,
}

impl MessageRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist one message and return the stored record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if serialization or the insert fails.
    pub async fn save_message(&self, message: NewMessage) -> Result<MessageRecord> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let tool_uses = serde_json::to_string(&message.tool_uses)
            .map_err(|err| AppError::Db(format!("failed to serialize tool uses: {err}")))?;
        let usage = message
            .usage
            .as_ref()
            .map(|u| {
                serde_json::to_string(u)
                    .map_err(|err| AppError::Db(format!("failed to serialize usage: {err}")))
            })
            .transpose()?;

        sqlx::query(
            "INSERT INTO message
             (id, session_id, role, content, thinking, tool_uses, usage, cost_usd, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&message.session_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(&message.thinking)
        .bind(&tool_uses)
        .bind(&usage)
        .bind(message.cost_usd)
        .bind(&now)
        .execute(self.db.as_ref())
        .await?;

        Ok(MessageRecord {
            id,
            session_id: message.session_id,
            role: message.role,
            content: message.content,
            thinking: message.thinking,
            tool_uses,
            usage,
            cost_usd: message.cost_usd,
            created_at: now,
        })
    }

    /// List a session's messages in chronological order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_messages(
        &self,
        session_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<MessageRecord>, i64)> {
        let rows = sqlx::query_as::<_, MessageRecord>(
            "SELECT * FROM message
             WHERE session_id = ?
             ORDER BY created_at ASC
             LIMIT ? OFFSET ?",
        )
        .bind(session_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.as_ref())
        .await?;

        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM message WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(self.db.as_ref())
            .await?;

        Ok((rows, total.0))
    }
}
