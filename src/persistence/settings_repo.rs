//! Settings resolver for approvals.
//!
//! Manual tool approvals resolve project override → global default →
//! off. When approvals are off (the default) the supervisor pre-approves
//! the standard tool set so a detached CLI never blocks on permission
//! prompts.

use std::sync::Arc;

use crate::Result;

use super::db::Database;

const APPROVALS_KEY: &str = "approvals_enabled";

/// Repository wrapper around `SQLite` for application settings.
#[derive(Clone)]
pub struct SettingsRepo {
    db: Arc<Database>,
}

impl SettingsRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Resolve effective manual approvals for a project.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a query fails.
    pub async fn resolve_approvals(&self, project_id: &str) -> Result<bool> {
        let row: Option<(Option<bool>,)> =
            sqlx::query_as("SELECT approvals_enabled FROM project WHERE id = ?")
                .bind(project_id)
                .fetch_optional(self.db.as_ref())
                .await?;

        if let Some((Some(project_override),)) = row {
            return Ok(project_override);
        }

        self.global_approvals().await
    }

    /// Global manual-approvals default.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn global_approvals(&self) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM setting WHERE key = ?")
            .bind(APPROVALS_KEY)
            .fetch_optional(self.db.as_ref())
            .await?;
        Ok(row.is_some_and(|(value,)| value == "1"))
    }

    /// Set the global manual-approvals default.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the upsert fails.
    pub async fn set_global_approvals(&self, enabled: bool) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO setting (key, value) VALUES (?, ?)")
            .bind(APPROVALS_KEY)
            .bind(if enabled { "1" } else { "0" })
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }
}
