//! Project repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::Result;

use super::db::Database;

/// Project record: a working directory the CLI runs in.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, sqlx::FromRow)]
#[serde(rename_all = "snake_case")]
pub struct ProjectRecord {
    /// Project identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Absolute working directory path.
    pub path: String,
    /// Manual-approvals override: `Some(true)`/`Some(false)` pin the
    /// behavior, `None` inherits the global default.
    pub approvals_enabled: Option<bool>,
    /// Creation timestamp (RFC 3339).
    pub created_at: String,
    /// Last update timestamp (RFC 3339).
    pub updated_at: String,
}

/// Repository wrapper around `SQLite` for project records.
#[derive(Clone)]
pub struct ProjectRepo {
    db: Arc<Database>,
}

impl ProjectRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new project record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, name: &str, path: &str) -> Result<ProjectRecord> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO project (id, name, path, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(path)
        .bind(&now)
        .bind(&now)
        .execute(self.db.as_ref())
        .await?;

        Ok(ProjectRecord {
            id,
            name: name.to_owned(),
            path: path.to_owned(),
            approvals_enabled: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Fetch a project by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        let record = sqlx::query_as::<_, ProjectRecord>("SELECT * FROM project WHERE id = ?")
            .bind(project_id)
            .fetch_optional(self.db.as_ref())
            .await?;
        Ok(record)
    }

    /// Set or clear the project-level manual-approvals override.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_approvals(&self, project_id: &str, enabled: Option<bool>) -> Result<()> {
        sqlx::query("UPDATE project SET approvals_enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(Utc::now().to_rfc3339())
            .bind(project_id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }
}
