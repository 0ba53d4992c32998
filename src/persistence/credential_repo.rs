//! Credential repository for `SQLite` persistence.
//!
//! Global credentials are injected into every child environment unless a
//! project excludes them; project-scoped variables override globals.
//! Values are opaque to this layer — at-rest encryption belongs to the
//! credential vault upstream of this store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::Result;

use super::db::Database;

/// Repository wrapper around `SQLite` for credential records.
#[derive(Clone)]
pub struct CredentialRepo {
    db: Arc<Database>,
}

impl CredentialRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a global credential.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails (including a duplicate
    /// `env_var`).
    pub async fn create(
        &self,
        name: &str,
        service: Option<&str>,
        env_var: &str,
        value: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO credential (id, name, service, env_var, secret_value, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(service)
        .bind(env_var)
        .bind(value)
        .bind(&now)
        .bind(&now)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// All global credentials as `{env_var: value}`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn decrypted_env_map(&self) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT env_var, secret_value FROM credential")
                .fetch_all(self.db.as_ref())
                .await?;
        Ok(rows.into_iter().collect())
    }

    /// Fetch one global credential value by variable name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_value(&self, env_var: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT secret_value FROM credential WHERE env_var = ?")
                .bind(env_var)
                .fetch_optional(self.db.as_ref())
                .await?;
        Ok(row.map(|(value,)| value))
    }

    /// Upsert a project-scoped variable override.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the upsert fails.
    pub async fn set_project_var(
        &self,
        project_id: &str,
        env_var: &str,
        value: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO project_env_var (id, project_id, env_var, secret_value, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(project_id, env_var)
             DO UPDATE SET secret_value = excluded.secret_value, updated_at = excluded.updated_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(project_id)
        .bind(env_var)
        .bind(value)
        .bind(&now)
        .bind(&now)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Project-scoped overrides as `{env_var: value}`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn project_env_map(&self, project_id: &str) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT env_var, secret_value FROM project_env_var WHERE project_id = ?")
                .bind(project_id)
                .fetch_all(self.db.as_ref())
                .await?;
        Ok(rows.into_iter().collect())
    }

    /// Exclude a global credential from one project's environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn exclude_for_project(&self, project_id: &str, env_var: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO project_excluded_credential (id, project_id, env_var, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(project_id)
        .bind(env_var)
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Remove an exclusion, re-inheriting the global credential.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn include_for_project(&self, project_id: &str, env_var: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM project_excluded_credential WHERE project_id = ? AND env_var = ?",
        )
        .bind(project_id)
        .bind(env_var)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Variable names excluded for a project.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn excluded_for_project(&self, project_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT env_var FROM project_excluded_credential WHERE project_id = ? ORDER BY env_var",
        )
        .bind(project_id)
        .fetch_all(self.db.as_ref())
        .await?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }
}
