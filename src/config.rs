//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

/// Claude-compatible CLI invocation settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct CliConfig {
    /// CLI binary resolved on `PATH` (e.g. `claude`).
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Model used when the caller does not specify one.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Fallback model appended to every invocation, if configured.
    #[serde(default = "default_fallback_model")]
    pub fallback_model: Option<String>,
    /// Budget ceiling (USD) used when the caller does not specify one.
    #[serde(default = "default_max_budget_usd")]
    pub max_budget_usd: f64,
    /// Wall-clock ceiling for a single subprocess invocation.
    #[serde(default = "default_process_timeout_seconds")]
    pub process_timeout_seconds: u64,
}

fn default_binary() -> String {
    "claude".into()
}

fn default_model() -> String {
    "sonnet".into()
}

fn default_fallback_model() -> Option<String> {
    Some("haiku".into())
}

fn default_max_budget_usd() -> f64 {
    5.0
}

fn default_process_timeout_seconds() -> u64 {
    600
}

/// Background task registry settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TaskConfig {
    /// Global ceiling on concurrently running tasks.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    /// Seconds a terminal task's replay buffer is retained before the sweep
    /// reclaims it.
    #[serde(default = "default_buffer_ttl_seconds")]
    pub buffer_ttl_seconds: u64,
}

fn default_max_concurrent() -> u32 {
    5
}

fn default_buffer_ttl_seconds() -> u64 {
    3600
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            buffer_ttl_seconds: default_buffer_ttl_seconds(),
        }
    }
}

fn default_http_port() -> u16 {
    8000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/agent-relay.db")
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// `SQLite` database file path.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// HTTP port for the REST + WebSocket surface.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// CLI invocation settings.
    #[serde(default)]
    pub cli: CliConfig,
    /// Task registry settings.
    #[serde(default)]
    pub tasks: TaskConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            default_model: default_model(),
            fallback_model: default_fallback_model(),
            max_budget_usd: default_max_budget_usd(),
            process_timeout_seconds: default_process_timeout_seconds(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.tasks.max_concurrent == 0 {
            return Err(AppError::Config(
                "tasks.max_concurrent must be greater than zero".into(),
            ));
        }

        if self.cli.process_timeout_seconds == 0 {
            return Err(AppError::Config(
                "cli.process_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.cli.binary.trim().is_empty() {
            return Err(AppError::Config("cli.binary must not be empty".into()));
        }

        Ok(())
    }
}
