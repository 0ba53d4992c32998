//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Subprocess spawn, signal, or wait failure.
    Process(String),
    /// Stream framing failure on the child's stdout.
    Stream(String),
    /// HTTP surface failure.
    Http(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// A task for the session is already running.
    SessionBusy(String),
    /// The global running-task ceiling has been reached.
    CapacityExceeded(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Stream(msg) => write!(f, "stream: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::SessionBusy(msg) => write!(f, "session busy: {msg}"),
            Self::CapacityExceeded(msg) => write!(f, "capacity exceeded: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
