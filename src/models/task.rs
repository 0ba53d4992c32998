//! Background task model types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle status for a background task.
///
/// `Running` is the only non-terminal state. `WaitingForInput` is terminal
/// for the runner — the subprocess has been killed and a new `start_task`
/// for the same session resumes the conversation.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task runner is consuming the subprocess stream.
    Running,
    /// Stream exhausted normally.
    Completed,
    /// Cancelled by an operator or user.
    Cancelled,
    /// Runner failed unexpectedly.
    Error,
    /// The CLI asked an interactive question; paused until the next message.
    WaitingForInput,
}

impl TaskStatus {
    /// Whether the runner has exited for good.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One tool invocation accumulated for message persistence.
///
/// Serialized field names are camelCase to match the stored message format
/// consumed by the frontend.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Invocation identifier from the stream.
    pub tool_id: String,
    /// Tool name.
    pub tool_name: String,
    /// Input payload passed through verbatim.
    pub input: serde_json::Value,
    /// Output text, present once the result arrived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Whether the result reported an error.
    pub is_error: bool,
    /// Whether a matching `tool_result` has been observed.
    pub is_complete: bool,
}

impl ToolInvocation {
    /// Start a new incomplete invocation entry.
    #[must_use]
    pub fn started(tool_id: String, tool_name: String, input: serde_json::Value) -> Self {
        Self {
            tool_id,
            tool_name,
            input,
            output: None,
            is_error: false,
            is_complete: false,
        }
    }
}

/// Snapshot of one task for the operational surface.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TaskSummary {
    /// Session the task belongs to.
    pub session_id: String,
    /// Project the task belongs to.
    pub project_id: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// When the task started.
    pub started_at: DateTime<Utc>,
    /// When the task reached a terminal state, if it has.
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of buffered events.
    pub event_count: usize,
    /// Number of live observers.
    pub subscriber_count: usize,
    /// Seconds since the task started.
    pub elapsed_seconds: f64,
}
