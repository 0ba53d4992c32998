//! Normalized stream events.
//!
//! [`StreamEvent`] is the closed tagged union for everything the control
//! plane emits: events normalized from the CLI's NDJSON stream, lifecycle
//! markers produced by the task registry, and side-channel injections such
//! as generated session titles. Serialization uses an internal `type` tag
//! so the serialized form is exactly the observer-facing wire shape.
//!
//! Events are immutable once produced; the replay buffer stores them as-is
//! and late observers receive byte-identical payloads.

use serde::Serialize;

/// One normalized event in a session's stream.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A task runner has started consuming the subprocess stream.
    MessageStart {
        /// Session the event belongs to.
        session_id: String,
    },
    /// A fragment of assistant response text.
    TextDelta {
        /// Session the event belongs to.
        session_id: String,
        /// Text fragment; never empty.
        text: String,
    },
    /// A fragment of assistant reasoning.
    ThinkingDelta {
        /// Session the event belongs to.
        session_id: String,
        /// Reasoning fragment; never empty.
        thinking: String,
    },
    /// The assistant began a tool invocation.
    ToolUseStart {
        /// Session the event belongs to.
        session_id: String,
        /// Tool name as reported by the CLI.
        tool_name: String,
        /// Invocation identifier correlating the eventual result.
        tool_id: String,
        /// Tool input payload, passed through verbatim.
        input: serde_json::Value,
    },
    /// A tool invocation produced its result.
    ToolResult {
        /// Session the event belongs to.
        session_id: String,
        /// Invocation identifier matching a prior `tool_use_start`.
        tool_id: String,
        /// Tool output, flattened to text.
        output: String,
        /// Whether the tool reported an error.
        is_error: bool,
    },
    /// The CLI finished the turn.
    MessageComplete {
        /// Session the event belongs to.
        session_id: String,
        /// Final result text.
        result_text: String,
        /// Token usage as reported by the CLI, passed through verbatim.
        usage: Option<serde_json::Value>,
        /// Cost in USD as reported by the CLI.
        cost_usd: Option<f64>,
    },
    /// A stream, preflight, timeout, or process failure.
    Error {
        /// Session the event belongs to.
        session_id: String,
        /// Human-readable error message.
        error: String,
        /// Optional machine-readable code from the CLI.
        code: Option<String>,
    },
    /// The task was cancelled by an operator or user.
    Cancelled {
        /// Session the event belongs to.
        session_id: String,
    },
    /// The CLI asked an interactive question; the session is paused until
    /// the user sends a new message.
    InputRequired {
        /// Session the event belongs to.
        session_id: String,
    },
    /// A generated title for the session, injected by the title side task.
    SessionTitle {
        /// Session the event belongs to.
        session_id: String,
        /// Generated title text.
        title: String,
    },
    /// Catch-up payload for a newly connected observer.
    TaskReplay {
        /// Session the event belongs to.
        session_id: String,
        /// Full buffered event history in append order.
        events: Vec<StreamEvent>,
        /// Whether the task has reached a terminal state.
        is_complete: bool,
    },
}

impl StreamEvent {
    /// Session identifier carried by every variant.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::MessageStart { session_id }
            | Self::TextDelta { session_id, .. }
            | Self::ThinkingDelta { session_id, .. }
            | Self::ToolUseStart { session_id, .. }
            | Self::ToolResult { session_id, .. }
            | Self::MessageComplete { session_id, .. }
            | Self::Error { session_id, .. }
            | Self::Cancelled { session_id }
            | Self::InputRequired { session_id }
            | Self::SessionTitle { session_id, .. }
            | Self::TaskReplay { session_id, .. } => session_id,
        }
    }

    /// Build a bare error event with no machine-readable code.
    #[must_use]
    pub fn error(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            session_id: session_id.into(),
            error: message.into(),
            code: None,
        }
    }
}
