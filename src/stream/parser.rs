//! Event normalizer for the CLI's structured-streaming output.
//!
//! Transforms one line of newline-delimited JSON from the child process
//! into zero or more [`StreamEvent`]s. This is the only pure component in
//! the control plane: no side effects, no shared state, never fails.
//!
//! # Recognized outer kinds
//!
//! | `type`      | Maps to                                             |
//! |-------------|-----------------------------------------------------|
//! | `assistant` | one event per content block (text, thinking, tool)  |
//! | `result`    | [`StreamEvent::MessageComplete`]                    |
//! | `error`     | [`StreamEvent::Error`]                              |
//! | *(other)*   | nothing; logged at `DEBUG`                          |
//!
//! Malformed JSON yields an empty list — non-JSON stdout is a diagnostics
//! concern for the supervisor, never an event.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::models::event::StreamEvent;

/// Outer message envelope on the wire.
///
/// `message` is polymorphic: an object wrapping content blocks on
/// `assistant` lines, a plain string on `error` lines. It is held raw and
/// interpreted per kind.
#[derive(Debug, Deserialize)]
struct OuterMessage {
    /// Outer kind discriminator.
    #[serde(rename = "type", default)]
    kind: String,
    /// Wire-reported session id; present on `result` messages.
    #[serde(default)]
    session_id: Option<String>,
    /// Assistant payload or error text, depending on kind.
    #[serde(default)]
    message: Option<Value>,
    /// Final result text on `result` messages.
    #[serde(default)]
    result: Option<String>,
    /// Token usage on `result` messages, passed through verbatim.
    #[serde(default)]
    usage: Option<Value>,
    /// Cost in USD on `result` messages.
    #[serde(default)]
    cost_usd: Option<f64>,
    /// Error code on `error` messages.
    #[serde(default)]
    code: Option<String>,
}

/// One content block inside an `assistant` message.
#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    input: Option<Value>,
    #[serde(default)]
    tool_use_id: Option<String>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    is_error: Option<bool>,
}

/// Parse a single NDJSON line into zero or more normalized events.
///
/// Never errors: malformed JSON and unrecognized outer kinds both yield an
/// empty list, logged at `DEBUG` for visibility.
#[must_use]
pub fn parse_line(line: &str, session_id: &str) -> Vec<StreamEvent> {
    let raw: OuterMessage = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(err) => {
            debug!(
                session_id,
                %err,
                snippet = truncate(line, 200),
                "non-JSON output from CLI"
            );
            return Vec::new();
        }
    };

    match raw.kind.as_str() {
        "assistant" => parse_assistant(raw.message, session_id),
        "result" => {
            // The CLI reports its own session id on result messages; prefer
            // it so downstream correlation survives a resume-as-new retry.
            let sid = raw.session_id.unwrap_or_else(|| session_id.to_owned());
            vec![StreamEvent::MessageComplete {
                session_id: sid,
                result_text: raw.result.unwrap_or_default(),
                usage: raw.usage,
                cost_usd: raw.cost_usd,
            }]
        }
        "error" => {
            let error = raw
                .message
                .as_ref()
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_owned();
            vec![StreamEvent::Error {
                session_id: session_id.to_owned(),
                error,
                code: raw.code,
            }]
        }
        "" => Vec::new(),
        other => {
            debug!(kind = other, session_id, "unhandled CLI event type");
            Vec::new()
        }
    }
}

fn parse_assistant(message: Option<Value>, session_id: &str) -> Vec<StreamEvent> {
    let blocks = message
        .and_then(|m| m.get("content").cloned())
        .and_then(|c| serde_json::from_value::<Vec<ContentBlock>>(c).ok())
        .unwrap_or_default();

    blocks
        .into_iter()
        .filter_map(|block| parse_content_block(block, session_id))
        .collect()
}

fn parse_content_block(block: ContentBlock, session_id: &str) -> Option<StreamEvent> {
    match block.kind.as_str() {
        "text" => {
            let text = block.text.unwrap_or_default();
            if text.is_empty() {
                return None;
            }
            Some(StreamEvent::TextDelta {
                session_id: session_id.to_owned(),
                text,
            })
        }
        "thinking" => {
            let thinking = block.thinking.unwrap_or_default();
            if thinking.is_empty() {
                return None;
            }
            Some(StreamEvent::ThinkingDelta {
                session_id: session_id.to_owned(),
                thinking,
            })
        }
        "tool_use" => Some(StreamEvent::ToolUseStart {
            session_id: session_id.to_owned(),
            tool_name: block.name.unwrap_or_default(),
            tool_id: block.id.unwrap_or_default(),
            input: block
                .input
                .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
        }),
        "tool_result" => Some(StreamEvent::ToolResult {
            session_id: session_id.to_owned(),
            tool_id: block.tool_use_id.unwrap_or_default(),
            output: flatten_result_content(block.content),
            is_error: block.is_error.unwrap_or(false),
        }),
        other => {
            debug!(kind = other, session_id, "skipping unknown content block");
            None
        }
    }
}

/// Flatten a `tool_result` content value to plain text.
///
/// The CLI emits either a bare string or a list of typed blocks; only
/// `text` blocks contribute, joined with newlines.
fn flatten_result_content(content: Option<Value>) -> String {
    match content {
        Some(Value::String(s)) => s,
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
