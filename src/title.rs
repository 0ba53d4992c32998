//! Session title generation side task.
//!
//! Fire-and-forget: on the first message of a session a short title is
//! generated via the Anthropic Messages API, the session is renamed, and a
//! `session_title` event is injected into the task's observer stream.
//! Every failure is logged and swallowed — titles are cosmetic.

use tracing::{debug, warn};

use crate::http::AppState;
use crate::models::event::StreamEvent;
use crate::supervisor::environment::TITLE_KEY_VAR;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const TITLE_MODEL: &str = "claude-haiku-4-5-20251001";

const TITLE_PROMPT: &str = "Generate a concise 2-4 word title for a chat \
conversation that starts with the message below. Output ONLY the title — \
no quotes, no punctuation, no explanation.\n\nMessage: ";

/// Spawn the title generation task for a session's first message.
pub fn spawn_title_task(state: AppState, session_id: String, message: String) {
    tokio::spawn(async move {
        let Some(title) = generate_title(&state, &message).await else {
            return;
        };

        if let Err(err) = state.sessions.rename(&session_id, &title).await {
            warn!(session_id, %err, "failed to store generated title");
            return;
        }

        state
            .registry
            .broadcast_to_task(
                &session_id,
                StreamEvent::SessionTitle {
                    session_id: session_id.clone(),
                    title,
                },
            )
            .await;
    });
}

/// Generate a short title, or `None` on any failure.
async fn generate_title(state: &AppState, message: &str) -> Option<String> {
    // Stored key first, environment fallback.
    let api_key = match state.credentials.get_value(TITLE_KEY_VAR).await {
        Ok(Some(key)) => key,
        Ok(None) | Err(_) => match std::env::var(TITLE_KEY_VAR) {
            Ok(key) if !key.is_empty() => key,
            _ => {
                debug!("no title-generation key available, skipping");
                return None;
            }
        },
    };

    let snippet: String = message.chars().take(300).collect();
    let body = serde_json::json!({
        "model": TITLE_MODEL,
        "max_tokens": 30,
        "messages": [
            { "role": "user", "content": format!("{TITLE_PROMPT}{snippet}") }
        ],
    });

    let response = reqwest::Client::new()
        .post(API_URL)
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .json(&body)
        .send()
        .await;

    let response = match response {
        Ok(response) => response,
        Err(err) => {
            warn!(%err, "title generation request failed");
            return None;
        }
    };

    let payload: serde_json::Value = match response.json().await {
        Ok(payload) => payload,
        Err(err) => {
            warn!(%err, "title generation returned malformed body");
            return None;
        }
    };

    let title = payload
        .get("content")?
        .get(0)?
        .get("text")?
        .as_str()?
        .trim()
        .trim_matches(&['"', '\''][..])
        .to_owned();

    (!title.is_empty() && title.len() < 60).then_some(title)
}
