//! Chat WebSocket — the observer connection layer.
//!
//! Each socket is one observer. Incoming JSON messages drive the task
//! registry (`send_message`, `cancel`, `subscribe`, `ping`); outgoing
//! traffic is the observer channel drained into the socket. Disconnecting
//! unsubscribes the observer everywhere but never cancels the underlying
//! task — work survives the connection and replays on reconnect.

use std::path::PathBuf;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::event::StreamEvent;
use crate::persistence::message_repo::NewMessage;
use crate::registry::ObserverHandle;
use crate::supervisor::PromptRequest;
use crate::title;

use super::AppState;

/// Messages accepted from the client.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    /// Start (or resume) work for a session.
    SendMessage {
        session_id: String,
        project_id: String,
        message: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        max_budget_usd: Option<f64>,
    },
    /// Cancel the session's running task.
    Cancel { session_id: String },
    /// Attach to an existing task and catch up from the replay buffer.
    Subscribe { session_id: String },
    /// Keep-alive.
    Ping,
}

/// WebSocket endpoint for bidirectional chat.
#[allow(clippy::unused_async)] // axum handlers must be async
pub async fn chat_websocket(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (observer, mut events) = ObserverHandle::channel();
    let observer_id = observer.id();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                // The local handle keeps the channel open, so recv only
                // yields real events.
                let Some(event) = event else { break };
                if send_event(&mut sink, &event).await.is_err() {
                    break;
                }
            }

            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if handle_client_message(&state, &observer, &mut sink, text.as_str())
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {} // Binary / ping / pong frames — ignored.
                }
            }
        }
    }

    // Disconnect never cancels the underlying task.
    state.registry.unsubscribe_all(observer_id).await;
    debug!(%observer_id, "chat socket closed");
}

type Sink = SplitSink<WebSocket, Message>;

async fn handle_client_message(
    state: &AppState,
    observer: &ObserverHandle,
    sink: &mut Sink,
    raw: &str,
) -> std::result::Result<(), axum::Error> {
    let parsed: ClientMessage = match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(_) => {
            return send_error(sink, None, "Invalid JSON").await;
        }
    };

    match parsed {
        ClientMessage::Ping => send_json(sink, &serde_json::json!({ "type": "pong" })).await,

        ClientMessage::Cancel { session_id } => {
            if state.registry.cancel_task(&session_id).await {
                // Subscribed observers receive the cancelled event through
                // the broadcast path.
                Ok(())
            } else {
                send_error(sink, Some(&session_id), "No running task for this session").await
            }
        }

        ClientMessage::Subscribe { session_id } => {
            match state
                .registry
                .subscribe_with_replay(&session_id, observer.clone())
                .await
            {
                Some((events, is_complete)) => {
                    send_event(
                        sink,
                        &StreamEvent::TaskReplay {
                            session_id,
                            events,
                            is_complete,
                        },
                    )
                    .await
                }
                None => send_error(sink, Some(&session_id), "No task for this session").await,
            }
        }

        ClientMessage::SendMessage {
            session_id,
            project_id,
            message,
            model,
            max_budget_usd,
        } => {
            handle_send_message(
                state,
                observer,
                sink,
                SendMessage {
                    session_id,
                    project_id,
                    message,
                    model,
                    max_budget_usd,
                },
            )
            .await
        }
    }
}

struct SendMessage {
    session_id: String,
    project_id: String,
    message: String,
    model: Option<String>,
    max_budget_usd: Option<f64>,
}

async fn handle_send_message(
    state: &AppState,
    observer: &ObserverHandle,
    sink: &mut Sink,
    msg: SendMessage,
) -> std::result::Result<(), axum::Error> {
    let session_id = msg.session_id;

    if msg.message.is_empty() || session_id.is_empty() || msg.project_id.is_empty() {
        return send_error(sink, Some(&session_id), "Missing required fields").await;
    }

    if state.registry.is_task_running(&session_id).await {
        return send_error(
            sink,
            Some(&session_id),
            "Session is busy. Cancel the current request first.",
        )
        .await;
    }

    // Resolve the project working directory.
    let project = match state.projects.get(&msg.project_id).await {
        Ok(Some(project)) => project,
        Ok(None) => {
            return send_error(sink, Some(&session_id), "Project not found").await;
        }
        Err(err) => {
            warn!(project_id = %msg.project_id, %err, "failed to resolve project");
            return send_error(sink, Some(&session_id), "Failed to load project").await;
        }
    };

    // An existing session record makes this a continuation.
    let is_continuation = match state.sessions.get(&session_id).await {
        Ok(Some(existing)) => {
            if existing.project_id != msg.project_id {
                return send_error(
                    sink,
                    Some(&session_id),
                    "Session does not belong to this project",
                )
                .await;
            }
            true
        }
        Ok(None) => {
            if let Err(err) = state
                .sessions
                .create(&msg.project_id, "New Chat", Some(session_id.clone()))
                .await
            {
                warn!(session_id, %err, "failed to create session");
                return send_error(sink, Some(&session_id), "Failed to create session").await;
            }
            false
        }
        Err(err) => {
            warn!(session_id, %err, "failed to look up session");
            return send_error(sink, Some(&session_id), "Failed to load session").await;
        }
    };

    // Persist the user message before work starts; a crash mid-task must
    // not lose the prompt.
    if let Err(err) = state
        .messages
        .save_message(NewMessage::user(&session_id, &msg.message))
        .await
    {
        warn!(session_id, %err, "failed to persist user message");
    }

    let request = PromptRequest {
        session_id: session_id.clone(),
        project_id: msg.project_id,
        project_path: PathBuf::from(&project.path),
        message: msg.message.clone(),
        is_continuation,
        model: msg.model,
        max_budget_usd: msg.max_budget_usd,
    };

    if let Err(err) = state.registry.start_task(request).await {
        return send_error(sink, Some(&session_id), &err.to_string()).await;
    }

    // Attach this socket with replay so it sees the stream from the start.
    if let Some((events, is_complete)) = state
        .registry
        .subscribe_with_replay(&session_id, observer.clone())
        .await
    {
        send_event(
            sink,
            &StreamEvent::TaskReplay {
                session_id: session_id.clone(),
                events,
                is_complete,
            },
        )
        .await?;
    }

    // First message: generate a title off to the side.
    if !is_continuation {
        title::spawn_title_task(state.clone(), session_id, msg.message);
    }

    Ok(())
}

async fn send_event(
    sink: &mut Sink,
    event: &StreamEvent,
) -> std::result::Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => sink.send(Message::Text(json.into())).await,
        Err(err) => {
            warn!(%err, "failed to serialize outbound event");
            Ok(())
        }
    }
}

async fn send_json(
    sink: &mut Sink,
    value: &serde_json::Value,
) -> std::result::Result<(), axum::Error> {
    match serde_json::to_string(value) {
        Ok(json) => sink.send(Message::Text(json.into())).await,
        Err(err) => {
            warn!(%err, "failed to serialize outbound payload");
            Ok(())
        }
    }
}

async fn send_error(
    sink: &mut Sink,
    session_id: Option<&str>,
    message: &str,
) -> std::result::Result<(), axum::Error> {
    let mut payload = serde_json::json!({ "type": "error", "error": message });
    if let Some(sid) = session_id {
        payload["session_id"] = serde_json::Value::String(sid.to_owned());
    }
    send_json(sink, &payload).await
}
