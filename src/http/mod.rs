//! HTTP surface: operational REST endpoints and the chat WebSocket
//! connection layer.

pub mod chat;
pub mod tasks;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::GlobalConfig;
use crate::persistence::credential_repo::CredentialRepo;
use crate::persistence::message_repo::MessageRepo;
use crate::persistence::project_repo::ProjectRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::registry::TaskRegistry;
use crate::{AppError, Result};

/// Shared application state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Background task registry.
    pub registry: TaskRegistry,
    /// Project repository.
    pub projects: ProjectRepo,
    /// Session repository.
    pub sessions: SessionRepo,
    /// Message repository.
    pub messages: MessageRepo,
    /// Credential repository (title-generation key lookup).
    pub credentials: CredentialRepo,
}

/// Build the application router.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/tasks", get(tasks::list_tasks))
        .route("/api/tasks/{session_id}/cancel", post(tasks::cancel_task))
        .route("/ws/chat", get(chat::chat_websocket))
        .with_state(state)
}

#[allow(clippy::unused_async)] // axum handlers must be async
async fn healthz() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

/// Serve the HTTP surface until the cancellation token fires.
///
/// # Errors
///
/// Returns `AppError::Http` if binding or serving fails.
pub async fn serve(state: AppState, cancel: CancellationToken) -> Result<()> {
    let bind = format!("0.0.0.0:{}", state.config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|err| AppError::Http(format!("failed to bind {bind}: {err}")))?;

    info!(%bind, "starting HTTP surface");

    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .map_err(|err| AppError::Http(format!("server error: {err}")))?;

    info!("HTTP surface shut down");
    Ok(())
}
