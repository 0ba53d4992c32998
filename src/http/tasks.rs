//! Operational REST endpoints for background tasks.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::models::task::TaskSummary;

use super::AppState;

/// Response body for `GET /api/tasks`.
#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    /// Summaries of all tracked tasks.
    pub tasks: Vec<TaskSummary>,
    /// Number of tracked tasks.
    pub total: usize,
}

/// List all active and recently completed background tasks.
pub async fn list_tasks(State(state): State<AppState>) -> Json<TaskListResponse> {
    let tasks = state.registry.list_active().await;
    let total = tasks.len();
    Json(TaskListResponse { tasks, total })
}

/// Cancel a running background task by session id.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    if state.registry.cancel_task(&session_id).await {
        (
            StatusCode::OK,
            Json(serde_json::json!({ "session_id": session_id, "cancelled": true })),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "no running task found for this session"
            })),
        )
    }
}
