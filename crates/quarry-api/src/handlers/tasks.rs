//! /tasks handlers — submit, inspect and cancel analytical requests.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use quarry_core::protocol::Task;
use quarry_services::{CoordinatorError, TrackedRequest};

use super::ApiState;

// ── /tasks (POST) ─────────────────────────────────────────────────────────────

/// A task document, optionally carrying the caller's own request id.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub task: Task,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub request_id: String,
    pub submitted_at: u64,
}

pub async fn handle_submit(
    State(state): State<ApiState>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, (StatusCode, String)> {
    let SubmitRequest { request_id, task } = req;
    let kind = task.kind();
    let dispatched = match request_id {
        Some(id) if id.is_empty() => {
            return Err((StatusCode::BAD_REQUEST, "requestId must not be empty".into()));
        }
        Some(id) => state.coordinator.dispatch_with_id(id, task),
        None => state.coordinator.dispatch(task),
    };
    // The handle is dropped: API callers poll the store instead.
    let handle = dispatched.map_err(|e| match e {
        CoordinatorError::DuplicateRequest(_) => (StatusCode::CONFLICT, e.to_string()),
        CoordinatorError::Encode(_) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    })?;
    let request_id = handle.request_id;

    let submitted_at = state
        .coordinator
        .store()
        .get(&request_id)
        .map(|r| r.submitted_at)
        .unwrap_or(0);

    tracing::info!(request_id = %request_id, %kind, "task submitted over API");
    Ok(Json(SubmitResponse {
        request_id,
        submitted_at,
    }))
}

// ── /tasks (GET) ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct TasksResponse {
    pub tasks: Vec<TrackedRequest>,
}

pub async fn handle_tasks(State(state): State<ApiState>) -> Json<TasksResponse> {
    Json(TasksResponse {
        tasks: state.coordinator.store().all(),
    })
}

// ── /tasks/{id} (GET) ─────────────────────────────────────────────────────────

pub async fn handle_task(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<TrackedRequest>, (StatusCode, String)> {
    state
        .coordinator
        .store()
        .get(&id)
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown request {id}")))
}

// ── /tasks/{id}/cancel (POST) ─────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub request_id: String,
    pub cancelled: bool,
}

pub async fn handle_cancel(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Json<CancelResponse> {
    let cancelled = state.coordinator.cancel(&id);
    Json(CancelResponse {
        request_id: id,
        cancelled,
    })
}
