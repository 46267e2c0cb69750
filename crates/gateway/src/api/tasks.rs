//! Work Queue (C10) HTTP surface (spec.md §4.6, §6): thin wrappers over
//! `rl_queue::WorkQueue`, which already owns every invariant.
//!
//! - `POST   /v1/tasks`           — create
//! - `GET    /v1/tasks`           — list all
//! - `GET    /v1/tasks/ready`     — list ready, optionally filtered
//! - `GET    /v1/tasks/:id`       — get
//! - `POST   /v1/tasks/:id/claim` — claim a specific task
//! - `POST   /v1/tasks/claim`     — claim the next ready task
//! - `POST   /v1/tasks/:id/release` — release back to ready
//! - `PATCH  /v1/tasks/:id`       — arbitrary field updates
//! - `DELETE /v1/tasks/:id`       — hard delete

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use rl_queue::{NewTaskRequest, PatchTaskRequest, ReadyFilter};
use rl_store::types::Task;

use crate::api::error::ApiResult;
use crate::state::AppState;

pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<NewTaskRequest>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.queue.create_task(req)?))
}

pub async fn list_tasks(State(state): State<AppState>) -> Json<Vec<Task>> {
    Json(state.queue.list_tasks())
}

pub async fn list_ready(
    State(state): State<AppState>,
    Query(filter): Query<ReadyFilter>,
) -> Json<Vec<Task>> {
    Json(state.queue.list_ready(&filter))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.queue.get_task(&id)?))
}

#[derive(Debug, Deserialize)]
pub struct ClaimNextRequest {
    pub working_dir: String,
    #[serde(default)]
    pub task_types: Option<Vec<String>>,
    pub claimed_by_session_id: String,
    #[serde(default)]
    pub claimed_by_agent_id: Option<String>,
}

pub async fn claim_next(
    State(state): State<AppState>,
    Json(req): Json<ClaimNextRequest>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.queue.claim_next(
        &req.working_dir,
        req.task_types.as_deref(),
        &req.claimed_by_session_id,
        req.claimed_by_agent_id.as_deref(),
    )?))
}

#[derive(Debug, Deserialize)]
pub struct ClaimByIdRequest {
    pub claimed_by_session_id: String,
    #[serde(default)]
    pub claimed_by_agent_id: Option<String>,
}

pub async fn claim_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ClaimByIdRequest>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.queue.claim_by_id(
        &id,
        &req.claimed_by_session_id,
        req.claimed_by_agent_id.as_deref(),
    )?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReleaseRequest {
    #[serde(default)]
    pub last_error: Option<String>,
}

pub async fn release_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ReleaseRequest>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.queue.release(&id, req.last_error)?))
}

pub async fn patch_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PatchTaskRequest>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.queue.patch(&id, req)?))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<axum::http::StatusCode> {
    state.queue.delete(&id)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
