//! Ambient notifications HTTP surface (spec.md §6): create/list/
//! acknowledge/fail. Routing notifications onward to a channel connector
//! is an out-of-scope collaborator (spec.md §1); this module only records
//! what was raised and its resolution.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use rl_store::types::{Notification, NotificationStatus};

use crate::api::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct NewNotificationRequest {
    pub session_id: Option<String>,
    pub swarm_id: Option<String>,
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

pub async fn create_notification(
    State(state): State<AppState>,
    Json(req): Json<NewNotificationRequest>,
) -> ApiResult<Json<Notification>> {
    let notification = Notification {
        id: uuid::Uuid::new_v4().to_string(),
        session_id: req.session_id,
        swarm_id: req.swarm_id,
        kind: req.kind,
        message: req.message,
        payload: req.payload,
        status: NotificationStatus::Pending,
        error: None,
        created_at: chrono::Utc::now(),
        acknowledged_at: None,
    };
    Ok(Json(state.store.create_notification(notification)?))
}

pub async fn list_notifications(State(state): State<AppState>) -> Json<Vec<Notification>> {
    Json(state.store.list_notifications())
}

pub async fn acknowledge_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Notification>> {
    Ok(Json(state.store.acknowledge_notification(&id)?))
}

#[derive(Debug, Deserialize)]
pub struct FailNotificationRequest {
    pub error: String,
}

pub async fn fail_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<FailNotificationRequest>,
) -> ApiResult<Json<Notification>> {
    Ok(Json(state.store.fail_notification(&id, req.error)?))
}
