//! Consolidation Scheduler (C11) HTTP surface (spec.md §5, §6): the
//! enqueue endpoint. The tick loop that drains the queue runs in the
//! background (`bootstrap::spawn_background_tasks`), not here.

use axum::extract::State;
use axum::Json;

use rl_store::types::QueuedJob;

use crate::api::error::ApiResult;
use crate::state::AppState;

pub async fn enqueue_consolidation(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<Json<QueuedJob>> {
    Ok(Json(state.consolidation.enqueue(payload)?))
}
