//! Session CRUD and conversation-history endpoints (spec.md §6). Session
//! creation/resume itself is a WebSocket-only operation (§4.1's
//! `new_session`/`resume_session`) — this module only exposes read access.

use axum::extract::{Path, State};
use axum::Json;

use rl_store::types::{Conversation, Session};

use crate::api::error::ApiResult;
use crate::state::AppState;

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<Session>> {
    Json(state.store.list_sessions())
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.store.load_session(&id)?))
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Conversation>>> {
    // Touch the session so a history read on an unknown id 404s instead
    // of silently returning an empty list.
    state.store.load_session(&id)?;
    Ok(Json(state.store.list_conversations(&id)))
}
