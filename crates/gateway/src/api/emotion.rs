//! Appraisal/Decay Engine (C7/C8) HTTP surface (spec.md §4.7/§4.8, §6):
//! state, history, summary, profile.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use rl_appraisal::{profile_for, OccProfile, SocialContext, StimulusEntry};
use rl_store::types::{EmotionInstance, EmotionState, StimulusHistory};

use crate::api::error::ApiResult;
use crate::bootstrap::current_decay_context;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    pub session_id: Option<String>,
}

/// `GET /v1/emotion/state?session_id=...` — the latest persisted state
/// for a scope, `None` for the daemon-global map.
pub async fn get_state(
    State(state): State<AppState>,
    Query(q): Query<ScopeQuery>,
) -> Json<Option<EmotionState>> {
    Json(state.store.load_latest_emotion_state(q.session_id.as_deref()))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub session_id: Option<String>,
    #[serde(default = "default_history_limit")]
    pub limit: usize,
    #[serde(default = "default_history_window_mins")]
    pub window_mins: i64,
}

fn default_history_limit() -> usize {
    50
}
fn default_history_window_mins() -> i64 {
    24 * 60
}

/// `GET /v1/emotion/history?session_id=...&limit=...&window_mins=...`
pub async fn get_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Json<Vec<StimulusHistory>> {
    let since = chrono::Utc::now() - chrono::Duration::minutes(q.window_mins);
    Json(
        state
            .store
            .load_recent_stimulus_history(q.session_id.as_deref(), since, q.limit),
    )
}

#[derive(Debug, Serialize)]
pub struct EmotionSummary {
    pub session_id: Option<String>,
    pub pending_stimuli: usize,
    pub active_map: std::collections::HashMap<String, EmotionInstance>,
}

/// `GET /v1/emotion/summary?session_id=...` — the live (not-yet-flushed)
/// in-memory view, as opposed to `get_state`'s last-persisted snapshot.
pub async fn get_summary(
    State(state): State<AppState>,
    Query(q): Query<ScopeQuery>,
) -> Json<EmotionSummary> {
    let manager = state.appraisal.get_or_create(q.session_id.clone());
    Json(EmotionSummary {
        session_id: q.session_id,
        pending_stimuli: manager.pending_len(),
        active_map: manager.active_map(),
    })
}

/// `GET /v1/emotion/profile` — the OCC profile shared by every scope
/// (spec.md §4.7: personality-to-profile composition is a non-goal).
pub async fn get_profile() -> Json<OccProfile> {
    Json(OccProfile::default())
}

#[derive(Debug, Serialize)]
pub struct EmotionProfileInfo {
    pub emotion_type: String,
    pub valence_sign: f64,
}

/// `GET /v1/emotion/profile/:emotion_type` — the static OCC classification
/// for one emotion type (spec.md §4.7's `profile_for`).
pub async fn get_emotion_profile(Path(emotion_type): Path<String>) -> Json<EmotionProfileInfo> {
    let profile = profile_for(&emotion_type);
    Json(EmotionProfileInfo {
        emotion_type,
        valence_sign: profile.valence_sign,
    })
}

#[derive(Debug, Deserialize)]
pub struct StimulusRequest {
    pub session_id: Option<String>,
    pub stimulus_type: String,
    pub payload: String,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub is_user_present: bool,
    #[serde(default)]
    pub is_user_engaged: bool,
}

/// `POST /v1/emotion/stimulus` — buffers a stimulus and flushes
/// immediately (an HTTP caller has no background tick of its own to wait
/// for, unlike the broker's inline appraisal after a turn).
pub async fn post_stimulus(
    State(state): State<AppState>,
    Json(req): Json<StimulusRequest>,
) -> ApiResult<Json<Option<EmotionState>>> {
    let manager = state.appraisal.get_or_create(req.session_id.clone());
    manager.buffer_stimulus(StimulusEntry {
        stimulus_type: req.stimulus_type,
        payload: req.payload,
        context: req.context,
    });
    let social_ctx = SocialContext {
        is_user_present: req.is_user_present,
        is_user_engaged: req.is_user_engaged,
    };
    let result = manager.flush(&current_decay_context(), social_ctx).await?;
    Ok(Json(result))
}
