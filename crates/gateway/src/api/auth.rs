//! Admin-surface authentication middleware.
//!
//! Spec.md §1 lists authentication as a non-goal for the client-facing
//! wire protocol, but the small admin surface this daemon layers on top
//! (consolidation trigger, raw notification fail, etc. — whichever
//! routes `api::router` nests under `/v1/admin`) still needs a gate, the
//! same bearer-token-env pattern the teacher uses for its API token.
//!
//! `state.admin_token` is `None` whenever the configured env var
//! (`AdminConfig::token_env`) is unset, in which case admin endpoints are
//! disabled (403) rather than silently open.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

/// Constant-time byte comparison without pulling in an extra crate for
/// it — short admin tokens don't justify `subtle`.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub async fn require_admin_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = &state.admin_token else {
        return (
            StatusCode::FORBIDDEN,
            axum::Json(serde_json::json!({ "error": "admin endpoints disabled" })),
        )
            .into_response();
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "invalid or missing admin token" })),
        )
            .into_response();
    }

    next.run(req).await
}
