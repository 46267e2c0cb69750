//! Maps `rl_domain::error::Error` onto HTTP status codes for every
//! handler in this module, the way the teacher's `api_error` helper maps
//! its own error enum.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use rl_domain::error::Error;

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Error::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Error::Locked(msg) => (StatusCode::LOCKED, msg.clone()),
            Error::Config(msg) | Error::Auth(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg.clone()),
            Error::Cancelled(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::Transport(msg) | Error::Provider { message: msg, .. } => {
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
