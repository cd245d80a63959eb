use crate::engine::EngineError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_typed_multipart::TypedMultipartError;
use serde_json::json;

/// Error returned by HTTP handlers, rendered as `{"detail": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::Registry(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            EngineError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Spawn(_) | EngineError::ChannelClosed => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl From<TypedMultipartError> for ApiError {
    fn from(err: TypedMultipartError) -> Self {
        let status = err.get_status();
        tracing::debug!(%status, error = %err, "rejected multipart form");
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

pub type Result<T, E = ApiError> = std::result::Result<T, E>;
