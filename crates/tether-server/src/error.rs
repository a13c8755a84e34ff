use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tether_core::TetherError;

/// A [`TetherError`] rendered as a JSON error body with a matching status.
pub struct ApiError(pub TetherError);

impl From<TetherError> for ApiError {
    fn from(e: TetherError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            TetherError::Parse(_) => StatusCode::BAD_REQUEST,
            TetherError::QueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
            TetherError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
            TetherError::SessionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            TetherError::SessionCrash(_) => StatusCode::BAD_GATEWAY,
            TetherError::PatchNotFound(_) => StatusCode::NOT_FOUND,
            TetherError::PatchBusy { .. } => StatusCode::CONFLICT,
            TetherError::PatchTargetUnknown(_) | TetherError::PatchValidation(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
