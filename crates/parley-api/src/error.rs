use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use parley_types::error::ChatError;

/// Wrapper that maps the shared error taxonomy onto HTTP responses.
/// Idempotency outcomes (`AlreadyExists`) are normally resolved by the
/// handlers themselves; one slipping through is a conflict, not a failure.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::AlreadyExists(_) => StatusCode::CONFLICT,
            ChatError::Forbidden => StatusCode::FORBIDDEN,
            ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ChatError::External(_) => StatusCode::BAD_GATEWAY,
        };

        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }

        let body = Json(json!({
            "error": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        }));
        (status, body).into_response()
    }
}
