use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::Error;

/// Error type for HTTP handlers.
///
/// Wraps the crate [`Error`] and adds HTTP-specific variants. Internal
/// failures are logged and answered with a generic message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] Error),

    /// Unknown job id, or one that is not a valid id at all.
    #[error("Job not found")]
    JobNotFound,

    /// Malformed request body or query string.
    #[error("bad request: {0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::JobNotFound | ApiError::Core(Error::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "Job not found".to_string())
            }
            ApiError::Core(Error::Validation(msg)) | ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, msg)
            }
            ApiError::Core(other) => {
                tracing::error!(error = %other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
