//! API error handling

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::GenerationError;

/// Everything the endpoint can answer with instead of audio.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The body is not a well-formed generation request.  Raised before the
    /// model is touched.
    #[error("{detail}")]
    Validation { status: StatusCode, detail: String },

    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// The blocking generation task died (panic or runtime shutdown).
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { status, .. } => *status,
            ApiError::Generation(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "validation_error",
            ApiError::Generation(err) => err.kind(),
            ApiError::Internal(_) => "internal_error",
        }
    }
}

/// Any body that cannot be decoded into a request is 422, including one sent
/// without a JSON content type.  Body read failures keep axum's status.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let status = match &rejection {
            JsonRejection::JsonSyntaxError(_)
            | JsonRejection::JsonDataError(_)
            | JsonRejection::MissingJsonContentType(_) => StatusCode::UNPROCESSABLE_ENTITY,
            other => other.status(),
        };
        ApiError::Validation { status, detail: rejection.body_text() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let detail = self.to_string();
        if status.is_server_error() {
            tracing::error!(kind, "Error details: {}", detail);
        } else {
            tracing::warn!(kind, "Rejected request: {}", detail);
        }
        (status, Json(json!({ "detail": detail, "kind": kind }))).into_response()
    }
}
