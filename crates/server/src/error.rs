//! HTTP error mapping

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use engine::GridError;
use serde::Serialize;
use tracing::error;

/// Errors returned by API handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Grid(#[from] GridError),

    /// Body or query string that does not deserialize
    #[error("malformed request: {0}")]
    Malformed(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Malformed(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Malformed(rejection.body_text())
    }
}

/// Error body payload
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Malformed(_) => (StatusCode::BAD_REQUEST, "MALFORMED_REQUEST"),
            ApiError::Grid(e) => match e {
                GridError::InvalidConfig { .. } => (StatusCode::BAD_REQUEST, "INVALID_CONFIG"),
                GridError::InvalidBars { .. } => (StatusCode::BAD_REQUEST, "INVALID_BARS"),
                GridError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
                GridError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                GridError::InsufficientData { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_DATA")
                }
                GridError::Market(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "MARKET_DATA_UNAVAILABLE")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!(code, "{}", self);
        }

        let body = serde_json::json!({
            "success": false,
            "error": ErrorBody {
                code: code.to_string(),
                message: self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
