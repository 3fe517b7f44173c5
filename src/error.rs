//! Application error types and their HTTP mapping.
//!
//! Every error is terminal for the request it occurred in: nothing is retried
//! and no partial session state is left behind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Error model used throughout request parsing, staging, and inference.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Missing or malformed client input (HTTP 400).
    #[error("{0}")]
    InvalidRequest(String),
    /// Multipart body could not be parsed (HTTP 400).
    #[error("{0}")]
    BadMultipart(String),
    /// Unknown session identifier (HTTP 404).
    #[error("{0}")]
    NotFound(String),
    /// Inference or media processing failure (HTTP 500); the message is
    /// forwarded to the client verbatim.
    #[error("{0}")]
    Transcription(String),
    /// Anything else that went wrong server-side (HTTP 500).
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Creates a `400 Bad Request` validation error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Creates a multipart parsing error.
    pub fn bad_multipart(message: impl Into<String>) -> Self {
        Self::BadMultipart(message.into())
    }

    /// Creates a `404 Not Found` error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates a transcription pipeline failure.
    pub fn transcription(message: impl Into<String>) -> Self {
        Self::Transcription(message.into())
    }

    /// Creates a generic internal server error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::BadMultipart(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Transcription(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::AppError;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn status_mapping() {
        assert_eq!(
            AppError::invalid_request("No file part")
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::not_found("Session expired or invalid")
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::transcription("model blew up")
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
