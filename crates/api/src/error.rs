//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use supportchat_shared::ChatError;

use crate::attachments::AttachmentError;
use crate::store::StoreError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Payload too large")]
    PayloadTooLarge,
    #[error("Unsupported media type")]
    UnsupportedMediaType,

    // Resource errors
    #[error("Resource not found")]
    NotFound,

    // Internal errors
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", self.to_string()),
            ApiError::UnsupportedMediaType => (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_MEDIA_TYPE", self.to_string()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),

            // Internal
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", "Storage error".to_string()),
            ApiError::Timeout => (StatusCode::REQUEST_TIMEOUT, "TIMEOUT", self.to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Authentication => ApiError::Unauthorized,
            ChatError::Authorization => ApiError::Forbidden,
            ChatError::Validation(msg) => ApiError::Validation(msg),
            ChatError::Storage(msg) => {
                tracing::error!(error = %msg, "Chat storage failure");
                ApiError::Storage(msg)
            }
            ChatError::NotFound => ApiError::NotFound,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ChatError::from(err).into()
    }
}

impl From<AttachmentError> for ApiError {
    fn from(err: AttachmentError) -> Self {
        match err {
            AttachmentError::TooLarge { .. } => ApiError::PayloadTooLarge,
            AttachmentError::UnsupportedType(_) => ApiError::UnsupportedMediaType,
            AttachmentError::Empty => ApiError::Validation(err.to_string()),
            AttachmentError::Timeout => ApiError::Timeout,
            AttachmentError::Asset(e) => {
                tracing::error!(error = %e, "Attachment store failure");
                ApiError::Storage(e.to_string())
            }
            AttachmentError::Chat(e) => e.into(),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
