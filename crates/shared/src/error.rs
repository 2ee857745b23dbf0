//! Error types for SupportChat

use thiserror::Error;

/// Failure taxonomy of the chat core.
///
/// Every variant is recoverable at the call boundary: the caller gets the error back and
/// the hub keeps running. Only `Authentication` ends a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("Authentication failed")]
    Authentication,

    #[error("Not allowed to access this thread")]
    Authorization,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Thread not found")]
    NotFound,
}

impl ChatError {
    /// Stable machine-readable code, used on the wire
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Authentication => "authentication_failed",
            ChatError::Authorization => "authorization_failed",
            ChatError::Validation(_) => "validation_failed",
            ChatError::Storage(_) => "storage_failure",
            ChatError::NotFound => "not_found",
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ChatError::Validation(msg.into())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
