//! Error types for the chat persistence and streaming layers

use thiserror::Error;

/// Main error type for chat operations below the HTTP boundary
#[derive(Error, Debug)]
pub enum ChatError {
    /// SQLite error, including integrity constraint violations
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to obtain a pooled connection
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON column could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Chat does not exist
    #[error("chat not found: {0}")]
    ChatNotFound(String),

    /// Caller supplied data that cannot be accepted
    #[error("invalid request: {0}")]
    Validation(String),

    /// A stored part row is missing a column its type tag requires
    #[error("corrupt part row for message {message_id}: {reason}")]
    CorruptPart { message_id: String, reason: String },

    /// Completion service unavailable or failed
    #[error("upstream completion error: {0}")]
    Upstream(String),
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        ChatError::Validation(message.into())
    }
}

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;
