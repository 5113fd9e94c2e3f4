//! HTTP handlers and the error type they return

pub mod admin_api;
pub mod chat_api;
pub mod health_api;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use crate::error::ChatError;

pub use admin_api::{admin_index, admin_stats, AdminUser};
pub use chat_api::{create_chat, delete_chat, get_chat_messages, list_chats, rename_chat, stream_chat_messages};
pub use health_api::{healthz, hello, root};

/// Error body: `{"error": message, "code": status}`
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden")
    }

    /// Maps a service error; `generic` replaces the message of internal failures
    pub fn from_chat(err: ChatError, generic: &str) -> Self {
        match err {
            ChatError::Validation(message) => Self::bad_request(message),
            ChatError::ChatNotFound(id) => Self::new(StatusCode::NOT_FOUND, format!("Chat not found: {}", id)),
            ChatError::Upstream(detail) => {
                warn!("{}: {}", generic, detail);
                Self::new(StatusCode::BAD_GATEWAY, "Completion service unavailable")
            }
            other => {
                error!("{}: {}", generic, other);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, generic)
            }
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self::from_chat(err, "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "error": self.message, "code": self.status.as_u16() })),
        )
            .into_response()
    }
}
