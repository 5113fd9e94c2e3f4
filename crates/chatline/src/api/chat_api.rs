//! Chat endpoints under `/api/v1/chats`

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

use super::{AdminUser, ApiError, ApiResult};
use crate::chat_db::Chat;
use crate::service::MAX_TITLE_LEN;
use crate::shared_state::AppState;
use crate::transcript::ChatMessage;

/// Body of `POST /chats/:chat_id/messages`: the caller's full message list
#[derive(Debug, Deserialize)]
pub struct StreamChatRequest {
    pub messages: Vec<ChatMessage>,
}

/// `{"title": null}` clears the title
#[derive(Debug, Deserialize, Validate)]
pub struct RenameChatRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
}

pub async fn list_chats(State(state): State<AppState>) -> ApiResult<Json<Vec<Chat>>> {
    let chats = state
        .service
        .list_chats()
        .map_err(|e| ApiError::from_chat(e, "Failed to fetch chats"))?;
    info!("Found {} chats", chats.len());
    Ok(Json(chats))
}

pub async fn create_chat(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Chat>)> {
    let chat = state
        .service
        .create_chat()
        .map_err(|e| ApiError::from_chat(e, "Failed to create chat"))?;
    Ok((StatusCode::CREATED, Json(chat)))
}

pub async fn get_chat_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    let messages = state
        .service
        .get_chat_messages(&chat_id)
        .map_err(|e| ApiError::from_chat(e, "Failed to fetch messages"))?;
    Ok(Json(messages))
}

/// Streams the reply as SSE: one JSON event per `data:` line, then `[DONE]`
pub async fn stream_chat_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(req): Json<StreamChatRequest>,
) -> ApiResult<Response> {
    let stream_num = state.counters.inc_streams_started();
    info!("Stream request #{} for chat {} ({} messages)", stream_num, chat_id, req.messages.len());

    let events = state
        .service
        .stream_chat(&chat_id, req.messages)
        .await
        .map_err(|e| ApiError::from_chat(e, "Failed to stream messages"))?;

    let sse_stream = events
        .map(|event| Event::default().json_data(&event))
        .chain(futures::stream::once(async {
            Ok::<_, axum::Error>(Event::default().data("[DONE]"))
        }));

    Ok(Sse::new(sse_stream)
        .keep_alive(KeepAlive::new().interval(state.config.sse_keep_alive()))
        .into_response())
}

pub async fn rename_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(req): Json<RenameChatRequest>,
) -> ApiResult<Json<Chat>> {
    req.validate().map_err(|e| {
        ApiError::bad_request(format!("title must be 1 to {} characters: {}", MAX_TITLE_LEN, e))
    })?;
    let chat = state
        .service
        .rename_chat(&chat_id, req.title.as_deref())
        .map_err(|e| ApiError::from_chat(e, "Failed to rename chat"))?;
    info!("Renamed chat {}", chat_id);
    Ok(Json(chat))
}

pub async fn delete_chat(
    admin: AdminUser,
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state
        .service
        .delete_chat(&chat_id)
        .map_err(|e| ApiError::from_chat(e, "Failed to delete chat"))?;
    info!("Chat {} deleted by admin (roles: {})", chat_id, admin.roles.join(","));
    Ok(Json(json!({ "success": true, "id": chat_id })))
}
