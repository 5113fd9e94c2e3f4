//! Chat service layer

pub mod chat_locks;
pub mod chat_service;

pub use chat_locks::{ChatLockGuard, ChatLocks};
pub use chat_service::{ChatEventStream, ChatService, ChatStreamEvent, ReplyAssembler, MAX_TITLE_LEN};
