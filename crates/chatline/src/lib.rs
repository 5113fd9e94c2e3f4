// chatline/crates/chatline/src/lib.rs

pub mod api;
pub mod chat_db;
pub mod completion;
pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod service;
pub mod shared_state;
pub mod telemetry;
pub mod transcript;
pub mod utils;

// Public API exports
pub use chat_db::{Chat, ChatDatabase, DatabaseStats, SaveSummary, TranscriptStore};
pub use config::Config;
pub use error::{ChatError, Result};
pub use server::{build_router, run_server};
pub use service::{ChatService, ChatStreamEvent};
pub use transcript::{ChatMessage, MessagePart, PartContent, Role};
pub use utils::derive_title;
