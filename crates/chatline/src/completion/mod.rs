//! Completion-streaming collaborator.
//!
//! The chat service only sees `CompletionProvider`: a role-tagged prompt goes
//! in, a stream of text/reasoning deltas and one final usage summary comes out.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatibleProvider;

use crate::error::Result;
use crate::transcript::{ChatMessage, Role};
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Prompt entry in the shape OpenAI-compatible services expect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_input_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    TextDelta(String),
    ReasoningDelta(String),
    /// Always the last event of a successful stream
    Finish {
        usage: Option<TokenUsage>,
        finish_reason: Option<String>,
    },
}

pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionEvent>> + Send>>;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Opens the upstream stream. Errors here mean nothing was generated.
    async fn stream_completion(
        &self,
        model: &str,
        messages: Vec<PromptMessage>,
    ) -> Result<CompletionStream>;
}

/// Flattens each message to its text; messages without text are dropped.
pub fn to_prompt_messages(messages: &[ChatMessage]) -> Vec<PromptMessage> {
    messages
        .iter()
        .filter_map(|message| {
            let content = message.plain_text();
            if content.is_empty() {
                None
            } else {
                Some(PromptMessage { role: message.role, content })
            }
        })
        .collect()
}
