//! Message model shared by the store, the service and the HTTP layer.
//!
//! A message never carries inline content. Everything it says lives in an
//! ordered list of typed parts; the order of `parts` is the order they are
//! stored in and reconstructed from.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::ChatError;

const MESSAGE_ID_PREFIX: &str = "msg";
const MESSAGE_ID_RANDOM_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            other => Err(ChatError::validation(format!("unknown role '{}'", other))),
        }
    }
}

/// One turn of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl ChatMessage {
    pub fn new(id: impl Into<String>, role: Role, parts: Vec<MessagePart>) -> Self {
        Self { id: id.into(), role, parts }
    }

    /// Single-text-part message, the common case for user input
    pub fn text(id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self::new(id, role, vec![MessagePart::text(text)])
    }

    /// Text parts joined by a single space, trimmed
    pub fn plain_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match &part.content {
                PartContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }
}

/// A typed fragment of message content plus optional provider metadata
/// (token usage, finish reason, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePart {
    #[serde(flatten)]
    pub content: PartContent,
    #[serde(
        default,
        rename = "providerMetadata",
        skip_serializing_if = "Option::is_none"
    )]
    pub provider_metadata: Option<Value>,
}

impl MessagePart {
    pub fn new(content: PartContent) -> Self {
        Self { content, provider_metadata: None }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(PartContent::Text { text: text.into() })
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::new(PartContent::Reasoning { text: text.into() })
    }

    pub fn with_provider_metadata(mut self, metadata: Value) -> Self {
        self.provider_metadata = Some(metadata);
        self
    }
}

/// Part payloads. Fields a type tag requires are non-optional, so a part
/// cannot be built without them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum PartContent {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    File {
        url: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },
    ToolResult {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        output: Value,
        #[serde(default)]
        is_error: bool,
    },
}

impl PartContent {
    pub const TEXT: &'static str = "text";
    pub const REASONING: &'static str = "reasoning";
    pub const IMAGE: &'static str = "image";
    pub const FILE: &'static str = "file";
    pub const TOOL_CALL: &'static str = "tool-call";
    pub const TOOL_RESULT: &'static str = "tool-result";

    /// Stored `type` column value
    pub fn type_tag(&self) -> &'static str {
        match self {
            PartContent::Text { .. } => Self::TEXT,
            PartContent::Reasoning { .. } => Self::REASONING,
            PartContent::Image { .. } => Self::IMAGE,
            PartContent::File { .. } => Self::FILE,
            PartContent::ToolCall { .. } => Self::TOOL_CALL,
            PartContent::ToolResult { .. } => Self::TOOL_RESULT,
        }
    }
}

/// Server-side id for model-produced messages, e.g. `msg-f3Kq9ZpA0bX2LmTr`
pub fn generate_message_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(MESSAGE_ID_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("{}-{}", MESSAGE_ID_PREFIX, suffix)
}

/// Rejects transcripts the store cannot persist unambiguously
pub fn validate_transcript(messages: &[ChatMessage]) -> Result<(), ChatError> {
    let mut seen = HashSet::with_capacity(messages.len());
    for message in messages {
        if message.id.trim().is_empty() {
            return Err(ChatError::validation("message id cannot be empty"));
        }
        if message.id.len() > 256 {
            return Err(ChatError::validation(format!(
                "message id too long (max 256 chars): {}…",
                &message.id.chars().take(32).collect::<String>()
            )));
        }
        if !seen.insert(message.id.as_str()) {
            return Err(ChatError::validation(format!(
                "duplicate message id in transcript: {}",
                message.id
            )));
        }
    }
    Ok(())
}
