//! Streaming client for OpenAI-compatible `/v1/chat/completions` services
//! (llama-server, vLLM, OpenAI itself).

use super::{CompletionEvent, CompletionProvider, CompletionStream, PromptMessage, TokenUsage};
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use futures::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<UsageChunk>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<ChatDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    content: Option<String>,
    // llama-server and DeepSeek use the first, OpenRouter the second
    reasoning_content: Option<String>,
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageChunk {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
    prompt_tokens_details: Option<PromptTokensDetails>,
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    cached_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CompletionTokensDetails {
    reasoning_tokens: Option<u64>,
}

impl From<UsageChunk> for TokenUsage {
    fn from(usage: UsageChunk) -> Self {
        TokenUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            reasoning_tokens: usage.completion_tokens_details.and_then(|d| d.reasoning_tokens),
            cached_input_tokens: usage.prompt_tokens_details.and_then(|d| d.cached_tokens),
        }
    }
}

/// Splits an SSE byte stream into lines. Bytes are buffered until a newline
/// arrives, so a multi-byte character split across chunks decodes intact.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Whatever is left once the body ends without a trailing newline
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).trim_end().to_string())
    }
}

fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

enum LineOutcome {
    Events(Vec<CompletionEvent>),
    Done,
}

#[derive(Debug, Default)]
struct StreamSummary {
    usage: Option<TokenUsage>,
    finish_reason: Option<String>,
}

impl StreamSummary {
    fn handle_line(&mut self, line: &str) -> Result<LineOutcome> {
        let Some(data) = sse_data(line) else {
            return Ok(LineOutcome::Events(Vec::new()));
        };
        if data == "[DONE]" {
            return Ok(LineOutcome::Done);
        }
        if data.is_empty() {
            return Ok(LineOutcome::Events(Vec::new()));
        }

        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Skipping unparseable completion chunk: {}", e);
                return Ok(LineOutcome::Events(Vec::new()));
            }
        };
        if let Some(error) = chunk.error {
            return Err(ChatError::Upstream(format!("completion service error: {}", error)));
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.into());
        }

        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(delta) = choice.delta {
                if let Some(reasoning) = delta.reasoning_content.or(delta.reasoning) {
                    if !reasoning.is_empty() {
                        events.push(CompletionEvent::ReasoningDelta(reasoning));
                    }
                }
                if let Some(content) = delta.content {
                    if !content.is_empty() {
                        events.push(CompletionEvent::TextDelta(content));
                    }
                }
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }
        Ok(LineOutcome::Events(events))
    }
}

/// Turns an SSE body into completion events. `[DONE]` or the end of the body
/// closes the stream with a `Finish` event.
pub fn decode_event_stream<S, B, E>(byte_stream: S) -> impl Stream<Item = Result<CompletionEvent>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::try_stream! {
        let mut decoder = SseLineDecoder::default();
        let mut summary = StreamSummary::default();
        let mut done = false;
        futures_util::pin_mut!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = chunk_result
                .map_err(|e| ChatError::Upstream(format!("stream read error: {}", e)))?;
            for line in decoder.push(chunk.as_ref()) {
                match summary.handle_line(&line)? {
                    LineOutcome::Events(events) => {
                        for event in events {
                            yield event;
                        }
                    }
                    LineOutcome::Done => {
                        done = true;
                        break;
                    }
                }
            }
            if done {
                break;
            }
        }

        if !done {
            if let Some(line) = decoder.finish() {
                if let LineOutcome::Events(events) = summary.handle_line(&line)? {
                    for event in events {
                        yield event;
                    }
                }
            }
        }

        yield CompletionEvent::Finish {
            usage: summary.usage.take(),
            finish_reason: summary.finish_reason.take(),
        };
    }
}

pub struct OpenAiCompatibleProvider {
    base_url: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        info!("Completion provider initialized with backend: {}", base_url);
        Ok(Self { base_url, api_key, http_client })
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn stream_completion(
        &self,
        model: &str,
        messages: Vec<PromptMessage>,
    ) -> Result<CompletionStream> {
        debug!("Starting completion stream: model {}, {} messages", model, messages.len());
        let request = ChatCompletionRequest {
            model,
            messages: &messages,
            stream: true,
            stream_options: StreamOptions { include_usage: true },
        };

        let mut builder = self.http_client.post(self.completions_url()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ChatError::Upstream(format!("completion request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Upstream(format!(
                "completion service returned {}: {}",
                status, body
            )));
        }

        Ok(Box::pin(decode_event_stream(response.bytes_stream())))
    }
}
