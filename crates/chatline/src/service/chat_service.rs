//! Chat service: CRUD over the store plus the streaming completion round.
//!
//! A completion round runs in three sequential phases inside one spawned task:
//! forward upstream deltas to the caller while assembling the reply, persist
//! the caller's transcript plus the reply, then title the chat if it has none.
//! The per-chat lock is held across all three.

use crate::chat_db::{Chat, ChatDatabase, DatabaseStats};
use crate::completion::{to_prompt_messages, CompletionEvent, CompletionProvider, CompletionStream, TokenUsage};
use crate::error::{ChatError, Result};
use crate::metrics;
use crate::service::chat_locks::{ChatLockGuard, ChatLocks};
use crate::transcript::{generate_message_id, validate_transcript, ChatMessage, MessagePart, PartContent, Role};
use crate::utils::{derive_title, TextUtils};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

pub const MAX_TITLE_LEN: usize = 200;
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Events sent to the caller during a completion round
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ChatStreamEvent {
    Start {
        message_id: String,
    },
    ReasoningDelta {
        delta: String,
    },
    TextDelta {
        delta: String,
    },
    /// Sent once the transcript is persisted; `title` is set when this
    /// round gave the chat its title
    Finish {
        message_id: String,
        finish_reason: Option<String>,
        usage: Option<TokenUsage>,
        title: Option<String>,
    },
    Error {
        message: String,
    },
}

pub type ChatEventStream = ReceiverStream<ChatStreamEvent>;

/// Builds the assistant reply from deltas. Consecutive deltas of one kind
/// extend the same part.
#[derive(Debug, Default)]
pub struct ReplyAssembler {
    parts: Vec<MessagePart>,
}

impl ReplyAssembler {
    pub fn push_text(&mut self, delta: &str) {
        self.push(delta, false);
    }

    pub fn push_reasoning(&mut self, delta: &str) {
        self.push(delta, true);
    }

    fn push(&mut self, delta: &str, reasoning: bool) {
        let extends_last = matches!(
            (self.parts.last().map(|part| &part.content), reasoning),
            (Some(PartContent::Text { .. }), false) | (Some(PartContent::Reasoning { .. }), true)
        );
        if extends_last {
            if let Some(part) = self.parts.last_mut() {
                if let PartContent::Text { text } | PartContent::Reasoning { text } = &mut part.content {
                    text.push_str(delta);
                }
            }
        } else if reasoning {
            self.parts.push(MessagePart::reasoning(delta));
        } else {
            self.parts.push(MessagePart::text(delta));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The reply message, or `None` when nothing was generated. The last part
    /// carries `metadata` as its provider metadata.
    pub fn finish(mut self, message_id: &str, metadata: Value) -> Option<ChatMessage> {
        let last = self.parts.last_mut()?;
        last.provider_metadata = Some(metadata);
        Some(ChatMessage::new(message_id, Role::Assistant, self.parts))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum StreamOutcome {
    Completed,
    Aborted,
    Failed(String),
}

#[derive(Clone)]
pub struct ChatService {
    db: Arc<ChatDatabase>,
    provider: Arc<dyn CompletionProvider>,
    model: String,
    locks: ChatLocks,
    channel_capacity: usize,
}

impl ChatService {
    pub fn new(db: Arc<ChatDatabase>, provider: Arc<dyn CompletionProvider>, model: impl Into<String>) -> Self {
        let model = model.into();
        info!("Chat service using {} provider, model {}", provider.name(), model);
        Self {
            db,
            provider,
            model,
            locks: ChatLocks::new(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn database(&self) -> &Arc<ChatDatabase> {
        &self.db
    }

    pub fn list_chats(&self) -> Result<Vec<Chat>> {
        self.db.chats.list_chats()
    }

    pub fn create_chat(&self) -> Result<Chat> {
        self.db.chats.create_chat()
    }

    pub fn get_chat(&self, chat_id: &str) -> Result<Chat> {
        self.db
            .chats
            .get_chat(chat_id)?
            .ok_or_else(|| ChatError::ChatNotFound(chat_id.to_string()))
    }

    pub fn get_chat_messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        self.get_chat(chat_id)?;
        self.db.transcripts.load_chat(chat_id)
    }

    /// `None` clears the title so the next round derives a new one
    pub fn rename_chat(&self, chat_id: &str, title: Option<&str>) -> Result<Chat> {
        let title = match title.map(str::trim) {
            Some("") => return Err(ChatError::validation("title must not be blank")),
            Some(t) if t.chars().count() > MAX_TITLE_LEN => {
                return Err(ChatError::validation(format!(
                    "title must be at most {} characters",
                    MAX_TITLE_LEN
                )))
            }
            other => other,
        };
        if !self.db.chats.rename_chat(chat_id, title)? {
            return Err(ChatError::ChatNotFound(chat_id.to_string()));
        }
        self.get_chat(chat_id)
    }

    pub fn delete_chat(&self, chat_id: &str) -> Result<()> {
        if self.db.chats.delete_chat(chat_id)? == 0 {
            return Err(ChatError::ChatNotFound(chat_id.to_string()));
        }
        Ok(())
    }

    pub fn stats(&self) -> Result<DatabaseStats> {
        self.db.get_stats()
    }

    /// Starts a completion round for `chat_id` with the caller's full message
    /// list. Errors returned here happen before anything is streamed or
    /// persisted; later failures arrive as `ChatStreamEvent::Error`.
    pub async fn stream_chat(&self, chat_id: &str, messages: Vec<ChatMessage>) -> Result<ChatEventStream> {
        if messages.is_empty() {
            return Err(ChatError::validation("messages must not be empty"));
        }
        validate_transcript(&messages)?;
        self.get_chat(chat_id)?;

        let prompt = to_prompt_messages(&messages);
        if prompt.is_empty() {
            return Err(ChatError::validation("no message contains text"));
        }

        let lock = self.locks.acquire(chat_id).await;
        debug!("Acquired stream lock for chat {}", lock.chat_id());

        let upstream = match self.provider.stream_completion(&self.model, prompt).await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!("Failed to start completion for chat {}: {}", chat_id, e);
                return Err(e);
            }
        };

        let reply_id = generate_message_id();
        info!(
            "Streaming reply {} for chat {} ({} caller messages)",
            reply_id,
            chat_id,
            messages.len()
        );

        let (events, receiver) = mpsc::channel(self.channel_capacity);
        let job = StreamJob {
            db: Arc::clone(&self.db),
            chat_id: chat_id.to_string(),
            reply_id,
            model: self.model.clone(),
            messages,
            upstream,
            events,
            _lock: lock,
        };
        tokio::spawn(job.run());

        Ok(ReceiverStream::new(receiver))
    }
}

struct StreamJob {
    db: Arc<ChatDatabase>,
    chat_id: String,
    reply_id: String,
    model: String,
    messages: Vec<ChatMessage>,
    upstream: CompletionStream,
    events: mpsc::Sender<ChatStreamEvent>,
    // released when the job is dropped, after persistence and titling
    _lock: ChatLockGuard,
}

impl StreamJob {
    async fn run(mut self) {
        let started = Instant::now();
        metrics::inc_streams();

        let mut assembler = ReplyAssembler::default();
        let mut finish_reason: Option<String> = None;
        let mut usage: Option<TokenUsage> = None;
        let outcome = self
            .forward_upstream(&mut assembler, &mut finish_reason, &mut usage)
            .await;

        if let StreamOutcome::Failed(message) = &outcome {
            let _ = self.events.send(ChatStreamEvent::Error { message: message.clone() }).await;
        }

        let finish_reason = match &outcome {
            StreamOutcome::Completed => finish_reason,
            StreamOutcome::Aborted => Some("aborted".to_string()),
            StreamOutcome::Failed(_) => Some("error".to_string()),
        };
        let metadata = json!({
            "model": self.model,
            "finishReason": finish_reason,
            "usage": usage,
        });

        let mut transcript = std::mem::take(&mut self.messages);
        if let Some(reply) = assembler.finish(&self.reply_id, metadata) {
            debug!(
                "Reply {} assembled: {} parts, {} words",
                reply.id,
                reply.parts.len(),
                TextUtils::count_words(&reply.plain_text())
            );
            transcript.push(reply);
        }

        let completed = outcome == StreamOutcome::Completed;
        let title = persist_transcript(Arc::clone(&self.db), self.chat_id.clone(), transcript, completed).await;

        if completed {
            let _ = self
                .events
                .send(ChatStreamEvent::Finish {
                    message_id: self.reply_id.clone(),
                    finish_reason,
                    usage,
                    title,
                })
                .await;
        }

        metrics::observe_stream_duration(started.elapsed().as_secs_f64());
        metrics::dec_streams();
        info!(
            "Completion round for chat {} ended ({:?}) in {:.2}s",
            self.chat_id,
            outcome,
            started.elapsed().as_secs_f64()
        );
    }

    async fn forward_upstream(
        &mut self,
        assembler: &mut ReplyAssembler,
        finish_reason: &mut Option<String>,
        usage: &mut Option<TokenUsage>,
    ) -> StreamOutcome {
        let start = ChatStreamEvent::Start { message_id: self.reply_id.clone() };
        if self.events.send(start).await.is_err() {
            return StreamOutcome::Aborted;
        }

        loop {
            let next = tokio::select! {
                item = self.upstream.next() => item,
                _ = self.events.closed() => {
                    info!("Client left chat {} mid-stream; keeping the partial reply", self.chat_id);
                    return StreamOutcome::Aborted;
                }
            };

            let event = match next {
                None => return StreamOutcome::Completed,
                Some(Ok(CompletionEvent::TextDelta(delta))) => {
                    assembler.push_text(&delta);
                    ChatStreamEvent::TextDelta { delta }
                }
                Some(Ok(CompletionEvent::ReasoningDelta(delta))) => {
                    assembler.push_reasoning(&delta);
                    ChatStreamEvent::ReasoningDelta { delta }
                }
                Some(Ok(CompletionEvent::Finish { usage: u, finish_reason: f })) => {
                    *usage = u;
                    *finish_reason = f;
                    continue;
                }
                Some(Err(e)) => {
                    warn!("Completion stream for chat {} failed: {}", self.chat_id, e);
                    return StreamOutcome::Failed(e.to_string());
                }
            };

            if self.events.send(event).await.is_err() {
                info!("Client left chat {} mid-stream; keeping the partial reply", self.chat_id);
                return StreamOutcome::Aborted;
            }
        }
    }
}

/// Saves the transcript. After a completed round the chat is also titled if
/// it still has none; failed and aborted rounds never set a title.
/// Returns the title set by this call.
async fn persist_transcript(
    db: Arc<ChatDatabase>,
    chat_id: String,
    transcript: Vec<ChatMessage>,
    completed: bool,
) -> Option<String> {
    let task_chat_id = chat_id.clone();
    let joined = tokio::task::spawn_blocking(move || -> Result<Option<String>> {
        let summary = db.transcripts.save_chat(&task_chat_id, &transcript)?;
        debug!("Persisted {} messages for chat {}", summary.messages, task_chat_id);
        if !completed {
            return Ok(None);
        }
        Ok(title_if_missing(&db, &task_chat_id, &transcript))
    })
    .await;

    match joined {
        Ok(Ok(title)) => title,
        Ok(Err(e)) => {
            error!("Failed to persist transcript for chat {}: {}", chat_id, e);
            metrics::inc_persist_failures();
            None
        }
        Err(e) => {
            error!("Persistence task for chat {} panicked: {}", chat_id, e);
            metrics::inc_persist_failures();
            None
        }
    }
}

/// Best-effort; failures are logged and never fail the round
fn title_if_missing(db: &ChatDatabase, chat_id: &str, transcript: &[ChatMessage]) -> Option<String> {
    match db.chats.get_chat(chat_id) {
        Ok(Some(chat)) if chat.title.is_none() => {}
        Ok(_) => return None,
        Err(e) => {
            warn!("Could not read chat {} for auto-title: {}", chat_id, e);
            return None;
        }
    }

    let title = derive_title(transcript)?;
    match db.chats.set_title_if_missing(chat_id, &title) {
        Ok(true) => Some(title),
        Ok(false) => None,
        Err(e) => {
            warn!("Failed to auto-title chat {}: {}", chat_id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::PromptMessage;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone)]
    enum Step {
        Text(&'static str),
        Reasoning(&'static str),
        Finish(&'static str),
        Fail(&'static str),
        Hang,
    }

    /// Plays one scripted stream per call; `None` fails at open
    struct ScriptedProvider {
        scripts: Mutex<VecDeque<Option<Vec<Step>>>>,
        prompts: Mutex<Vec<Vec<PromptMessage>>>,
    }

    impl ScriptedProvider {
        fn new(scripts: Vec<Option<Vec<Step>>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream_completion(&self, _model: &str, messages: Vec<PromptMessage>) -> Result<CompletionStream> {
            self.prompts.lock().unwrap().push(messages);
            let script = self.scripts.lock().unwrap().pop_front().flatten();
            let Some(steps) = script else {
                return Err(ChatError::Upstream("connection refused".into()));
            };

            let stream = async_stream::stream! {
                for step in steps {
                    let item: Result<CompletionEvent> = match step {
                        Step::Text(t) => Ok(CompletionEvent::TextDelta(t.to_string())),
                        Step::Reasoning(t) => Ok(CompletionEvent::ReasoningDelta(t.to_string())),
                        Step::Finish(reason) => Ok(CompletionEvent::Finish {
                            usage: Some(TokenUsage { total_tokens: Some(7), ..Default::default() }),
                            finish_reason: Some(reason.to_string()),
                        }),
                        Step::Fail(message) => Err(ChatError::Upstream(message.to_string())),
                        Step::Hang => {
                            futures::future::pending::<()>().await;
                            continue;
                        }
                    };
                    yield item;
                }
            };
            Ok(Box::pin(stream))
        }
    }

    fn service_with(scripts: Vec<Option<Vec<Step>>>) -> (ChatService, Arc<ScriptedProvider>) {
        let db = Arc::new(ChatDatabase::new_in_memory().unwrap());
        let provider = ScriptedProvider::new(scripts);
        (ChatService::new(db, provider.clone(), "test-model"), provider)
    }

    fn question() -> Vec<ChatMessage> {
        vec![ChatMessage::text("u1", Role::User, "Please tell me how to reverse a string in python")]
    }

    async fn wait_for_messages(service: &ChatService, chat_id: &str, expected: usize) -> Vec<ChatMessage> {
        for _ in 0..200 {
            let messages = service.get_chat_messages(chat_id).unwrap();
            if messages.len() == expected {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("chat {} never reached {} messages", chat_id, expected);
    }

    #[test]
    fn test_assembler_merges_consecutive_deltas() {
        let mut assembler = ReplyAssembler::default();
        assembler.push_reasoning("Let me ");
        assembler.push_reasoning("think.");
        assembler.push_text("Use ");
        assembler.push_text("s[::-1]");
        assembler.push_reasoning("Done.");

        let reply = assembler.finish("r1", json!({"model": "m"})).unwrap();
        assert_eq!(
            reply.parts,
            vec![
                MessagePart::reasoning("Let me think."),
                MessagePart::text("Use s[::-1]"),
                MessagePart::reasoning("Done.").with_provider_metadata(json!({"model": "m"})),
            ]
        );
        assert!(ReplyAssembler::default().finish("r2", json!({})).is_none());
    }

    #[test]
    fn test_stream_events_serialize_with_type_tag() {
        let event = ChatStreamEvent::TextDelta { delta: "hi".into() };
        assert_eq!(serde_json::to_value(&event).unwrap(), json!({"type": "text-delta", "delta": "hi"}));

        let start = ChatStreamEvent::Start { message_id: "msg-1".into() };
        assert_eq!(serde_json::to_value(&start).unwrap(), json!({"type": "start", "messageId": "msg-1"}));
    }

    #[tokio::test]
    async fn test_stream_forwards_persists_and_titles() {
        let (service, provider) = service_with(vec![Some(vec![
            Step::Reasoning("Slicing works."),
            Step::Text("Use "),
            Step::Text("slicing"),
            Step::Finish("stop"),
        ])]);
        let chat = service.create_chat().unwrap();

        let events: Vec<ChatStreamEvent> = service.stream_chat(&chat.id, question()).await.unwrap().collect().await;

        let reply_id = match &events[0] {
            ChatStreamEvent::Start { message_id } => message_id.clone(),
            other => panic!("expected start, got {:?}", other),
        };
        assert!(reply_id.starts_with("msg-"));
        assert_eq!(events[1], ChatStreamEvent::ReasoningDelta { delta: "Slicing works.".into() });
        assert_eq!(events[2], ChatStreamEvent::TextDelta { delta: "Use ".into() });
        assert_eq!(events[3], ChatStreamEvent::TextDelta { delta: "slicing".into() });
        match &events[4] {
            ChatStreamEvent::Finish { message_id, finish_reason, title, .. } => {
                assert_eq!(message_id, &reply_id);
                assert_eq!(finish_reason.as_deref(), Some("stop"));
                assert_eq!(title.as_deref(), Some("Reverse String Python Use Slicing"));
            }
            other => panic!("expected finish, got {:?}", other),
        }
        assert_eq!(events.len(), 5);

        let stored = service.get_chat_messages(&chat.id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0], question()[0]);
        assert_eq!(stored[1].id, reply_id);
        assert_eq!(stored[1].role, Role::Assistant);
        assert_eq!(stored[1].plain_text(), "Use slicing");
        let metadata = stored[1].parts[1].provider_metadata.clone().unwrap();
        assert_eq!(metadata["model"], "test-model");
        assert_eq!(metadata["finishReason"], "stop");
        assert_eq!(metadata["usage"]["totalTokens"], 7);

        let prompts = provider.prompts.lock().unwrap();
        assert_eq!(prompts[0][0].content, "Please tell me how to reverse a string in python");
    }

    #[tokio::test]
    async fn test_existing_title_is_kept() {
        let (service, _) = service_with(vec![Some(vec![Step::Text("Sure."), Step::Finish("stop")])]);
        let chat = service.create_chat().unwrap();
        service.rename_chat(&chat.id, Some("My Strings")).unwrap();

        let events: Vec<_> = service.stream_chat(&chat.id, question()).await.unwrap().collect().await;
        assert!(matches!(events.last(), Some(ChatStreamEvent::Finish { title: None, .. })));
        assert_eq!(service.get_chat(&chat.id).unwrap().title.as_deref(), Some("My Strings"));
    }

    #[tokio::test]
    async fn test_rejects_bad_requests_before_streaming() {
        let (service, provider) = service_with(vec![]);
        let chat = service.create_chat().unwrap();

        let empty = service.stream_chat(&chat.id, Vec::new()).await;
        assert!(matches!(empty, Err(ChatError::Validation(_))));

        let duplicate = vec![
            ChatMessage::text("same", Role::User, "a"),
            ChatMessage::text("same", Role::User, "b"),
        ];
        assert!(matches!(service.stream_chat(&chat.id, duplicate).await, Err(ChatError::Validation(_))));

        let missing = service.stream_chat("no-such-chat", question()).await;
        assert!(matches!(missing, Err(ChatError::ChatNotFound(_))));

        assert!(provider.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_open_failure_persists_nothing() {
        let (service, _) = service_with(vec![None, Some(vec![Step::Text("ok"), Step::Finish("stop")])]);
        let chat = service.create_chat().unwrap();

        let result = service.stream_chat(&chat.id, question()).await;
        assert!(matches!(result, Err(ChatError::Upstream(_))));
        assert!(service.get_chat_messages(&chat.id).unwrap().is_empty());

        // lock was released with the failed attempt
        let events: Vec<_> = tokio::time::timeout(Duration::from_secs(2), async {
            service.stream_chat(&chat.id, question()).await.unwrap().collect::<Vec<_>>().await
        })
        .await
        .unwrap();
        assert!(matches!(events.last(), Some(ChatStreamEvent::Finish { .. })));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_reports_error_and_keeps_partial_reply() {
        let (service, _) = service_with(vec![Some(vec![Step::Text("Half an ans"), Step::Fail("upstream reset")])]);
        let chat = service.create_chat().unwrap();

        let events: Vec<_> = service.stream_chat(&chat.id, question()).await.unwrap().collect().await;
        assert!(matches!(
            events.last(),
            Some(ChatStreamEvent::Error { message }) if message.contains("upstream reset")
        ));

        let stored = service.get_chat_messages(&chat.id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].plain_text(), "Half an ans");
        let metadata = stored[1].parts[0].provider_metadata.clone().unwrap();
        assert_eq!(metadata["finishReason"], "error");
        assert!(service.get_chat(&chat.id).unwrap().title.is_none());
    }

    #[tokio::test]
    async fn test_no_user_text_leaves_chat_untitled() {
        let (service, _) = service_with(vec![Some(vec![Step::Text("A sunset over water."), Step::Finish("stop")])]);
        let chat = service.create_chat().unwrap();

        let transcript = vec![
            ChatMessage::text("s1", Role::System, "You describe pictures."),
            ChatMessage::new(
                "u1",
                Role::User,
                vec![MessagePart::new(PartContent::Image {
                    url: "https://example.com/sunset.png".into(),
                    media_type: Some("image/png".into()),
                })],
            ),
        ];
        let events: Vec<_> = service.stream_chat(&chat.id, transcript).await.unwrap().collect().await;

        assert!(matches!(events.last(), Some(ChatStreamEvent::Finish { title: None, .. })));
        assert_eq!(service.get_chat_messages(&chat.id).unwrap().len(), 3);
        assert!(service.get_chat(&chat.id).unwrap().title.is_none());
    }

    #[tokio::test]
    async fn test_client_disconnect_persists_partial_reply() {
        let (service, _) = service_with(vec![Some(vec![Step::Text("Partial"), Step::Hang])]);
        let chat = service.create_chat().unwrap();

        let mut stream = service.stream_chat(&chat.id, question()).await.unwrap();
        assert!(matches!(stream.next().await, Some(ChatStreamEvent::Start { .. })));
        assert_eq!(stream.next().await, Some(ChatStreamEvent::TextDelta { delta: "Partial".into() }));
        drop(stream);

        let stored = wait_for_messages(&service, &chat.id, 2).await;
        assert_eq!(stored[1].plain_text(), "Partial");
        assert_eq!(stored[1].parts[0].provider_metadata.as_ref().unwrap()["finishReason"], "aborted");
        // an aborted round leaves the title unset
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(service.get_chat(&chat.id).unwrap().title.is_none());
    }

    #[tokio::test]
    async fn test_second_round_resaves_history_without_duplicates() {
        let (service, _) = service_with(vec![
            Some(vec![Step::Text("First answer"), Step::Finish("stop")]),
            Some(vec![Step::Text("Second answer"), Step::Finish("stop")]),
        ]);
        let chat = service.create_chat().unwrap();

        let _: Vec<_> = service.stream_chat(&chat.id, question()).await.unwrap().collect().await;
        let mut history = service.get_chat_messages(&chat.id).unwrap();
        history.push(ChatMessage::text("u2", Role::User, "And in Rust?"));

        let _: Vec<_> = service.stream_chat(&chat.id, history).await.unwrap().collect().await;
        let stored = service.get_chat_messages(&chat.id).unwrap();
        let texts: Vec<String> = stored.iter().map(ChatMessage::plain_text).collect();
        assert_eq!(
            texts,
            vec![
                "Please tell me how to reverse a string in python",
                "First answer",
                "And in Rust?",
                "Second answer",
            ]
        );
        assert_eq!(service.stats().unwrap().total_parts, 4);
    }

    #[tokio::test]
    async fn test_rounds_on_one_chat_are_serialized() {
        let (service, _) = service_with(vec![
            Some(vec![Step::Text("slow"), Step::Hang]),
            Some(vec![Step::Text("fast"), Step::Finish("stop")]),
        ]);
        let chat = service.create_chat().unwrap();

        let mut first = service.stream_chat(&chat.id, question()).await.unwrap();
        assert!(matches!(first.next().await, Some(ChatStreamEvent::Start { .. })));

        let second = {
            let service = service.clone();
            let chat_id = chat.id.clone();
            tokio::spawn(async move {
                let follow_up = vec![ChatMessage::text("u9", Role::User, "another question")];
                service.stream_chat(&chat_id, follow_up).await.unwrap().collect::<Vec<_>>().await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        drop(first);
        let events = tokio::time::timeout(Duration::from_secs(2), second).await.unwrap().unwrap();
        assert!(matches!(events.last(), Some(ChatStreamEvent::Finish { .. })));
    }

    #[test]
    fn test_rename_validates_and_reports_missing_chat() {
        let (service, _) = service_with(vec![]);
        let chat = service.create_chat().unwrap();

        assert_eq!(service.rename_chat(&chat.id, Some("  Trip plans ")).unwrap().title.as_deref(), Some("Trip plans"));
        assert!(matches!(service.rename_chat(&chat.id, Some("   ")), Err(ChatError::Validation(_))));
        assert!(matches!(
            service.rename_chat(&chat.id, Some(&"x".repeat(MAX_TITLE_LEN + 1))),
            Err(ChatError::Validation(_))
        ));
        assert!(service.rename_chat(&chat.id, None).unwrap().title.is_none());
        assert!(matches!(service.rename_chat("missing", Some("x")), Err(ChatError::ChatNotFound(_))));
    }

    #[test]
    fn test_delete_and_missing_chat_lookups() {
        let (service, _) = service_with(vec![]);
        let chat = service.create_chat().unwrap();

        service.delete_chat(&chat.id).unwrap();
        assert!(matches!(service.delete_chat(&chat.id), Err(ChatError::ChatNotFound(_))));
        assert!(matches!(service.get_chat_messages(&chat.id), Err(ChatError::ChatNotFound(_))));
    }
}
