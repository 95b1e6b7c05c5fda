//! The LLM Driver: wraps a streaming chat completion endpoint.
//!
//! Request/response-first client abstractions usually bolt streaming on
//! as an optional, best-effort method most implementors leave at its
//! `Ok(None)` default. The Runner here always wants a lazy event
//! sequence, so the streaming path is promoted to the only path — the
//! simplest possible driver just yields a single `text_delta` then
//! `finish`.

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use openai_rust2 as openai_rust;
use std::pin::Pin;

use crate::core::errors::{CoreError, ErrorKind};
use crate::core::model::Role;
use crate::core::tool_protocol::ToolMetadata;

/// A message in the history sent to the driver. Deliberately narrower
/// than [`crate::core::model::Message`] (no `id`/`ordinal`/persistence
/// concerns) — the driver only needs role, content, and the tool-call
/// correlation id.
#[derive(Debug, Clone)]
pub struct DriverMessage {
    pub role: Role,
    pub content: String,
    pub tool_call_id: Option<String>,
}

/// A tool invocation the model is requesting.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Token accounting for a completed turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One event in a driver's response stream: a text chunk, a tool
/// invocation request, a usage update, or the terminal finish signal.
#[derive(Debug, Clone)]
pub enum LlmEvent {
    TextDelta(String),
    ToolRequest(ToolRequest),
    Usage(Usage),
    Finish { reason: String },
}

pub type LlmEventStream = Pin<Box<dyn Stream<Item = Result<LlmEvent, CoreError>> + Send>>;

/// Trait-driven abstraction over a concrete chat-completion provider,
/// an out-of-scope external collaborator this crate only ever talks to
/// through this seam.
#[async_trait]
pub trait LlmDriver: Send + Sync {
    /// Starts a streaming completion over `messages`, offering
    /// `tools` for native function-calling. Must honour cancellation by
    /// stopping delta production once the caller drops the stream.
    async fn stream(
        &self,
        messages: &[DriverMessage],
        tools: &[ToolMetadata],
    ) -> Result<LlmEventStream, CoreError>;

    /// Identifier used to select the upstream model, e.g. `"gpt-4.1"`.
    fn model_name(&self) -> &str;
}

/// A concrete [`LlmDriver`] over OpenAI's Chat Completions API. Reads
/// its credential from `OPENAI_API_KEY` (falling back to the legacy
/// `OPEN_AI_SECRET` name), and streams text deltas by collecting chunks
/// off the SSE stream up front, then replaying them as a
/// `futures_util::stream::iter`.
///
/// Native tool-calling is out of scope for this adapter — OpenAI's
/// tool-calling surface lives on the non-streaming Responses API, a
/// different request/response shape this driver doesn't speak. `tools`
/// offered to [`stream`] are accepted but unused; a driver that needs
/// native function-calling
/// should implement [`LlmDriver`] against that API directly.
pub struct OpenAiDriver {
    client: openai_rust::Client,
    model: String,
}

impl OpenAiDriver {
    /// Builds a driver against the public OpenAI API using
    /// `OPENAI_API_KEY`/`OPEN_AI_SECRET` from the environment.
    pub fn from_env(model: impl Into<String>) -> Result<Self, CoreError> {
        let key = std::env::var("OPENAI_API_KEY")
            .or_else(|_| std::env::var("OPEN_AI_SECRET"))
            .map_err(|_| CoreError::new(ErrorKind::ConfigError, "OPENAI_API_KEY not set"))?;
        Ok(Self::new(&key, model))
    }

    /// Builds a driver with an explicit API key, e.g. for OpenAI-compatible
    /// self-hosted deployments reached through [`Self::new_with_base_url`].
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        Self {
            client: openai_rust::Client::new_with_client(api_key, reqwest::Client::new()),
            model: model.into(),
        }
    }

    pub fn new_with_base_url(api_key: &str, model: impl Into<String>, base_url: &str) -> Self {
        Self {
            client: openai_rust::Client::new_with_client_and_base_url(api_key, reqwest::Client::new(), base_url),
            model: model.into(),
        }
    }

    fn to_chat_messages(messages: &[DriverMessage]) -> Vec<openai_rust::chat::Message> {
        messages
            .iter()
            .map(|m| openai_rust::chat::Message {
                role: match m.role {
                    Role::System => "system".to_string(),
                    Role::User => "user".to_string(),
                    Role::Assistant => "assistant".to_string(),
                    Role::Tool => "tool".to_string(),
                },
                content: m.content.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl LlmDriver for OpenAiDriver {
    async fn stream(
        &self,
        messages: &[DriverMessage],
        _tools: &[ToolMetadata],
    ) -> Result<LlmEventStream, CoreError> {
        let chat_arguments = openai_rust::chat::ChatArguments::new(&self.model, Self::to_chat_messages(messages));
        let mut chunk_stream = self
            .client
            .create_chat_stream(chat_arguments, None)
            .await
            .map_err(|e| CoreError::new(ErrorKind::ToolInvocationError, format!("openai stream request failed: {e}")))?;

        // Collected eagerly: the SSE stream borrows the underlying
        // connection in a way that doesn't outlive this call, so chunks
        // are buffered first and replayed as an owned `Stream`.
        let mut events: Vec<Result<LlmEvent, CoreError>> = Vec::new();
        let mut output_tokens: u64 = 0;
        while let Some(chunk) = chunk_stream.next().await {
            match chunk {
                Ok(chunk) => {
                    if let Some(choice) = chunk.choices.first() {
                        if let Some(content) = &choice.delta.content {
                            if !content.is_empty() {
                                output_tokens += 1;
                                events.push(Ok(LlmEvent::TextDelta(content.clone())));
                            }
                        }
                        if let Some(reason) = &choice.finish_reason {
                            events.push(Ok(LlmEvent::Usage(Usage { input_tokens: 0, output_tokens })));
                            events.push(Ok(LlmEvent::Finish { reason: reason.clone() }));
                        }
                    }
                }
                Err(e) => {
                    events.push(Err(CoreError::new(ErrorKind::ToolInvocationError, format!("openai stream chunk error: {e}"))));
                    break;
                }
            }
        }
        Ok(Box::pin(stream::iter(events)))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
