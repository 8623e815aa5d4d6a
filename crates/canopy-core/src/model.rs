//! The model capability and its response types.
//!
//! A [`Model`] turns a [`Request`] into a stream of [`Response`]s:
//! zero or more partial chunks followed by a final, non-partial
//! response. Implementors must be `Send + Sync`; the flow engine
//! consumes the stream with cancellation.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::EventError;
use crate::message::{Message, Request, ToolCall};

/// Result type alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Boxed stream of [`Response`]s returned by [`Model::generate_content`].
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<Response, ModelError>> + Send>>;

/// Errors that can occur during model operations.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The provider returned an API error.
    #[error("API error: {message}")]
    Api {
        /// HTTP status code, if applicable.
        status: Option<u16>,
        /// Error description.
        message: String,
        /// Whether the error can be retried.
        retryable: bool,
    },

    /// The stream was cancelled.
    #[error("stream cancelled")]
    Cancelled,

    /// Provider-specific error.
    #[error("{message}")]
    Other {
        /// Error description.
        message: String,
    },
}

impl ModelError {
    /// Whether this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { retryable, .. } => *retryable,
            Self::Cancelled | Self::Other { .. } => false,
        }
    }
}

/// Static model metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier.
    pub name: String,
}

/// Core LLM capability.
#[async_trait]
pub trait Model: Send + Sync {
    /// Static metadata.
    fn info(&self) -> ModelInfo;

    /// Stream a response for the given request.
    ///
    /// The stream yields partial chunks (`is_partial = true`) and ends
    /// with a final response (`done = true`). Cancelling `ctx` stops
    /// the stream.
    async fn generate_content(
        &self,
        ctx: CancellationToken,
        request: Request,
    ) -> ModelResult<ResponseStream>;
}

/// Kind tag on responses and the events that carry them.
///
/// The serialized strings are a stable contract downstream consumers
/// may switch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Final assistant response.
    #[serde(rename = "chat.completion")]
    ChatCompletion,
    /// Streaming assistant chunk.
    #[serde(rename = "chat.completion.chunk")]
    ChatCompletionChunk,
    /// Merged tool-call responses.
    #[serde(rename = "tool.response")]
    ToolResponse,
    /// Agent handoff notification.
    #[serde(rename = "transfer")]
    Transfer,
    /// Structured-output / state update.
    #[serde(rename = "state.update")]
    StateUpdate,
    /// Terminal runner acknowledgement.
    #[serde(rename = "runner.completion")]
    RunnerCompletion,
    /// Error response.
    #[serde(rename = "error")]
    Error,
    /// Basic request processor marker.
    #[serde(rename = "preprocessing.basic")]
    PreprocessingBasic,
    /// Identity request processor marker.
    #[serde(rename = "preprocessing.identity")]
    PreprocessingIdentity,
    /// Instruction request processor marker.
    #[serde(rename = "preprocessing.instruction")]
    PreprocessingInstruction,
    /// Content request processor marker.
    #[serde(rename = "preprocessing.content")]
    PreprocessingContent,
    /// Planning request processor marker.
    #[serde(rename = "preprocessing.planning")]
    PreprocessingPlanning,
    /// Planning response processor marker.
    #[serde(rename = "postprocessing.planning")]
    PostprocessingPlanning,
    /// Code-execution response processor marker.
    #[serde(rename = "postprocessing.code_execution")]
    PostprocessingCodeExecution,
}

impl ObjectKind {
    /// Stable string form of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChatCompletion => "chat.completion",
            Self::ChatCompletionChunk => "chat.completion.chunk",
            Self::ToolResponse => "tool.response",
            Self::Transfer => "transfer",
            Self::StateUpdate => "state.update",
            Self::RunnerCompletion => "runner.completion",
            Self::Error => "error",
            Self::PreprocessingBasic => "preprocessing.basic",
            Self::PreprocessingIdentity => "preprocessing.identity",
            Self::PreprocessingInstruction => "preprocessing.instruction",
            Self::PreprocessingContent => "preprocessing.content",
            Self::PreprocessingPlanning => "preprocessing.planning",
            Self::PostprocessingPlanning => "postprocessing.planning",
            Self::PostprocessingCodeExecution => "postprocessing.code_execution",
        }
    }

    /// Whether this kind marks a request-processor event.
    #[must_use]
    pub fn is_preprocessing(self) -> bool {
        matches!(
            self,
            Self::PreprocessingBasic
                | Self::PreprocessingIdentity
                | Self::PreprocessingInstruction
                | Self::PreprocessingContent
                | Self::PreprocessingPlanning
        )
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token accounting for one model call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    /// Prompt tokens consumed.
    pub prompt_tokens: u64,
    /// Completion tokens generated.
    pub completion_tokens: u64,
    /// Total tokens.
    pub total_tokens: u64,
}

/// Incremental content attached to a streaming choice.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDelta {
    /// Text fragment.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
}

/// One alternative in a response. Tool-response events carry one choice
/// per originating tool call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    /// Positional index.
    pub index: u32,
    /// Full message (final responses).
    pub message: Message,
    /// Incremental fragment (streaming chunks).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<MessageDelta>,
}

/// A model response or response-shaped record carried on an event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Unique response ID.
    pub id: String,
    /// Kind tag.
    pub object: ObjectKind,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Model that produced the response (may be empty for synthetic
    /// records).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    /// Response alternatives.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,
    /// Token accounting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Error reported by the producer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EventError>,
    /// Whether this is a streaming fragment.
    pub is_partial: bool,
    /// Whether this is the terminal record of its stream.
    pub done: bool,
}

impl Response {
    /// Create an empty response of the given kind.
    #[must_use]
    pub fn new(object: ObjectKind) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            object,
            created: Utc::now(),
            model: String::new(),
            choices: Vec::new(),
            usage: None,
            error: None,
            is_partial: false,
            done: false,
        }
    }

    /// Final assistant response with a single text choice.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        let mut resp = Self::new(ObjectKind::ChatCompletion);
        resp.done = true;
        resp.choices.push(Choice {
            index: 0,
            message: Message::assistant(content),
            delta: None,
        });
        resp
    }

    /// Streaming chunk with a single text delta.
    #[must_use]
    pub fn chunk(delta: impl Into<String>) -> Self {
        let mut resp = Self::new(ObjectKind::ChatCompletionChunk);
        resp.is_partial = true;
        resp.choices.push(Choice {
            index: 0,
            message: Message::default(),
            delta: Some(MessageDelta {
                content: delta.into(),
            }),
        });
        resp
    }

    /// Tool calls from the first choice, if any.
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.choices
            .first()
            .map_or(&[], |c| c.message.tool_calls.as_slice())
    }

    /// Concatenated text content across choices.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        for choice in &self.choices {
            out.push_str(&choice.message.content);
        }
        out
    }

    /// Whether this response carries neither text, tool calls, nor an
    /// error.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.error.is_none()
            && self
                .choices
                .iter()
                .all(|c| c.message.is_empty() && c.delta.as_ref().is_none_or(|d| d.content.is_empty()))
    }
}
