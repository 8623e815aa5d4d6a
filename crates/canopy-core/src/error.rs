//! Error kinds and the setup-error type returned from `Agent::run`.
//!
//! Runtime failures never cross `run` as `Err`; they travel the event
//! stream as [`EventError`]-bearing events and the producer closes its
//! channel afterwards. Only setup failures (validating configuration
//! before the producer task is launched) surface as [`AgentError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification for errors carried on events.
///
/// The serialized strings are a stable contract for downstream consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Setup or dispatch failure inside the orchestration.
    FlowError,
    /// A callback returned an error.
    AgentCallbackError,
    /// LLM provider failure reported by the model adapter.
    ApiError,
    /// Code executor failure.
    CodeExecutionError,
    /// Derived from context cancellation.
    ContextCancelled,
    /// Bounded event emission timed out.
    EmitTimeout,
}

impl ErrorKind {
    /// Stable string form of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FlowError => "flow_error",
            Self::AgentCallbackError => "agent_callback_error",
            Self::ApiError => "api_error",
            Self::CodeExecutionError => "code_execution_error",
            Self::ContextCancelled => "context_cancelled",
            Self::EmitTimeout => "emit_timeout",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed error carried on an event or response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventError {
    /// Error classification.
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl EventError {
    /// Create a typed error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Setup errors returned synchronously from `Agent::run`.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent requires a model but none was configured.
    #[error("agent {agent}: no model configured")]
    MissingModel {
        /// Agent name.
        agent: String,
    },

    /// A named sub-agent does not exist.
    #[error("agent {agent}: unknown sub-agent {name}")]
    UnknownSubAgent {
        /// Agent name.
        agent: String,
        /// Requested sub-agent name.
        name: String,
    },

    /// Invalid agent configuration detected before launch.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Session storage failed during setup.
    #[error("session error: {0}")]
    Session(String),
}
