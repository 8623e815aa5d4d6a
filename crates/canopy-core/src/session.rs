//! The session capability — external event log and state store.
//!
//! The core reads a session during request processing and mutates it
//! only through state-delta events applied by the session writer.
//! Summaries are keyed by branch and guarded by a session-owned lock
//! in implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::Event;

/// Errors from session storage.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Underlying storage failed.
    #[error("session storage failure: {0}")]
    Storage(String),
}

/// A per-branch conversation summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// Summary text.
    pub text: String,
    /// When the summary was produced; history events at or before this
    /// instant are replaced by the summary during content assembly.
    pub updated_at: DateTime<Utc>,
}

/// External session consumed by the core.
#[async_trait]
pub trait Session: Send + Sync {
    /// Session identifier.
    fn id(&self) -> String;

    /// Ordered list of past events, oldest first.
    async fn events(&self) -> Vec<Event>;

    /// Persist an event. Implementations apply any state delta the
    /// event carries.
    async fn append_event(&self, event: Event) -> Result<(), SessionError>;

    /// Summary for a branch, if one has been produced.
    async fn summary(&self, branch: &str) -> Option<Summary>;

    /// Store a summary for a branch.
    async fn put_summary(&self, branch: &str, summary: Summary) -> Result<(), SessionError>;

    /// Current state value for a key.
    async fn state(&self, key: &str) -> Option<Vec<u8>>;
}
