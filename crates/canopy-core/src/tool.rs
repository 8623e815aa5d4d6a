//! The tool capability and its optional traits.
//!
//! Every tool exposes a [`Declaration`]; execution capability is
//! optional and discovered dynamically: [`CallableTool`] for direct
//! invocation, [`StreamableTool`] for chunked output. Additional
//! traits (long-running, skip-summarization, stream-inner preference)
//! are defaulted methods the dispatcher checks at runtime.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::event::Event;
use crate::invocation::{Invocation, TransferInfo};
use crate::message::Declaration;
use crate::session::Session;

/// Errors from tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The arguments did not match the declared schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Execution was cancelled.
    #[error("tool cancelled")]
    Cancelled,
}

/// One chunk yielded by a streamable tool.
#[derive(Debug)]
pub enum ToolChunk {
    /// A full inner event (e.g. from a nested agent) to be normalized
    /// and forwarded on the caller's stream.
    Event(Box<Event>),
    /// A structured value, rendered to JSON text for aggregation.
    Json(Value),
    /// A plain text fragment.
    Text(String),
}

/// Boxed chunk stream returned by [`StreamableTool::stream_call`].
pub type ToolStream = Pin<Box<dyn Stream<Item = Result<ToolChunk, ToolError>> + Send>>;

#[derive(Debug, Default)]
struct ToolActionsInner {
    transfer: Option<TransferInfo>,
}

/// Side-effect slot a tool writes during execution; the dispatcher
/// reads it back after the call returns.
#[derive(Clone, Debug, Default)]
pub struct ToolActions {
    inner: Arc<Mutex<ToolActionsInner>>,
}

impl ToolActions {
    /// Create an empty actions slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a transfer of control after the current turn.
    pub fn request_transfer(&self, transfer: TransferInfo) {
        self.inner.lock().transfer = Some(transfer);
    }

    /// Take the pending transfer request, if any.
    pub fn take_transfer(&self) -> Option<TransferInfo> {
        self.inner.lock().transfer.take()
    }
}

/// Execution context handed to a tool.
#[derive(Clone)]
pub struct ToolContext {
    /// Invocation the call belongs to.
    pub invocation_id: String,
    /// Agent dispatching the call.
    pub agent_name: String,
    /// Branch of the dispatching invocation.
    pub branch: String,
    /// Session handle, if the invocation has one.
    pub session: Option<Arc<dyn Session>>,
    /// Cancellation context for the call.
    pub cancel: CancellationToken,
    /// Side-effect slot read back by the dispatcher.
    pub actions: ToolActions,
}

impl ToolContext {
    /// Build a context from an invocation.
    #[must_use]
    pub fn for_invocation(invocation: &Invocation, cancel: CancellationToken) -> Self {
        Self {
            invocation_id: invocation.invocation_id.clone(),
            agent_name: invocation.agent_name.clone(),
            branch: invocation.branch.clone(),
            session: invocation.session.clone(),
            cancel,
            actions: ToolActions::new(),
        }
    }
}

/// A tool exposed to the model.
pub trait Tool: Send + Sync {
    /// Declaration advertised to the model.
    fn declaration(&self) -> Declaration;

    /// Whether the tool's work outlives the turn; long-running tools
    /// that return no value produce a placeholder response.
    fn is_long_running(&self) -> bool {
        false
    }

    /// Whether the merged tool-response event should suppress the
    /// follow-up summarization turn.
    fn skip_summarization(&self) -> bool {
        false
    }

    /// Streaming preference: `Some(false)` forces the callable path
    /// even when a stream capability exists; `None` leaves the choice
    /// to the dispatcher.
    fn stream_inner(&self) -> Option<bool> {
        None
    }

    /// Direct-call capability, if implemented.
    fn as_callable(&self) -> Option<&dyn CallableTool> {
        None
    }

    /// Streaming capability, if implemented.
    fn as_streamable(&self) -> Option<&dyn StreamableTool> {
        None
    }
}

/// Direct invocation capability.
#[async_trait]
pub trait CallableTool: Tool {
    /// Execute the tool and return its result value. `Value::Null`
    /// from a long-running tool means "no value yet".
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError>;
}

/// Chunked invocation capability.
#[async_trait]
pub trait StreamableTool: Tool {
    /// Execute the tool, yielding chunks as they become available.
    async fn stream_call(&self, ctx: &ToolContext, args: Value) -> Result<ToolStream, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    impl Tool for Bare {
        fn declaration(&self) -> Declaration {
            Declaration::new("bare", "No capabilities")
        }
    }

    #[test]
    fn optional_traits_default_off() {
        let tool = Bare;
        assert!(!tool.is_long_running());
        assert!(!tool.skip_summarization());
        assert!(tool.stream_inner().is_none());
        assert!(tool.as_callable().is_none());
        assert!(tool.as_streamable().is_none());
    }

    #[test]
    fn actions_transfer_roundtrip() {
        let actions = ToolActions::new();
        assert!(actions.take_transfer().is_none());

        actions.request_transfer(TransferInfo {
            agent_name: "weather-agent".into(),
            message: "hi Tokyo".into(),
            end_invocation: false,
        });
        let transfer = actions.take_transfer().unwrap();
        assert_eq!(transfer.agent_name, "weather-agent");
        // Taking consumes the request.
        assert!(actions.take_transfer().is_none());
    }

    #[test]
    fn actions_clone_shares_slot() {
        let actions = ToolActions::new();
        let alias = actions.clone();
        alias.request_transfer(TransferInfo {
            agent_name: "t".into(),
            message: String::new(),
            end_invocation: true,
        });
        assert!(actions.take_transfer().is_some());
    }
}
