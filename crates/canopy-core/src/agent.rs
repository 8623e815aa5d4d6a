//! The agent capability — the uniform contract shared by every variant.
//!
//! `run` returns synchronously with the receiving half of the agent's
//! output channel; a single producer task owns the sending half and
//! guarantees closure on every exit path, including panics (recovered
//! and converted to an error event). Runtime errors travel the stream;
//! only setup failures are returned from `run`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::event::Event;
use crate::invocation::Invocation;
use crate::tool::Tool;

/// Default capacity for agent output channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Sending half of an agent output channel.
pub type EventSender = mpsc::Sender<Event>;

/// Receiving half of an agent output channel.
pub type EventReceiver = mpsc::Receiver<Event>;

/// Static agent metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentInfo {
    /// Agent name; becomes the author of emitted events.
    pub name: String,
    /// Human-readable description.
    pub description: String,
}

impl AgentInfo {
    /// Create agent metadata.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// A unit that consumes an invocation and emits a stream of events.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Static metadata.
    fn info(&self) -> AgentInfo;

    /// Tools the agent exposes to its model (may be empty).
    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }

    /// Child agents (may be empty).
    fn sub_agents(&self) -> Vec<Arc<dyn Agent>> {
        Vec::new()
    }

    /// Look up a direct child by name.
    fn find_sub_agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.sub_agents()
            .into_iter()
            .find(|agent| agent.info().name == name)
    }

    /// Execute the agent.
    ///
    /// Returns the output channel immediately; events arrive as the
    /// producer task makes progress and the channel closes when the
    /// agent is done or `ctx` is cancelled.
    async fn run(
        &self,
        ctx: CancellationToken,
        invocation: Invocation,
    ) -> Result<EventReceiver, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    struct Leaf {
        name: &'static str,
    }

    #[async_trait]
    impl Agent for Leaf {
        fn info(&self) -> AgentInfo {
            AgentInfo::new(self.name, "leaf")
        }

        async fn run(
            &self,
            _ctx: CancellationToken,
            invocation: Invocation,
        ) -> Result<EventReceiver, AgentError> {
            let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
            let author = self.info().name;
            let _ = tx.send(Event::new(invocation.invocation_id, author)).await;
            Ok(rx)
        }
    }

    struct Parent {
        children: Vec<Arc<dyn Agent>>,
    }

    #[async_trait]
    impl Agent for Parent {
        fn info(&self) -> AgentInfo {
            AgentInfo::new("parent", "has children")
        }

        fn sub_agents(&self) -> Vec<Arc<dyn Agent>> {
            self.children.clone()
        }

        async fn run(
            &self,
            _ctx: CancellationToken,
            _invocation: Invocation,
        ) -> Result<EventReceiver, AgentError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    #[test]
    fn find_sub_agent_by_name() {
        let parent = Parent {
            children: vec![Arc::new(Leaf { name: "a" }), Arc::new(Leaf { name: "b" })],
        };
        assert_eq!(parent.find_sub_agent("b").unwrap().info().name, "b");
        assert!(parent.find_sub_agent("c").is_none());
    }

    #[tokio::test]
    async fn run_returns_channel_that_closes() {
        let leaf = Leaf { name: "a" };
        let invocation = Invocation::new(Message::user("hi"));
        let mut rx = leaf
            .run(CancellationToken::new(), invocation)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().author, "a");
        assert!(rx.recv().await.is_none());
    }
}
