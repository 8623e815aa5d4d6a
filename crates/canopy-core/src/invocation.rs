//! The invocation — mutable per-turn context for one agent execution.
//!
//! An invocation is cloned for sub-agents and branches; clones never
//! share mutable state with the parent (the completion tracker and
//! session are shared infrastructure by design). The invocation ID is
//! stable across transfer; the branch only grows by appending;
//! `end_invocation` moves monotonically from false to true.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::agent::Agent;
use crate::artifact::ArtifactService;
use crate::callbacks::{AgentCallbacks, ModelCallbacks, ToolCallbacks};
use crate::completion::CompletionTracker;
use crate::event::StructuredPayload;
use crate::message::Message;
use crate::model::Model;
use crate::session::Session;

/// Fresh invocation ID.
#[must_use]
pub fn new_invocation_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Pending handoff to a named sub-agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferInfo {
    /// Target sub-agent name.
    pub agent_name: String,
    /// Message initiating the target's run.
    pub message: String,
    /// Whether the invocation ends once the target completes.
    pub end_invocation: bool,
}

/// Caller-supplied options for one run.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Explicit conversation override; when set, the content processor
    /// uses these messages instead of session history.
    pub messages: Option<Vec<Message>>,
    /// Free-form runtime state visible to processors.
    pub runtime_state: HashMap<String, Value>,
}

type ParseFn = Arc<dyn Fn(&Value) -> Result<StructuredPayload, serde_json::Error> + Send + Sync>;

/// Expected structured output: an optional JSON schema rendered into
/// the instruction, and a parser producing the typed in-memory payload.
#[derive(Clone)]
pub struct StructuredOutput {
    /// JSON schema rendered into the system instruction.
    pub schema: Option<Value>,
    parse: ParseFn,
}

impl StructuredOutput {
    /// Structured output unmarshalled into `T`.
    #[must_use]
    pub fn typed<T>() -> Self
    where
        T: DeserializeOwned + Any + Send + Sync,
    {
        Self {
            schema: None,
            parse: Arc::new(|value| {
                serde_json::from_value::<T>(value.clone()).map(StructuredPayload::new)
            }),
        }
    }

    /// Attach a JSON schema for the instruction processor.
    #[must_use]
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Parse an extracted JSON value into the typed payload.
    pub fn parse(&self, value: &Value) -> Result<StructuredPayload, serde_json::Error> {
        (self.parse)(value)
    }
}

impl std::fmt::Debug for StructuredOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredOutput")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Mutable per-turn context threaded through one agent execution.
#[derive(Clone)]
pub struct Invocation {
    /// The agent currently executing.
    pub agent: Option<Arc<dyn Agent>>,
    /// Name of the current agent (event author).
    pub agent_name: String,
    /// Stable ID for the whole logical turn, including transfers.
    pub invocation_id: String,
    /// Branch path for emitted events and history filtering.
    pub branch: String,
    /// Terminal flag; once true the flow loop exits.
    pub end_invocation: bool,
    /// Session backing this run.
    pub session: Option<Arc<dyn Session>>,
    /// Model used by LLM-backed agents.
    pub model: Option<Arc<dyn Model>>,
    /// Inbound user message.
    pub message: Message,
    /// Completion acknowledgement channel shared with the session
    /// writer. Absent when no writer is attached; flows then skip
    /// completion waits.
    pub completion: Option<Arc<CompletionTracker>>,
    /// Caller-supplied run options.
    pub run_options: RunOptions,
    /// Pending agent handoff.
    pub transfer_info: Option<TransferInfo>,
    /// Agent-phase callbacks.
    pub agent_callbacks: Option<Arc<AgentCallbacks>>,
    /// Model-phase callbacks.
    pub model_callbacks: Option<Arc<ModelCallbacks>>,
    /// Tool-phase callbacks.
    pub tool_callbacks: Option<Arc<ToolCallbacks>>,
    /// Expected structured output.
    pub structured_output: Option<StructuredOutput>,
    /// Artifact storage plug-point.
    pub artifacts: Option<Arc<dyn ArtifactService>>,
}

impl Invocation {
    /// New root invocation for a user message.
    #[must_use]
    pub fn new(message: Message) -> Self {
        Self {
            agent: None,
            agent_name: String::new(),
            invocation_id: new_invocation_id(),
            branch: String::new(),
            end_invocation: false,
            session: None,
            model: None,
            message,
            completion: None,
            run_options: RunOptions::default(),
            transfer_info: None,
            agent_callbacks: None,
            model_callbacks: None,
            tool_callbacks: None,
            structured_output: None,
            artifacts: None,
        }
    }

    /// Attach a session.
    #[must_use]
    pub fn with_session(mut self, session: Arc<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Attach a model.
    #[must_use]
    pub fn with_model(mut self, model: Arc<dyn Model>) -> Self {
        self.model = Some(model);
        self
    }

    /// Point the invocation at an agent, updating the author name.
    pub fn set_agent(&mut self, agent: Arc<dyn Agent>) {
        self.agent_name = agent.info().name;
        self.agent = Some(agent);
    }

    /// Derive a clean sub-invocation: same branch and invocation ID,
    /// pointed at `agent`, transfer intent cleared.
    #[must_use]
    pub fn for_sub_agent(&self, agent: &Arc<dyn Agent>) -> Self {
        let mut child = self.clone();
        child.set_agent(Arc::clone(agent));
        child.transfer_info = None;
        child
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("agent_name", &self.agent_name)
            .field("invocation_id", &self.invocation_id)
            .field("branch", &self.branch)
            .field("end_invocation", &self.end_invocation)
            .field("transfer_info", &self.transfer_info)
            .finish_non_exhaustive()
    }
}
