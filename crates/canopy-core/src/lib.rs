//! Foundation types and capability traits for the canopy agent runtime.
//!
//! An *agent* consumes an [`Invocation`](invocation::Invocation) and
//! produces an ordered stream of [`Event`](event::Event)s on a channel it
//! owns. Everything else in the workspace — composite agents, the flow
//! engine, tools, sessions — is expressed against the narrow capability
//! traits defined here:
//!
//! - [`agent::Agent`]: the uniform `run` contract shared by every variant.
//! - [`model::Model`]: a streaming LLM backend.
//! - [`tool::Tool`] and its optional [`tool::CallableTool`] /
//!   [`tool::StreamableTool`] capabilities.
//! - [`session::Session`]: the external event log and state store.
//! - [`planner::Planner`], [`codeexec::CodeExecutor`],
//!   [`artifact::ArtifactService`]: opaque plug-points.
//!
//! Cancellation is the universal stop: every send, receive, and bounded
//! wait pairs with a [`tokio_util::sync::CancellationToken`].

pub mod agent;
pub mod artifact;
pub mod branch;
pub mod callbacks;
pub mod codeexec;
pub mod completion;
pub mod emit;
pub mod error;
pub mod event;
pub mod invocation;
pub mod message;
pub mod model;
pub mod planner;
pub mod recover;
pub mod session;
pub mod tool;

pub use agent::{Agent, AgentInfo, EventReceiver, EventSender};
pub use error::{AgentError, ErrorKind, EventError};
pub use event::{Event, EventActions, StructuredPayload};
pub use invocation::{Invocation, RunOptions, StructuredOutput, TransferInfo};
pub use message::{Declaration, GenerationConfig, Message, Request, Role, ToolCall};
pub use model::{Choice, Model, ModelError, ObjectKind, Response, ResponseStream, Usage};
