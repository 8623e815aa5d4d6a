//! Processor traits — the ordered stages of a flow turn.
//!
//! Request processors mutate the in-flight [`Request`]; response
//! processors inspect and mutate the accumulated final [`Response`].
//! Either may emit events on the output channel and read or update the
//! invocation. A processor error terminates the turn: `Terminal`
//! surfaces as an error event, `Stop` ends the invocation quietly
//! (the typed stop from a tool callback).

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use canopy_core::agent::EventSender;
use canopy_core::error::EventError;
use canopy_core::invocation::Invocation;
use canopy_core::message::Request;
use canopy_core::model::Response;

/// Errors terminating a flow turn.
#[derive(Debug, Error)]
pub enum FlowError {
    /// End the invocation without an error event (typed stop).
    #[error("stop requested: {0}")]
    Stop(String),

    /// Emit the carried error as an event and end the invocation.
    #[error("{0}")]
    Terminal(EventError),
}

/// A stage run before the model call.
#[async_trait]
pub trait RequestProcessor: Send + Sync {
    /// Stage name, for logging.
    fn name(&self) -> &'static str;

    /// Mutate the request; may emit preprocessing events.
    async fn process_request(
        &self,
        ctx: &CancellationToken,
        invocation: &mut Invocation,
        request: &mut Request,
        tx: &EventSender,
    ) -> Result<(), FlowError>;
}

/// A stage run after the model call on the final response.
#[async_trait]
pub trait ResponseProcessor: Send + Sync {
    /// Stage name, for logging.
    fn name(&self) -> &'static str;

    /// Inspect and mutate the final response; may emit events and set
    /// invocation side-effects.
    async fn process_response(
        &self,
        ctx: &CancellationToken,
        invocation: &mut Invocation,
        request: &Request,
        response: &mut Response,
        tx: &EventSender,
    ) -> Result<(), FlowError>;
}
