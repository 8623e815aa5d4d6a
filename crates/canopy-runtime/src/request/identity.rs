//! Identity request processor — "You are <name>." system line.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use canopy_core::agent::EventSender;
use canopy_core::invocation::Invocation;
use canopy_core::message::Request;
use canopy_core::model::ObjectKind;

use crate::processor::{FlowError, RequestProcessor};
use crate::request::emit_marker;

/// Injects the agent's identity into the system message, once.
#[derive(Clone, Debug)]
pub struct IdentityProcessor {
    name: String,
    description: String,
}

impl IdentityProcessor {
    /// Processor for the given agent identity.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    fn identity_line(&self) -> String {
        if self.description.is_empty() {
            format!("You are {}.", self.name)
        } else {
            format!("You are {}. {}", self.name, self.description)
        }
    }
}

#[async_trait]
impl RequestProcessor for IdentityProcessor {
    fn name(&self) -> &'static str {
        "identity"
    }

    async fn process_request(
        &self,
        ctx: &CancellationToken,
        invocation: &mut Invocation,
        request: &mut Request,
        tx: &EventSender,
    ) -> Result<(), FlowError> {
        let line = self.identity_line();
        let system = request.system_message_mut();
        if !system.content.contains(&line) {
            request.append_system(&line);
        }
        emit_marker(ctx, invocation, tx, ObjectKind::PreprocessingIdentity).await;
        Ok(())
    }
}
