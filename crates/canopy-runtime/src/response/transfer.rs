//! Transfer response processor — agent handoff.
//!
//! When the invocation carries a transfer intent, resolves the target
//! sub-agent, emits a transfer-notification event, runs the target on
//! a cloned invocation (same invocation ID, no transfer intent), and
//! forwards its stream verbatim. The parent's agent pointer is left
//! untouched so in-flight events keep their author.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use canopy_core::agent::EventSender;
use canopy_core::emit::send_event;
use canopy_core::error::{ErrorKind, EventError};
use canopy_core::event::Event;
use canopy_core::invocation::Invocation;
use canopy_core::message::{Message, Request};
use canopy_core::model::{Choice, ObjectKind, Response};

use crate::processor::{FlowError, ResponseProcessor};

/// Handles the pending transfer after response processing.
#[derive(Clone, Debug)]
pub struct TransferProcessor {
    end_after_transfer: bool,
}

impl TransferProcessor {
    /// Processor ending the invocation after the transfer completes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            end_after_transfer: true,
        }
    }

    /// Keep the flow looping after the target completes.
    #[must_use]
    pub fn continue_after_transfer(mut self) -> Self {
        self.end_after_transfer = false;
        self
    }
}

impl Default for TransferProcessor {
    fn default() -> Self {
        Self::new()
    }
}

fn transfer_notification(invocation: &Invocation, target: &str) -> Event {
    let mut response = Response::new(ObjectKind::Transfer);
    response.done = true;
    response.choices.push(Choice {
        index: 0,
        message: Message::assistant(format!("Transferring control to agent: {target}")),
        delta: None,
    });
    Event::from_response(
        invocation.invocation_id.clone(),
        invocation.agent_name.clone(),
        response,
    )
    .with_branch(invocation.branch.clone())
}

#[async_trait]
impl ResponseProcessor for TransferProcessor {
    fn name(&self) -> &'static str {
        "transfer"
    }

    #[instrument(skip_all, fields(agent = %invocation.agent_name))]
    async fn process_response(
        &self,
        ctx: &CancellationToken,
        invocation: &mut Invocation,
        _request: &Request,
        _response: &mut Response,
        tx: &EventSender,
    ) -> Result<(), FlowError> {
        let Some(transfer) = invocation.transfer_info.clone() else {
            return Ok(());
        };

        let target = invocation
            .agent
            .as_ref()
            .and_then(|agent| agent.find_sub_agent(&transfer.agent_name));
        let Some(target) = target else {
            warn!(target = %transfer.agent_name, "transfer target not found");
            invocation.transfer_info = None;
            return Err(FlowError::Terminal(EventError::new(
                ErrorKind::FlowError,
                format!("transfer target not found: {}", transfer.agent_name),
            )));
        };

        info!(target = %transfer.agent_name, "transferring control");
        let _ = send_event(ctx, tx, transfer_notification(invocation, &transfer.agent_name)).await;

        let mut target_invocation = invocation.for_sub_agent(&target);
        target_invocation.end_invocation = false;
        if !transfer.message.is_empty() {
            target_invocation.message = Message::user(transfer.message.clone());
        }

        match target.run(ctx.clone(), target_invocation).await {
            Err(e) => {
                invocation.transfer_info = None;
                return Err(FlowError::Terminal(EventError::new(
                    ErrorKind::FlowError,
                    format!("transfer target failed to start: {e}"),
                )));
            }
            Ok(mut rx) => loop {
                let event = tokio::select! {
                    biased;
                    () = ctx.cancelled() => break,
                    event = rx.recv() => event,
                };
                let Some(event) = event else { break };
                if !send_event(ctx, tx, event).await {
                    break;
                }
            },
        }

        debug!(target = %transfer.agent_name, "transfer complete");
        invocation.transfer_info = None;
        if transfer.end_invocation || self.end_after_transfer {
            invocation.end_invocation = true;
        }
        Ok(())
    }
}
