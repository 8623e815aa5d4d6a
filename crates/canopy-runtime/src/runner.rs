//! The runner — session writer driving one agent invocation.
//!
//! Appends the inbound user event, forwards the agent's stream to the
//! caller, persists every non-partial event, resolves completion IDs
//! (closing the loop with flows that block on persistence), and emits
//! a terminal `runner.completion` event.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use canopy_core::agent::{Agent, EventReceiver, DEFAULT_CHANNEL_CAPACITY};
use canopy_core::completion::CompletionTracker;
use canopy_core::emit::send_event;
use canopy_core::error::AgentError;
use canopy_core::event::Event;
use canopy_core::invocation::Invocation;
use canopy_core::model::{Choice, ObjectKind, Response};
use canopy_core::session::Session;

use crate::request::content::USER_AUTHOR;

/// Author of the terminal completion event.
const RUNNER_AUTHOR: &str = "runner";

/// Drives an agent invocation against a session.
pub struct Runner {
    session: Arc<dyn Session>,
}

impl Runner {
    /// Runner writing to the given session.
    #[must_use]
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self { session }
    }

    /// Session this runner writes to.
    #[must_use]
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Run `agent` with `invocation`, returning the forwarded stream.
    ///
    /// The inbound user message is recorded before the agent starts so
    /// content assembly sees it as history.
    #[instrument(skip_all, fields(agent = %agent.info().name, session_id = %self.session.id()))]
    pub async fn run(
        &self,
        ctx: CancellationToken,
        agent: Arc<dyn Agent>,
        mut invocation: Invocation,
    ) -> Result<EventReceiver, AgentError> {
        invocation.set_agent(Arc::clone(&agent));
        invocation.session = Some(Arc::clone(&self.session));
        let tracker = invocation
            .completion
            .get_or_insert_with(|| Arc::new(CompletionTracker::new()))
            .clone();

        if !invocation.message.is_empty() {
            let mut response = Response::new(ObjectKind::ChatCompletion);
            response.done = true;
            response.choices.push(Choice {
                index: 0,
                message: invocation.message.clone(),
                delta: None,
            });
            let user_event = Event::from_response(
                invocation.invocation_id.clone(),
                USER_AUTHOR,
                response,
            )
            .with_branch(invocation.branch.clone());
            self.session
                .append_event(user_event)
                .await
                .map_err(|e| AgentError::Session(e.to_string()))?;
        }

        let invocation_id = invocation.invocation_id.clone();
        let branch = invocation.branch.clone();
        let mut inner = agent.run(ctx.clone(), invocation).await?;

        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let session = Arc::clone(&self.session);
        let _forwarder = tokio::spawn(async move {
            let mut forwarding = true;
            loop {
                let event = tokio::select! {
                    biased;
                    () = ctx.cancelled() => break,
                    event = inner.recv() => event,
                };
                let Some(event) = event else { break };

                if !event.is_partial() {
                    if let Err(e) = session.append_event(event.clone()).await {
                        error!(error = %e, "failed to persist event");
                    }
                    if event.requires_completion {
                        if let Some(completion_id) = &event.completion_id {
                            debug!(completion_id, "acknowledging completion");
                            let _ = tracker.resolve(completion_id);
                        }
                    }
                }

                if forwarding && !send_event(&ctx, &tx, event).await {
                    forwarding = false;
                }
            }

            let mut response = Response::new(ObjectKind::RunnerCompletion);
            response.done = true;
            let completion_event =
                Event::from_response(invocation_id, RUNNER_AUTHOR, response).with_branch(branch);
            let _ = send_event(&ctx, &tx, completion_event).await;
            info!("run complete");
        });

        Ok(rx)
    }
}
