//! Shared producer-task plumbing for the agent variants.

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use canopy_core::agent::EventSender;
use canopy_core::emit::send_event;
use canopy_core::error::ErrorKind;
use canopy_core::event::Event;
use canopy_core::invocation::Invocation;
use canopy_core::model::Response;
use canopy_core::recover::panic_message;

/// Result of the before-agent callback phase.
pub(crate) enum BeforeOutcome {
    /// Proceed with the agent body.
    Continue,
    /// A callback short-circuited; the body must not run.
    Terminate,
}

fn response_event(invocation: &Invocation, response: Response) -> Event {
    Event::from_response(
        invocation.invocation_id.clone(),
        invocation.agent_name.clone(),
        response,
    )
    .with_branch(invocation.branch.clone())
}

fn callback_error_event(invocation: &Invocation, message: String) -> Event {
    Event::from_error(
        invocation.invocation_id.clone(),
        invocation.agent_name.clone(),
        ErrorKind::AgentCallbackError,
        message,
    )
    .with_branch(invocation.branch.clone())
}

/// Run the before-agent callbacks. A synthesized response or an error
/// emits one event and terminates the run.
pub(crate) async fn run_before_agent(
    ctx: &CancellationToken,
    invocation: &Invocation,
    tx: &EventSender,
) -> BeforeOutcome {
    let Some(callbacks) = invocation.agent_callbacks.clone() else {
        return BeforeOutcome::Continue;
    };
    match callbacks.before(invocation).await {
        Ok(None) => BeforeOutcome::Continue,
        Ok(Some(response)) => {
            let _ = send_event(ctx, tx, response_event(invocation, response)).await;
            BeforeOutcome::Terminate
        }
        Err(e) => {
            warn!(agent = %invocation.agent_name, error = %e, "before-agent callback failed");
            let _ = send_event(ctx, tx, callback_error_event(invocation, e.to_string())).await;
            BeforeOutcome::Terminate
        }
    }
}

/// Run the after-agent callbacks; a synthesized response is emitted as
/// an additional event.
pub(crate) async fn run_after_agent(
    ctx: &CancellationToken,
    invocation: &Invocation,
    tx: &EventSender,
) {
    let Some(callbacks) = invocation.agent_callbacks.clone() else {
        return;
    };
    match callbacks.after(invocation).await {
        Ok(None) => {}
        Ok(Some(response)) => {
            let _ = send_event(ctx, tx, response_event(invocation, response)).await;
        }
        Err(e) => {
            warn!(agent = %invocation.agent_name, error = %e, "after-agent callback failed");
            let _ = send_event(ctx, tx, callback_error_event(invocation, e.to_string())).await;
        }
    }
}

/// Spawn the run's single producer task. Panics in `body` are caught
/// and converted to an error event before the channel closes.
pub(crate) fn spawn_producer<F>(
    ctx: CancellationToken,
    tx: EventSender,
    invocation_id: String,
    author: String,
    branch: String,
    body: F,
) where
    F: Future<Output = ()> + Send + 'static,
{
    let _task = tokio::spawn(async move {
        if let Err(panic) = std::panic::AssertUnwindSafe(body).catch_unwind().await {
            let message = panic_message(panic.as_ref());
            error!(agent = %author, message, "agent panicked");
            let event = Event::from_error(
                invocation_id,
                author,
                ErrorKind::FlowError,
                format!("agent panicked: {message}"),
            )
            .with_branch(branch);
            let _ = send_event(&ctx, &tx, event).await;
        }
    });
}

/// Forward every event from a sub-agent stream, stopping on
/// cancellation or receiver loss. Returns the forwarded events count.
pub(crate) async fn forward_stream(
    ctx: &CancellationToken,
    rx: &mut canopy_core::agent::EventReceiver,
    tx: &EventSender,
) -> usize {
    let mut forwarded = 0;
    loop {
        let event = tokio::select! {
            biased;
            () = ctx.cancelled() => break,
            event = rx.recv() => event,
        };
        let Some(event) = event else { break };
        if !send_event(ctx, tx, event).await {
            break;
        }
        forwarded += 1;
    }
    forwarded
}
