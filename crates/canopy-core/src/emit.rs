//! Cancellation-aware event emission.
//!
//! Every write to an output channel goes through [`send_event`]: emit
//! iff the context is not done, otherwise abandon the event and begin
//! shutdown. The bounded variant [`send_event_timeout`] is for
//! emitters that must not block indefinitely; on timeout it reports a
//! typed error and never touches the channel afterwards (it reserves
//! a permit rather than parking in `send`).

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::agent::EventSender;
use crate::event::Event;

/// Error from bounded emission.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmitError {
    /// The channel was not ready within the deadline.
    #[error("event emission timed out after {timeout:?}")]
    Timeout {
        /// The deadline that expired.
        timeout: Duration,
    },
}

/// Send an event unless the context is cancelled or the receiver is
/// gone. Returns true iff the event was delivered.
pub async fn send_event(ctx: &CancellationToken, tx: &EventSender, event: Event) -> bool {
    tokio::select! {
        biased;
        () = ctx.cancelled() => false,
        result = tx.send(event) => result.is_ok(),
    }
}

/// Send an event with a bounded wait for channel capacity.
///
/// Returns `Ok(true)` on delivery, `Ok(false)` if the context was
/// cancelled or the channel closed, and [`EmitError::Timeout`] iff the
/// channel was not ready within `timeout`.
pub async fn send_event_timeout(
    ctx: &CancellationToken,
    tx: &EventSender,
    event: Event,
    timeout: Duration,
) -> Result<bool, EmitError> {
    tokio::select! {
        biased;
        () = ctx.cancelled() => Ok(false),
        reserved = tokio::time::timeout(timeout, tx.reserve()) => match reserved {
            Ok(Ok(permit)) => {
                permit.send(event);
                Ok(true)
            }
            Ok(Err(_)) => Ok(false),
            Err(_) => Err(EmitError::Timeout { timeout }),
        },
    }
}
