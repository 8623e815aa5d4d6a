//! Completion tracker — ID-matched acknowledgement between a flow and
//! its external session writer.
//!
//! A flow that emits a `requires_completion` event registers the
//! event's completion ID *before* sending it, then waits on the
//! returned receiver. The session writer resolves the ID once the
//! event has been persisted. Each registration gets its own oneshot,
//! so any number of completion IDs can be in flight concurrently.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default bound on a completion wait.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of [`wait_for_completion`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The writer acknowledged the ID.
    Completed,
    /// The bounded wait expired.
    TimedOut,
    /// The context was cancelled.
    Cancelled,
}

/// Registry of pending completion IDs.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    pending: Mutex<HashMap<String, Vec<oneshot::Sender<()>>>>,
}

impl CompletionTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in a completion ID. The returned receiver
    /// fires when [`resolve`](Self::resolve) is called with the same ID.
    pub fn register(&self, completion_id: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .entry(completion_id.to_owned())
            .or_default()
            .push(tx);
        rx
    }

    /// Acknowledge a completion ID, waking every registered waiter.
    /// Returns true if at least one waiter was pending.
    pub fn resolve(&self, completion_id: &str) -> bool {
        let Some(waiters) = self.pending.lock().remove(completion_id) else {
            return false;
        };
        let mut woke = false;
        for tx in waiters {
            woke |= tx.send(()).is_ok();
        }
        woke
    }

    /// Number of distinct IDs with pending waiters.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop all pending waiters (their receivers error out).
    pub fn cancel_all(&self) {
        self.pending.lock().clear();
    }
}

/// Wait for a registered completion, bounded by `timeout` and `ctx`.
///
/// On timeout a warning is logged and the caller is expected to
/// continue; the pending registration is left to be garbage-collected
/// by a later resolve.
pub async fn wait_for_completion(
    completion_id: &str,
    receiver: oneshot::Receiver<()>,
    timeout: Duration,
    ctx: &CancellationToken,
) -> WaitOutcome {
    tokio::select! {
        biased;
        () = ctx.cancelled() => WaitOutcome::Cancelled,
        result = tokio::time::timeout(timeout, receiver) => match result {
            Ok(Ok(())) => WaitOutcome::Completed,
            // Sender dropped: the tracker was cancelled.
            Ok(Err(_)) => WaitOutcome::Cancelled,
            Err(_) => {
                warn!(completion_id, ?timeout, "completion wait timed out; continuing");
                WaitOutcome::TimedOut
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn register_then_resolve_wakes_waiter() {
        let tracker = CompletionTracker::new();
        let rx = tracker.register("c-1");
        assert_eq!(tracker.pending_count(), 1);
        assert!(tracker.resolve("c-1"));
        assert_eq!(tracker.pending_count(), 0);
        rx.await.unwrap();
    }

    #[test]
    fn resolve_unknown_returns_false() {
        let tracker = CompletionTracker::new();
        assert!(!tracker.resolve("nope"));
    }

    #[tokio::test]
    async fn multiple_waiters_same_id() {
        let tracker = CompletionTracker::new();
        let rx1 = tracker.register("c-1");
        let rx2 = tracker.register("c-1");
        assert!(tracker.resolve("c-1"));
        rx1.await.unwrap();
        rx2.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_all_errors_receivers() {
        let tracker = CompletionTracker::new();
        let rx = tracker.register("c-1");
        tracker.cancel_all();
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn wait_completes_when_resolved() {
        let tracker = Arc::new(CompletionTracker::new());
        let rx = tracker.register("c-1");
        let ctx = CancellationToken::new();

        let resolver = Arc::clone(&tracker);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = resolver.resolve("c-1");
        });

        let outcome = wait_for_completion("c-1", rx, Duration::from_secs(1), &ctx).await;
        assert_eq!(outcome, WaitOutcome::Completed);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn wait_times_out() {
        let tracker = CompletionTracker::new();
        let rx = tracker.register("c-1");
        let ctx = CancellationToken::new();

        let outcome = wait_for_completion("c-1", rx, Duration::from_millis(20), &ctx).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn wait_observes_cancellation() {
        let tracker = CompletionTracker::new();
        let rx = tracker.register("c-1");
        let ctx = CancellationToken::new();
        ctx.cancel();

        let outcome = wait_for_completion("c-1", rx, Duration::from_secs(5), &ctx).await;
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn distinct_ids_in_flight() {
        let tracker = CompletionTracker::new();
        let rx_a = tracker.register("a");
        let rx_b = tracker.register("b");

        assert!(tracker.resolve("b"));
        rx_b.await.unwrap();
        assert_eq!(tracker.pending_count(), 1);

        assert!(tracker.resolve("a"));
        rx_a.await.unwrap();
    }
}
