//! Output response processor — structured output and output-key state.
//!
//! Locates the first balanced top-level JSON object or array in the
//! final content (tolerating surrounding prose and code fences),
//! unmarshals it into the invocation's structured-output type, and
//! emits a `state.update` event carrying the typed payload. When an
//! output key is configured, also emits a state-delta event mapping
//! the key to the content bytes, acknowledged by the session writer
//! before downstream agents run.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use canopy_core::agent::EventSender;
use canopy_core::completion::{wait_for_completion, DEFAULT_COMPLETION_TIMEOUT};
use canopy_core::emit::send_event;
use canopy_core::event::Event;
use canopy_core::invocation::Invocation;
use canopy_core::message::Request;
use canopy_core::model::{ObjectKind, Response};

use crate::processor::{FlowError, ResponseProcessor};

/// Extracts structured output and publishes output-key state deltas.
#[derive(Clone, Debug)]
pub struct OutputProcessor {
    output_key: Option<String>,
    completion_timeout: Duration,
}

impl Default for OutputProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputProcessor {
    /// Processor without an output key.
    #[must_use]
    pub fn new() -> Self {
        Self {
            output_key: None,
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
        }
    }

    /// Session-state key receiving the final content.
    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Bound on the completion-acknowledgement wait.
    #[must_use]
    pub fn completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }
}

/// Find the first balanced top-level JSON object or array in free-form
/// text. Single pass, tracking string/escape state and bracket depth.
pub(crate) fn extract_first_json(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        // Find the next candidate opener.
        let Some(offset) = bytes[start..]
            .iter()
            .position(|&b| b == b'{' || b == b'[')
        else {
            return None;
        };
        let open_at = start + offset;

        let mut depth = 0_usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = None;
        for (i, &b) in bytes.iter().enumerate().skip(open_at) {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        end = Some(i + 1);
                        break;
                    }
                }
                _ => {}
            }
        }

        if let Some(end) = end {
            if let Ok(value) = serde_json::from_slice::<Value>(&bytes[open_at..end]) {
                return Some(value);
            }
        }
        start = open_at + 1;
    }
    None
}

fn state_update_event(invocation: &Invocation) -> Event {
    let mut response = Response::new(ObjectKind::StateUpdate);
    response.done = true;
    Event::from_response(
        invocation.invocation_id.clone(),
        invocation.agent_name.clone(),
        response,
    )
    .with_branch(invocation.branch.clone())
}

#[async_trait]
impl ResponseProcessor for OutputProcessor {
    fn name(&self) -> &'static str {
        "output"
    }

    async fn process_response(
        &self,
        ctx: &CancellationToken,
        invocation: &mut Invocation,
        _request: &Request,
        response: &mut Response,
        tx: &EventSender,
    ) -> Result<(), FlowError> {
        let content = response.text();

        if let Some(spec) = invocation.structured_output.clone() {
            match extract_first_json(&content) {
                Some(value) => match spec.parse(&value) {
                    Ok(payload) => {
                        debug!("structured output extracted");
                        let mut event = state_update_event(invocation);
                        event.structured_output = Some(payload);
                        let _ = send_event(ctx, tx, event).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "structured output did not match target type");
                    }
                },
                None => {
                    if !content.is_empty() {
                        warn!("no JSON object found in final content");
                    }
                }
            }
        }

        if let Some(key) = &self.output_key {
            if !content.is_empty() {
                let bytes = match extract_first_json(&content) {
                    Some(value) => serde_json::to_vec(&value)
                        .unwrap_or_else(|_| content.clone().into_bytes()),
                    None => content.clone().into_bytes(),
                };

                let mut event = state_update_event(invocation);
                let _ = event.state_delta.insert(key.clone(), bytes);

                if let Some(tracker) = invocation.completion.clone() {
                    let completion_id = event.require_completion();
                    let receiver = tracker.register(&completion_id);
                    let _ = send_event(ctx, tx, event).await;
                    let _ = wait_for_completion(
                        &completion_id,
                        receiver,
                        self.completion_timeout,
                        ctx,
                    )
                    .await;
                } else {
                    let _ = send_event(ctx, tx, event).await;
                }
            }
        }

        Ok(())
    }
}
