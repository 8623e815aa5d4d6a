//! Content request processor — conversation history assembly.
//!
//! Builds the request's message list from session history: branch
//! filtering, skipping partials and empty events, converting
//! foreign-agent events to user-prefixed context lines, and
//! rearranging function call/response pairs so every tool response
//! message immediately follows its call, with async responses merged
//! into a single event. Honors the include-contents mode, a
//! max-history-runs limit, and an optional session-summary mode.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use canopy_core::agent::EventSender;
use canopy_core::event::Event;
use canopy_core::invocation::Invocation;
use canopy_core::message::{Message, Request, Role};
use canopy_core::model::ObjectKind;

use crate::processor::{FlowError, RequestProcessor};
use crate::request::emit_marker;

/// Author string for user-originated events.
pub const USER_AUTHOR: &str = "user";

/// How much history the request sees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IncludeContents {
    /// Only the inbound message; no history.
    None,
    /// Full history, no branch filtering.
    All,
    /// History filtered by the invocation's branch.
    #[default]
    Filtered,
}

/// Assembles conversation history from the session.
#[derive(Clone, Debug, Default)]
pub struct ContentProcessor {
    include_contents: IncludeContents,
    max_history_runs: Option<usize>,
    add_session_summary: bool,
}

impl ContentProcessor {
    /// Processor with default settings (filtered, unlimited history).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the include-contents mode.
    #[must_use]
    pub fn include_contents(mut self, mode: IncludeContents) -> Self {
        self.include_contents = mode;
        self
    }

    /// Limit history to the last `runs` user turns.
    #[must_use]
    pub fn max_history_runs(mut self, runs: usize) -> Self {
        self.max_history_runs = Some(runs);
        self
    }

    /// Replace pre-summary history with the branch summary.
    #[must_use]
    pub fn add_session_summary(mut self) -> Self {
        self.add_session_summary = true;
        self
    }
}

#[async_trait]
impl RequestProcessor for ContentProcessor {
    fn name(&self) -> &'static str {
        "content"
    }

    async fn process_request(
        &self,
        ctx: &CancellationToken,
        invocation: &mut Invocation,
        request: &mut Request,
        tx: &EventSender,
    ) -> Result<(), FlowError> {
        // Explicit messages override replaces history entirely.
        if let Some(messages) = invocation.run_options.messages.clone() {
            request.messages.extend(messages);
            emit_marker(ctx, invocation, tx, ObjectKind::PreprocessingContent).await;
            return Ok(());
        }

        if self.include_contents == IncludeContents::None {
            if !invocation.message.is_empty() {
                request.messages.push(invocation.message.clone());
            }
            emit_marker(ctx, invocation, tx, ObjectKind::PreprocessingContent).await;
            return Ok(());
        }

        let mut events = match &invocation.session {
            Some(session) => session.events().await,
            None => Vec::new(),
        };

        if self.add_session_summary {
            if let Some(session) = &invocation.session {
                if let Some(summary) = session.summary(&invocation.branch).await {
                    debug!(branch = %invocation.branch, "replacing history with summary");
                    events.retain(|e| e.timestamp > summary.updated_at);
                    request.append_system(&format!(
                        "Summary of the conversation so far:\n{}",
                        summary.text
                    ));
                }
            }
        }

        let filter_key = invocation.branch.clone();
        let filtered = self.include_contents == IncludeContents::Filtered;
        events.retain(|event| {
            (!filtered || event.visible_to(&filter_key)) && !event.is_partial() && !event.is_empty()
        });

        if let Some(max_runs) = self.max_history_runs {
            events = truncate_to_runs(events, max_runs);
        }

        let events = rearrange_function_responses(events);
        let mut messages = convert_events(&invocation.agent_name, &events);

        // Make sure the inbound message is present even when the
        // session has not recorded it (standalone runs).
        if !invocation.message.is_empty() && !messages.contains(&invocation.message) {
            messages.push(invocation.message.clone());
        }

        request.messages.extend(messages);
        emit_marker(ctx, invocation, tx, ObjectKind::PreprocessingContent).await;
        Ok(())
    }
}

/// Keep only the last `max_runs` user turns (a run starts at each
/// user-authored event). Zero means no history at all.
fn truncate_to_runs(events: Vec<Event>, max_runs: usize) -> Vec<Event> {
    let user_indices: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.author == USER_AUTHOR)
        .map(|(i, _)| i)
        .collect();
    if max_runs == 0 {
        return Vec::new();
    }
    if user_indices.len() <= max_runs {
        return events;
    }
    let start = user_indices[user_indices.len() - max_runs];
    events[start..].to_vec()
}

fn event_call_ids(event: &Event) -> Vec<String> {
    event.response.as_ref().map_or_else(Vec::new, |response| {
        response
            .choices
            .iter()
            .flat_map(|c| c.message.tool_calls.iter().map(|tc| tc.id.clone()))
            .collect()
    })
}

fn is_response_event(event: &Event) -> bool {
    event.response.as_ref().is_some_and(|response| {
        response
            .choices
            .iter()
            .any(|c| c.message.tool_call_id.is_some())
    })
}

/// Place every tool-response event immediately after its originating
/// call event, merging multiple async response events into one.
/// Running this twice yields the same result as running it once.
pub(crate) fn rearrange_function_responses(events: Vec<Event>) -> Vec<Event> {
    let mut consumed = vec![false; events.len()];
    let mut out = Vec::with_capacity(events.len());

    for i in 0..events.len() {
        if consumed[i] {
            continue;
        }
        let call_ids = event_call_ids(&events[i]);
        out.push(events[i].clone());
        consumed[i] = true;
        if call_ids.is_empty() {
            continue;
        }

        // Gather all later response events answering these calls.
        let mut merged: Option<Event> = None;
        for (j, candidate) in events.iter().enumerate().skip(i + 1) {
            if consumed[j] || !is_response_event(candidate) {
                continue;
            }
            let answers = candidate
                .response
                .as_ref()
                .is_some_and(|r| {
                    r.choices.iter().any(|c| {
                        c.message
                            .tool_call_id
                            .as_ref()
                            .is_some_and(|id| call_ids.contains(id))
                    })
                });
            if !answers {
                continue;
            }
            consumed[j] = true;
            match &mut merged {
                None => merged = Some(candidate.clone()),
                Some(base) => {
                    if let (Some(base_resp), Some(extra)) =
                        (base.response.as_mut(), candidate.response.as_ref())
                    {
                        base_resp.choices.extend(extra.choices.iter().cloned());
                    }
                }
            }
        }

        if let Some(mut merged) = merged {
            if let Some(response) = merged.response.as_mut() {
                response.choices.sort_by_key(|c| {
                    c.message
                        .tool_call_id
                        .as_ref()
                        .and_then(|id| call_ids.iter().position(|cid| cid == id))
                        .unwrap_or(usize::MAX)
                });
                for (index, choice) in response.choices.iter_mut().enumerate() {
                    choice.index = u32::try_from(index).unwrap_or(u32::MAX);
                }
            }
            out.push(merged);
        }
    }

    out
}

fn foreign_context_line(author: &str, message: &Message) -> String {
    if message.role == Role::Tool {
        let tool = message.tool_name.as_deref().unwrap_or("unknown");
        format!(
            "For context: [{author}] tool `{tool}` returned: {}",
            message.content
        )
    } else if !message.tool_calls.is_empty() {
        let calls: Vec<String> = message
            .tool_calls
            .iter()
            .map(|tc| {
                format!(
                    "`{}` with arguments: {}",
                    tc.name,
                    serde_json::Value::Object(tc.arguments.clone())
                )
            })
            .collect();
        format!("For context: [{author}] called tool {}", calls.join(", "))
    } else {
        format!("For context: [{author}] said: {}", message.content)
    }
}

/// Convert events to request messages. Foreign-agent events become
/// user-prefixed context lines.
fn convert_events(current_agent: &str, events: &[Event]) -> Vec<Message> {
    let mut messages = Vec::new();
    for event in events {
        let Some(response) = &event.response else {
            continue;
        };
        let foreign = event.author != current_agent && event.author != USER_AUTHOR;
        for choice in &response.choices {
            let message = &choice.message;
            if message.is_empty() {
                continue;
            }
            if foreign {
                messages.push(Message::user(foreign_context_line(&event.author, message)));
            } else {
                messages.push(message.clone());
            }
        }
    }
    messages
}
