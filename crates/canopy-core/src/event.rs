//! The event record — one step of an invocation.
//!
//! Events are immutable once sent: producers clone to modify, and a
//! deep clone is taken whenever an event must outlive its producer
//! (history persistence). An event may carry a response, a typed
//! error, a state delta, and completion-signalling flags; its branch
//! places it in the agent hierarchy for filtering.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::branch;
use crate::error::{ErrorKind, EventError};
use crate::model::{ObjectKind, Response};

/// Side-effect flags attached to an event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventActions {
    /// Suppress the post-tool summarization turn for this event.
    pub skip_summarization: bool,
}

/// In-memory structured-output payload attached to a `state.update`
/// event. Never serialized.
#[derive(Clone)]
pub struct StructuredPayload(Arc<dyn Any + Send + Sync>);

impl StructuredPayload {
    /// Wrap a typed value.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Borrow the payload as `T`, if that is its type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for StructuredPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StructuredPayload(..)")
    }
}

/// Immutable record of one step of an invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event ID.
    pub id: String,
    /// Invocation this event belongs to.
    pub invocation_id: String,
    /// Name of the producing agent.
    pub author: String,
    /// Production timestamp.
    pub timestamp: DateTime<Utc>,
    /// Response payload, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
    /// Typed error, if this is an error event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EventError>,
    /// Hierarchical branch path (`/`-separated; empty = root).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
    /// Whether an external writer must acknowledge this event before
    /// the producing flow continues.
    pub requires_completion: bool,
    /// Acknowledgement ID paired with `requires_completion`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_id: Option<String>,
    /// State changes to be applied by the session writer.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub state_delta: HashMap<String, Vec<u8>>,
    /// Typed structured-output payload (in-memory only).
    #[serde(skip, default)]
    pub structured_output: Option<StructuredPayload>,
    /// Side-effect flags.
    #[serde(default)]
    pub actions: EventActions,
    /// Free-form tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// IDs of long-running tool calls contained in this event.
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub long_running_tool_ids: HashSet<String>,
}

impl Event {
    /// Create a bare event for the given invocation and author.
    #[must_use]
    pub fn new(invocation_id: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            invocation_id: invocation_id.into(),
            author: author.into(),
            timestamp: Utc::now(),
            response: None,
            error: None,
            branch: String::new(),
            requires_completion: false,
            completion_id: None,
            state_delta: HashMap::new(),
            structured_output: None,
            actions: EventActions::default(),
            tag: None,
            long_running_tool_ids: HashSet::new(),
        }
    }

    /// Event carrying a response.
    #[must_use]
    pub fn from_response(
        invocation_id: impl Into<String>,
        author: impl Into<String>,
        response: Response,
    ) -> Self {
        let mut event = Self::new(invocation_id, author);
        event.response = Some(response);
        event
    }

    /// Terminal error event. Carries both the typed error field and an
    /// error-kind response so escalation checks see a done record.
    #[must_use]
    pub fn from_error(
        invocation_id: impl Into<String>,
        author: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        let mut event = Self::new(invocation_id, author);
        let mut response = Response::new(ObjectKind::Error);
        response.done = true;
        response.error = Some(EventError::new(kind, message.clone()));
        event.response = Some(response);
        event.error = Some(EventError::new(kind, message));
        event
    }

    /// Set the branch path.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Mark the event as requiring completion acknowledgement,
    /// assigning a fresh completion ID (returned for registration).
    pub fn require_completion(&mut self) -> String {
        let id = uuid::Uuid::now_v7().to_string();
        self.requires_completion = true;
        self.completion_id = Some(id.clone());
        id
    }

    /// Object kind of the carried response, if any.
    #[must_use]
    pub fn object(&self) -> Option<ObjectKind> {
        self.response.as_ref().map(|r| r.object)
    }

    /// Whether this is a streaming fragment.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.response.as_ref().is_some_and(|r| r.is_partial)
    }

    /// Whether this is a final (done, non-partial) response event.
    #[must_use]
    pub fn is_final_response(&self) -> bool {
        self.response
            .as_ref()
            .is_some_and(|r| r.done && !r.is_partial)
    }

    /// Whether the event carries neither response content, error,
    /// state delta, nor structured output.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.error.is_none()
            && self.state_delta.is_empty()
            && self.structured_output.is_none()
            && self.response.as_ref().is_none_or(Response::is_empty)
    }

    /// Whether this event is visible to an invocation filtering on
    /// `filter_key` (see [`branch::is_visible`]).
    #[must_use]
    pub fn visible_to(&self, filter_key: &str) -> bool {
        branch::is_visible(&self.branch, filter_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_has_unique_id_and_defaults() {
        let a = Event::new("inv-1", "planner");
        let b = Event::new("inv-1", "planner");
        assert_ne!(a.id, b.id);
        assert!(a.branch.is_empty());
        assert!(!a.requires_completion);
        assert!(a.completion_id.is_none());
        assert!(a.is_empty());
    }

    #[test]
    fn error_event_carries_both_fields() {
        let event = Event::from_error("inv-1", "planner", ErrorKind::FlowError, "boom");
        assert_eq!(event.error.as_ref().unwrap().kind, ErrorKind::FlowError);
        let resp = event.response.as_ref().unwrap();
        assert_eq!(resp.object, ObjectKind::Error);
        assert!(resp.done);
        assert!(event.is_final_response());
        assert!(!event.is_empty());
    }

    #[test]
    fn require_completion_assigns_id() {
        let mut event = Event::new("inv-1", "planner");
        let id = event.require_completion();
        assert!(event.requires_completion);
        assert_eq!(event.completion_id.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn partial_and_final_flags() {
        let chunk = Event::from_response("inv-1", "a", Response::chunk("x"));
        assert!(chunk.is_partial());
        assert!(!chunk.is_final_response());

        let done = Event::from_response("inv-1", "a", Response::assistant("x"));
        assert!(!done.is_partial());
        assert!(done.is_final_response());
    }

    #[test]
    fn structured_payload_downcast() {
        #[derive(Debug, PartialEq)]
        struct Extracted {
            a: i64,
        }
        let payload = StructuredPayload::new(Extracted { a: 1 });
        assert_eq!(payload.downcast_ref::<Extracted>(), Some(&Extracted { a: 1 }));
        assert!(payload.downcast_ref::<String>().is_none());
    }

    #[test]
    fn structured_payload_survives_clone_not_serde() {
        let mut event = Event::new("inv-1", "a");
        event.structured_output = Some(StructuredPayload::new(7_i64));
        let cloned = event.clone();
        assert_eq!(
            cloned
                .structured_output
                .as_ref()
                .unwrap()
                .downcast_ref::<i64>(),
            Some(&7)
        );

        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert!(back.structured_output.is_none());
    }

    #[test]
    fn state_delta_roundtrips() {
        let mut event = Event::new("inv-1", "a");
        let _ = event
            .state_delta
            .insert("result".into(), b"{\"ok\":true}".to_vec());
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state_delta["result"], b"{\"ok\":true}".to_vec());
    }

    #[test]
    fn visibility_follows_branch_rules() {
        let event = Event::new("inv-1", "a").with_branch("root/leaf");
        assert!(event.visible_to("root/leaf/child"));
        assert!(event.visible_to("root/leaf"));
        assert!(event.visible_to(""));
        assert!(!event.visible_to("root/other"));
    }
}
