//! `InMemorySession` — event log, state map, and branch summaries.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use canopy_core::event::Event;
use canopy_core::session::{Session, SessionError, Summary};

/// In-memory [`Session`].
///
/// Events are deep-cloned into the log; state is only ever written by
/// applying the delta an appended event carries. Summaries live behind
/// their own lock so concurrent updates from parallel branches are
/// safe.
pub struct InMemorySession {
    id: String,
    events: RwLock<Vec<Event>>,
    state: RwLock<HashMap<String, Vec<u8>>>,
    summaries: RwLock<HashMap<String, Summary>>,
}

impl InMemorySession {
    /// Create an empty session with a fresh ID.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::now_v7().to_string())
    }

    /// Create an empty session with the given ID.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            events: RwLock::new(Vec::new()),
            state: RwLock::new(HashMap::new()),
            summaries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored events.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }
}

impl Default for InMemorySession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Session for InMemorySession {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    async fn append_event(&self, event: Event) -> Result<(), SessionError> {
        if !event.state_delta.is_empty() {
            let mut state = self.state.write();
            for (key, value) in &event.state_delta {
                debug!(session_id = %self.id, key, "applying state delta");
                let _ = state.insert(key.clone(), value.clone());
            }
        }
        self.events.write().push(event);
        Ok(())
    }

    async fn summary(&self, branch: &str) -> Option<Summary> {
        self.summaries.read().get(branch).cloned()
    }

    async fn put_summary(&self, branch: &str, summary: Summary) -> Result<(), SessionError> {
        let _ = self.summaries.write().insert(branch.to_owned(), summary);
        Ok(())
    }

    async fn state(&self, key: &str) -> Option<Vec<u8>> {
        self.state.read().get(key).cloned()
    }
}
