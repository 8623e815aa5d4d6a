//! In-memory session implementation for the canopy agent runtime.
//!
//! [`InMemorySession`] is the reference
//! [`Session`](canopy_core::session::Session) used by the runner and
//! tests: an ordered event log, a state map mutated only by
//! state-delta events, and branch-keyed summaries behind a
//! session-owned lock.

pub mod memory;

pub use memory::InMemorySession;
