//! Agent variants for the canopy runtime.
//!
//! - [`chain::ChainAgent`]: runs sub-agents sequentially on a shared
//!   branch.
//! - [`cycle::CycleAgent`]: loops over its sub-agents until an
//!   escalation or an iteration budget.
//! - [`parallel::ParallelAgent`]: fans sub-agents out onto isolated
//!   branches and merges their streams.
//! - [`llm::LlmAgent`]: an LLM-backed agent driven by the flow engine.
//!
//! Every variant owns exactly one producer task per run; the task
//! closes the output channel on every exit path and converts panics to
//! error events.

mod common;

pub mod chain;
pub mod cycle;
pub mod llm;
pub mod parallel;

pub use chain::ChainAgent;
pub use cycle::{CycleAgent, EscalationFn};
pub use llm::{LlmAgent, LlmAgentBuilder};
pub use parallel::ParallelAgent;
