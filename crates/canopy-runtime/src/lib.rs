//! Flow engine, processor pipeline, tool dispatch, and runner for the
//! canopy agent runtime.
//!
//! The [`flow::Flow`] drives one LLM-backed agent: request processors
//! assemble the model request, the model streams a response, response
//! rewriters may rework it, and response processors execute tool
//! calls, handle agent transfer, and extract structured output. The
//! [`runner::Runner`] is the in-process session writer that persists
//! events and acknowledges completion IDs.

pub mod flow;
pub mod processor;
pub mod request;
pub mod response;
pub mod runner;

pub use flow::{Flow, FlowBuilder};
pub use processor::{FlowError, RequestProcessor, ResponseProcessor};
pub use runner::Runner;
