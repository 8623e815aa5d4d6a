//! Tool registry, function tools, and built-ins for the canopy agent
//! runtime.
//!
//! - [`registry::ToolRegistry`]: the name → tool map consumed by the
//!   flow's dispatcher.
//! - [`function::FunctionTool`] / [`function::StreamingFunctionTool`]:
//!   closure-backed tools, the idiomatic way to define one.
//! - [`transfer::TransferTool`]: the built-in `transfer_to_agent` tool
//!   behind agent handoff.

pub mod function;
pub mod registry;
pub mod transfer;

pub use function::{FunctionTool, StreamingFunctionTool};
pub use registry::ToolRegistry;
pub use transfer::{TransferTool, TRANSFER_TOOL_NAME};
