//! Panic payload rendering.
//!
//! Every task that invokes user-supplied code (tools, callbacks,
//! sub-agents) recovers panics and converts them to error events; this
//! helper turns the opaque payload into a message.

use std::any::Any;

/// Render a panic payload as a human-readable message.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
