//! Request processors — ordered stages assembling the model request.

pub mod basic;
pub mod content;
pub mod identity;
pub mod instruction;
pub mod planning;
pub mod time;

pub use basic::BasicProcessor;
pub use content::{ContentProcessor, IncludeContents};
pub use identity::IdentityProcessor;
pub use instruction::InstructionProcessor;
pub use planning::PlanningRequestProcessor;
pub use time::TimeProcessor;

use canopy_core::agent::EventSender;
use canopy_core::emit::send_event;
use canopy_core::event::Event;
use canopy_core::invocation::Invocation;
use canopy_core::model::{ObjectKind, Response};
use tokio_util::sync::CancellationToken;

/// Emit a preprocessing marker event for a stage.
pub(crate) async fn emit_marker(
    ctx: &CancellationToken,
    invocation: &Invocation,
    tx: &EventSender,
    kind: ObjectKind,
) {
    let event = Event::from_response(
        invocation.invocation_id.clone(),
        invocation.agent_name.clone(),
        Response::new(kind),
    )
    .with_branch(invocation.branch.clone());
    let _ = send_event(ctx, tx, event).await;
}
