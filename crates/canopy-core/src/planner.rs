//! The planner plug-point.
//!
//! A planner contributes a planning instruction to the request and may
//! rewrite the final response (e.g. extract plan/thought markers).
//! Built-in planners instead configure thinking/reasoning parameters
//! directly on the request and contribute no instruction.

use async_trait::async_trait;

use crate::invocation::Invocation;
use crate::message::Request;
use crate::model::Response;

/// Planning capability consumed by the flow's planning processors.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Built-in planners configure reasoning fields on the request and
    /// return true; instruction-based planners leave the request alone
    /// and return false.
    fn apply_thinking_config(&self, request: &mut Request) -> bool {
        let _ = request;
        false
    }

    /// Produce the planning instruction injected into the system
    /// message. Not called when [`apply_thinking_config`]
    /// (Planner::apply_thinking_config) returned true.
    async fn build_planning_instruction(
        &self,
        invocation: &Invocation,
        request: &Request,
    ) -> Option<String>;

    /// Rewrite the final response after the model call.
    async fn process_planning_response(
        &self,
        invocation: &Invocation,
        response: Response,
    ) -> Response;
}
