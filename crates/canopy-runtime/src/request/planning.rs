//! Planning request processor — planner instruction injection.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use canopy_core::agent::EventSender;
use canopy_core::invocation::Invocation;
use canopy_core::message::Request;
use canopy_core::model::ObjectKind;
use canopy_core::planner::Planner;

use crate::processor::{FlowError, RequestProcessor};
use crate::request::emit_marker;

/// Gives the configured planner a chance to contribute: built-in
/// planners configure thinking/reasoning on the request; others inject
/// a planning instruction into the system message.
#[derive(Clone, Default)]
pub struct PlanningRequestProcessor {
    planner: Option<Arc<dyn Planner>>,
}

impl PlanningRequestProcessor {
    /// Processor with an optional planner.
    #[must_use]
    pub fn new(planner: Option<Arc<dyn Planner>>) -> Self {
        Self { planner }
    }
}

#[async_trait]
impl RequestProcessor for PlanningRequestProcessor {
    fn name(&self) -> &'static str {
        "planning"
    }

    async fn process_request(
        &self,
        ctx: &CancellationToken,
        invocation: &mut Invocation,
        request: &mut Request,
        tx: &EventSender,
    ) -> Result<(), FlowError> {
        let Some(planner) = &self.planner else {
            return Ok(());
        };

        if !planner.apply_thinking_config(request) {
            if let Some(instruction) = planner
                .build_planning_instruction(invocation, request)
                .await
            {
                request.append_system(&instruction);
            }
        }

        emit_marker(ctx, invocation, tx, ObjectKind::PreprocessingPlanning).await;
        Ok(())
    }
}
