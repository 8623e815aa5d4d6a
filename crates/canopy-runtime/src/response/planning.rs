//! Planning response rewriter — lets the planner rework the final
//! response (extract plan/thought markers) before it is emitted.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use canopy_core::agent::EventSender;
use canopy_core::emit::send_event;
use canopy_core::event::Event;
use canopy_core::invocation::Invocation;
use canopy_core::message::Request;
use canopy_core::model::{ObjectKind, Response};
use canopy_core::planner::Planner;

use crate::processor::{FlowError, ResponseProcessor};

/// Applies `Planner::process_planning_response` to the final response.
#[derive(Clone, Default)]
pub struct PlanningResponseProcessor {
    planner: Option<Arc<dyn Planner>>,
}

impl PlanningResponseProcessor {
    /// Processor with an optional planner.
    #[must_use]
    pub fn new(planner: Option<Arc<dyn Planner>>) -> Self {
        Self { planner }
    }
}

#[async_trait]
impl ResponseProcessor for PlanningResponseProcessor {
    fn name(&self) -> &'static str {
        "planning"
    }

    async fn process_response(
        &self,
        ctx: &CancellationToken,
        invocation: &mut Invocation,
        _request: &Request,
        response: &mut Response,
        tx: &EventSender,
    ) -> Result<(), FlowError> {
        let Some(planner) = &self.planner else {
            return Ok(());
        };

        *response = planner
            .process_planning_response(invocation, response.clone())
            .await;

        let marker = Event::from_response(
            invocation.invocation_id.clone(),
            invocation.agent_name.clone(),
            Response::new(ObjectKind::PostprocessingPlanning),
        )
        .with_branch(invocation.branch.clone());
        let _ = send_event(ctx, tx, marker).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::message::Message;
    use tokio::sync::mpsc;

    struct MarkerStripper;

    #[async_trait]
    impl Planner for MarkerStripper {
        async fn build_planning_instruction(
            &self,
            _invocation: &Invocation,
            _request: &Request,
        ) -> Option<String> {
            None
        }

        async fn process_planning_response(
            &self,
            _invocation: &Invocation,
            mut response: Response,
        ) -> Response {
            for choice in &mut response.choices {
                choice.message.content = choice
                    .message
                    .content
                    .replace("/*PLAN*/", "")
                    .trim()
                    .to_owned();
            }
            response
        }
    }

    #[tokio::test]
    async fn planner_rewrites_final_response() {
        let processor = PlanningResponseProcessor::new(Some(Arc::new(MarkerStripper)));
        let mut invocation = Invocation::new(Message::user("hi"));
        let mut response = Response::assistant("/*PLAN*/ the answer");
        let (tx, mut rx) = mpsc::channel(4);

        processor
            .process_response(
                &CancellationToken::new(),
                &mut invocation,
                &Request::default(),
                &mut response,
                &tx,
            )
            .await
            .unwrap();

        assert_eq!(response.text(), "the answer");
        let marker = rx.recv().await.unwrap();
        assert_eq!(marker.object(), Some(ObjectKind::PostprocessingPlanning));
    }

    #[tokio::test]
    async fn absent_planner_is_a_no_op() {
        let processor = PlanningResponseProcessor::default();
        let mut invocation = Invocation::new(Message::user("hi"));
        let mut response = Response::assistant("text");
        let (tx, mut rx) = mpsc::channel(4);

        processor
            .process_response(
                &CancellationToken::new(),
                &mut invocation,
                &Request::default(),
                &mut response,
                &tx,
            )
            .await
            .unwrap();

        assert_eq!(response.text(), "text");
        drop(tx);
        assert!(rx.recv().await.is_none());
    }
}
