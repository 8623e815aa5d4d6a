//! Basic request processor — generation config and output plumbing.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use canopy_core::agent::EventSender;
use canopy_core::invocation::Invocation;
use canopy_core::message::{GenerationConfig, Request};
use canopy_core::model::ObjectKind;

use crate::processor::{FlowError, RequestProcessor};
use crate::request::emit_marker;

/// Installs the agent's generation config (streaming on by default)
/// and forwards the invocation's structured-output schema into the
/// request.
#[derive(Clone, Debug, Default)]
pub struct BasicProcessor {
    /// Generation settings configured on the agent.
    pub generation_config: GenerationConfig,
}

impl BasicProcessor {
    /// Processor with the given generation config.
    #[must_use]
    pub fn new(generation_config: GenerationConfig) -> Self {
        Self { generation_config }
    }
}

#[async_trait]
impl RequestProcessor for BasicProcessor {
    fn name(&self) -> &'static str {
        "basic"
    }

    async fn process_request(
        &self,
        ctx: &CancellationToken,
        invocation: &mut Invocation,
        request: &mut Request,
        tx: &EventSender,
    ) -> Result<(), FlowError> {
        request.generation_config = self.generation_config.clone();
        if let Some(spec) = &invocation.structured_output {
            request.structured_output_schema = spec.schema.clone();
        }
        emit_marker(ctx, invocation, tx, ObjectKind::PreprocessingBasic).await;
        Ok(())
    }
}
