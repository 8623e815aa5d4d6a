//! Instruction request processor — static instructions and the
//! JSON-only schema instruction.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use canopy_core::agent::EventSender;
use canopy_core::invocation::Invocation;
use canopy_core::message::Request;
use canopy_core::model::ObjectKind;

use crate::processor::{FlowError, RequestProcessor};
use crate::request::emit_marker;

/// Appends the agent's static instruction and system prompt to the
/// system message. When an output schema is configured (on the agent
/// or via the invocation's structured output), also appends a
/// JSON-only instruction rendering the schema.
#[derive(Clone, Debug, Default)]
pub struct InstructionProcessor {
    instruction: Option<String>,
    system_prompt: Option<String>,
    output_schema: Option<Value>,
}

impl InstructionProcessor {
    /// Empty processor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Static instruction appended to the system message.
    #[must_use]
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Additional system prompt appended after the instruction.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// JSON output schema configured on the agent.
    #[must_use]
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

fn json_only_instruction(schema: &Value) -> String {
    format!(
        "Respond ONLY with a JSON object matching this schema, with no \
         surrounding prose or code fences:\n{}",
        serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string())
    )
}

#[async_trait]
impl RequestProcessor for InstructionProcessor {
    fn name(&self) -> &'static str {
        "instruction"
    }

    async fn process_request(
        &self,
        ctx: &CancellationToken,
        invocation: &mut Invocation,
        request: &mut Request,
        tx: &EventSender,
    ) -> Result<(), FlowError> {
        if let Some(instruction) = &self.instruction {
            request.append_system(instruction);
        }
        if let Some(prompt) = &self.system_prompt {
            request.append_system(prompt);
        }

        let schema = request
            .structured_output_schema
            .clone()
            .or_else(|| self.output_schema.clone());
        if let Some(schema) = schema {
            request.append_system(&json_only_instruction(&schema));
        }

        emit_marker(ctx, invocation, tx, ObjectKind::PreprocessingInstruction).await;
        Ok(())
    }
}
