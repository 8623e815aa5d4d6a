//! The built-in `transfer_to_agent` tool.
//!
//! Calling it does not run the target agent; it records a
//! [`TransferInfo`] on the dispatching context's actions slot, which
//! the flow's transfer processor picks up after the turn.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use canopy_core::invocation::TransferInfo;
use canopy_core::message::Declaration;
use canopy_core::tool::{CallableTool, Tool, ToolContext, ToolError};

/// Name under which the transfer tool is registered.
pub const TRANSFER_TOOL_NAME: &str = "transfer_to_agent";

#[derive(Debug, Deserialize)]
struct TransferArgs {
    agent_name: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    end_invocation: bool,
}

/// Built-in tool requesting a handoff to a named sub-agent.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransferTool;

impl TransferTool {
    /// Create the transfer tool.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Tool for TransferTool {
    fn declaration(&self) -> Declaration {
        Declaration::new(
            TRANSFER_TOOL_NAME,
            "Transfer control of the conversation to a named sub-agent.",
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "agent_name": {
                    "type": "string",
                    "description": "Name of the sub-agent to hand control to."
                },
                "message": {
                    "type": "string",
                    "description": "Message initiating the target agent's run."
                },
                "end_invocation": {
                    "type": "boolean",
                    "description": "End the invocation once the target completes."
                }
            },
            "required": ["agent_name"]
        }))
    }

    fn skip_summarization(&self) -> bool {
        // The target agent produces the user-facing response.
        true
    }

    fn as_callable(&self) -> Option<&dyn CallableTool> {
        Some(self)
    }
}

#[async_trait]
impl CallableTool for TransferTool {
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let args: TransferArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        debug!(
            agent = %ctx.agent_name,
            target = %args.agent_name,
            end_invocation = args.end_invocation,
            "transfer requested"
        );

        ctx.actions.request_transfer(TransferInfo {
            agent_name: args.agent_name.clone(),
            message: args.message,
            end_invocation: args.end_invocation,
        });

        Ok(json!({
            "status": format!("transferring to agent: {}", args.agent_name),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::invocation::Invocation;
    use canopy_core::message::Message;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> ToolContext {
        let invocation = Invocation::new(Message::user("hi"));
        ToolContext::for_invocation(&invocation, CancellationToken::new())
    }

    #[tokio::test]
    async fn records_transfer_on_actions() {
        let tool = TransferTool::new();
        let ctx = ctx();

        let result = tool
            .call(
                &ctx,
                json!({"agent_name": "weather-agent", "message": "hi Tokyo", "end_invocation": false}),
            )
            .await
            .unwrap();
        assert!(result["status"].as_str().unwrap().contains("weather-agent"));

        let transfer = ctx.actions.take_transfer().unwrap();
        assert_eq!(transfer.agent_name, "weather-agent");
        assert_eq!(transfer.message, "hi Tokyo");
        assert!(!transfer.end_invocation);
    }

    #[tokio::test]
    async fn message_and_end_invocation_default() {
        let tool = TransferTool::new();
        let ctx = ctx();
        let _ = tool.call(&ctx, json!({"agent_name": "t"})).await.unwrap();
        let transfer = ctx.actions.take_transfer().unwrap();
        assert!(transfer.message.is_empty());
        assert!(!transfer.end_invocation);
    }

    #[tokio::test]
    async fn missing_agent_name_is_invalid() {
        let tool = TransferTool::new();
        let err = tool.call(&ctx(), json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn declaration_shape() {
        let decl = TransferTool::new().declaration();
        assert_eq!(decl.name, TRANSFER_TOOL_NAME);
        assert_eq!(decl.parameters["required"][0], "agent_name");
    }

    #[test]
    fn transfer_tool_skips_summarization() {
        assert!(Tool::skip_summarization(&TransferTool::new()));
    }
}
