//! The code-executor plug-point.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A fenced code block extracted from model output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeBlock {
    /// Language tag from the fence (may be empty).
    pub language: String,
    /// Code body.
    pub code: String,
}

/// Result of executing one or more code blocks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeExecutionResult {
    /// Combined stdout/stderr-style output.
    pub output: String,
}

/// Errors from code execution.
#[derive(Debug, Error)]
pub enum CodeExecutorError {
    /// The executor ran and failed.
    #[error("code execution failed: {0}")]
    Execution(String),
}

/// Opaque code execution capability.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Execute the given blocks and return their combined output.
    async fn execute_code(
        &self,
        ctx: CancellationToken,
        blocks: Vec<CodeBlock>,
    ) -> Result<CodeExecutionResult, CodeExecutorError>;
}
