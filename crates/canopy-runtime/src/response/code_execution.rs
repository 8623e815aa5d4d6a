//! Code-execution response rewriter.
//!
//! Extracts fenced code blocks from the final content, runs them
//! through the configured executor, emits one event for the code and
//! one for the result, and clears the original content so it is not
//! duplicated downstream.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use canopy_core::agent::EventSender;
use canopy_core::codeexec::{CodeBlock, CodeExecutor};
use canopy_core::emit::send_event;
use canopy_core::error::{ErrorKind, EventError};
use canopy_core::event::Event;
use canopy_core::invocation::Invocation;
use canopy_core::message::{Message, Request};
use canopy_core::model::{Choice, ObjectKind, Response};

use crate::processor::{FlowError, ResponseProcessor};

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([a-zA-Z0-9_+-]*)\n(.*?)```").expect("fence regex")
});

/// Extract fenced code blocks from text.
pub(crate) fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    FENCE
        .captures_iter(text)
        .map(|caps| CodeBlock {
            language: caps[1].to_owned(),
            code: caps[2].trim_end().to_owned(),
        })
        .collect()
}

/// Runs fenced code blocks through the executor.
#[derive(Clone, Default)]
pub struct CodeExecutionProcessor {
    executor: Option<Arc<dyn CodeExecutor>>,
}

impl CodeExecutionProcessor {
    /// Processor with an optional executor.
    #[must_use]
    pub fn new(executor: Option<Arc<dyn CodeExecutor>>) -> Self {
        Self { executor }
    }
}

fn code_event(invocation: &Invocation, content: String) -> Event {
    let mut response = Response::new(ObjectKind::PostprocessingCodeExecution);
    response.done = true;
    response.choices.push(Choice {
        index: 0,
        message: Message::assistant(content),
        delta: None,
    });
    Event::from_response(
        invocation.invocation_id.clone(),
        invocation.agent_name.clone(),
        response,
    )
    .with_branch(invocation.branch.clone())
}

#[async_trait]
impl ResponseProcessor for CodeExecutionProcessor {
    fn name(&self) -> &'static str {
        "code_execution"
    }

    async fn process_response(
        &self,
        ctx: &CancellationToken,
        invocation: &mut Invocation,
        _request: &Request,
        response: &mut Response,
        tx: &EventSender,
    ) -> Result<(), FlowError> {
        let Some(executor) = &self.executor else {
            return Ok(());
        };

        let content = response.text();
        let blocks = extract_code_blocks(&content);
        if blocks.is_empty() {
            return Ok(());
        }
        debug!(blocks = blocks.len(), "executing fenced code");

        // One event for the code as written by the model.
        let _ = send_event(ctx, tx, code_event(invocation, content)).await;

        let result = executor
            .execute_code(ctx.clone(), blocks)
            .await
            .map_err(|e| {
                FlowError::Terminal(EventError::new(
                    ErrorKind::CodeExecutionError,
                    e.to_string(),
                ))
            })?;

        // One event for the execution result.
        let _ = send_event(
            ctx,
            tx,
            code_event(
                invocation,
                format!("Code execution result:\n{}", result.output),
            ),
        )
        .await;

        // Clear the original content so downstream stages do not see it
        // twice.
        for choice in &mut response.choices {
            choice.message.content.clear();
        }
        Ok(())
    }
}
