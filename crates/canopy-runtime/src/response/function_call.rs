//! Function-call response processor — tool dispatch.
//!
//! Pipeline per call: resolve (with sub-agent-name compatibility
//! mapping onto the transfer tool) → before-tool callbacks → execute
//! (streaming or callable) → after-tool callbacks → marshal. Results
//! merge into a single `tool.response` event whose choices keep the
//! originating call order, marked for completion acknowledgement so
//! the flow blocks until the session writer has persisted it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use metrics::{counter, histogram};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use canopy_core::agent::EventSender;
use canopy_core::callbacks::{CallbackError, ToolCallbacks};
use canopy_core::completion::{wait_for_completion, DEFAULT_COMPLETION_TIMEOUT};
use canopy_core::emit::send_event;
use canopy_core::event::Event;
use canopy_core::invocation::Invocation;
use canopy_core::message::{Message, Request, Role, ToolCall};
use canopy_core::model::{Choice, MessageDelta, ObjectKind, Response};
use canopy_core::recover::panic_message;
use canopy_core::tool::{StreamableTool, Tool, ToolChunk, ToolContext, ToolError};
use canopy_tools::registry::ToolRegistry;
use canopy_tools::transfer::TRANSFER_TOOL_NAME;

use crate::processor::{FlowError, ResponseProcessor};

/// Message used when an unknown-tool call is mapped onto a sub-agent
/// transfer without an explicit message argument.
pub const DEFAULT_DELEGATION_MESSAGE: &str = "Task delegated from coordinator";

/// Dispatches the tool calls of the final response.
#[derive(Clone)]
pub struct FunctionCallProcessor {
    registry: ToolRegistry,
    parallel: bool,
    completion_timeout: Duration,
}

impl FunctionCallProcessor {
    /// Processor over the given registry; serial dispatch by default.
    #[must_use]
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            parallel: false,
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
        }
    }

    /// Enable parallel dispatch (used when a response carries two or
    /// more calls).
    #[must_use]
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    /// Bound on the completion-acknowledgement wait.
    #[must_use]
    pub fn completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    /// Resolve a call to a tool, rewriting unknown names that match a
    /// sub-agent into a transfer-tool call.
    fn resolve(&self, invocation: &Invocation, call: &ToolCall) -> ResolvedCall {
        if let Some(tool) = self.registry.get(&call.name) {
            return ResolvedCall {
                call: call.clone(),
                tool: Some(Arc::clone(tool)),
            };
        }

        let matches_sub_agent = invocation
            .agent
            .as_ref()
            .is_some_and(|agent| agent.find_sub_agent(&call.name).is_some());
        if matches_sub_agent {
            if let Some(transfer) = self.registry.get(TRANSFER_TOOL_NAME) {
                debug!(requested = %call.name, "mapping unknown tool onto sub-agent transfer");
                let message = call
                    .arguments
                    .get("message")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(DEFAULT_DELEGATION_MESSAGE);
                let mut arguments = Map::new();
                let _ = arguments.insert("agent_name".into(), Value::String(call.name.clone()));
                let _ = arguments.insert("message".into(), Value::String(message.to_owned()));
                let _ = arguments.insert("end_invocation".into(), Value::Bool(false));
                return ResolvedCall {
                    call: ToolCall {
                        content_type: call.content_type.clone(),
                        id: call.id.clone(),
                        name: TRANSFER_TOOL_NAME.into(),
                        arguments,
                    },
                    tool: Some(Arc::clone(transfer)),
                };
            }
        }

        error!(tool_name = %call.name, "tool not found");
        ResolvedCall {
            call: call.clone(),
            tool: None,
        }
    }
}

struct ResolvedCall {
    call: ToolCall,
    tool: Option<Arc<dyn Tool>>,
}

struct CallOutcome {
    call_id: String,
    tool_name: String,
    choice: Option<Choice>,
    skip_summarization: bool,
    long_running: bool,
}

/// Shared environment for one dispatch batch.
#[derive(Clone)]
struct CallEnv {
    ctx: CancellationToken,
    tool_ctx: ToolContext,
    callbacks: Option<Arc<ToolCallbacks>>,
    invocation_id: String,
    agent_name: String,
    branch: String,
    tx: EventSender,
    parallel: bool,
}

fn tool_choice(call_id: &str, tool_name: &str, content: String) -> Choice {
    Choice {
        index: 0,
        message: Message::tool_response(call_id, tool_name, content),
        delta: None,
    }
}

fn error_choice(call_id: &str, tool_name: &str, message: &str) -> Choice {
    tool_choice(
        call_id,
        tool_name,
        serde_json::json!({ "error": message }).to_string(),
    )
}

fn error_outcome(call_id: &str, tool_name: &str, message: &str) -> CallOutcome {
    CallOutcome {
        call_id: call_id.to_owned(),
        tool_name: tool_name.to_owned(),
        choice: Some(error_choice(call_id, tool_name, message)),
        skip_summarization: false,
        long_running: false,
    }
}

/// Execute one resolved call through the callback/execute/marshal
/// pipeline.
#[instrument(skip_all, fields(tool_name = %resolved.call.name, tool_call_id = %resolved.call.id))]
async fn execute_call(env: CallEnv, resolved: ResolvedCall) -> Result<CallOutcome, FlowError> {
    let call = resolved.call;
    let Some(tool) = resolved.tool else {
        return Ok(error_outcome(
            &call.id,
            &call.name,
            &format!("tool not found: {}", call.name),
        ));
    };

    let start = Instant::now();
    counter!("canopy_tool_executions_total", "tool" => call.name.clone()).increment(1);

    let mut args = Value::Object(call.arguments.clone());

    // Before-tool callbacks; a synthesized value bypasses execution.
    let mut output: Option<Result<Option<Value>, ToolError>> = None;
    if let Some(callbacks) = &env.callbacks {
        match callbacks.before(&call.name, &mut args).await {
            Ok(Some(value)) => output = Some(Ok(Some(value))),
            Ok(None) => {}
            Err(CallbackError::Stop(reason)) => return Err(FlowError::Stop(reason)),
            Err(CallbackError::Failure(message)) => {
                output = Some(Err(ToolError::Execution(format!(
                    "callback error: {message}"
                ))));
            }
        }
    }

    let mut output = match output {
        Some(result) => result,
        None => dispatch(&env, tool.as_ref(), &call, args.clone()).await,
    };

    // After-tool callbacks may override the result.
    if let Some(callbacks) = &env.callbacks {
        let observed: Result<Value, ToolError> = match &output {
            Ok(Some(value)) => Ok(value.clone()),
            Ok(None) => Ok(Value::Null),
            Err(e) => Err(ToolError::Execution(e.to_string())),
        };
        match callbacks.after(&call.name, &args, &observed).await {
            Ok(Some(value)) => output = Ok(Some(value)),
            Ok(None) => {}
            Err(CallbackError::Stop(reason)) => return Err(FlowError::Stop(reason)),
            Err(CallbackError::Failure(message)) => {
                output = Err(ToolError::Execution(format!("callback error: {message}")));
            }
        }
    }

    histogram!("canopy_tool_duration_seconds", "tool" => call.name.clone())
        .record(start.elapsed().as_secs_f64());

    let long_running = tool.is_long_running();
    let choice = match output {
        Err(e) => Some(error_choice(&call.id, &call.name, &e.to_string())),
        // Tool streamed everything inline; no explicit response.
        Ok(None) => None,
        Ok(Some(Value::Null)) if long_running => {
            // Serial: no choice. Parallel: a nil placeholder result.
            env.parallel
                .then(|| tool_choice(&call.id, &call.name, "null".into()))
        }
        Ok(Some(value)) => match serde_json::to_string(&value) {
            Ok(text) => Some(tool_choice(&call.id, &call.name, text)),
            Err(e) => Some(error_choice(
                &call.id,
                &call.name,
                &format!("failed to marshal tool result: {e}"),
            )),
        },
    };

    Ok(CallOutcome {
        call_id: call.id,
        tool_name: call.name,
        choice,
        skip_summarization: tool.skip_summarization(),
        long_running,
    })
}

/// Execute by capability: streaming when declared and preferred,
/// otherwise direct call.
async fn dispatch(
    env: &CallEnv,
    tool: &dyn Tool,
    call: &ToolCall,
    args: Value,
) -> Result<Option<Value>, ToolError> {
    if env.ctx.is_cancelled() {
        return Err(ToolError::Cancelled);
    }

    if let Some(streamable) = tool.as_streamable() {
        if tool.stream_inner().unwrap_or(true) {
            return run_streaming(env, streamable, call, args).await;
        }
    }
    if let Some(callable) = tool.as_callable() {
        return callable.call(&env.tool_ctx, args).await.map(Some);
    }
    Err(ToolError::Execution(format!(
        "unsupported tool: {}",
        call.name
    )))
}

/// Consume a streamable tool: forward inner events (normalized to the
/// current invocation), emit partial tool.response events for value
/// chunks, and aggregate the textual content as the final return.
async fn run_streaming(
    env: &CallEnv,
    tool: &dyn StreamableTool,
    call: &ToolCall,
    args: Value,
) -> Result<Option<Value>, ToolError> {
    let mut stream = tool.stream_call(&env.tool_ctx, args).await?;
    let mut aggregate = String::new();

    loop {
        let item = tokio::select! {
            biased;
            () = env.ctx.cancelled() => return Err(ToolError::Cancelled),
            item = stream.next() => item,
        };
        let Some(item) = item else { break };

        match item? {
            ToolChunk::Event(mut inner) => {
                inner.invocation_id = env.invocation_id.clone();
                inner.branch = env.branch.clone();
                let text = inner.response.as_ref().map(Response::text).unwrap_or_default();
                if inner.is_final_response() && !text.is_empty() {
                    // A final full assistant message would duplicate
                    // the forwarded inner output; keep its text only.
                    aggregate.push_str(&text);
                } else {
                    let _ = send_event(&env.ctx, &env.tx, *inner).await;
                }
            }
            chunk @ (ToolChunk::Json(_) | ToolChunk::Text(_)) => {
                let text = match chunk {
                    ToolChunk::Text(text) => text,
                    ToolChunk::Json(value) => {
                        if let Value::String(s) = value {
                            s
                        } else {
                            serde_json::to_string(&value)
                                .map_err(|e| ToolError::Execution(e.to_string()))?
                        }
                    }
                    ToolChunk::Event(_) => unreachable!("matched above"),
                };
                aggregate.push_str(&text);

                let mut response = Response::new(ObjectKind::ToolResponse);
                response.is_partial = true;
                response.choices.push(Choice {
                    index: 0,
                    message: Message {
                        role: Role::Tool,
                        tool_call_id: Some(call.id.clone()),
                        tool_name: Some(call.name.clone()),
                        ..Message::default()
                    },
                    delta: Some(MessageDelta { content: text }),
                });
                let event = Event::from_response(
                    env.invocation_id.clone(),
                    env.agent_name.clone(),
                    response,
                )
                .with_branch(env.branch.clone());
                let _ = send_event(&env.ctx, &env.tx, event).await;
            }
        }
    }

    Ok((!aggregate.is_empty()).then(|| Value::String(aggregate)))
}

#[async_trait]
impl ResponseProcessor for FunctionCallProcessor {
    fn name(&self) -> &'static str {
        "function_call"
    }

    #[allow(clippy::too_many_lines)]
    async fn process_response(
        &self,
        ctx: &CancellationToken,
        invocation: &mut Invocation,
        _request: &Request,
        response: &mut Response,
        tx: &EventSender,
    ) -> Result<(), FlowError> {
        let calls = response.tool_calls().to_vec();
        if calls.is_empty() {
            return Ok(());
        }

        let tool_ctx = ToolContext::for_invocation(invocation, ctx.clone());
        let env = CallEnv {
            ctx: ctx.clone(),
            tool_ctx: tool_ctx.clone(),
            callbacks: invocation.tool_callbacks.clone(),
            invocation_id: invocation.invocation_id.clone(),
            agent_name: invocation.agent_name.clone(),
            branch: invocation.branch.clone(),
            tx: tx.clone(),
            parallel: self.parallel && calls.len() >= 2,
        };
        let resolved: Vec<ResolvedCall> =
            calls.iter().map(|c| self.resolve(invocation, c)).collect();

        let outcomes = if env.parallel {
            // Names kept aside so a panicking task can still be
            // reported positionally.
            let meta: Vec<(String, String)> = resolved
                .iter()
                .map(|r| (r.call.id.clone(), r.call.name.clone()))
                .collect();
            let handles: Vec<_> = resolved
                .into_iter()
                .map(|r| tokio::spawn(execute_call(env.clone(), r)))
                .collect();

            let mut outcomes = Vec::with_capacity(handles.len());
            let mut stop: Option<FlowError> = None;
            for (i, handle) in handles.into_iter().enumerate() {
                match handle.await {
                    Ok(Ok(outcome)) => outcomes.push(outcome),
                    Ok(Err(flow_error)) => stop = Some(flow_error),
                    Err(join_error) if join_error.is_panic() => {
                        let message = panic_message(join_error.into_panic().as_ref());
                        warn!(tool_name = %meta[i].1, message, "tool panicked");
                        outcomes.push(error_outcome(
                            &meta[i].0,
                            &meta[i].1,
                            &format!("tool panicked: {message}"),
                        ));
                    }
                    Err(_) => {
                        outcomes.push(error_outcome(&meta[i].0, &meta[i].1, "tool task cancelled"));
                    }
                }
            }
            if let Some(stop) = stop {
                return Err(stop);
            }
            outcomes
        } else {
            let mut outcomes = Vec::with_capacity(resolved.len());
            for r in resolved {
                outcomes.push(execute_call(env.clone(), r).await?);
            }
            outcomes
        };

        // Merge outcomes into one tool.response event, positional order.
        let mut skip_summarization = false;
        let mut long_running_ids = HashSet::new();
        let mut choices = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            skip_summarization |= outcome.skip_summarization;
            if outcome.long_running {
                let _ = long_running_ids.insert(outcome.call_id.clone());
            }
            match outcome.choice {
                Some(choice) => choices.push(choice),
                // A tool that forwarded everything inline still owes
                // the wire protocol one tool message for its call.
                // Long-running no-value calls are the exception: no
                // choice in the serial path.
                None if !outcome.long_running => {
                    choices.push(tool_choice(&outcome.call_id, &outcome.tool_name, String::new()));
                }
                None => {}
            }
        }
        if choices.is_empty() && !calls.is_empty() {
            // Nothing but long-running no-value calls; synthesize one
            // minimal empty tool response per call.
            choices = calls
                .iter()
                .map(|c| tool_choice(&c.id, &c.name, String::new()))
                .collect();
        }
        for (index, choice) in choices.iter_mut().enumerate() {
            choice.index = u32::try_from(index).unwrap_or(u32::MAX);
        }

        let mut merged = Response::new(ObjectKind::ToolResponse);
        merged.done = true;
        merged.choices = choices;

        let mut event = Event::from_response(
            invocation.invocation_id.clone(),
            invocation.agent_name.clone(),
            merged,
        )
        .with_branch(invocation.branch.clone());
        event.actions.skip_summarization = skip_summarization;
        event.long_running_tool_ids = long_running_ids;

        if let Some(tracker) = invocation.completion.clone() {
            let completion_id = event.require_completion();
            let receiver = tracker.register(&completion_id);
            let _ = send_event(ctx, tx, event).await;
            let _ = wait_for_completion(&completion_id, receiver, self.completion_timeout, ctx)
                .await;
        } else {
            let _ = send_event(ctx, tx, event).await;
        }

        if let Some(transfer) = tool_ctx.actions.take_transfer() {
            debug!(target = %transfer.agent_name, "tool requested transfer");
            invocation.transfer_info = Some(transfer);
        }

        Ok(())
    }
}
