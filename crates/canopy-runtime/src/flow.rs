//! The flow engine — one LLM-backed agent turn loop.
//!
//! Per iteration: request processors assemble the [`Request`], the
//! model streams a response (partials forwarded as events), response
//! rewriters rework the accumulated final response, the final response
//! event is emitted, and response processors execute tool calls,
//! transfer, and output extraction. The loop re-enters while the turn
//! produced tool calls, and terminates when there is nothing left to
//! feed back, `end_invocation` is set, or the context is cancelled.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use canopy_core::agent::EventSender;
use canopy_core::emit::send_event;
use canopy_core::error::{ErrorKind, EventError};
use canopy_core::event::Event;
use canopy_core::invocation::Invocation;
use canopy_core::message::Request;
use canopy_core::model::{ModelError, Response};

use crate::processor::{FlowError, RequestProcessor, ResponseProcessor};

/// Outcome of one turn.
struct TurnOutcome {
    had_tool_calls: bool,
}

/// The per-turn engine driving one LLM-backed agent.
#[derive(Clone, Default)]
pub struct Flow {
    request_processors: Vec<Arc<dyn RequestProcessor>>,
    response_rewriters: Vec<Arc<dyn ResponseProcessor>>,
    response_processors: Vec<Arc<dyn ResponseProcessor>>,
}

/// Builder assembling a flow's processor pipeline.
#[derive(Default)]
pub struct FlowBuilder {
    flow: Flow,
}

impl FlowBuilder {
    /// Append a request processor (order is significant).
    #[must_use]
    pub fn request_processor(mut self, processor: Arc<dyn RequestProcessor>) -> Self {
        self.flow.request_processors.push(processor);
        self
    }

    /// Append a response rewriter. Rewriters run before the final
    /// response event is emitted, so the event carries their output.
    #[must_use]
    pub fn response_rewriter(mut self, processor: Arc<dyn ResponseProcessor>) -> Self {
        self.flow.response_rewriters.push(processor);
        self
    }

    /// Append a response processor. These run after the final response
    /// event, so tool responses follow the assistant message.
    #[must_use]
    pub fn response_processor(mut self, processor: Arc<dyn ResponseProcessor>) -> Self {
        self.flow.response_processors.push(processor);
        self
    }

    /// Finish the pipeline.
    #[must_use]
    pub fn build(self) -> Flow {
        self.flow
    }
}

impl Flow {
    /// Start building a flow.
    #[must_use]
    pub fn builder() -> FlowBuilder {
        FlowBuilder::default()
    }

    /// Drive the turn loop to completion.
    ///
    /// Runtime failures are emitted as error events; this function
    /// only returns once the invocation is over.
    #[instrument(skip_all, fields(agent = %invocation.agent_name, invocation_id = %invocation.invocation_id))]
    pub async fn execute(
        &self,
        ctx: &CancellationToken,
        invocation: &mut Invocation,
        tx: &EventSender,
    ) {
        let mut turn: u32 = 0;
        loop {
            if ctx.is_cancelled() {
                debug!(turn, "flow cancelled");
                break;
            }

            turn += 1;
            match self.run_turn(ctx, invocation, tx).await {
                Ok(outcome) => {
                    if invocation.end_invocation {
                        debug!(turn, "invocation ended");
                        break;
                    }
                    if !outcome.had_tool_calls {
                        debug!(turn, "no tool calls; flow complete");
                        break;
                    }
                }
                Err(FlowError::Stop(reason)) => {
                    info!(turn, reason, "flow stopped by callback");
                    invocation.end_invocation = true;
                    break;
                }
                Err(FlowError::Terminal(error)) => {
                    warn!(turn, error = %error, "flow turn failed");
                    let event = Event::from_error(
                        invocation.invocation_id.clone(),
                        invocation.agent_name.clone(),
                        error.kind,
                        error.message,
                    )
                    .with_branch(invocation.branch.clone());
                    let _ = send_event(ctx, tx, event).await;
                    invocation.end_invocation = true;
                    break;
                }
            }
        }
    }

    async fn run_turn(
        &self,
        ctx: &CancellationToken,
        invocation: &mut Invocation,
        tx: &EventSender,
    ) -> Result<TurnOutcome, FlowError> {
        let turn_start = Instant::now();
        counter!("canopy_flow_turns_total").increment(1);

        // 1. Assemble the request.
        let mut request = Request::default();
        for processor in &self.request_processors {
            debug!(stage = processor.name(), "request processor");
            processor
                .process_request(ctx, invocation, &mut request, tx)
                .await?;
        }

        // 2. Before-model callbacks; a synthesized response skips the
        // model call entirely.
        let mut synthesized = None;
        if let Some(callbacks) = invocation.model_callbacks.clone() {
            synthesized = callbacks
                .before(invocation, &mut request)
                .await
                .map_err(callback_error)?;
        }

        // 3. Model call (streaming).
        let mut response = match synthesized {
            Some(response) => response,
            None => self.call_model(ctx, invocation, &request, tx).await?,
        };

        // 4. After-model callbacks may override the final response.
        if let Some(callbacks) = invocation.model_callbacks.clone() {
            if let Some(overriding) = callbacks
                .after(invocation, &response)
                .await
                .map_err(callback_error)?
            {
                response = overriding;
            }
        }

        // 5. Rewriters rework the final response before it is emitted.
        for processor in &self.response_rewriters {
            debug!(stage = processor.name(), "response rewriter");
            processor
                .process_response(ctx, invocation, &request, &mut response, tx)
                .await?;
        }

        // 6. Emit the final response event.
        let had_tool_calls = !response.tool_calls().is_empty();
        let final_event = Event::from_response(
            invocation.invocation_id.clone(),
            invocation.agent_name.clone(),
            response.clone(),
        )
        .with_branch(invocation.branch.clone());
        let _ = send_event(ctx, tx, final_event).await;

        // 7. Response processors: tool dispatch, transfer, output.
        for processor in &self.response_processors {
            debug!(stage = processor.name(), "response processor");
            processor
                .process_response(ctx, invocation, &request, &mut response, tx)
                .await?;
        }

        histogram!("canopy_flow_turn_duration_seconds")
            .record(turn_start.elapsed().as_secs_f64());

        Ok(TurnOutcome { had_tool_calls })
    }

    /// Call the model, forwarding partial chunks as events and
    /// accumulating the final response.
    async fn call_model(
        &self,
        ctx: &CancellationToken,
        invocation: &Invocation,
        request: &Request,
        tx: &EventSender,
    ) -> Result<Response, FlowError> {
        use futures::StreamExt;

        let model = invocation.model.clone().ok_or_else(|| {
            FlowError::Terminal(EventError::new(
                ErrorKind::FlowError,
                format!("agent {}: no model configured", invocation.agent_name),
            ))
        })?;

        let model_name = model.info().name;
        counter!("canopy_model_requests_total", "model" => model_name.clone()).increment(1);
        let request_start = Instant::now();

        let mut stream = model
            .generate_content(ctx.clone(), request.clone())
            .await
            .map_err(model_error)?;

        let mut text_acc = String::with_capacity(1024);
        let mut final_response: Option<Response> = None;

        loop {
            let item = tokio::select! {
                biased;
                () = ctx.cancelled() => {
                    return Err(FlowError::Terminal(EventError::new(
                        ErrorKind::ContextCancelled,
                        "context cancelled",
                    )));
                }
                item = stream.next() => item,
            };

            match item {
                None => break,
                Some(Err(error)) => return Err(model_error(error)),
                Some(Ok(response)) => {
                    if response.is_partial {
                        for choice in &response.choices {
                            if let Some(delta) = &choice.delta {
                                text_acc.push_str(&delta.content);
                            }
                        }
                        let event = Event::from_response(
                            invocation.invocation_id.clone(),
                            invocation.agent_name.clone(),
                            response,
                        )
                        .with_branch(invocation.branch.clone());
                        let _ = send_event(ctx, tx, event).await;
                    } else {
                        let done = response.done;
                        final_response = Some(response);
                        if done {
                            break;
                        }
                    }
                }
            }
        }

        histogram!("canopy_model_request_duration_seconds", "model" => model_name)
            .record(request_start.elapsed().as_secs_f64());

        // A stream that ended without a final response still produced
        // accumulated text; synthesize the terminal record from it.
        Ok(final_response.unwrap_or_else(|| Response::assistant(text_acc)))
    }
}

fn callback_error(error: canopy_core::callbacks::CallbackError) -> FlowError {
    use canopy_core::callbacks::CallbackError;
    match error {
        CallbackError::Stop(reason) => FlowError::Stop(reason),
        CallbackError::Failure(message) => {
            FlowError::Terminal(EventError::new(ErrorKind::AgentCallbackError, message))
        }
    }
}

fn model_error(error: ModelError) -> FlowError {
    match error {
        ModelError::Cancelled => FlowError::Terminal(EventError::new(
            ErrorKind::ContextCancelled,
            "model stream cancelled",
        )),
        other => FlowError::Terminal(EventError::new(ErrorKind::ApiError, other.to_string())),
    }
}
