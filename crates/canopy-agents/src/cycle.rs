//! Cycle agent — looping sub-agent execution with escalation.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use canopy_core::agent::{Agent, AgentInfo, EventReceiver, DEFAULT_CHANNEL_CAPACITY};
use canopy_core::callbacks::AgentCallbacks;
use canopy_core::emit::send_event;
use canopy_core::error::{AgentError, ErrorKind};
use canopy_core::event::Event;
use canopy_core::invocation::Invocation;
use canopy_core::model::ObjectKind;

use crate::common::{run_after_agent, run_before_agent, BeforeOutcome};

/// Escalation predicate over emitted events.
pub type EscalationFn = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Default escalation: any error event, or a done response tagged as
/// an error.
fn default_escalation(event: &Event) -> bool {
    event.error.is_some()
        || event
            .response
            .as_ref()
            .is_some_and(|r| r.done && r.object == ObjectKind::Error)
}

/// Only meaningful events are consulted for escalation: errors, tool
/// responses, and final non-chunk responses. Streaming chunks and
/// preprocessing events never terminate a cycle, regardless of the
/// predicate.
fn is_meaningful(event: &Event) -> bool {
    event.error.is_some()
        || event.object() == Some(ObjectKind::ToolResponse)
        || (event.is_final_response() && !event.is_empty())
}

struct CycleInner {
    info: AgentInfo,
    sub_agents: Vec<Arc<dyn Agent>>,
    max_iterations: Option<u32>,
    escalation: Option<EscalationFn>,
    callbacks: Option<Arc<AgentCallbacks>>,
    channel_capacity: usize,
}

/// Repeats its sub-agents sequentially until an escalation event, the
/// iteration budget, or cancellation. Branch is inherited unchanged.
#[derive(Clone)]
pub struct CycleAgent {
    inner: Arc<CycleInner>,
}

impl CycleAgent {
    /// Cycle with the given name, unbounded iterations, and the
    /// default escalation.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(CycleInner {
                info: AgentInfo::new(name, ""),
                sub_agents: Vec::new(),
                max_iterations: None,
                escalation: None,
                callbacks: None,
                channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            }),
        }
    }

    fn inner_mut(&mut self) -> &mut CycleInner {
        Arc::get_mut(&mut self.inner).expect("builder methods before first run")
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.inner_mut().info.description = description.into();
        self
    }

    /// Append a sub-agent.
    #[must_use]
    pub fn sub_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.inner_mut().sub_agents.push(agent);
        self
    }

    /// Bound the number of iterations.
    #[must_use]
    pub fn max_iterations(mut self, iterations: u32) -> Self {
        self.inner_mut().max_iterations = Some(iterations);
        self
    }

    /// Replace the default escalation predicate. The predicate is only
    /// consulted for meaningful events (errors, tool responses, final
    /// responses); it never observes streaming chunks.
    #[must_use]
    pub fn with_escalation(mut self, escalation: EscalationFn) -> Self {
        self.inner_mut().escalation = Some(escalation);
        self
    }

    /// Attach agent callbacks (used by invocations without their own).
    #[must_use]
    pub fn callbacks(mut self, callbacks: AgentCallbacks) -> Self {
        self.inner_mut().callbacks = Some(Arc::new(callbacks));
        self
    }

    /// Set the output channel capacity.
    #[must_use]
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.inner_mut().channel_capacity = capacity;
        self
    }
}

#[async_trait]
impl Agent for CycleAgent {
    fn info(&self) -> AgentInfo {
        self.inner.info.clone()
    }

    fn sub_agents(&self) -> Vec<Arc<dyn Agent>> {
        self.inner.sub_agents.clone()
    }

    #[instrument(skip_all, fields(agent = %self.inner.info.name))]
    async fn run(
        &self,
        ctx: CancellationToken,
        mut invocation: Invocation,
    ) -> Result<EventReceiver, AgentError> {
        invocation.set_agent(Arc::new(self.clone()));
        if invocation.agent_callbacks.is_none() {
            invocation.agent_callbacks = self.inner.callbacks.clone();
        }

        let (tx, rx) = mpsc::channel(self.inner.channel_capacity);
        let inner = Arc::clone(&self.inner);
        let worker_ctx = ctx.clone();
        let worker_tx = tx.clone();

        crate::common::spawn_producer(
            ctx,
            tx,
            invocation.invocation_id.clone(),
            invocation.agent_name.clone(),
            invocation.branch.clone(),
            async move {
                let ctx = worker_ctx;
                let tx = worker_tx;

                if matches!(
                    run_before_agent(&ctx, &invocation, &tx).await,
                    BeforeOutcome::Terminate
                ) {
                    return;
                }

                let escalate = |event: &Event| -> bool {
                    if !is_meaningful(event) {
                        return false;
                    }
                    match &inner.escalation {
                        Some(custom) => custom(event),
                        None => default_escalation(event),
                    }
                };

                let mut iteration: u32 = 0;
                'iterating: loop {
                    if let Some(max) = inner.max_iterations {
                        if iteration >= max {
                            debug!(iteration, "iteration budget reached");
                            break;
                        }
                    }
                    iteration += 1;

                    for sub_agent in &inner.sub_agents {
                        if ctx.is_cancelled() {
                            break 'iterating;
                        }
                        let sub_invocation = invocation.for_sub_agent(sub_agent);
                        let mut sub_rx = match sub_agent.run(ctx.clone(), sub_invocation).await {
                            Ok(rx) => rx,
                            Err(e) => {
                                warn!(sub_agent = %sub_agent.info().name, error = %e, "sub-agent setup failed");
                                let event = Event::from_error(
                                    invocation.invocation_id.clone(),
                                    invocation.agent_name.clone(),
                                    ErrorKind::FlowError,
                                    format!("sub-agent {} failed: {e}", sub_agent.info().name),
                                )
                                .with_branch(invocation.branch.clone());
                                let _ = send_event(&ctx, &tx, event).await;
                                break 'iterating;
                            }
                        };

                        loop {
                            let event = tokio::select! {
                                biased;
                                () = ctx.cancelled() => break 'iterating,
                                event = sub_rx.recv() => event,
                            };
                            let Some(event) = event else { break };
                            let escalated = escalate(&event);
                            if !send_event(&ctx, &tx, event).await {
                                break 'iterating;
                            }
                            if escalated {
                                debug!(iteration, "escalation observed");
                                break 'iterating;
                            }
                        }
                    }
                }

                run_after_agent(&ctx, &invocation, &tx).await;
            },
        );

        Ok(rx)
    }
}
