//! Chain agent — sequential sub-agent execution on a shared branch.

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

use crate::common::{forward_stream, run_after_agent, run_before_agent, BeforeOutcome};

struct ChainInner {
    info: AgentInfo,
    sub_agents: Vec<Arc<dyn Agent>>,
    callbacks: Option<Arc<AgentCallbacks>>,
    channel_capacity: usize,
}

/// Runs its sub-agents in declaration order, forwarding every event.
/// The branch is inherited unchanged so chained sub-agents observe
/// each other's history.
#[derive(Clone)]
pub struct ChainAgent {
    inner: Arc<ChainInner>,
}

impl ChainAgent {
    /// Chain with the given name and no sub-agents.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ChainInner {
                info: AgentInfo::new(name, ""),
                sub_agents: Vec::new(),
                callbacks: None,
                channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            }),
        }
    }

    fn inner_mut(&mut self) -> &mut ChainInner {
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
impl Agent for ChainAgent {
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
        let sub_agents = self.inner.sub_agents.clone();
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

                for sub_agent in sub_agents {
                    if ctx.is_cancelled() {
                        debug!("chain cancelled");
                        return;
                    }
                    let sub_invocation = invocation.for_sub_agent(&sub_agent);
                    match sub_agent.run(ctx.clone(), sub_invocation).await {
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
                            return;
                        }
                        Ok(mut sub_rx) => {
                            let _ = forward_stream(&ctx, &mut sub_rx, &tx).await;
                        }
                    }
                }

                run_after_agent(&ctx, &invocation, &tx).await;
            },
        );

        Ok(rx)
    }
}
