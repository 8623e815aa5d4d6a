//! Parallel agent — fan-out/fan-in with branch isolation.
//!
//! Each sub-agent runs concurrently on its own branch
//! (`parent-branch/parent-name/child-name`) with a derived invocation
//! ID, so per-branch filtering hides one child's transcript from
//! another. Child streams merge into one output channel; ordering
//! across children is unspecified. A panicking child is reported as an
//! error event attributed to that child while the others continue.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use canopy_core::agent::{Agent, AgentInfo, EventReceiver, DEFAULT_CHANNEL_CAPACITY};
use canopy_core::branch;
use canopy_core::callbacks::AgentCallbacks;
use canopy_core::emit::send_event;
use canopy_core::error::{AgentError, ErrorKind};
use canopy_core::event::Event;
use canopy_core::invocation::Invocation;
use canopy_core::recover::panic_message;

use crate::common::{forward_stream, run_after_agent, run_before_agent, BeforeOutcome};

struct ParallelInner {
    info: AgentInfo,
    sub_agents: Vec<Arc<dyn Agent>>,
    callbacks: Option<Arc<AgentCallbacks>>,
    channel_capacity: usize,
}

/// Runs all sub-agents concurrently on isolated branches.
#[derive(Clone)]
pub struct ParallelAgent {
    inner: Arc<ParallelInner>,
}

impl ParallelAgent {
    /// Parallel agent with the given name and no sub-agents.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ParallelInner {
                info: AgentInfo::new(name, ""),
                sub_agents: Vec::new(),
                callbacks: None,
                channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            }),
        }
    }

    fn inner_mut(&mut self) -> &mut ParallelInner {
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

    /// Branch for a child of this agent under `parent_branch`.
    fn child_branch(&self, parent_branch: &str, child: &str) -> String {
        branch::child(&branch::child(parent_branch, &self.inner.info.name), child)
    }
}

#[async_trait]
impl Agent for ParallelAgent {
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
        let agent = self.clone();
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

                // One shared cancellable context: ending the parallel
                // agent ends every child.
                let child_ctx = ctx.child_token();
                let mut children: JoinSet<()> = JoinSet::new();

                for sub_agent in agent.inner.sub_agents.clone() {
                    let child_name = sub_agent.info().name;
                    let mut sub_invocation = invocation.for_sub_agent(&sub_agent);
                    sub_invocation.branch =
                        agent.child_branch(&invocation.branch, &child_name);
                    sub_invocation.invocation_id =
                        format!("{}-{child_name}", invocation.invocation_id);

                    let ctx = child_ctx.clone();
                    let tx = tx.clone();
                    let branch = sub_invocation.branch.clone();
                    let derived_id = sub_invocation.invocation_id.clone();

                    let _ = children.spawn(async move {
                        let body = async {
                            match sub_agent.run(ctx.clone(), sub_invocation).await {
                                Err(e) => {
                                    warn!(child = %child_name, error = %e, "child setup failed");
                                    let event = Event::from_error(
                                        derived_id.clone(),
                                        child_name.clone(),
                                        ErrorKind::FlowError,
                                        format!("sub-agent {child_name} failed: {e}"),
                                    )
                                    .with_branch(branch.clone());
                                    let _ = send_event(&ctx, &tx, event).await;
                                }
                                Ok(mut sub_rx) => {
                                    let _ = forward_stream(&ctx, &mut sub_rx, &tx).await;
                                }
                            }
                        };
                        if let Err(panic) =
                            std::panic::AssertUnwindSafe(body).catch_unwind().await
                        {
                            let message = panic_message(panic.as_ref());
                            warn!(child = %child_name, message, "child panicked");
                            let event = Event::from_error(
                                derived_id,
                                child_name,
                                ErrorKind::FlowError,
                                format!("sub-agent panicked: {message}"),
                            )
                            .with_branch(branch);
                            let _ = send_event(&ctx, &tx, event).await;
                        }
                    });
                }

                while children.join_next().await.is_some() {}
                debug!("all children closed");

                // After-agent callbacks run even when children errored.
                run_after_agent(&ctx, &invocation, &tx).await;
            },
        );

        Ok(rx)
    }
}
