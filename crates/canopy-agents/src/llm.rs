//! LLM-backed agent — a flow pipeline behind the agent capability.

use std::sync::Arc;

use async_trait::async_trait;
use chrono_tz::Tz;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use canopy_core::agent::{Agent, AgentInfo, EventReceiver, DEFAULT_CHANNEL_CAPACITY};
use canopy_core::callbacks::{AgentCallbacks, ModelCallbacks, ToolCallbacks};
use canopy_core::codeexec::CodeExecutor;
use canopy_core::error::AgentError;
use canopy_core::invocation::Invocation;
use canopy_core::message::GenerationConfig;
use canopy_core::model::Model;
use canopy_core::planner::Planner;
use canopy_core::tool::Tool;
use canopy_runtime::flow::Flow;
use canopy_runtime::request::{
    BasicProcessor, ContentProcessor, IdentityProcessor, IncludeContents, InstructionProcessor,
    PlanningRequestProcessor, TimeProcessor,
};
use canopy_runtime::response::{
    CodeExecutionProcessor, FunctionCallProcessor, OutputProcessor, PlanningResponseProcessor,
    TransferProcessor,
};
use canopy_tools::registry::ToolRegistry;
use canopy_tools::transfer::{TransferTool, TRANSFER_TOOL_NAME};

use crate::common::{run_after_agent, run_before_agent, BeforeOutcome};

struct LlmInner {
    info: AgentInfo,
    model: Option<Arc<dyn Model>>,
    tools: Vec<Arc<dyn Tool>>,
    sub_agents: Vec<Arc<dyn Agent>>,
    flow: Flow,
    agent_callbacks: Option<Arc<AgentCallbacks>>,
    model_callbacks: Option<Arc<ModelCallbacks>>,
    tool_callbacks: Option<Arc<ToolCallbacks>>,
    channel_capacity: usize,
}

/// An agent whose turns are driven by the flow engine: request
/// processors, a streaming model call, tool dispatch, transfer, and
/// output extraction.
#[derive(Clone)]
pub struct LlmAgent {
    inner: Arc<LlmInner>,
}

impl LlmAgent {
    /// Start building an agent with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> LlmAgentBuilder {
        LlmAgentBuilder::new(name)
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn info(&self) -> AgentInfo {
        self.inner.info.clone()
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.inner.tools.clone()
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
        if invocation.model.is_none() {
            invocation.model = self.inner.model.clone();
        }
        if invocation.model.is_none() {
            return Err(AgentError::MissingModel {
                agent: self.inner.info.name.clone(),
            });
        }

        invocation.set_agent(Arc::new(self.clone()));
        if invocation.agent_callbacks.is_none() {
            invocation.agent_callbacks = self.inner.agent_callbacks.clone();
        }
        if invocation.model_callbacks.is_none() {
            invocation.model_callbacks = self.inner.model_callbacks.clone();
        }
        if invocation.tool_callbacks.is_none() {
            invocation.tool_callbacks = self.inner.tool_callbacks.clone();
        }

        let (tx, rx) = mpsc::channel(self.inner.channel_capacity);
        let flow = self.inner.flow.clone();
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

                flow.execute(&ctx, &mut invocation, &tx).await;

                run_after_agent(&ctx, &invocation, &tx).await;
            },
        );

        Ok(rx)
    }
}

/// Builder for [`LlmAgent`].
pub struct LlmAgentBuilder {
    name: String,
    description: String,
    model: Option<Arc<dyn Model>>,
    instruction: Option<String>,
    system_prompt: Option<String>,
    tools: Vec<Arc<dyn Tool>>,
    sub_agents: Vec<Arc<dyn Agent>>,
    planner: Option<Arc<dyn Planner>>,
    code_executor: Option<Arc<dyn CodeExecutor>>,
    output_key: Option<String>,
    output_schema: Option<Value>,
    generation_config: GenerationConfig,
    include_contents: IncludeContents,
    max_history_runs: Option<usize>,
    add_session_summary: bool,
    add_current_time: bool,
    timezone: Option<Tz>,
    time_format: Option<String>,
    parallel_tools: bool,
    end_invocation_after_transfer: bool,
    agent_callbacks: Option<Arc<AgentCallbacks>>,
    model_callbacks: Option<Arc<ModelCallbacks>>,
    tool_callbacks: Option<Arc<ToolCallbacks>>,
    channel_capacity: usize,
}

impl LlmAgentBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            model: None,
            instruction: None,
            system_prompt: None,
            tools: Vec::new(),
            sub_agents: Vec::new(),
            planner: None,
            code_executor: None,
            output_key: None,
            output_schema: None,
            generation_config: GenerationConfig::default(),
            include_contents: IncludeContents::default(),
            max_history_runs: None,
            add_session_summary: false,
            add_current_time: false,
            timezone: None,
            time_format: None,
            parallel_tools: false,
            end_invocation_after_transfer: true,
            agent_callbacks: None,
            model_callbacks: None,
            tool_callbacks: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Set the description (also used by the identity processor).
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the model.
    #[must_use]
    pub fn model(mut self, model: Arc<dyn Model>) -> Self {
        self.model = Some(model);
        self
    }

    /// Static instruction appended to the system message.
    #[must_use]
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Additional system prompt appended after the instruction.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Register a tool.
    #[must_use]
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Register a sub-agent (transfer target).
    #[must_use]
    pub fn sub_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.sub_agents.push(agent);
        self
    }

    /// Set the planner.
    #[must_use]
    pub fn planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Set the code executor.
    #[must_use]
    pub fn code_executor(mut self, executor: Arc<dyn CodeExecutor>) -> Self {
        self.code_executor = Some(executor);
        self
    }

    /// Session-state key receiving the final content.
    #[must_use]
    pub fn output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// JSON schema rendered into the instruction.
    #[must_use]
    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Set generation settings.
    #[must_use]
    pub fn generation_config(mut self, config: GenerationConfig) -> Self {
        self.generation_config = config;
        self
    }

    /// How much history the request sees.
    #[must_use]
    pub fn include_contents(mut self, mode: IncludeContents) -> Self {
        self.include_contents = mode;
        self
    }

    /// Limit history to the last `runs` user turns.
    #[must_use]
    pub fn max_history_runs(mut self, runs: usize) -> Self {
        self.max_history_runs = Some(runs);
        self
    }

    /// Replace pre-summary history with the branch summary.
    #[must_use]
    pub fn add_session_summary(mut self) -> Self {
        self.add_session_summary = true;
        self
    }

    /// Append the current time to the system message.
    #[must_use]
    pub fn add_current_time(mut self) -> Self {
        self.add_current_time = true;
        self
    }

    /// Timezone for the time line.
    #[must_use]
    pub fn timezone(mut self, timezone: Tz) -> Self {
        self.timezone = Some(timezone);
        self
    }

    /// Layout for the time line.
    #[must_use]
    pub fn time_format(mut self, format: impl Into<String>) -> Self {
        self.time_format = Some(format.into());
        self
    }

    /// Dispatch multi-call turns in parallel.
    #[must_use]
    pub fn parallel_tools(mut self) -> Self {
        self.parallel_tools = true;
        self
    }

    /// Keep the flow looping after a transfer completes.
    #[must_use]
    pub fn continue_after_transfer(mut self) -> Self {
        self.end_invocation_after_transfer = false;
        self
    }

    /// Attach agent callbacks.
    #[must_use]
    pub fn agent_callbacks(mut self, callbacks: AgentCallbacks) -> Self {
        self.agent_callbacks = Some(Arc::new(callbacks));
        self
    }

    /// Attach model callbacks.
    #[must_use]
    pub fn model_callbacks(mut self, callbacks: ModelCallbacks) -> Self {
        self.model_callbacks = Some(Arc::new(callbacks));
        self
    }

    /// Attach tool callbacks.
    #[must_use]
    pub fn tool_callbacks(mut self, callbacks: ToolCallbacks) -> Self {
        self.tool_callbacks = Some(Arc::new(callbacks));
        self
    }

    /// Set the output channel capacity.
    #[must_use]
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Assemble the agent and its flow pipeline.
    #[must_use]
    pub fn build(self) -> LlmAgent {
        let mut tools = self.tools;
        // Sub-agents are reachable through the built-in transfer tool.
        if !self.sub_agents.is_empty()
            && !tools
                .iter()
                .any(|t| t.declaration().name == TRANSFER_TOOL_NAME)
        {
            tools.push(Arc::new(TransferTool::new()));
        }
        let registry = ToolRegistry::from_tools(tools.iter().map(Arc::clone));

        let mut instruction_processor = InstructionProcessor::new();
        if let Some(instruction) = &self.instruction {
            instruction_processor = instruction_processor.with_instruction(instruction.clone());
        }
        if let Some(prompt) = &self.system_prompt {
            instruction_processor = instruction_processor.with_system_prompt(prompt.clone());
        }
        if let Some(schema) = &self.output_schema {
            instruction_processor = instruction_processor.with_output_schema(schema.clone());
        }

        let mut content_processor =
            ContentProcessor::new().include_contents(self.include_contents);
        if let Some(runs) = self.max_history_runs {
            content_processor = content_processor.max_history_runs(runs);
        }
        if self.add_session_summary {
            content_processor = content_processor.add_session_summary();
        }

        let mut flow = Flow::builder()
            .request_processor(Arc::new(BasicProcessor::new(self.generation_config.clone())))
            .request_processor(Arc::new(IdentityProcessor::new(
                self.name.clone(),
                self.description.clone(),
            )))
            .request_processor(Arc::new(instruction_processor))
            .request_processor(Arc::new(content_processor))
            .request_processor(Arc::new(PlanningRequestProcessor::new(
                self.planner.clone(),
            )));

        if self.add_current_time {
            let mut time = TimeProcessor::new();
            if let Some(timezone) = self.timezone {
                time = time.with_timezone(timezone);
            }
            if let Some(format) = &self.time_format {
                time = time.with_format(format.clone());
            }
            flow = flow.request_processor(Arc::new(time));
        }

        let transfer = if self.end_invocation_after_transfer {
            TransferProcessor::new()
        } else {
            TransferProcessor::new().continue_after_transfer()
        };

        let mut output = OutputProcessor::new();
        if let Some(key) = &self.output_key {
            output = output.with_output_key(key.clone());
        }

        let flow = flow
            .response_rewriter(Arc::new(PlanningResponseProcessor::new(self.planner)))
            .response_rewriter(Arc::new(CodeExecutionProcessor::new(self.code_executor)))
            .response_processor(Arc::new(
                FunctionCallProcessor::new(registry).parallel(self.parallel_tools),
            ))
            .response_processor(Arc::new(transfer))
            .response_processor(Arc::new(output))
            .build();

        LlmAgent {
            inner: Arc::new(LlmInner {
                info: AgentInfo::new(self.name, self.description),
                model: self.model,
                tools,
                sub_agents: self.sub_agents,
                flow,
                agent_callbacks: self.agent_callbacks,
                model_callbacks: self.model_callbacks,
                tool_callbacks: self.tool_callbacks,
                channel_capacity: self.channel_capacity,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::event::Event;
    use canopy_core::invocation::StructuredOutput;
    use canopy_core::message::{Declaration, Message, Request, Role, ToolCall};
    use canopy_core::model::{
        Model, ModelError, ModelInfo, ModelResult, ObjectKind, Response, ResponseStream,
    };
    use canopy_core::session::Session as _;
    use canopy_runtime::runner::Runner;
    use canopy_session::InMemorySession;
    use canopy_tools::function::FunctionTool;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Pops one scripted turn per `generate_content` call and records
    /// the requests it saw.
    struct SequenceModel {
        turns: Mutex<VecDeque<Vec<Response>>>,
        requests: Arc<Mutex<Vec<Request>>>,
    }

    impl SequenceModel {
        fn new(turns: Vec<Vec<Response>>) -> (Arc<Self>, Arc<Mutex<Vec<Request>>>) {
            let requests = Arc::new(Mutex::new(Vec::new()));
            (
                Arc::new(Self {
                    turns: Mutex::new(turns.into()),
                    requests: Arc::clone(&requests),
                }),
                requests,
            )
        }
    }

    #[async_trait]
    impl Model for SequenceModel {
        fn info(&self) -> ModelInfo {
            ModelInfo {
                name: "sequence".into(),
            }
        }

        async fn generate_content(
            &self,
            _ctx: CancellationToken,
            request: Request,
        ) -> ModelResult<ResponseStream> {
            self.requests.lock().unwrap().push(request);
            let turn = self
                .turns
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(ModelError::Other {
                    message: "script exhausted".into(),
                })?;
            let stream = async_stream::stream! {
                for response in turn {
                    yield Ok(response);
                }
            };
            Ok(Box::pin(stream))
        }
    }

    fn tool_call_response(call_id: &str, tool: &str, args: serde_json::Value) -> Response {
        let mut response = Response::assistant("");
        response.choices[0].message.tool_calls.push(ToolCall::new(
            call_id,
            tool,
            args.as_object().cloned().unwrap_or_default(),
        ));
        response
    }

    async fn collect(mut rx: EventReceiver) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn missing_model_is_a_setup_error() {
        let agent = LlmAgent::builder("solo").build();
        let result = agent
            .run(
                CancellationToken::new(),
                Invocation::new(Message::user("hi")),
            )
            .await;
        assert!(matches!(result, Err(AgentError::MissingModel { .. })));
    }

    #[tokio::test]
    async fn plain_answer_flow() {
        let (model, requests) =
            SequenceModel::new(vec![vec![Response::assistant("the answer")]]);
        let agent = LlmAgent::builder("oracle")
            .description("Answers questions.")
            .instruction("Be brief.")
            .model(model)
            .build();

        let session = Arc::new(InMemorySession::new());
        let runner = Runner::new(session);
        let rx = runner
            .run(
                CancellationToken::new(),
                Arc::new(agent),
                Invocation::new(Message::user("what is it?")),
            )
            .await
            .unwrap();
        let events = collect(rx).await;

        // Final answer present and stream terminates with the runner
        // completion marker.
        assert!(events.iter().any(|e| {
            e.response.as_ref().is_some_and(|r| {
                r.object == ObjectKind::ChatCompletion && r.text() == "the answer"
            })
        }));
        assert_eq!(
            events.last().unwrap().object(),
            Some(ObjectKind::RunnerCompletion)
        );

        // The request carried identity, instruction, and the message.
        let recorded = requests.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        let system = &recorded[0].messages[0];
        assert_eq!(system.role, Role::System);
        assert!(system.content.contains("You are oracle. Answers questions."));
        assert!(system.content.contains("Be brief."));
        assert!(recorded[0]
            .messages
            .iter()
            .any(|m| m.role == Role::User && m.content == "what is it?"));
    }

    #[tokio::test]
    async fn tool_loop_feeds_responses_back() {
        let (model, requests) = SequenceModel::new(vec![
            vec![tool_call_response("c1", "lookup", json!({"key": "k"}))],
            vec![Response::assistant("found it")],
        ]);

        let lookup: Arc<dyn Tool> = Arc::new(FunctionTool::new(
            Declaration::new("lookup", "Looks things up"),
            |_ctx, args| async move { Ok(json!({"value": format!("data for {}", args["key"]) })) },
        ));

        let agent = LlmAgent::builder("worker")
            .model(model)
            .tool(lookup)
            .build();

        let session = Arc::new(InMemorySession::new());
        let runner = Runner::new(session.clone());
        let rx = runner
            .run(
                CancellationToken::new(),
                Arc::new(agent),
                Invocation::new(Message::user("look up k")),
            )
            .await
            .unwrap();
        let events = collect(rx).await;

        // Tool response event between the two assistant turns.
        let tool_event = events
            .iter()
            .find(|e| e.object() == Some(ObjectKind::ToolResponse) && !e.is_partial())
            .unwrap();
        assert_eq!(
            tool_event.response.as_ref().unwrap().choices[0]
                .message
                .tool_call_id
                .as_deref(),
            Some("c1")
        );
        assert!(events.iter().any(|e| {
            e.response.as_ref().is_some_and(|r| r.text() == "found it")
        }));

        // The second model call saw the tool response in history.
        let recorded = requests.lock().unwrap();
        assert_eq!(recorded.len(), 2);
        let second = &recorded[1];
        let tool_message = second
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("c1"));
        assert!(tool_message.content.contains("data for"));
        // The assistant tool-call message directly precedes it.
        let position = second
            .messages
            .iter()
            .position(|m| m.role == Role::Tool)
            .unwrap();
        assert!(!second.messages[position - 1].tool_calls.is_empty());
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Extracted {
        a: i64,
    }

    #[tokio::test]
    async fn structured_output_end_to_end() {
        let (model, _requests) =
            SequenceModel::new(vec![vec![Response::assistant("text {\"a\":1} more")]]);
        let agent = LlmAgent::builder("extractor").model(model).build();

        let mut invocation = Invocation::new(Message::user("extract"));
        invocation.structured_output = Some(StructuredOutput::typed::<Extracted>());

        let session = Arc::new(InMemorySession::new());
        let runner = Runner::new(session);
        let rx = runner
            .run(CancellationToken::new(), Arc::new(agent), invocation)
            .await
            .unwrap();
        let events = collect(rx).await;

        let update = events
            .iter()
            .find(|e| e.object() == Some(ObjectKind::StateUpdate))
            .unwrap();
        assert_eq!(
            update
                .structured_output
                .as_ref()
                .unwrap()
                .downcast_ref::<Extracted>(),
            Some(&Extracted { a: 1 })
        );
    }

    #[tokio::test]
    async fn output_key_persists_state() {
        let (model, _requests) =
            SequenceModel::new(vec![vec![Response::assistant("{\"score\": 9}")]]);
        let agent = LlmAgent::builder("grader")
            .model(model)
            .output_key("grade")
            .build();

        let session = Arc::new(InMemorySession::new());
        let runner = Runner::new(session.clone());
        let rx = runner
            .run(
                CancellationToken::new(),
                Arc::new(agent),
                Invocation::new(Message::user("grade this")),
            )
            .await
            .unwrap();
        let _ = collect(rx).await;

        let stored = session.state("grade").await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&stored).unwrap();
        assert_eq!(value, json!({"score": 9}));
    }

    #[tokio::test]
    async fn transfer_tool_added_with_sub_agents() {
        let (model, _) = SequenceModel::new(vec![]);
        let (sub_model, _) = SequenceModel::new(vec![]);
        let sub = LlmAgent::builder("specialist").model(sub_model).build();
        let agent = LlmAgent::builder("router")
            .model(model)
            .sub_agent(Arc::new(sub))
            .build();

        assert!(agent
            .tools()
            .iter()
            .any(|t| t.declaration().name == TRANSFER_TOOL_NAME));
        assert!(agent.find_sub_agent("specialist").is_some());
    }

    #[tokio::test]
    async fn transfer_hands_off_to_sub_agent() {
        let (parent_model, _) = SequenceModel::new(vec![vec![tool_call_response(
            "c1",
            TRANSFER_TOOL_NAME,
            json!({"agent_name": "specialist", "message": "take over"}),
        )]]);
        let (sub_model, sub_requests) =
            SequenceModel::new(vec![vec![Response::assistant("specialist reporting")]]);

        let sub = LlmAgent::builder("specialist").model(sub_model).build();
        let agent = LlmAgent::builder("router")
            .model(parent_model)
            .sub_agent(Arc::new(sub))
            .build();

        let session = Arc::new(InMemorySession::new());
        let runner = Runner::new(session);
        let rx = runner
            .run(
                CancellationToken::new(),
                Arc::new(agent),
                Invocation::new(Message::user("route me")),
            )
            .await
            .unwrap();
        let events = collect(rx).await;

        let transfer_event = events
            .iter()
            .find(|e| e.object() == Some(ObjectKind::Transfer))
            .unwrap();
        assert!(transfer_event
            .response
            .as_ref()
            .unwrap()
            .text()
            .contains("Transferring control to agent: specialist"));
        assert!(events.iter().any(|e| {
            e.author == "specialist"
                && e.response
                    .as_ref()
                    .is_some_and(|r| r.text() == "specialist reporting")
        }));

        // The specialist saw the transfer message.
        let recorded = sub_requests.lock().unwrap();
        assert!(recorded[0]
            .messages
            .iter()
            .any(|m| m.role == Role::User && m.content == "take over"));
    }

    #[tokio::test]
    async fn unknown_tool_name_matching_sub_agent_transfers() {
        let (parent_model, _) = SequenceModel::new(vec![vec![tool_call_response(
            "c1",
            "specialist",
            json!({"message": "hi Tokyo"}),
        )]]);
        let (sub_model, sub_requests) =
            SequenceModel::new(vec![vec![Response::assistant("on it")]]);

        let sub = LlmAgent::builder("specialist").model(sub_model).build();
        let agent = LlmAgent::builder("router")
            .model(parent_model)
            .sub_agent(Arc::new(sub))
            .build();

        let session = Arc::new(InMemorySession::new());
        let runner = Runner::new(session);
        let rx = runner
            .run(
                CancellationToken::new(),
                Arc::new(agent),
                Invocation::new(Message::user("ask the specialist")),
            )
            .await
            .unwrap();
        let events = collect(rx).await;

        assert!(events
            .iter()
            .any(|e| e.object() == Some(ObjectKind::Transfer)));
        let recorded = sub_requests.lock().unwrap();
        assert!(recorded[0]
            .messages
            .iter()
            .any(|m| m.content == "hi Tokyo"));
    }

    #[tokio::test]
    async fn streaming_chunks_forwarded_before_final() {
        let (model, _) = SequenceModel::new(vec![vec![
            Response::chunk("str"),
            Response::chunk("eam"),
            Response::assistant("stream"),
        ]]);
        let agent = LlmAgent::builder("streamer").model(model).build();

        let rx = agent
            .run(
                CancellationToken::new(),
                Invocation::new(Message::user("go")),
            )
            .await
            .unwrap();
        let events = collect(rx).await;

        let partials: Vec<_> = events.iter().filter(|e| e.is_partial()).collect();
        assert_eq!(partials.len(), 2);
        let final_index = events
            .iter()
            .position(|e| e.is_final_response() && e.object() == Some(ObjectKind::ChatCompletion))
            .unwrap();
        let last_partial_index = events
            .iter()
            .rposition(|e| e.is_partial())
            .unwrap();
        assert!(last_partial_index < final_index);
    }
}
