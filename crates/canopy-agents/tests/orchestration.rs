//! Cross-crate orchestration tests: composites over LLM agents, the
//! runner as session writer, and branch isolation end to end.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use canopy_agents::{ChainAgent, CycleAgent, LlmAgent, ParallelAgent};
use canopy_core::agent::{Agent, EventReceiver};
use canopy_core::event::Event;
use canopy_core::invocation::Invocation;
use canopy_core::message::{Message, Request, Role};
use canopy_core::model::{
    Model, ModelError, ModelInfo, ModelResult, ObjectKind, Response, ResponseStream,
};
use canopy_core::session::Session as _;
use canopy_runtime::runner::Runner;
use canopy_session::InMemorySession;

/// Pops one scripted turn per call; errors when exhausted.
struct SequenceModel {
    turns: Mutex<VecDeque<Vec<Response>>>,
}

impl SequenceModel {
    fn new(turns: Vec<Vec<Response>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
        })
    }

    fn answering(text: &str) -> Arc<Self> {
        Self::new(vec![vec![Response::assistant(text)]])
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
        _request: Request,
    ) -> ModelResult<ResponseStream> {
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(ModelError::Other {
                message: "script exhausted".into(),
            })?;
        Ok(Box::pin(async_stream::stream! {
            for response in turn {
                yield Ok(response);
            }
        }))
    }
}

async fn collect(mut rx: EventReceiver) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn final_texts(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter(|e| {
            e.is_final_response() && e.object() == Some(ObjectKind::ChatCompletion)
        })
        .map(|e| e.response.as_ref().map(Response::text).unwrap_or_default())
        .filter(|t| !t.is_empty())
        .collect()
}

#[tokio::test]
async fn chain_of_llm_agents_shares_history() {
    // The first agent writes its answer into session state; the second
    // sees the first's transcript as foreign context.
    let researcher = LlmAgent::builder("researcher")
        .description("Digs up facts.")
        .model(SequenceModel::answering("fact: water boils at 100C"))
        .output_key("research")
        .build();
    let writer = LlmAgent::builder("writer")
        .description("Writes prose.")
        .model(SequenceModel::answering("Here is the article."))
        .build();

    let chain = ChainAgent::new("newsroom")
        .description("Research then write.")
        .sub_agent(Arc::new(researcher))
        .sub_agent(Arc::new(writer));

    let session = Arc::new(InMemorySession::new());
    let runner = Runner::new(session.clone());
    let rx = runner
        .run(
            CancellationToken::new(),
            Arc::new(chain),
            Invocation::new(Message::user("write about boiling")),
        )
        .await
        .unwrap();
    let events = collect(rx).await;

    assert_eq!(
        final_texts(&events),
        ["fact: water boils at 100C", "Here is the article."]
    );

    // Output key was persisted before the second agent ran.
    let stored = session.state("research").await.unwrap();
    assert_eq!(
        String::from_utf8(stored).unwrap(),
        "fact: water boils at 100C"
    );

    // Both agents emitted on the same (root) branch.
    assert!(events.iter().all(|e| e.branch.is_empty()));
}

#[tokio::test]
async fn cycle_stops_on_model_failure() {
    struct FailingModel;

    #[async_trait]
    impl Model for FailingModel {
        fn info(&self) -> ModelInfo {
            ModelInfo { name: "bad".into() }
        }

        async fn generate_content(
            &self,
            _ctx: CancellationToken,
            _request: Request,
        ) -> ModelResult<ResponseStream> {
            Err(ModelError::Api {
                status: Some(503),
                message: "overloaded".into(),
                retryable: true,
            })
        }
    }

    let drafter = LlmAgent::builder("drafter")
        .model(SequenceModel::new(vec![
            vec![Response::assistant("draft one")],
            vec![Response::assistant("draft two")],
        ]))
        .build();
    let critic = LlmAgent::builder("critic")
        .model(Arc::new(FailingModel))
        .build();

    let cycle = CycleAgent::new("refinement")
        .max_iterations(5)
        .sub_agent(Arc::new(drafter))
        .sub_agent(Arc::new(critic));

    let session = Arc::new(InMemorySession::new());
    let runner = Runner::new(session);
    let rx = runner
        .run(
            CancellationToken::new(),
            Arc::new(cycle),
            Invocation::new(Message::user("refine")),
        )
        .await
        .unwrap();
    let events = collect(rx).await;

    // One drafter turn, then the critic's api_error escalates.
    assert_eq!(final_texts(&events), ["draft one"]);
    let error = events.iter().find(|e| e.error.is_some()).unwrap();
    assert_eq!(error.error.as_ref().unwrap().kind.as_str(), "api_error");
}

#[tokio::test]
async fn parallel_llm_agents_keep_disjoint_transcripts() {
    let optimist = LlmAgent::builder("optimist")
        .model(SequenceModel::answering("it will work"))
        .build();
    let pessimist = LlmAgent::builder("pessimist")
        .model(SequenceModel::answering("it will fail"))
        .build();

    let panel = ParallelAgent::new("panel")
        .sub_agent(Arc::new(optimist))
        .sub_agent(Arc::new(pessimist));

    let session = Arc::new(InMemorySession::new());
    let runner = Runner::new(session.clone());
    let rx = runner
        .run(
            CancellationToken::new(),
            Arc::new(panel),
            Invocation::new(Message::user("will it work?")),
        )
        .await
        .unwrap();
    let events = collect(rx).await;

    let mut texts = final_texts(&events);
    texts.sort();
    assert_eq!(texts, ["it will fail", "it will work"]);

    // Branch filters keyed at each child admit disjoint event sets.
    let persisted = session.events().await;
    let c1: Vec<_> = persisted
        .iter()
        .filter(|e| !e.branch.is_empty() && e.visible_to("panel/optimist"))
        .map(|e| e.id.clone())
        .collect();
    let c2: Vec<_> = persisted
        .iter()
        .filter(|e| !e.branch.is_empty() && e.visible_to("panel/pessimist"))
        .map(|e| e.id.clone())
        .collect();
    assert!(!c1.is_empty());
    assert!(!c2.is_empty());
    assert!(c1.iter().all(|id| !c2.contains(id)));
}

#[tokio::test]
async fn transfer_keeps_invocation_id_stable() {
    let specialist = LlmAgent::builder("specialist")
        .model(SequenceModel::answering("handled"))
        .build();

    let mut transfer_args = serde_json::Map::new();
    let _ = transfer_args.insert("agent_name".into(), serde_json::json!("specialist"));
    let _ = transfer_args.insert("message".into(), serde_json::json!("please handle"));
    let mut transfer_call = Response::assistant("");
    transfer_call.choices[0].message.tool_calls.push(
        canopy_core::message::ToolCall::new("c1", "transfer_to_agent", transfer_args),
    );

    let router = LlmAgent::builder("router")
        .model(SequenceModel::new(vec![vec![transfer_call]]))
        .sub_agent(Arc::new(specialist))
        .build();

    let session = Arc::new(InMemorySession::new());
    let runner = Runner::new(session);
    let invocation = Invocation::new(Message::user("route"));
    let invocation_id = invocation.invocation_id.clone();

    let rx = runner
        .run(CancellationToken::new(), Arc::new(router), invocation)
        .await
        .unwrap();
    let events = collect(rx).await;

    // Every event, including the specialist's, shares the original
    // invocation ID.
    assert!(events.iter().all(|e| e.invocation_id == invocation_id));
    assert!(events.iter().any(|e| e.author == "specialist"));
    assert_eq!(final_texts(&events), ["handled"]);
}

#[tokio::test]
async fn every_run_closes_its_channel() {
    // Success, setup error, and cancellation all end with a closed
    // channel rather than a hang.
    let ok_agent = LlmAgent::builder("ok")
        .model(SequenceModel::answering("done"))
        .build();
    let rx = ok_agent
        .run(
            CancellationToken::new(),
            Invocation::new(Message::user("hi")),
        )
        .await
        .unwrap();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), collect(rx))
        .await
        .expect("stream must close");

    let cancelled_agent = LlmAgent::builder("cancelled")
        .model(SequenceModel::answering("unused"))
        .build();
    let ctx = CancellationToken::new();
    ctx.cancel();
    let rx = cancelled_agent
        .run(ctx, Invocation::new(Message::user("hi")))
        .await
        .unwrap();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), collect(rx))
        .await
        .expect("stream must close");

    let no_model = LlmAgent::builder("no-model").build();
    assert!(no_model
        .run(
            CancellationToken::new(),
            Invocation::new(Message::user("hi"))
        )
        .await
        .is_err());
}

#[tokio::test]
async fn foreign_transcripts_reach_later_agents_as_context() {
    struct CapturingModel {
        captured: Arc<Mutex<Vec<Request>>>,
        reply: String,
    }

    #[async_trait]
    impl Model for CapturingModel {
        fn info(&self) -> ModelInfo {
            ModelInfo {
                name: "capturing".into(),
            }
        }

        async fn generate_content(
            &self,
            _ctx: CancellationToken,
            request: Request,
        ) -> ModelResult<ResponseStream> {
            self.captured.lock().unwrap().push(request);
            let reply = Response::assistant(self.reply.clone());
            Ok(Box::pin(async_stream::stream! {
                yield Ok(reply);
            }))
        }
    }

    let captured = Arc::new(Mutex::new(Vec::new()));
    let first = LlmAgent::builder("scout")
        .model(SequenceModel::answering("terrain is rocky"))
        .build();
    let second = LlmAgent::builder("navigator")
        .model(Arc::new(CapturingModel {
            captured: Arc::clone(&captured),
            reply: "take the south pass".into(),
        }))
        .build();

    let chain = ChainAgent::new("expedition")
        .sub_agent(Arc::new(first))
        .sub_agent(Arc::new(second));

    let session = Arc::new(InMemorySession::new());
    let runner = Runner::new(session);
    let rx = runner
        .run(
            CancellationToken::new(),
            Arc::new(chain),
            Invocation::new(Message::user("plan the route")),
        )
        .await
        .unwrap();
    let _ = collect(rx).await;

    let requests = captured.lock().unwrap();
    let context_lines: Vec<_> = requests[0]
        .messages
        .iter()
        .filter(|m| m.role == Role::User && m.content.starts_with("For context: [scout]"))
        .collect();
    assert_eq!(context_lines.len(), 1);
    assert!(context_lines[0].content.contains("terrain is rocky"));
}
