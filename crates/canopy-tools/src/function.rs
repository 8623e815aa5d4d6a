//! Closure-backed tools.
//!
//! [`FunctionTool`] adapts an async closure into a callable tool;
//! [`StreamingFunctionTool`] does the same for chunk-producing
//! closures. Both take their declaration up front and expose the
//! optional traits as builder switches.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use canopy_core::message::Declaration;
use canopy_core::tool::{
    CallableTool, StreamableTool, Tool, ToolContext, ToolError, ToolStream,
};

type CallHandler =
    Arc<dyn Fn(ToolContext, Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

type StreamHandler = Arc<
    dyn Fn(ToolContext, Value) -> BoxFuture<'static, Result<ToolStream, ToolError>> + Send + Sync,
>;

/// A callable tool backed by an async closure.
#[derive(Clone)]
pub struct FunctionTool {
    declaration: Declaration,
    long_running: bool,
    skip_summarization: bool,
    handler: CallHandler,
}

impl FunctionTool {
    /// Wrap `handler` under the given declaration.
    pub fn new<F, Fut>(declaration: Declaration, handler: F) -> Self
    where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            declaration,
            long_running: false,
            skip_summarization: false,
            handler: Arc::new(move |ctx, args| Box::pin(handler(ctx, args))),
        }
    }

    /// Mark the tool long-running.
    #[must_use]
    pub fn long_running(mut self) -> Self {
        self.long_running = true;
        self
    }

    /// Suppress the post-tool summarization turn.
    #[must_use]
    pub fn skip_summarization(mut self) -> Self {
        self.skip_summarization = true;
        self
    }
}

impl Tool for FunctionTool {
    fn declaration(&self) -> Declaration {
        self.declaration.clone()
    }

    fn is_long_running(&self) -> bool {
        self.long_running
    }

    fn skip_summarization(&self) -> bool {
        self.skip_summarization
    }

    fn as_callable(&self) -> Option<&dyn CallableTool> {
        Some(self)
    }
}

#[async_trait]
impl CallableTool for FunctionTool {
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        (self.handler)(ctx.clone(), args).await
    }
}

/// A streamable tool backed by an async closure producing chunks.
#[derive(Clone)]
pub struct StreamingFunctionTool {
    declaration: Declaration,
    stream_inner: Option<bool>,
    skip_summarization: bool,
    handler: StreamHandler,
}

impl StreamingFunctionTool {
    /// Wrap `handler` under the given declaration.
    pub fn new<F, Fut>(declaration: Declaration, handler: F) -> Self
    where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolStream, ToolError>> + Send + 'static,
    {
        Self {
            declaration,
            stream_inner: None,
            skip_summarization: false,
            handler: Arc::new(move |ctx, args| Box::pin(handler(ctx, args))),
        }
    }

    /// Set the stream-inner preference.
    #[must_use]
    pub fn stream_inner(mut self, prefer: bool) -> Self {
        self.stream_inner = Some(prefer);
        self
    }

    /// Suppress the post-tool summarization turn.
    #[must_use]
    pub fn skip_summarization(mut self) -> Self {
        self.skip_summarization = true;
        self
    }
}

impl Tool for StreamingFunctionTool {
    fn declaration(&self) -> Declaration {
        self.declaration.clone()
    }

    fn skip_summarization(&self) -> bool {
        self.skip_summarization
    }

    fn stream_inner(&self) -> Option<bool> {
        self.stream_inner
    }

    fn as_streamable(&self) -> Option<&dyn StreamableTool> {
        Some(self)
    }
}

#[async_trait]
impl StreamableTool for StreamingFunctionTool {
    async fn stream_call(&self, ctx: &ToolContext, args: Value) -> Result<ToolStream, ToolError> {
        (self.handler)(ctx.clone(), args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_stream::stream;
    use canopy_core::invocation::Invocation;
    use canopy_core::message::Message;
    use canopy_core::tool::ToolChunk;
    use futures::StreamExt;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> ToolContext {
        let invocation = Invocation::new(Message::user("hi"));
        ToolContext::for_invocation(&invocation, CancellationToken::new())
    }

    #[tokio::test]
    async fn function_tool_invokes_handler() {
        let tool = FunctionTool::new(Declaration::new("echo", "Echo"), |_ctx, args| async move {
            Ok(json!({"echo": args["text"]}))
        });

        let callable = tool.as_callable().unwrap();
        let result = callable.call(&ctx(), json!({"text": "hi"})).await.unwrap();
        assert_eq!(result["echo"], json!("hi"));
    }

    #[tokio::test]
    async fn function_tool_propagates_errors() {
        let tool = FunctionTool::new(Declaration::new("fail", "Fails"), |_ctx, _args| async move {
            Err::<Value, _>(ToolError::Execution("bad".into()))
        });

        let err = tool
            .as_callable()
            .unwrap()
            .call(&ctx(), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(_)));
    }

    #[test]
    fn builder_flags() {
        let tool = FunctionTool::new(Declaration::new("t", ""), |_ctx, _args| async move {
            Ok(Value::Null)
        })
        .long_running()
        .skip_summarization();
        assert!(tool.is_long_running());
        assert!(Tool::skip_summarization(&tool));
        assert!(tool.as_streamable().is_none());
    }

    #[tokio::test]
    async fn streaming_tool_yields_chunks() {
        let tool = StreamingFunctionTool::new(
            Declaration::new("counter", "Counts"),
            |_ctx, _args| async move {
                let s = stream! {
                    yield Ok(ToolChunk::Text("1".into()));
                    yield Ok(ToolChunk::Text("2".into()));
                };
                Ok(Box::pin(s) as ToolStream)
            },
        );

        let mut stream = tool
            .as_streamable()
            .unwrap()
            .stream_call(&ctx(), json!({}))
            .await
            .unwrap();

        let mut texts = Vec::new();
        while let Some(chunk) = stream.next().await {
            if let ToolChunk::Text(t) = chunk.unwrap() {
                texts.push(t);
            }
        }
        assert_eq!(texts, ["1", "2"]);
    }

    #[test]
    fn stream_inner_preference() {
        let tool = StreamingFunctionTool::new(Declaration::new("s", ""), |_ctx, _args| async move {
            Err::<ToolStream, _>(ToolError::Execution("unused".into()))
        })
        .stream_inner(false);
        assert_eq!(Tool::stream_inner(&tool), Some(false));
    }
}
