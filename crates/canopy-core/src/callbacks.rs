//! Before/after callback chains for the agent, model, and tool phases.
//!
//! Semantics are uniform across the three sets: a *before* callback
//! may synthesize an output, which short-circuits the operation; an
//! *after* callback may override the output. Errors surface as
//! `agent_callback_error` events — except the typed stop error from a
//! tool callback, which propagates upward and terminates the flow.
//!
//! Chains run in registration order; the first callback returning
//! `Some` wins and the rest are skipped.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::invocation::Invocation;
use crate::message::Request;
use crate::model::Response;
use crate::tool::ToolError;

/// Errors returned by callbacks.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// Terminate the flow entirely. Only meaningful from tool
    /// callbacks; elsewhere it behaves like [`CallbackError::Failure`].
    #[error("stop requested: {0}")]
    Stop(String),

    /// The callback failed; the operation is short-circuited with an
    /// error event.
    #[error("{0}")]
    Failure(String),
}

/// Hooks around a whole agent run.
#[async_trait]
pub trait AgentCallback: Send + Sync {
    /// Runs before the agent body. A synthesized response is emitted
    /// and the body is skipped.
    async fn before_agent(
        &self,
        invocation: &Invocation,
    ) -> Result<Option<Response>, CallbackError> {
        let _ = invocation;
        Ok(None)
    }

    /// Runs after the agent body. A synthesized response is emitted as
    /// an additional final event.
    async fn after_agent(
        &self,
        invocation: &Invocation,
    ) -> Result<Option<Response>, CallbackError> {
        let _ = invocation;
        Ok(None)
    }
}

/// Hooks around a single model call.
#[async_trait]
pub trait ModelCallback: Send + Sync {
    /// Runs after request assembly, before the model call. May mutate
    /// the request; a synthesized response skips the model entirely.
    async fn before_model(
        &self,
        invocation: &Invocation,
        request: &mut Request,
    ) -> Result<Option<Response>, CallbackError> {
        let _ = (invocation, request);
        Ok(None)
    }

    /// Runs on the accumulated final response. A returned response
    /// replaces it.
    async fn after_model(
        &self,
        invocation: &Invocation,
        response: &Response,
    ) -> Result<Option<Response>, CallbackError> {
        let _ = (invocation, response);
        Ok(None)
    }
}

/// Hooks around a single tool call.
#[async_trait]
pub trait ToolCallback: Send + Sync {
    /// Runs before the tool. May mutate the arguments; a synthesized
    /// value becomes the result without invoking the tool.
    async fn before_tool(
        &self,
        tool_name: &str,
        args: &mut Value,
    ) -> Result<Option<Value>, CallbackError> {
        let _ = (tool_name, args);
        Ok(None)
    }

    /// Runs after the tool. A returned value overrides the result.
    async fn after_tool(
        &self,
        tool_name: &str,
        args: &Value,
        result: &Result<Value, ToolError>,
    ) -> Result<Option<Value>, CallbackError> {
        let _ = (tool_name, args, result);
        Ok(None)
    }
}

/// Ordered chain of agent callbacks.
#[derive(Clone, Default)]
pub struct AgentCallbacks {
    callbacks: Vec<Arc<dyn AgentCallback>>,
}

impl AgentCallbacks {
    /// Empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback.
    #[must_use]
    pub fn with(mut self, callback: Arc<dyn AgentCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Run the before phase; first synthesized response wins.
    pub async fn before(
        &self,
        invocation: &Invocation,
    ) -> Result<Option<Response>, CallbackError> {
        for cb in &self.callbacks {
            if let Some(response) = cb.before_agent(invocation).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Run the after phase; first synthesized response wins.
    pub async fn after(&self, invocation: &Invocation) -> Result<Option<Response>, CallbackError> {
        for cb in &self.callbacks {
            if let Some(response) = cb.after_agent(invocation).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

/// Ordered chain of model callbacks.
#[derive(Clone, Default)]
pub struct ModelCallbacks {
    callbacks: Vec<Arc<dyn ModelCallback>>,
}

impl ModelCallbacks {
    /// Empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback.
    #[must_use]
    pub fn with(mut self, callback: Arc<dyn ModelCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Run the before phase; first synthesized response wins.
    pub async fn before(
        &self,
        invocation: &Invocation,
        request: &mut Request,
    ) -> Result<Option<Response>, CallbackError> {
        for cb in &self.callbacks {
            if let Some(response) = cb.before_model(invocation, request).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Run the after phase; first override wins.
    pub async fn after(
        &self,
        invocation: &Invocation,
        response: &Response,
    ) -> Result<Option<Response>, CallbackError> {
        for cb in &self.callbacks {
            if let Some(overriding) = cb.after_model(invocation, response).await? {
                return Ok(Some(overriding));
            }
        }
        Ok(None)
    }
}

/// Ordered chain of tool callbacks.
#[derive(Clone, Default)]
pub struct ToolCallbacks {
    callbacks: Vec<Arc<dyn ToolCallback>>,
}

impl ToolCallbacks {
    /// Empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback.
    #[must_use]
    pub fn with(mut self, callback: Arc<dyn ToolCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Run the before phase; first synthesized value wins.
    pub async fn before(
        &self,
        tool_name: &str,
        args: &mut Value,
    ) -> Result<Option<Value>, CallbackError> {
        for cb in &self.callbacks {
            if let Some(value) = cb.before_tool(tool_name, args).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Run the after phase; first override wins.
    pub async fn after(
        &self,
        tool_name: &str,
        args: &Value,
        result: &Result<Value, ToolError>,
    ) -> Result<Option<Value>, CallbackError> {
        for cb in &self.callbacks {
            if let Some(value) = cb.after_tool(tool_name, args, result).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for AgentCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCallbacks")
            .field("len", &self.callbacks.len())
            .finish()
    }
}

impl std::fmt::Debug for ModelCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCallbacks")
            .field("len", &self.callbacks.len())
            .finish()
    }
}

impl std::fmt::Debug for ToolCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallbacks")
            .field("len", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use serde_json::json;

    struct SynthesizeBefore;

    #[async_trait]
    impl AgentCallback for SynthesizeBefore {
        async fn before_agent(
            &self,
            _invocation: &Invocation,
        ) -> Result<Option<Response>, CallbackError> {
            Ok(Some(Response::assistant("canned")))
        }
    }

    struct PassThrough;

    #[async_trait]
    impl AgentCallback for PassThrough {}

    struct FailingBefore;

    #[async_trait]
    impl AgentCallback for FailingBefore {
        async fn before_agent(
            &self,
            _invocation: &Invocation,
        ) -> Result<Option<Response>, CallbackError> {
            Err(CallbackError::Failure("nope".into()))
        }
    }

    fn invocation() -> Invocation {
        Invocation::new(Message::user("hello"))
    }

    #[tokio::test]
    async fn first_synthesized_response_wins() {
        let chain = AgentCallbacks::new()
            .with(Arc::new(PassThrough))
            .with(Arc::new(SynthesizeBefore));
        let result = chain.before(&invocation()).await.unwrap();
        assert_eq!(result.unwrap().text(), "canned");
    }

    #[tokio::test]
    async fn empty_chain_returns_none() {
        let chain = AgentCallbacks::new();
        assert!(chain.is_empty());
        assert!(chain.before(&invocation()).await.unwrap().is_none());
        assert!(chain.after(&invocation()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn error_stops_chain() {
        let chain = AgentCallbacks::new()
            .with(Arc::new(FailingBefore))
            .with(Arc::new(SynthesizeBefore));
        let err = chain.before(&invocation()).await.unwrap_err();
        assert!(matches!(err, CallbackError::Failure(_)));
    }

    struct ArgRewriter;

    #[async_trait]
    impl ToolCallback for ArgRewriter {
        async fn before_tool(
            &self,
            _tool_name: &str,
            args: &mut Value,
        ) -> Result<Option<Value>, CallbackError> {
            args["injected"] = json!(true);
            Ok(None)
        }
    }

    struct ResultOverride;

    #[async_trait]
    impl ToolCallback for ResultOverride {
        async fn after_tool(
            &self,
            _tool_name: &str,
            _args: &Value,
            _result: &Result<Value, ToolError>,
        ) -> Result<Option<Value>, CallbackError> {
            Ok(Some(json!({"overridden": true})))
        }
    }

    #[tokio::test]
    async fn tool_before_can_mutate_args_without_short_circuit() {
        let chain = ToolCallbacks::new().with(Arc::new(ArgRewriter));
        let mut args = json!({"q": "tokyo"});
        let out = chain.before("weather", &mut args).await.unwrap();
        assert!(out.is_none());
        assert_eq!(args["injected"], json!(true));
    }

    #[tokio::test]
    async fn tool_after_overrides_result() {
        let chain = ToolCallbacks::new().with(Arc::new(ResultOverride));
        let result: Result<Value, ToolError> = Ok(json!("original"));
        let out = chain
            .after("weather", &json!({}), &result)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out["overridden"], json!(true));
    }

    struct StopCallback;

    #[async_trait]
    impl ToolCallback for StopCallback {
        async fn before_tool(
            &self,
            _tool_name: &str,
            _args: &mut Value,
        ) -> Result<Option<Value>, CallbackError> {
            Err(CallbackError::Stop("user abort".into()))
        }
    }

    #[tokio::test]
    async fn stop_error_propagates() {
        let chain = ToolCallbacks::new().with(Arc::new(StopCallback));
        let err = chain.before("weather", &mut json!({})).await.unwrap_err();
        assert!(matches!(err, CallbackError::Stop(_)));
    }
}
