//! Scripted providers and small tools shared by the agent tests.

use crate::error::{Error, Result};
use crate::traits::{
    ChatMessage, ChatRequest, ChatResponse, Provider, ProviderEvent, Tool, ToolCall, ToolResult,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// What the provider saw on one call.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Option<Vec<String>>,
}

impl SeenRequest {
    fn capture(request: &ChatRequest<'_>) -> Self {
        Self {
            messages: request.messages.to_vec(),
            tools: request
                .tools
                .map(|specs| specs.iter().map(|s| s.name.clone()).collect()),
        }
    }
}

/// Replays a fixed queue of responses, one per `chat` call.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<ChatResponse>>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<ChatResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            seen: Mutex::new(vec![]),
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(ChatResponse::text(*t))).collect())
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ChatRequest<'_>) -> Result<ChatResponse> {
        self.seen.lock().unwrap().push(SeenRequest::capture(&request));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::provider(None, "script exhausted")))
    }

    async fn chat_stream(
        &self,
        _request: ChatRequest<'_>,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        Err(Error::provider(None, "streaming not scripted"))
    }
}

/// Requests `echo {"x": 1}` on every turn and never answers.
#[derive(Default)]
pub struct LoopingProvider {
    calls: AtomicUsize,
}

impl LoopingProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for LoopingProvider {
    fn name(&self) -> &str {
        "looping"
    }

    async fn chat(&self, _request: ChatRequest<'_>) -> Result<ChatResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChatResponse::tool_calls(vec![tool_call(
            &format!("call_{n}"),
            "echo",
            json!({"x": 1}),
        )]))
    }

    async fn chat_stream(
        &self,
        _request: ChatRequest<'_>,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        Err(Error::provider(None, "streaming not supported"))
    }
}

/// Fails every call as if the network were down.
pub struct UnreachableProvider;

#[async_trait]
impl Provider for UnreachableProvider {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn chat(&self, _request: ChatRequest<'_>) -> Result<ChatResponse> {
        Err(Error::Transport("connection refused".into()))
    }

    async fn chat_stream(
        &self,
        _request: ChatRequest<'_>,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        Err(Error::Transport("connection refused".into()))
    }
}

/// Counts how many times a connection was released.
struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Streams a fixed list of tokens followed by `Done`. Each opened stream
/// bumps `closed` exactly once when it is dropped.
pub struct StreamingProvider {
    tokens: Vec<String>,
    pub closed: Arc<AtomicUsize>,
    pub pulled: Arc<AtomicUsize>,
}

impl StreamingProvider {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            closed: Arc::new(AtomicUsize::new(0)),
            pulled: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for StreamingProvider {
    fn name(&self) -> &str {
        "streaming"
    }

    async fn chat(&self, _request: ChatRequest<'_>) -> Result<ChatResponse> {
        Ok(ChatResponse::text(self.tokens.concat()))
    }

    async fn chat_stream(
        &self,
        _request: ChatRequest<'_>,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        let guard = ConnectionGuard(self.closed.clone());
        let pulled = self.pulled.clone();
        let events = self
            .tokens
            .clone()
            .into_iter()
            .map(ProviderEvent::Token)
            .chain(std::iter::once(ProviderEvent::Done));

        Ok(stream::iter(events)
            .map(move |event| {
                let _connection = &guard;
                pulled.fetch_add(1, Ordering::SeqCst);
                Ok(event)
            })
            .boxed())
    }
}

pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

/// Returns its arguments serialized as the output.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the arguments back"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        Ok(ToolResult::success(args.to_string()))
    }
}

/// Always fails with "boom".
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _args: serde_json::Value) -> anyhow::Result<ToolResult> {
        anyhow::bail!("boom")
    }
}
