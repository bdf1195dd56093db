use crate::error::{Error, Result};
use crate::media::{ContentPart, MediaKind};
use crate::traits::{
    ChatMessage, ChatRequest, ChatResponse, Provider, ProviderEvent, Role, ToolCall, ToolSpec,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Whole-request limit for non-streaming calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Longest silence tolerated between two chunks of a streamed reply.
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage<'a> {
    role: &'a str,
    content: Option<OpenAIContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCallRequest<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAIContent<'a> {
    Text(String),
    Parts(Vec<OpenAIContentPart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAIContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: OpenAIImageUrl },
}

#[derive(Debug, Serialize)]
struct OpenAIImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct OpenAIToolCallRequest<'a> {
    id: &'a str,
    r#type: &'a str,
    function: OpenAIFunctionRequest<'a>,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionRequest<'a> {
    name: &'a str,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAITool<'a> {
    r#type: &'a str,
    function: OpenAIToolFunction<'a>,
}

#[derive(Debug, Serialize)]
struct OpenAIToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCall {
    id: String,
    function: OpenAIFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: OpenAIDelta,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

/// Any endpoint speaking the OpenAI chat-completions protocol.
pub struct OpenAIProvider {
    name: &'static str,
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    temperature: Option<f64>,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            name: "openai",
            client,
            api_key: (!api_key.is_empty()).then_some(api_key),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: None,
        }
    }

    /// Label reported by `Provider::name`, for compatible servers.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request<'a>(&'a self, request: &ChatRequest<'a>, stream: bool) -> OpenAIRequest<'a> {
        OpenAIRequest {
            model: &self.model,
            messages: convert_messages(request.messages),
            tools: request
                .tools
                .filter(|tools| !tools.is_empty())
                .map(convert_tools),
            temperature: self.temperature,
            stream,
        }
    }

    async fn send(&self, body: &OpenAIRequest<'_>) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(timeout) = request_timeout(body.stream) {
            builder = builder.timeout(timeout);
        }
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider(Some(status.as_u16()), error_message(&body)));
        }
        Ok(response)
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn chat(&self, request: ChatRequest<'_>) -> Result<ChatResponse> {
        let body = self.build_request(&request, false);
        tracing::debug!(model = %self.model, messages = body.messages.len(), "chat completion");

        let response: OpenAIResponse = self.send(&body).await?.json().await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider(None, "No choices in response"))?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                name: c.function.name,
                arguments: parse_arguments(c.function.arguments),
            })
            .collect();

        let has_content = choice
            .message
            .content
            .as_ref()
            .is_some_and(|c| !c.trim().is_empty());
        if !has_content && tool_calls.is_empty() {
            return Err(Error::provider(
                None,
                "Empty response from API: no content or tool calls",
            ));
        }

        Ok(ChatResponse {
            text: choice.message.content,
            tool_calls,
        })
    }

    async fn chat_stream(
        &self,
        request: ChatRequest<'_>,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        let body = self.build_request(&request, true);
        tracing::debug!(
            model = %self.model,
            messages = body.messages.len(),
            "streaming chat completion"
        );

        let response = self.send(&body).await?;
        let events = async_stream::stream! {
            let mut bytes = Box::pin(response.bytes_stream());
            let mut lines = SseLines::default();

            loop {
                let chunk = match tokio::time::timeout(STREAM_IDLE_TIMEOUT, bytes.next()).await {
                    Ok(Some(Ok(chunk))) => chunk,
                    Ok(Some(Err(e))) => {
                        yield Err(Error::from(e));
                        return;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        yield Err(Error::Transport(format!(
                            "stream stalled for {}s",
                            STREAM_IDLE_TIMEOUT.as_secs()
                        )));
                        return;
                    }
                };
                for line in lines.push(&chunk) {
                    match parse_sse_line(&line) {
                        Some(Ok(ProviderEvent::Done)) => {
                            yield Ok(ProviderEvent::Done);
                            return;
                        }
                        Some(Err(e)) => {
                            yield Err(e);
                            return;
                        }
                        Some(event) => yield event,
                        None => {}
                    }
                }
            }
            yield Ok(ProviderEvent::Done);
        };

        Ok(events.boxed())
    }
}

/// Streamed replies may legitimately outlive any fixed deadline, so they are
/// bounded by the idle timeout between chunks instead.
fn request_timeout(stream: bool) -> Option<Duration> {
    (!stream).then_some(REQUEST_TIMEOUT)
}

fn convert_messages(messages: &[ChatMessage]) -> Vec<OpenAIMessage<'_>> {
    messages
        .iter()
        .map(|m| {
            let tool_calls = (!m.tool_calls.is_empty()).then(|| {
                m.tool_calls
                    .iter()
                    .map(|tc| OpenAIToolCallRequest {
                        id: &tc.id,
                        r#type: "function",
                        function: OpenAIFunctionRequest {
                            name: &tc.name,
                            arguments: tc.arguments.to_string(),
                        },
                    })
                    .collect()
            });

            OpenAIMessage {
                role: m.role.as_str(),
                content: convert_content(m),
                tool_calls,
                tool_call_id: m.tool_call_id.as_deref(),
            }
        })
        .collect()
}

/// Plain string content unless the message carries media.
fn convert_content(message: &ChatMessage) -> Option<OpenAIContent<'_>> {
    if message.role == Role::User && message.has_media() {
        let parts = message
            .content
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => OpenAIContentPart::Text { text },
                ContentPart::Image(source) => OpenAIContentPart::ImageUrl {
                    image_url: OpenAIImageUrl {
                        url: source.to_url(),
                    },
                },
                other => OpenAIContentPart::Text {
                    text: media_reference(other),
                },
            })
            .collect();
        return Some(OpenAIContent::Parts(parts));
    }

    let text = message.text();
    if text.is_empty() && !message.tool_calls.is_empty() {
        None
    } else {
        Some(OpenAIContent::Text(text))
    }
}

fn media_reference(part: &ContentPart) -> &'static str {
    match part.kind() {
        Some(MediaKind::Audio) => "[audio attachment omitted: not supported by this endpoint]",
        Some(MediaKind::Video) => "[video attachment omitted: not supported by this endpoint]",
        _ => "[document attachment omitted: not supported by this endpoint]",
    }
}

fn convert_tools(tools: &[ToolSpec]) -> Vec<OpenAITool<'_>> {
    tools
        .iter()
        .map(|t| OpenAITool {
            r#type: "function",
            function: OpenAIToolFunction {
                name: &t.name,
                description: &t.description,
                parameters: &t.parameters_schema,
            },
        })
        .collect()
}

/// Function arguments arrive as a JSON-encoded string. Anything that does
/// not decode is kept as a string so the context can reject it.
fn parse_arguments(raw: String) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Splits a byte stream into lines, holding partial lines (and partial
/// UTF-8 sequences) until their newline arrives.
#[derive(Default)]
struct SseLines {
    pending: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim_end().to_string());
        }
        lines
    }
}

fn parse_sse_line(line: &str) -> Option<Result<ProviderEvent>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(ProviderEvent::Done));
    }

    match serde_json::from_str::<OpenAIStreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|content| !content.is_empty())
            .map(|content| Ok(ProviderEvent::Token(content))),
        Err(e) => Some(Err(Error::provider(
            None,
            format!("invalid stream chunk: {e}"),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaSource;
    use serde_json::json;

    fn to_json(messages: &[ChatMessage]) -> Value {
        serde_json::to_value(convert_messages(messages)).unwrap()
    }

    #[test]
    fn text_messages_use_plain_content() {
        let wire = to_json(&[ChatMessage::system("be brief"), ChatMessage::user("hi")]);
        assert_eq!(
            wire,
            json!([
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"}
            ])
        );
    }

    #[test]
    fn media_messages_use_content_parts() {
        let message = ChatMessage::user_with_parts(
            "what is this?",
            vec![
                ContentPart::Image(MediaSource::uri("https://x.test/cat.png", "image/png")),
                ContentPart::Audio(MediaSource::data("SUQz", "audio/mpeg")),
            ],
        );
        let wire = to_json(&[message]);
        let parts = wire[0]["content"].as_array().unwrap();

        assert_eq!(parts[0], json!({"type": "text", "text": "what is this?"}));
        assert_eq!(
            parts[1],
            json!({"type": "image_url", "image_url": {"url": "https://x.test/cat.png"}})
        );
        assert_eq!(parts[2]["type"], "text");
        assert!(parts[2]["text"].as_str().unwrap().contains("audio"));
    }

    #[test]
    fn tool_calls_and_results_round_out_the_exchange() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "shell".into(),
            arguments: json!({"command": "ls"}),
        };
        let messages = [
            ChatMessage::assistant_with_tool_calls("", vec![call]),
            ChatMessage::tool_result("call_1", &crate::traits::ToolResult::success("a.txt")),
        ];
        let wire = to_json(&messages);

        assert_eq!(wire[0]["content"], Value::Null);
        assert_eq!(wire[0]["tool_calls"][0]["type"], "function");
        assert_eq!(
            wire[0]["tool_calls"][0]["function"]["arguments"],
            r#"{"command":"ls"}"#
        );
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call_1");
    }

    #[test]
    fn empty_tool_list_is_omitted() {
        let provider = OpenAIProvider::new("");
        let messages = [ChatMessage::user("hi")];
        let request = ChatRequest {
            messages: &messages,
            tools: Some(&[]),
        };
        let body = serde_json::to_value(provider.build_request(&request, false)).unwrap();

        assert!(body.get("tools").is_none());
        assert!(body.get("stream").is_none());
        assert!(body.get("temperature").is_none());
        assert_eq!(body["model"], DEFAULT_MODEL);
    }

    #[test]
    fn tools_carry_their_schema() {
        let specs = [ToolSpec {
            name: "respond".into(),
            description: "answer".into(),
            parameters_schema: json!({"type": "object"}),
        }];
        let wire = serde_json::to_value(convert_tools(&specs)).unwrap();
        assert_eq!(
            wire,
            json!([{
                "type": "function",
                "function": {
                    "name": "respond",
                    "description": "answer",
                    "parameters": {"type": "object"}
                }
            }])
        );
    }

    #[test]
    fn only_blocking_requests_have_a_deadline() {
        assert_eq!(request_timeout(false), Some(REQUEST_TIMEOUT));
        assert_eq!(request_timeout(true), None);
    }

    #[test]
    fn arguments_decode_or_stay_strings() {
        assert_eq!(parse_arguments(r#"{"a":1}"#.into()), json!({"a": 1}));
        assert_eq!(parse_arguments("".into()), json!({}));
        assert_eq!(parse_arguments("not json".into()), json!("not json"));
    }

    #[test]
    fn error_message_prefers_api_error_text() {
        let body = r#"{"error": {"message": "Rate limit reached", "type": "requests"}}"#;
        assert_eq!(error_message(body), "Rate limit reached");
        assert_eq!(error_message("  bad gateway \n"), "bad gateway");
    }

    #[test]
    fn sse_lines_are_reassembled_across_chunks() {
        let mut lines = SseLines::default();
        assert!(lines.push(b"data: {\"choices\":[{\"del").is_empty());
        let out = lines.push(b"ta\":{\"content\":\"Hi\"}}]}\n\ndata: [DO");
        assert_eq!(out, vec![r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#, ""]);
        assert_eq!(lines.push(b"NE]\r\n"), vec!["data: [DONE]"]);
    }

    #[test]
    fn sse_lines_decode_to_events() {
        let token = parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#);
        assert_eq!(token.unwrap().unwrap(), ProviderEvent::Token("Hel".into()));

        let done = parse_sse_line("data: [DONE]");
        assert_eq!(done.unwrap().unwrap(), ProviderEvent::Done);

        assert!(parse_sse_line(": keep-alive").is_none());
        assert!(parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).is_none());
        assert!(matches!(
            parse_sse_line("data: {oops"),
            Some(Err(Error::Provider { .. }))
        ));
    }
}
