use crate::error::Result;
use crate::media::ContentPart;
use crate::traits::{ToolResult, ToolSpec};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            role,
            content,
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    fn text_parts(content: String) -> Vec<ContentPart> {
        if content.is_empty() {
            vec![]
        } else {
            vec![ContentPart::text(content)]
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, Self::text_parts(content.into()))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, Self::text_parts(content.into()))
    }

    /// A user turn made of a text prompt followed by media parts.
    pub fn user_with_parts(content: impl Into<String>, media: Vec<ContentPart>) -> Self {
        let mut parts = Self::text_parts(content.into());
        parts.extend(media);
        Self::new(Role::User, parts)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Self::text_parts(content.into()))
    }

    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::assistant(content)
        }
    }

    /// The tool result is stored as its JSON form so providers can pass it
    /// through verbatim.
    pub fn tool_result(tool_call_id: impl Into<String>, result: &ToolResult) -> Self {
        let content = serde_json::to_string(result).unwrap_or_else(|_| result.summary());
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, Self::text_parts(content))
        }
    }

    /// Concatenated text parts, ignoring media.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_media(&self) -> bool {
        self.content.iter().any(|p| p.kind().is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: vec![],
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub tools: Option<&'a [ToolSpec]>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Token(String),
    Done,
}

/// A language model backend.
///
/// `chat` covers both plain and tool-enabled turns: tools are offered when
/// `request.tools` is set. Errors are reported as `Error::Transport` when the
/// model could not be reached and `Error::Provider` when it answered with a
/// failure; callers do not retry.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, request: ChatRequest<'_>) -> Result<ChatResponse>;

    /// Opens a streamed turn. The returned stream owns the underlying
    /// connection; dropping it closes the connection.
    async fn chat_stream(
        &self,
        request: ChatRequest<'_>,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_keeps_call_id() {
        let msg = ChatMessage::tool_result("call_7", &ToolResult::success("ok"));
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_7"));

        let decoded: ToolResult = serde_json::from_str(&msg.text()).unwrap();
        assert!(decoded.success);
        assert_eq!(decoded.output, "ok");
    }

    #[test]
    fn user_with_parts_puts_text_first() {
        let image = ContentPart::from_uri_or_data("https://example.com/a.png").unwrap();
        let msg = ChatMessage::user_with_parts("describe", vec![image.clone()]);
        assert_eq!(msg.content, vec![ContentPart::text("describe"), image]);
        assert!(msg.has_media());
        assert_eq!(msg.text(), "describe");
    }

    #[test]
    fn role_serializes_lowercase() {
        let msg = ChatMessage::assistant("hi");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert!(value.get("tool_calls").is_none());
    }
}
