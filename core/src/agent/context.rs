use crate::agent::ToolRegistry;
use crate::agent::parse::parse_tool_calls;
use crate::error::{Error, Result};
use crate::media::ContentPart;
use crate::traits::{
    ChatMessage, ChatRequest, ChatResponse, Provider, ProviderEvent, Role, Tool, ToolCall,
    ToolResult, ToolSpec,
};
use futures_util::{Stream, StreamExt};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_MAX_TOOL_TURNS: usize = 20;

/// One conversation with a model: system prompt, message history, and the
/// tools the model may call.
///
/// Chat operations take `&mut self`; a context serves one turn at a time.
/// Run independent conversations on separate contexts (see [`Context::fork`]).
pub struct Context {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    system_prompt: String,
    messages: Vec<ChatMessage>,
    max_tool_turns: usize,
    tool_protocol: bool,
}

impl Context {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            registry: Arc::new(ToolRegistry::new()),
            system_prompt: String::new(),
            messages: vec![],
            max_tool_turns: DEFAULT_MAX_TOOL_TURNS,
            tool_protocol: false,
        }
    }

    pub fn with_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_tool_turns(mut self, max: usize) -> Self {
        self.max_tool_turns = max.max(1);
        self
    }

    /// Describe the `<tool_call>` text protocol in the system prompt and
    /// read such blocks back from replies, for models without native
    /// function calling. Off by default; replies are then never scanned.
    pub fn with_tool_protocol(mut self, enabled: bool) -> Self {
        self.tool_protocol = enabled;
        self
    }

    /// A new, empty conversation on the same provider, tools and settings.
    pub fn fork(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            registry: self.registry.clone(),
            system_prompt: self.system_prompt.clone(),
            messages: vec![],
            max_tool_turns: self.max_tool_turns,
            tool_protocol: self.tool_protocol,
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    pub fn max_tool_turns(&self) -> usize {
        self.max_tool_turns
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn register_tool(&self, tool: Arc<dyn Tool>) -> Result<()> {
        self.registry.register(tool)
    }

    pub fn import_tools(&self, catalog: &ToolRegistry) -> Result<usize> {
        self.registry.import(catalog)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    /// Appends a message to the history after checking its shape: system
    /// messages are refused and a tool result must answer a call issued by an
    /// earlier assistant message.
    pub fn add_message(&mut self, message: ChatMessage) -> Result<()> {
        match message.role {
            Role::System => {
                return Err(Error::InvalidMessage(
                    "the system prompt is set with set_system_prompt".into(),
                ));
            }
            Role::Tool => {
                let id = message.tool_call_id.as_deref().ok_or_else(|| {
                    Error::InvalidMessage("tool result without a tool_call_id".into())
                })?;
                if !self.issued_call(id) {
                    return Err(Error::InvalidMessage(format!(
                        "tool result for unknown call '{id}'"
                    )));
                }
            }
            Role::User | Role::Assistant => {
                if message.content.is_empty() && message.tool_calls.is_empty() {
                    return Err(Error::InvalidMessage(format!(
                        "{} message has no content",
                        message.role
                    )));
                }
            }
        }

        self.messages.push(message);
        Ok(())
    }

    fn issued_call(&self, id: &str) -> bool {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(|m| &m.tool_calls)
            .any(|c| c.id == id)
    }

    /// One round trip with no tools offered.
    pub async fn chat(&mut self, user_text: &str, media: &[&str]) -> Result<ChatResponse> {
        let user = build_user_message(user_text, media)?;
        self.messages.push(user);

        let outgoing = self.outgoing(None);
        debug!(provider = self.provider.name(), messages = outgoing.len(), "Chat turn");
        let response = self
            .provider
            .chat(ChatRequest {
                messages: &outgoing,
                tools: None,
            })
            .await?;

        self.messages
            .push(ChatMessage::assistant(response.text_or_empty()));
        Ok(response)
    }

    /// Offers every registered tool and keeps executing the calls the model
    /// makes until it answers without any, or the turn cap is hit.
    ///
    /// Tool failures are handed back to the model as failed results. A call
    /// to an unknown tool is answered once with an error result; a second
    /// unknown call ends the turn with `Error::ToolNotFound`. Messages
    /// appended before an error stay in the history.
    pub async fn chat_with_tools(
        &mut self,
        user_text: &str,
        media: &[&str],
    ) -> Result<ChatResponse> {
        let user = build_user_message(user_text, media)?;
        self.messages.push(user);

        let mut unknown_tool_reported = false;

        for turn in 1..=self.max_tool_turns {
            let specs = self.registry.list();
            let outgoing = self.outgoing(Some(&specs));
            debug!(
                provider = self.provider.name(),
                turn,
                messages = outgoing.len(),
                tools = specs.len(),
                "Tool turn"
            );

            let response = self
                .provider
                .chat(ChatRequest {
                    messages: &outgoing,
                    tools: Some(&specs),
                })
                .await?;

            let ChatResponse { text, tool_calls } = response;
            let (prose, tool_calls) = if !tool_calls.is_empty() {
                (text.clone().unwrap_or_default(), tool_calls)
            } else if self.tool_protocol {
                parse_tool_calls(text.as_deref().unwrap_or_default())
            } else {
                (String::new(), vec![])
            };

            // A final answer is recorded exactly as the model wrote it.
            if tool_calls.is_empty() {
                let text = text.unwrap_or_default();
                self.messages.push(ChatMessage::assistant(text.clone()));
                return Ok(ChatResponse::text(text));
            }

            self.messages.push(ChatMessage::assistant_with_tool_calls(
                prose,
                tool_calls.clone(),
            ));

            let mut missing = None;
            for call in tool_calls {
                let result = match self.run_call(&call).await {
                    Ok(result) => result,
                    Err(Error::ToolNotFound(name)) => {
                        warn!(tool = %name, "Model requested an unknown tool");
                        let result = ToolResult::error(format!(
                            "Tool '{}' does not exist. Available tools: {}",
                            name,
                            self.registry.names().join(", ")
                        ));
                        missing.get_or_insert(name);
                        result
                    }
                    Err(e) => return Err(e),
                };
                self.messages
                    .push(ChatMessage::tool_result(call.id, &result));
            }

            if let Some(name) = missing {
                if unknown_tool_reported {
                    return Err(Error::ToolNotFound(name));
                }
                unknown_tool_reported = true;
            }
        }

        Err(Error::LoopExceeded {
            turns: self.max_tool_turns,
        })
    }

    async fn run_call(&self, call: &ToolCall) -> Result<ToolResult> {
        let args = match &call.arguments {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            args @ serde_json::Value::Object(_) => args.clone(),
            other => {
                if !self.registry.contains(&call.name) {
                    return Err(Error::ToolNotFound(call.name.clone()));
                }
                return Ok(ToolResult::error(format!(
                    "Invalid arguments for tool '{}': expected a JSON object, got {}",
                    call.name, other
                )));
            }
        };

        let result = self.registry.execute(&call.name, args).await?;
        debug!(tool = %call.name, success = result.success, "Tool executed");
        Ok(result)
    }

    /// Streams the reply of a tool-less turn chunk by chunk.
    ///
    /// Nothing is read from the provider until the caller polls, and dropping
    /// the stream drops the provider's connection with it. The assistant
    /// message is recorded only when the model finishes its turn; an
    /// abandoned stream leaves just the user message behind.
    pub fn stream_chat<'a>(
        &'a mut self,
        user_text: &'a str,
        media: &'a [&'a str],
    ) -> impl Stream<Item = Result<String>> + Send + 'a {
        async_stream::stream! {
            let user = match build_user_message(user_text, media) {
                Ok(user) => user,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            self.messages.push(user);

            let outgoing = self.outgoing(None);
            debug!(provider = self.provider.name(), messages = outgoing.len(), "Streaming turn");
            let opened = self
                .provider
                .chat_stream(ChatRequest {
                    messages: &outgoing,
                    tools: None,
                })
                .await;
            let mut events = match opened {
                Ok(events) => events,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut text = String::new();
            while let Some(event) = events.next().await {
                match event {
                    Ok(ProviderEvent::Token(chunk)) => {
                        text.push_str(&chunk);
                        yield Ok(chunk);
                    }
                    Ok(ProviderEvent::Done) => break,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            drop(events);

            self.messages.push(ChatMessage::assistant(text));
        }
    }

    pub async fn execute_tool(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> Result<ToolResult> {
        self.registry.execute(name, params).await
    }

    fn outgoing(&self, tools: Option<&[ToolSpec]>) -> Vec<ChatMessage> {
        let mut system = self.system_prompt.clone();
        if self.tool_protocol
            && let Some(specs) = tools
            && !specs.is_empty()
        {
            if !system.is_empty() {
                system.push_str("\n\n---\n\n");
            }
            system.push_str(&tool_protocol_instructions(specs));
        }

        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        if !system.is_empty() {
            messages.push(ChatMessage::system(system));
        }
        messages.extend(self.messages.iter().cloned());
        messages
    }
}

fn build_user_message(text: &str, media: &[&str]) -> Result<ChatMessage> {
    let parts = media
        .iter()
        .map(|m| ContentPart::from_uri_or_data(m))
        .collect::<Result<Vec<_>>>()?;

    if text.is_empty() && parts.is_empty() {
        return Err(Error::InvalidMessage("empty user message".into()));
    }

    Ok(ChatMessage::user_with_parts(text, parts))
}

fn tool_protocol_instructions(specs: &[ToolSpec]) -> String {
    let mut instructions = String::new();
    instructions.push_str("## Tool Use Protocol\n\n");
    instructions.push_str("To use a tool, wrap a JSON object in <tool_call> tags:\n\n");
    instructions.push_str("```\n<tool_call>\n");
    instructions.push_str("{\"name\": \"tool_name\", \"arguments\": {\"param\": \"value\"}}\n");
    instructions.push_str("</tool_call>\n```\n\n");
    instructions.push_str("You may use multiple tool calls in a single response. ");
    instructions.push_str("Tool results are returned to you as JSON. ");
    instructions.push_str("Answer without any <tool_call> tags once you are done.\n\n");
    instructions.push_str("### Available Tools\n\n");

    for spec in specs {
        let _ = writeln!(
            instructions,
            "**{}**: {}\nParameters: `{}`\n",
            spec.name, spec.description, spec.parameters_schema
        );
    }

    instructions
}
