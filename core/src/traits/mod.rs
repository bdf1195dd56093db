pub mod provider;
pub mod tool;

pub use provider::{
    ChatMessage, ChatRequest, ChatResponse, Provider, ProviderEvent, Role, ToolCall,
};
pub use tool::{Tool, ToolResult, ToolSpec};
