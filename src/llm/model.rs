//! Provider-neutral completion types and the `LanguageModel` trait.

use crate::error::LlmError;
use crate::tools::ToolCall;
use std::future::Future;

/// One message in the chat history sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System(String),
    User(String),
    Assistant(String),
    /// The model's earlier request to run a tool, echoed back verbatim.
    AssistantToolCall { id: String, call: ToolCall },
    /// Result of the tool call with the matching id.
    ToolResult { id: String, content: String },
}

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// What the model answered with.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    Text(String),
    ToolCall { id: String, call: ToolCall },
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A completion backend supporting structured tool calls.
pub trait LanguageModel: Send + Sync + 'static {
    /// Run one completion turn over the full history.
    fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> impl Future<Output = Result<ModelOutput, LlmError>> + Send;
}
