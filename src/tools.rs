//! Tools the search-orchestration model can call.
//!
//! The model names a tool and passes JSON arguments. Both are parsed once, at
//! the LLM boundary, into the closed [`ToolCall`] type so the loop never
//! dispatches on strings.

pub mod forum_search;
pub mod send_link;

pub use forum_search::{SearchForumArgs, render_hits};
pub use send_link::{SendLinkArgs, compose_link_reply};

use crate::error::LlmError;
use crate::llm::model::ToolSpec;
use serde::de::DeserializeOwned;
use serde_json::json;

pub const NO_RESULT_TOOL: &str = "no_result_message";

/// A parsed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    SearchForum { query: String },
    SendLink { url: String, message: String },
    NoResult,
}

impl ToolCall {
    /// Parse a tool call from its wire name and arguments.
    pub fn parse(name: &str, arguments: &serde_json::Value) -> Result<Self, LlmError> {
        match name.trim() {
            forum_search::NAME => {
                let args: SearchForumArgs = decode(forum_search::NAME, arguments)?;
                let query = args.query.trim();
                if query.is_empty() {
                    return Err(LlmError::InvalidToolArguments {
                        tool: forum_search::NAME.into(),
                        reason: "query is empty".into(),
                    });
                }
                Ok(ToolCall::SearchForum {
                    query: query.to_string(),
                })
            }
            send_link::NAME => {
                let args: SendLinkArgs = decode(send_link::NAME, arguments)?;
                Ok(ToolCall::SendLink {
                    url: args.url.trim().to_string(),
                    message: args.message.trim().to_string(),
                })
            }
            NO_RESULT_TOOL => Ok(ToolCall::NoResult),
            other => Err(LlmError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::SearchForum { .. } => forum_search::NAME,
            ToolCall::SendLink { .. } => send_link::NAME,
            ToolCall::NoResult => NO_RESULT_TOOL,
        }
    }

    /// Arguments as the model would have sent them.
    pub fn arguments(&self) -> serde_json::Value {
        match self {
            ToolCall::SearchForum { query } => json!({ "query": query }),
            ToolCall::SendLink { url, message } => json!({ "url": url, "message": message }),
            ToolCall::NoResult => json!({}),
        }
    }
}

fn decode<T: DeserializeOwned>(tool: &str, arguments: &serde_json::Value) -> Result<T, LlmError> {
    serde_json::from_value(arguments.clone()).map_err(|error| LlmError::InvalidToolArguments {
        tool: tool.to_string(),
        reason: error.to_string(),
    })
}

/// Every tool offered to the model.
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        forum_search::spec(),
        send_link::spec(),
        ToolSpec {
            name: NO_RESULT_TOOL,
            description: "Inform the user when no relevant results could be found",
            parameters: json!({ "type": "object", "properties": {} }),
        },
    ]
}
