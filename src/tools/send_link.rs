//! Final-answer tool: hand the user one forum link.

use crate::llm::model::ToolSpec;
use serde::Deserialize;
use serde_json::json;

pub const NAME: &str = "send_link";

#[derive(Debug, Deserialize)]
pub struct SendLinkArgs {
    pub url: String,
    #[serde(default)]
    pub message: String,
}

pub fn spec() -> ToolSpec {
    ToolSpec {
        name: NAME,
        description: "Send a link to the user when you find a relevant topic",
        parameters: json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL of the relevant topic"
                },
                "message": {
                    "type": "string",
                    "description": "A brief message indicating this is the best match found"
                }
            },
            "required": ["url", "message"]
        }),
    }
}

/// The reply text: the model's message, a blank line, then the link.
pub fn compose_link_reply(message: &str, url: &str) -> String {
    let message = message.trim();
    if message.is_empty() {
        url.to_string()
    } else {
        format!("{message}\n\n{url}")
    }
}
