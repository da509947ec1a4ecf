//! Askaosus: a Matrix room assistant that answers questions from a Discourse
//! forum through a tool-calling language model.

pub mod agent;
pub mod config;
pub mod conversation;
pub mod error;
pub mod forum;
pub mod links;
pub mod llm;
pub mod messaging;
pub mod prompts;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Room identifier type.
pub type RoomId = String;

/// Event identifier type. Opaque, unique within a room.
pub type EventId = String;

/// A room event delivered by the transport. Never mutated by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub room_id: RoomId,
    pub sender: String,
    pub content: EventContent,
    /// Identifier of the event this one replies to.
    pub in_reply_to: Option<EventId>,
    /// User ids explicitly mentioned through protocol metadata.
    #[serde(default)]
    pub mentioned_user_ids: Vec<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Event {
    /// Text body, if this is a text message.
    pub fn body(&self) -> Option<&str> {
        match &self.content {
            EventContent::Text(body) => Some(body),
            EventContent::NonText { .. } => None,
        }
    }
}

/// Event payload variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventContent {
    Text(String),
    /// Images, files, redactions, state events... anything without a text body.
    NonText { kind: String },
}

/// Process-wide policy for replies to earlier messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMode {
    /// Replies are never answered, even when they mention the agent.
    Ignore,
    /// Replies are answered when they mention the agent, with the parent as context.
    #[default]
    #[serde(alias = "mention_only")]
    Mention,
    /// Replies to the agent's own messages are answered with the whole thread as context.
    Watch,
}

impl std::str::FromStr for ReplyMode {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(ReplyMode::Ignore),
            "mention" | "mention_only" => Ok(ReplyMode::Mention),
            "watch" => Ok(ReplyMode::Watch),
            other => Err(format!(
                "unknown reply mode '{other}', expected one of: ignore, mention, watch"
            )),
        }
    }
}

impl std::fmt::Display for ReplyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyMode::Ignore => write!(f, "ignore"),
            ReplyMode::Mention => write!(f, "mention"),
            ReplyMode::Watch => write!(f, "watch"),
        }
    }
}

/// Who said a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerRole {
    User,
    Agent,
}

/// Content of a transcript entry: real text or a typed placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnContent {
    Text(String),
    /// The referenced event could not be fetched.
    Unavailable,
    /// The referenced event exists but carries no text.
    NonText { kind: String },
}

impl TurnContent {
    pub fn is_placeholder(&self) -> bool {
        !matches!(self, TurnContent::Text(_))
    }
}

impl std::fmt::Display for TurnContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnContent::Text(text) => write!(f, "{text}"),
            TurnContent::Unavailable => write!(f, "[unavailable: original message could not be retrieved]"),
            TurnContent::NonText { kind } => write!(f, "[non-text: {kind}]"),
        }
    }
}

/// One reconstructed transcript entry. Transcripts are ordered oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: SpeakerRole,
    pub content: TurnContent,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: SpeakerRole::User,
            content: TurnContent::Text(text.into()),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            role: SpeakerRole::Agent,
            content: TurnContent::Text(text.into()),
        }
    }
}

/// How much context to gather for an eligible event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStrategy {
    /// Only the triggering event.
    None,
    /// The triggering event and the one event it replies to.
    SingleParent,
    /// The reply chain walked backwards up to the depth limit.
    FullThread,
}

/// Result of classifying an incoming event. Computed once, never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EligibilityDecision {
    Skip,
    Respond(ContextStrategy),
}

/// Forum search hit handed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumHit {
    pub topic_id: u64,
    pub title: String,
    pub url: String,
    pub excerpt: String,
}
