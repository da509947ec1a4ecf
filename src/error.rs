//! Top-level error types for askaosus.

use std::sync::Arc;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),
}

/// Chat transport (Matrix) errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("event {event_id} not found")]
    NotFound { event_id: String },

    #[error("login failed: {0}")]
    Login(String),

    #[error("homeserver returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport request failed: {0}")]
    Request(String),

    #[error("malformed homeserver response: {0}")]
    InvalidResponse(String),

    #[error("transport call timed out")]
    Timeout,
}

/// Language-model backend errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("completion request failed: {0}")]
    Request(String),

    #[error("provider returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed completion response: {0}")]
    InvalidResponse(String),

    #[error("model requested unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for tool {tool}: {reason}")]
    InvalidToolArguments { tool: String, reason: String },

    #[error("completion timed out")]
    Timeout,
}

/// Forum search backend errors.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("forum search is rate limited")]
    RateLimited,

    #[error("forum search unreachable: {0}")]
    Unreachable(String),
}

/// Terminal failures of the search-orchestration loop.
///
/// Each variant maps to exactly one user-facing response so callers never
/// have to re-derive the cause from backend text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnswerError {
    #[error("language model unavailable: {0}")]
    LlmUnavailable(String),

    #[error("forum search rate limited")]
    SearchRateLimited,

    #[error("forum search unavailable: {0}")]
    SearchUnavailable(String),
}

impl AnswerError {
    /// Response catalog key (in `error_messages`) for this failure.
    pub fn response_key(&self) -> &'static str {
        match self {
            AnswerError::LlmUnavailable(_) => "processing_error",
            AnswerError::SearchRateLimited => "search_rate_limited",
            AnswerError::SearchUnavailable(_) => "search_error",
        }
    }
}

impl From<LlmError> for AnswerError {
    fn from(error: LlmError) -> Self {
        AnswerError::LlmUnavailable(error.to_string())
    }
}

impl From<SearchError> for AnswerError {
    fn from(error: SearchError) -> Self {
        match error {
            SearchError::RateLimited => AnswerError::SearchRateLimited,
            SearchError::Unreachable(reason) => AnswerError::SearchUnavailable(reason),
        }
    }
}
