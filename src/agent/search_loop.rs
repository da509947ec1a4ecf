//! Search-orchestration loop.
//!
//! Drives model turns and forum searches until the model answers, a tool
//! ends the conversation, the search budget runs out or a backend fails.

use crate::error::{AnswerError, LlmError, SearchError};
use crate::forum::ForumSearch;
use crate::llm::{ChatMessage, LanguageModel, ModelOutput, ToolSpec};
use crate::prompts::ResponseCatalog;
use crate::tools::{self, ToolCall};
use crate::{ConversationTurn, SpeakerRole};
use std::time::Duration;

/// Budget and limits for one loop run.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    /// Maximum forum searches before the loop gives up.
    pub max_iterations: usize,
    /// Hits requested per search.
    pub max_results: usize,
    /// Timeout for each model turn.
    pub call_timeout: Duration,
    /// Timeout for one whole forum search. A search may issue several
    /// requests, so this must exceed the backend's own budget.
    pub search_timeout: Duration,
    pub language: String,
}

#[derive(Debug)]
enum LoopState {
    AwaitingModel,
    ExecutingTool { call_id: String, query: String },
    Done(String),
    Failed(AnswerError),
}

/// One question answered through the model and the forum search.
pub struct SearchLoop<'a, M: LanguageModel, S: ForumSearch> {
    model: &'a M,
    search: &'a S,
    catalog: &'a ResponseCatalog,
    system_prompt: &'a str,
    settings: &'a SearchSettings,
    tools: Vec<ToolSpec>,
}

impl<'a, M: LanguageModel, S: ForumSearch> SearchLoop<'a, M, S> {
    pub fn new(
        model: &'a M,
        search: &'a S,
        catalog: &'a ResponseCatalog,
        system_prompt: &'a str,
        settings: &'a SearchSettings,
    ) -> Self {
        Self {
            model,
            search,
            catalog,
            system_prompt,
            settings,
            tools: tools::tool_specs(),
        }
    }

    /// Run the loop over `context` and return the final answer text.
    pub async fn answer(&self, context: &[ConversationTurn]) -> Result<String, AnswerError> {
        let mut history = self.initial_history(context);
        let mut searches = 0usize;
        let mut model_turns = 0usize;
        let mut state = LoopState::AwaitingModel;

        loop {
            state = match state {
                LoopState::AwaitingModel => {
                    model_turns += 1;
                    match self.call_model(&history).await {
                        Ok(ModelOutput::Text(text)) => LoopState::Done(text),
                        Ok(ModelOutput::ToolCall { id, call }) => {
                            let call_id = if id.is_empty() {
                                format!("call_{model_turns}")
                            } else {
                                id
                            };
                            self.on_tool_call(&mut history, call_id, call)
                        }
                        Err(error) => {
                            tracing::warn!(%error, model_turns, "language model turn failed");
                            LoopState::Failed(error.into())
                        }
                    }
                }
                LoopState::ExecutingTool { call_id, query } => {
                    searches += 1;
                    match self.call_search(&query).await {
                        Ok(hits) => {
                            tracing::info!(query = %query, hits = hits.len(), searches, "forum search completed");
                            let no_results = self.catalog.discourse("no_results", &self.settings.language);
                            history.push(ChatMessage::ToolResult {
                                id: call_id,
                                content: tools::render_hits(&hits, no_results),
                            });
                            if searches >= self.settings.max_iterations {
                                tracing::info!(searches, "search budget exhausted");
                                LoopState::Done(self.text("iterations_exhausted"))
                            } else {
                                LoopState::AwaitingModel
                            }
                        }
                        Err(error) => {
                            tracing::warn!(query = %query, %error, "forum search failed");
                            LoopState::Failed(error.into())
                        }
                    }
                }
                LoopState::Done(answer) => {
                    tracing::debug!(searches, model_turns, "search loop finished");
                    return Ok(answer);
                }
                LoopState::Failed(error) => return Err(error),
            };
        }
    }

    fn on_tool_call(&self, history: &mut Vec<ChatMessage>, call_id: String, call: ToolCall) -> LoopState {
        match call {
            ToolCall::SearchForum { query } => {
                history.push(ChatMessage::AssistantToolCall {
                    id: call_id.clone(),
                    call: ToolCall::SearchForum {
                        query: query.clone(),
                    },
                });
                LoopState::ExecutingTool { call_id, query }
            }
            ToolCall::SendLink { url, message } => {
                LoopState::Done(tools::compose_link_reply(&message, &url))
            }
            ToolCall::NoResult => LoopState::Done(self.text("no_results_found")),
        }
    }

    fn initial_history(&self, context: &[ConversationTurn]) -> Vec<ChatMessage> {
        let mut history = Vec::with_capacity(context.len() + 1);
        history.push(ChatMessage::System(self.system_prompt.to_string()));
        history.extend(context.iter().map(|turn| {
            let content = turn.content.to_string();
            match turn.role {
                SpeakerRole::User => ChatMessage::User(content),
                SpeakerRole::Agent => ChatMessage::Assistant(content),
            }
        }));
        history
    }

    async fn call_model(&self, history: &[ChatMessage]) -> Result<ModelOutput, LlmError> {
        tokio::time::timeout(
            self.settings.call_timeout,
            self.model.complete(history, &self.tools),
        )
        .await
        .unwrap_or(Err(LlmError::Timeout))
    }

    async fn call_search(&self, query: &str) -> Result<Vec<crate::ForumHit>, SearchError> {
        tokio::time::timeout(
            self.settings.search_timeout,
            self.search.search(query, self.settings.max_results),
        )
        .await
        .unwrap_or_else(|_| Err(SearchError::Unreachable("search timed out".into())))
    }

    fn text(&self, key: &str) -> String {
        self.catalog.error(key, &self.settings.language).to_string()
    }
}
