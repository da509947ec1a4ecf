//! Per-event response pipeline.
//!
//! classify → in-flight check → rate limit → context → search loop →
//! link annotation → send → record.

use crate::agent::rate_limit::RateLimiter;
use crate::agent::search_loop::{SearchLoop, SearchSettings};
use crate::config::Config;
use crate::conversation::{OwnMessageRegistry, ReplyClassifier, ThreadContextBuilder};
use crate::error::TransportError;
use crate::forum::ForumSearch;
use crate::forum::discourse::SEARCH_BUDGET_FACTOR;
use crate::links::{self, TrackingTags};
use crate::llm::LanguageModel;
use crate::messaging::{InboundStream, Transport};
use crate::prompts::ResponseCatalog;
use crate::{EligibilityDecision, Event, EventId};
use futures::StreamExt as _;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;

/// Tunables read from configuration.
#[derive(Debug, Clone)]
pub struct ResponderSettings {
    pub thread_depth_limit: usize,
    pub request_timeout: Duration,
    pub rate_limit: Duration,
    pub utm_tags: TrackingTags,
    pub search: SearchSettings,
}

impl ResponderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            thread_depth_limit: config.bot.thread_depth_limit,
            request_timeout: config.bot.request_timeout,
            rate_limit: config.bot.rate_limit,
            utm_tags: config.bot.utm_tags.clone(),
            search: SearchSettings {
                max_iterations: config.bot.max_search_iterations,
                max_results: config.discourse.max_results,
                call_timeout: config.bot.request_timeout,
                search_timeout: config.bot.request_timeout * (SEARCH_BUDGET_FACTOR + 1),
                language: config.bot.language.clone(),
            },
        }
    }
}

/// External collaborators shared by every event task.
pub struct ResponderDeps<T, M, S> {
    pub transport: Arc<T>,
    pub model: Arc<M>,
    pub search: Arc<S>,
    pub registry: Arc<OwnMessageRegistry>,
    pub catalog: Arc<ResponseCatalog>,
}

/// How handling one event ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped,
    /// Another task is already answering this thread.
    AlreadyInFlight,
    RateLimited,
    Cancelled,
    Sent(EventId),
    SendFailed,
}

/// Answers eligible room events, one task per event.
pub struct Responder<T, M, S> {
    deps: ResponderDeps<T, M, S>,
    classifier: ReplyClassifier,
    rate_limiter: RateLimiter,
    system_prompt: String,
    settings: ResponderSettings,
    in_flight: Mutex<HashSet<String>>,
    cancel: CancellationToken,
}

/// Releases a thread key when the computation for it ends.
struct InFlightGuard<'a> {
    keys: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl<T, M, S> Responder<T, M, S>
where
    T: Transport,
    M: LanguageModel,
    S: ForumSearch,
{
    pub fn new(
        deps: ResponderDeps<T, M, S>,
        classifier: ReplyClassifier,
        system_prompt: String,
        settings: ResponderSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            deps,
            classifier,
            rate_limiter: RateLimiter::new(settings.rate_limit),
            system_prompt,
            settings,
            in_flight: Mutex::new(HashSet::new()),
            cancel,
        }
    }

    /// Consume the inbound stream until it ends or shutdown is requested.
    ///
    /// In-flight tasks are awaited before returning; cancelled ones send nothing.
    pub async fn run(self: Arc<Self>, mut inbound: InboundStream) {
        tracing::info!(
            transport = self.deps.transport.name(),
            reply_mode = %self.classifier.mode(),
            "responder started"
        );
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = inbound.next() => {
                    let Some(event) = next else {
                        tracing::warn!("inbound stream ended");
                        break;
                    };
                    let span = tracing::info_span!(
                        "responder.event",
                        room_id = %event.room_id,
                        event_id = %event.id,
                    );
                    let responder = Arc::clone(&self);
                    tasks.spawn(async move { responder.handle_event(event).await }.instrument(span));
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(error) = joined {
                        tracing::error!(%error, "event task panicked");
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                tracing::error!(%error, "event task panicked during shutdown");
            }
        }
        tracing::info!("responder stopped");
    }

    /// Run the whole pipeline for one event.
    pub async fn handle_event(&self, event: Event) -> Outcome {
        let registry = self.deps.registry.as_ref();

        let parent = if self.classifier.needs_parent(&event, registry) {
            self.fetch_parent(&event).await
        } else {
            None
        };

        let strategy = match self.classifier.classify(&event, parent.as_ref(), registry) {
            EligibilityDecision::Skip => return Outcome::Skipped,
            EligibilityDecision::Respond(strategy) => strategy,
        };

        let thread_key = format!(
            "{}|{}",
            event.room_id,
            event.in_reply_to.as_deref().unwrap_or(&event.id)
        );
        let Some(_guard) = self.claim_thread(thread_key) else {
            tracing::debug!(event_id = %event.id, "thread already being answered");
            return Outcome::AlreadyInFlight;
        };

        if !self.rate_limiter.allow(tokio::time::Instant::now()) {
            tracing::debug!(event_id = %event.id, "rate limited locally, dropping event");
            return Outcome::RateLimited;
        }

        tracing::info!(
            event_id = %event.id,
            sender = %event.sender,
            ?strategy,
            "responding to event"
        );
        self.typing(&event.room_id, true).await;

        let computed = tokio::select! {
            _ = self.cancel.cancelled() => None,
            reply = self.compute_reply(&event, strategy, parent) => Some(reply),
        };

        self.typing(&event.room_id, false).await;

        let Some(reply) = computed.filter(|_| !self.cancel.is_cancelled()) else {
            tracing::info!(event_id = %event.id, "shutdown requested, reply discarded");
            return Outcome::Cancelled;
        };

        match self.send(&event, &reply).await {
            Ok(sent_id) => {
                self.deps.registry.record(sent_id.clone());
                tracing::info!(event_id = %event.id, reply_id = %sent_id, "reply sent");
                Outcome::Sent(sent_id)
            }
            Err(error) => {
                tracing::error!(event_id = %event.id, %error, "failed to send reply");
                Outcome::SendFailed
            }
        }
    }

    async fn compute_reply(
        &self,
        event: &Event,
        strategy: crate::ContextStrategy,
        parent: Option<Event>,
    ) -> String {
        let builder = ThreadContextBuilder::new(
            self.deps.transport.as_ref(),
            self.deps.registry.as_ref(),
            self.classifier.matcher(),
            self.settings.thread_depth_limit,
            self.settings.request_timeout,
        );
        let context = builder.build(event, strategy, parent).await;
        tracing::debug!(turns = context.len(), "context built");

        let search_loop = SearchLoop::new(
            self.deps.model.as_ref(),
            self.deps.search.as_ref(),
            self.deps.catalog.as_ref(),
            &self.system_prompt,
            &self.settings.search,
        );

        match search_loop.answer(&context).await {
            Ok(answer) => links::annotate(&answer, &self.settings.utm_tags),
            Err(error) => {
                tracing::warn!(event_id = %event.id, %error, "answering failed");
                self.deps
                    .catalog
                    .error(error.response_key(), &self.settings.search.language)
                    .to_string()
            }
        }
    }

    async fn fetch_parent(&self, event: &Event) -> Option<Event> {
        let parent_id = event.in_reply_to.as_deref()?;
        let fetched = tokio::time::timeout(
            self.settings.request_timeout,
            self.deps.transport.fetch_event(&event.room_id, parent_id),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout));

        match fetched {
            Ok(parent) => Some(parent),
            Err(error) => {
                tracing::warn!(event_id = %event.id, parent_id, %error, "could not fetch parent for classification");
                None
            }
        }
    }

    async fn send(&self, event: &Event, text: &str) -> Result<EventId, TransportError> {
        tokio::time::timeout(
            self.settings.request_timeout,
            self.deps.transport.send(&event.room_id, text, Some(&event.id)),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout))
    }

    async fn typing(&self, room_id: &str, typing: bool) {
        let result = tokio::time::timeout(
            self.settings.request_timeout,
            self.deps.transport.set_typing(room_id, typing),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout));
        if let Err(error) = result {
            tracing::debug!(room_id, typing, %error, "typing notification failed");
        }
    }

    fn claim_thread(&self, key: String) -> Option<InFlightGuard<'_>> {
        let mut keys = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !keys.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            keys: &self.in_flight,
            key,
        })
    }
}
