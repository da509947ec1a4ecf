//! Thread context reconstruction.
//!
//! Turns an eligible event into an oldest-first transcript. Parents are
//! fetched one hop at a time through the transport. Anything that cannot be
//! fetched or has no text degrades to a placeholder turn instead of aborting.

use crate::config::{MAX_THREAD_DEPTH, MIN_THREAD_DEPTH};
use crate::conversation::{MentionMatcher, OwnMessageRegistry};
use crate::error::TransportError;
use crate::messaging::Transport;
use crate::{ContextStrategy, ConversationTurn, Event, EventContent, SpeakerRole, TurnContent};
use std::collections::HashSet;
use std::time::Duration;

/// Builds transcripts for one request. Cheap to construct.
pub struct ThreadContextBuilder<'a, T: Transport> {
    transport: &'a T,
    registry: &'a OwnMessageRegistry,
    matcher: &'a MentionMatcher,
    depth_limit: usize,
    fetch_timeout: Duration,
}

impl<'a, T: Transport> ThreadContextBuilder<'a, T> {
    pub fn new(
        transport: &'a T,
        registry: &'a OwnMessageRegistry,
        matcher: &'a MentionMatcher,
        depth_limit: usize,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            registry,
            matcher,
            depth_limit: depth_limit.clamp(MIN_THREAD_DEPTH, MAX_THREAD_DEPTH),
            fetch_timeout,
        }
    }

    /// Build the transcript for `event`. The event itself is always the last turn.
    ///
    /// `known_parent` is the already-fetched direct parent, if the caller has it.
    pub async fn build(
        &self,
        event: &Event,
        strategy: ContextStrategy,
        known_parent: Option<Event>,
    ) -> Vec<ConversationTurn> {
        let mut turns = match (strategy, &event.in_reply_to) {
            (ContextStrategy::None, _) | (_, None) => Vec::new(),
            (ContextStrategy::SingleParent, Some(parent_id)) => {
                vec![self.single_parent(event, parent_id, known_parent).await]
            }
            (ContextStrategy::FullThread, Some(parent_id)) => {
                self.full_thread(event, parent_id, known_parent).await
            }
        };
        turns.push(self.current_turn(event));
        turns
    }

    async fn single_parent(
        &self,
        event: &Event,
        parent_id: &str,
        known_parent: Option<Event>,
    ) -> ConversationTurn {
        match self.resolve(&event.room_id, parent_id, known_parent).await {
            Ok(parent) => self.turn_for(&parent),
            Err(error) => {
                tracing::warn!(
                    room_id = %event.room_id,
                    parent_id,
                    %error,
                    "parent unavailable, using placeholder"
                );
                self.unavailable_turn(parent_id)
            }
        }
    }

    /// Walk the reply chain backwards, newest hop first, then reverse.
    async fn full_thread(
        &self,
        event: &Event,
        parent_id: &str,
        mut known_parent: Option<Event>,
    ) -> Vec<ConversationTurn> {
        let mut prior = Vec::with_capacity(self.depth_limit);
        let mut visited = HashSet::from([event.id.clone()]);
        let mut next = Some(parent_id.to_string());

        while let Some(hop_id) = next.take() {
            if prior.len() >= self.depth_limit {
                tracing::debug!(
                    room_id = %event.room_id,
                    depth_limit = self.depth_limit,
                    "thread depth limit reached"
                );
                break;
            }
            if !visited.insert(hop_id.clone()) {
                tracing::warn!(room_id = %event.room_id, event_id = %hop_id, "reply chain loops back on itself");
                break;
            }

            match self.resolve(&event.room_id, &hop_id, known_parent.take()).await {
                Ok(hop) => {
                    next = hop.in_reply_to.clone();
                    prior.push(self.turn_for(&hop));
                }
                Err(error) => {
                    tracing::warn!(
                        room_id = %event.room_id,
                        event_id = %hop_id,
                        resolved = prior.len(),
                        %error,
                        "thread walk stopped early"
                    );
                    if prior.is_empty() {
                        prior.push(self.unavailable_turn(&hop_id));
                    }
                    break;
                }
            }
        }

        prior.reverse();
        prior
    }

    async fn resolve(
        &self,
        room_id: &str,
        event_id: &str,
        known: Option<Event>,
    ) -> Result<Event, TransportError> {
        if let Some(event) = known.filter(|known| known.id == event_id) {
            return Ok(event);
        }
        match tokio::time::timeout(
            self.fetch_timeout,
            self.transport.fetch_event(room_id, event_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn role_of(&self, event_id: &str, sender: Option<&str>) -> SpeakerRole {
        if self.registry.contains(event_id) || sender == Some(self.matcher.agent_id()) {
            SpeakerRole::Agent
        } else {
            SpeakerRole::User
        }
    }

    fn turn_for(&self, event: &Event) -> ConversationTurn {
        let content = match &event.content {
            EventContent::Text(body) => TurnContent::Text(body.clone()),
            EventContent::NonText { kind } => TurnContent::NonText { kind: kind.clone() },
        };
        ConversationTurn {
            role: self.role_of(&event.id, Some(&event.sender)),
            content,
        }
    }

    fn unavailable_turn(&self, event_id: &str) -> ConversationTurn {
        ConversationTurn {
            role: self.role_of(event_id, None),
            content: TurnContent::Unavailable,
        }
    }

    /// The triggering event with trigger tokens removed, unless nothing else remains.
    fn current_turn(&self, event: &Event) -> ConversationTurn {
        let content = match &event.content {
            EventContent::Text(body) => {
                let stripped = self.matcher.strip(body);
                TurnContent::Text(if stripped.is_empty() { body.clone() } else { stripped })
            }
            EventContent::NonText { kind } => TurnContent::NonText { kind: kind.clone() },
        };
        ConversationTurn {
            role: SpeakerRole::User,
            content,
        }
    }
}
