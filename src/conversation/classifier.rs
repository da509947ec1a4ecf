//! Reply-behavior state machine.

use crate::conversation::{MentionMatcher, OwnMessageRegistry};
use crate::{ContextStrategy, EligibilityDecision, Event, ReplyMode};

/// Decides whether an event gets a response and how much context it needs.
#[derive(Debug, Clone)]
pub struct ReplyClassifier {
    mode: ReplyMode,
    matcher: MentionMatcher,
}

impl ReplyClassifier {
    pub fn new(mode: ReplyMode, matcher: MentionMatcher) -> Self {
        Self { mode, matcher }
    }

    pub fn mode(&self) -> ReplyMode {
        self.mode
    }

    pub fn matcher(&self) -> &MentionMatcher {
        &self.matcher
    }

    /// Whether `classify` could use the parent event itself.
    ///
    /// Only watch mode looks at the parent's sender, and only when neither the
    /// registry nor a trigger token has settled the question already.
    pub fn needs_parent(&self, event: &Event, registry: &OwnMessageRegistry) -> bool {
        match (&event.in_reply_to, self.mode) {
            (Some(parent_id), ReplyMode::Watch) => {
                !registry.contains(parent_id) && !self.matcher.is_triggered(event)
            }
            _ => false,
        }
    }

    /// Classify an incoming event.
    ///
    /// `parent` is the resolved parent event when the caller fetched it; the
    /// parent id itself is always read from `event.in_reply_to`.
    pub fn classify(
        &self,
        event: &Event,
        parent: Option<&Event>,
        registry: &OwnMessageRegistry,
    ) -> EligibilityDecision {
        if event.sender == self.matcher.agent_id() {
            return skip(event, "own message");
        }
        let Some(body) = event.body() else {
            return skip(event, "non-text event");
        };
        let triggered = self.matcher.is_triggered(event);

        let Some(parent_id) = &event.in_reply_to else {
            if !triggered {
                return skip(event, "no trigger token");
            }
            if self.matcher.strip(body).is_empty() {
                return skip(event, "mention without a question");
            }
            return EligibilityDecision::Respond(ContextStrategy::None);
        };

        match self.mode {
            ReplyMode::Ignore => skip(event, "replies are ignored"),
            ReplyMode::Mention if triggered => {
                EligibilityDecision::Respond(ContextStrategy::SingleParent)
            }
            ReplyMode::Mention => skip(event, "reply without trigger token"),
            ReplyMode::Watch => {
                let replies_to_agent = registry.contains(parent_id)
                    || parent.is_some_and(|parent| parent.sender == self.matcher.agent_id());
                if replies_to_agent || triggered {
                    EligibilityDecision::Respond(ContextStrategy::FullThread)
                } else {
                    skip(event, "reply to someone else without trigger token")
                }
            }
        }
    }
}

fn skip(event: &Event, reason: &'static str) -> EligibilityDecision {
    tracing::debug!(event_id = %event.id, room_id = %event.room_id, reason, "skipping event");
    EligibilityDecision::Skip
}
