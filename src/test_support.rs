//! Fakes shared by the unit tests: an in-memory transport plus scripted model
//! and search backends.

use crate::error::{LlmError, Result, SearchError, TransportError};
use crate::forum::ForumSearch;
use crate::llm::{ChatMessage, LanguageModel, ModelOutput, ToolSpec};
use crate::messaging::{InboundStream, Transport};
use crate::{Event, EventContent, EventId, ForumHit};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

pub const AGENT_ID: &str = "@askaosus:matrix.org";
pub const ROOM_ID: &str = "!room:matrix.org";

pub fn text_event(id: &str, sender: &str, body: &str) -> Event {
    Event {
        id: id.into(),
        room_id: ROOM_ID.into(),
        sender: sender.into(),
        content: EventContent::Text(body.into()),
        in_reply_to: None,
        mentioned_user_ids: Vec::new(),
        timestamp: chrono::Utc::now(),
    }
}

pub fn reply_event(id: &str, sender: &str, body: &str, parent: &str) -> Event {
    Event {
        in_reply_to: Some(parent.into()),
        ..text_event(id, sender, body)
    }
}

pub fn non_text_event(id: &str, sender: &str, kind: &str) -> Event {
    Event {
        content: EventContent::NonText { kind: kind.into() },
        ..text_event(id, sender, "")
    }
}

pub fn hit(topic_id: u64, title: &str) -> ForumHit {
    ForumHit {
        topic_id,
        title: title.into(),
        url: format!("https://discourse.aosus.org/t/{title}/{topic_id}"),
        excerpt: format!("About {title}"),
    }
}

/// A message handed to [`MockTransport::send`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub room_id: String,
    pub text: String,
    pub in_reply_to: Option<String>,
}

/// In-memory room store.
#[derive(Default)]
pub struct MockTransport {
    events: Mutex<HashMap<EventId, Event>>,
    failing: Mutex<HashSet<EventId>>,
    fetch_delay: Mutex<Option<Duration>>,
    fetches: AtomicUsize,
    sent: Mutex<Vec<SentMessage>>,
    typing: Mutex<Vec<bool>>,
    typing_stalls: AtomicBool,
    inbound: Mutex<Option<mpsc::Sender<Event>>>,
}

impl MockTransport {
    pub fn insert(&self, event: Event) {
        self.events.lock().unwrap().insert(event.id.clone(), event);
    }

    /// Make fetches of `event_id` fail with a transport error.
    pub fn fail_fetch(&self, event_id: &str) {
        self.failing.lock().unwrap().insert(event_id.into());
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    /// Number of `fetch_event` calls, successful or not.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Make every typing notification hang forever.
    pub fn stall_typing(&self) {
        self.typing_stalls.store(true, Ordering::SeqCst);
    }

    pub fn typing_log(&self) -> Vec<bool> {
        self.typing.lock().unwrap().clone()
    }

    /// Deliver an event on the stream returned by `start`.
    pub async fn push_inbound(&self, event: Event) {
        let sender = self
            .inbound
            .lock()
            .unwrap()
            .clone()
            .expect("start() must be called before push_inbound()");
        sender.send(event).await.unwrap();
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start(&self) -> Result<InboundStream> {
        let (sender, receiver) = mpsc::channel(16);
        *self.inbound.lock().unwrap() = Some(sender);
        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(receiver)))
    }

    async fn fetch_event(&self, _room_id: &str, event_id: &str) -> std::result::Result<Event, TransportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(event_id) {
            return Err(TransportError::Request("connection refused".into()));
        }
        self.events
            .lock()
            .unwrap()
            .get(event_id)
            .cloned()
            .ok_or_else(|| TransportError::NotFound {
                event_id: event_id.into(),
            })
    }

    async fn send(
        &self,
        room_id: &str,
        text: &str,
        in_reply_to: Option<&str>,
    ) -> std::result::Result<EventId, TransportError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(SentMessage {
            room_id: room_id.into(),
            text: text.into(),
            in_reply_to: in_reply_to.map(str::to_string),
        });
        Ok(format!("$sent{}", sent.len()))
    }

    async fn set_typing(&self, _room_id: &str, typing: bool) -> std::result::Result<(), TransportError> {
        self.typing.lock().unwrap().push(typing);
        if self.typing_stalls.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Language model that replays a fixed script and records every request.
pub struct ScriptedModel {
    script: Mutex<VecDeque<std::result::Result<ModelOutput, LlmError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new(script: Vec<std::result::Result<ModelOutput, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

impl LanguageModel for ScriptedModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> std::result::Result<ModelOutput, LlmError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".into())))
    }
}

/// Forum search that replays results and records queries.
pub struct ScriptedSearch {
    script: Mutex<VecDeque<std::result::Result<Vec<ForumHit>, SearchError>>>,
    fallback: Option<Vec<ForumHit>>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn new(script: Vec<std::result::Result<Vec<ForumHit>, SearchError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Answer every query with the same hits.
    pub fn always(hits: Vec<ForumHit>) -> Self {
        Self {
            fallback: Some(hits),
            ..Self::new(Vec::new())
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl ForumSearch for ScriptedSearch {
    async fn search(&self, query: &str, limit: usize) -> std::result::Result<Vec<ForumHit>, SearchError> {
        self.queries.lock().unwrap().push(query.into());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result.map(|mut hits| {
                hits.truncate(limit);
                hits
            }),
            None => match &self.fallback {
                Some(hits) => Ok(hits.iter().take(limit).cloned().collect()),
                None => Err(SearchError::Unreachable("script exhausted".into())),
            },
        }
    }
}
