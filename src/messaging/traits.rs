//! Chat transport trait.

use crate::error::{Result, TransportError};
use crate::{Event, EventId};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;

/// Stream of room events delivered after start-up.
pub type InboundStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

/// A chat-protocol connection the agent reads from and replies through.
pub trait Transport: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Connect and return the stream of new room events.
    ///
    /// Events that happened before start-up are never yielded.
    fn start(&self) -> impl Future<Output = Result<InboundStream>> + Send;

    /// Fetch one event by id.
    fn fetch_event(
        &self,
        room_id: &str,
        event_id: &str,
    ) -> impl Future<Output = std::result::Result<Event, TransportError>> + Send;

    /// Send a text message, optionally as a reply, returning the new event id.
    fn send(
        &self,
        room_id: &str,
        text: &str,
        in_reply_to: Option<&str>,
    ) -> impl Future<Output = std::result::Result<EventId, TransportError>> + Send;

    /// Show or clear the typing indicator.
    fn set_typing(
        &self,
        _room_id: &str,
        _typing: bool,
    ) -> impl Future<Output = std::result::Result<(), TransportError>> + Send {
        async { Ok(()) }
    }

    /// Stop background work and release the connection.
    fn shutdown(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}
