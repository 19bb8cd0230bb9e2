//! Server-sent events over a byte stream
//!
//! Wire parsing is done by `eventsource-stream`; this module maps its events
//! and errors onto the crate's own types.

use super::EventStream;
use crate::error::TransportError;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

/// Data payload a server sends to mark the end of a stream
pub const DONE_SIGNAL: &str = "[DONE]";

const DEFAULT_EVENT: &str = "message";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseEvent {
    /// Event type, `message` unless the server named one
    pub event: String,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl SseEvent {
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: DEFAULT_EVENT.to_string(),
            data: data.into(),
            id: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_SIGNAL
    }
}

impl From<Event> for SseEvent {
    fn from(event: Event) -> Self {
        Self {
            event: if event.event.is_empty() {
                DEFAULT_EVENT.to_string()
            } else {
                event.event
            },
            data: event.data,
            id: (!event.id.is_empty()).then_some(event.id),
        }
    }
}

fn stream_error<E: Into<TransportError>>(error: EventStreamError<E>) -> TransportError {
    match error {
        EventStreamError::Transport(e) => e.into(),
        EventStreamError::Utf8(e) => TransportError::InvalidFormat(format!("Event stream is not UTF-8: {e}")),
        EventStreamError::Parser(e) => TransportError::InvalidFormat(format!("Malformed event stream: {e}")),
    }
}

/// Decode a `text/event-stream` body into events
pub fn decode_event_stream<S, B, E>(body: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<TransportError> + Send + 'static,
{
    body.eventsource()
        .map(|item| item.map(SseEvent::from).map_err(stream_error))
        .boxed()
}
