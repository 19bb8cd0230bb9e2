use crate::error::TransportError;
use crate::plugin::{RequestContext, ResponseContext};
use async_trait::async_trait;
use futures::stream::BoxStream;

pub mod http;
pub mod sse;

pub use http::{resolve_url, ReqwestStreamTransport, ReqwestTransport};
pub use sse::{decode_event_stream, SseEvent, DONE_SIGNAL};

/// Decoded server-sent events of one open stream
pub type EventStream = BoxStream<'static, Result<SseEvent, TransportError>>;

/// Performs one HTTP exchange for the REST engine
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    async fn send(&self, ctx: &RequestContext) -> Result<ResponseContext, TransportError>;
}

/// Opens a server-sent event stream for the SSE engine
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    async fn open(&self, ctx: &RequestContext) -> Result<EventStream, TransportError>;
}
