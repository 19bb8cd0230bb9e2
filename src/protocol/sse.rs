//! SSE protocol engine
//!
//! `connect` runs the request hooks once, at connection time. A short circuit
//! turns the plugin's response into a simulated word-by-word chat-completion
//! stream; otherwise a real event stream is opened and forwarded verbatim.
//!
//! Every connection lives in a table owned by one engine. A connection is
//! torn down exactly once: by `disconnect`, by completion, or by an error.
//! Stream tasks check the table before every emission, so nothing is delivered
//! after a disconnect.

use crate::config::SseConfig;
use crate::error::{ApiError, Result, TransportError};
use crate::plugin::{
    ApiPlugin, HttpMethod, PluginChain, PluginRegistry, ProtocolKind, RequestContext,
    RequestPass, ResponseContext,
};
use crate::protocol::stream::{completion_chunk, extract_stream_content, stream_model, word_deltas};
use crate::state::Metrics;
use crate::transport::{ReqwestStreamTransport, SseEvent, StreamTransport};
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub type ConnectionId = String;

pub type MessageHandler = Arc<dyn Fn(SseEvent) + Send + Sync>;
pub type CompleteHandler = Box<dyn FnOnce() + Send>;
pub type ErrorHandler = Box<dyn FnOnce(TransportError) + Send>;

/// Callbacks for one connection
pub struct StreamHandlers {
    on_message: MessageHandler,
    on_complete: Option<CompleteHandler>,
    on_error: Option<ErrorHandler>,
}

impl StreamHandlers {
    pub fn new<F>(on_message: F) -> Self
    where
        F: Fn(SseEvent) + Send + Sync + 'static,
    {
        Self {
            on_message: Arc::new(on_message),
            on_complete: None,
            on_error: None,
        }
    }

    /// Called once when the stream finishes normally
    pub fn on_complete<F>(mut self, on_complete: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_complete = Some(Box::new(on_complete));
        self
    }

    /// Called once when the transport fails and the connection is torn down
    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: FnOnce(TransportError) + Send + 'static,
    {
        self.on_error = Some(Box::new(on_error));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Real,
    Simulated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Streaming(StreamSource),
    Completed,
    Disconnected,
    Errored,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Completed | ConnectionState::Disconnected | ConnectionState::Errored
        )
    }
}

struct ConnectionEntry {
    state: ConnectionState,
    cancel: CancellationToken,
}

/// Open connections of one engine
struct ConnectionTable {
    entries: DashMap<ConnectionId, ConnectionEntry>,
    metrics: Option<Arc<Metrics>>,
}

impl ConnectionTable {
    fn insert(&self, id: &str) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.entries.insert(
            id.to_string(),
            ConnectionEntry {
                state: ConnectionState::Connecting,
                cancel: cancel.clone(),
            },
        );
        if let Some(metrics) = &self.metrics {
            metrics.stream_opened();
        }
        cancel
    }

    /// Returns false when the connection is already gone
    fn set_state(&self, id: &str, state: ConnectionState) -> bool {
        match self.entries.get_mut(id) {
            Some(mut entry) => {
                entry.state = state;
                true
            }
            None => false,
        }
    }

    fn state(&self, id: &str) -> Option<ConnectionState> {
        self.entries.get(id).map(|entry| entry.state)
    }

    fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    fn remove(&self, id: &str) -> Option<ConnectionEntry> {
        let removed = self.entries.remove(id).map(|(_, entry)| entry);
        if removed.is_some() {
            if let Some(metrics) = &self.metrics {
                metrics.stream_closed();
            }
        }
        removed
    }

    fn ids(&self) -> Vec<ConnectionId> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    fn record_chunk(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_stream_chunk();
        }
    }

    /// Tear down after a transport failure
    fn fail(&self, id: &str, error: TransportError, on_error: Option<ErrorHandler>) -> ConnectionState {
        warn!(connection = %id, error = %error, "Event stream failed, disconnecting");
        if let Some(metrics) = &self.metrics {
            metrics.record_stream_error();
        }
        if self.remove(id).is_some() {
            if let Some(on_error) = on_error {
                on_error(error);
            }
            ConnectionState::Errored
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Tear down after a normal end of stream
    fn complete(&self, id: &str, on_complete: Option<CompleteHandler>) -> ConnectionState {
        if self.remove(id).is_none() {
            return ConnectionState::Disconnected;
        }
        if let Some(on_complete) = on_complete {
            on_complete();
        }
        ConnectionState::Completed
    }
}

pub struct SseProtocol {
    config: SseConfig,
    transport: Arc<dyn StreamTransport>,
    global: Arc<PluginRegistry>,
    plugins: PluginRegistry,
    connections: Arc<ConnectionTable>,
}

impl SseProtocol {
    pub fn new(config: SseConfig) -> Result<Self> {
        let transport = ReqwestStreamTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: SseConfig, transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            config,
            transport,
            global: PluginRegistry::global(),
            plugins: PluginRegistry::new(),
            connections: Arc::new(ConnectionTable {
                entries: DashMap::new(),
                metrics: None,
            }),
        }
    }

    pub fn with_registry(mut self, registry: Arc<PluginRegistry>) -> Self {
        self.global = registry;
        self
    }

    /// Must be called before the first `connect`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.connections = Arc::new(ConnectionTable {
            entries: DashMap::new(),
            metrics: Some(metrics),
        });
        self
    }

    pub fn config(&self) -> &SseConfig {
        &self.config
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn add_plugin<P: ApiPlugin>(&self, plugin: Arc<P>) -> Result<()> {
        self.plugins.add(ProtocolKind::Sse, plugin)
    }

    pub fn remove_plugin<P: ApiPlugin>(&self) -> bool {
        self.plugins.remove::<P>(ProtocolKind::Sse)
    }

    pub fn has_plugin<P: ApiPlugin>(&self) -> bool {
        self.plugins.has::<P>(ProtocolKind::Sse)
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.connections.contains(id)
    }

    /// State of an open connection; `None` once it reached a terminal state
    pub fn connection_state(&self, id: &str) -> Option<ConnectionState> {
        self.connections.state(id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.entries.len()
    }

    /// Open a stream and return its id. Events are delivered from a background task.
    pub async fn connect(&self, url: &str, handlers: StreamHandlers) -> Result<ConnectionId> {
        if url.trim().is_empty() {
            return Err(ApiError::Validation("Stream URL cannot be empty".into()));
        }

        let id: ConnectionId = format!("sse-{}", Uuid::new_v4());
        let span = info_span!("sse_connection", connection = %id, url = %url);

        let mut ctx = RequestContext::new(HttpMethod::Get, url);
        ctx.headers = self.config.headers.clone();

        let cancel = self.connections.insert(&id);
        let chain = PluginChain::build(ProtocolKind::Sse, &self.global, &self.plugins);
        debug!(parent: &span, plugins = chain.len(), "Executing SSE plugin chain");

        match chain.run_request(ctx).instrument(span.clone()).await {
            RequestPass::Answered { short_circuit, .. } => {
                if !self
                    .connections
                    .set_state(&id, ConnectionState::Streaming(StreamSource::Simulated))
                {
                    return Ok(id);
                }
                if let Some(metrics) = &self.connections.metrics {
                    metrics.record_short_circuit();
                }
                info!(parent: &span, "Simulating event stream from short-circuited response");

                let task = simulate_stream(
                    self.connections.clone(),
                    id.clone(),
                    cancel,
                    short_circuit.response,
                    self.config.chunk_delay(),
                    handlers,
                );
                tokio::spawn(task.instrument(span));
            }
            RequestPass::Forward(ctx) => {
                let task = forward_stream(
                    self.connections.clone(),
                    id.clone(),
                    cancel,
                    self.transport.clone(),
                    chain,
                    ctx,
                    self.config.chunk_delay(),
                    handlers,
                );
                tokio::spawn(task.instrument(span));
            }
        }

        Ok(id)
    }

    /// Close a connection. Unknown or already closed ids are ignored.
    pub fn disconnect(&self, id: &str) {
        if let Some(entry) = self.connections.remove(id) {
            entry.cancel.cancel();
            info!(connection = %id, "Disconnected event stream");
        }
    }

    pub fn disconnect_all(&self) {
        for id in self.connections.ids() {
            self.disconnect(&id);
        }
    }
}

impl Drop for SseProtocol {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

async fn simulate_stream(
    connections: Arc<ConnectionTable>,
    id: ConnectionId,
    cancel: CancellationToken,
    response: ResponseContext,
    delay: Duration,
    handlers: StreamHandlers,
) {
    let StreamHandlers {
        on_message,
        on_complete,
        ..
    } = handlers;

    let content = extract_stream_content(&response.data);
    let model = stream_model(&response.data);
    let chunk_id = format!("chatcmpl-{}", Uuid::new_v4().simple());
    let created = chrono::Utc::now().timestamp();
    let deltas = word_deltas(&content);
    let last = deltas.len().saturating_sub(1);

    for (index, delta) in deltas.iter().enumerate() {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(state = ?ConnectionState::Disconnected, "Simulated stream stopped");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        if !connections.contains(&id) {
            debug!(state = ?ConnectionState::Disconnected, "Simulated stream stopped");
            return;
        }

        let chunk = completion_chunk(&chunk_id, &model, created, delta, index == last);
        on_message(SseEvent::message(chunk.to_string()));
        connections.record_chunk();
    }

    let state = connections.complete(&id, on_complete);
    debug!(state = ?state, chunks = deltas.len(), "Simulated stream finished");
}

/// Open and forward a real stream. A failed open goes through the chain's
/// error hooks first; a recovered response is streamed like a short circuit.
#[allow(clippy::too_many_arguments)]
async fn forward_stream(
    connections: Arc<ConnectionTable>,
    id: ConnectionId,
    cancel: CancellationToken,
    transport: Arc<dyn StreamTransport>,
    chain: PluginChain,
    ctx: RequestContext,
    delay: Duration,
    handlers: StreamHandlers,
) {
    let StreamHandlers {
        on_message,
        on_complete,
        on_error,
    } = handlers;

    let opened = tokio::select! {
        _ = cancel.cancelled() => {
            debug!(state = ?ConnectionState::Disconnected, "Stream closed while connecting");
            return;
        }
        opened = transport.open(&ctx) => opened,
    };

    let mut events = match opened {
        Ok(events) => events,
        Err(error) => {
            warn!(error = %error, "Event stream could not be opened");
            if let Some(metrics) = &connections.metrics {
                metrics.record_transport_error();
            }
            match chain.run_error(error, &ctx).await {
                Ok(response) => {
                    if let Some(metrics) = &connections.metrics {
                        metrics.record_recovery();
                    }
                    if !connections.set_state(&id, ConnectionState::Streaming(StreamSource::Simulated)) {
                        return;
                    }
                    let handlers = StreamHandlers {
                        on_message,
                        on_complete,
                        on_error,
                    };
                    simulate_stream(connections, id, cancel, response, delay, handlers).await;
                }
                Err(error) => {
                    let error = match error {
                        ApiError::Transport(e) => e,
                        other => TransportError::Stream(other.to_string()),
                    };
                    let state = connections.fail(&id, error, on_error);
                    debug!(state = ?state, "Stream could not be opened");
                }
            }
            return;
        }
    };

    if !connections.set_state(&id, ConnectionState::Streaming(StreamSource::Real)) {
        return;
    }

    let state = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break ConnectionState::Disconnected,
            next = events.next() => next,
        };

        match next {
            Some(Ok(event)) if event.is_done() => break connections.complete(&id, on_complete),
            Some(Ok(event)) => {
                if !connections.contains(&id) {
                    break ConnectionState::Disconnected;
                }
                on_message(event);
                connections.record_chunk();
            }
            Some(Err(error)) => break connections.fail(&id, error, on_error),
            None => {
                debug!("Event stream ended without a done signal");
                connections.remove(&id);
                break ConnectionState::Disconnected;
            }
        }
    };

    debug!(state = ?state, "Event stream finished");
}
