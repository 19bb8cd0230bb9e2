use crate::config::{self, Config};
use crate::error::{ApiError, Result, TransportError};
use crate::plugin::{HttpMethod, MockMap, MockPlugin, PluginRegistry, ProtocolKind};
use crate::protocol::{RestProtocol, SseProtocol, StreamHandlers};
use crate::state::Metrics;
use crate::transport::SseEvent;
use serde_json::Value;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Global registry for a command run, with the mock plugin installed on both
/// protocols when mocking is enabled.
pub fn build_registry(config: &Config) -> Result<Arc<PluginRegistry>> {
    let registry = Arc::new(PluginRegistry::with_policy(config.plugins.duplicate_policy));

    if config.mock.enabled {
        let map = config::load_mock_fixtures(&config.mock)?.unwrap_or_default();
        info!(routes = map.len(), delay_ms = config.mock.delay_ms, "Mock plugin enabled");

        let mock = Arc::new(MockPlugin::new(map).with_delay(config.mock.delay()));
        registry.add(ProtocolKind::Rest, mock.clone())?;
        registry.add(ProtocolKind::Sse, mock)?;
    }

    Ok(registry)
}

pub async fn run_request(
    config: &Config,
    registry: Arc<PluginRegistry>,
    metrics: Arc<Metrics>,
    method: HttpMethod,
    url: &str,
    body: Option<Value>,
) -> Result<Value> {
    let rest = RestProtocol::new(config.rest.clone())?
        .with_registry(registry)
        .with_metrics(metrics);

    let response = rest.request(method, url, body).await?;
    Ok(response.into_json().unwrap_or(Value::Null))
}

enum StreamOutput {
    Event(SseEvent),
    Complete,
    Failed(TransportError),
}

/// Print every event of one stream until it completes, fails, or Ctrl-C
pub async fn run_stream(
    config: &Config,
    registry: Arc<PluginRegistry>,
    metrics: Arc<Metrics>,
    url: &str,
) -> Result<()> {
    let sse = SseProtocol::new(config.sse.clone())?
        .with_registry(registry)
        .with_metrics(metrics);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let on_message = tx.clone();
    let on_complete = tx.clone();
    let handlers = StreamHandlers::new(move |event| {
        let _ = on_message.send(StreamOutput::Event(event));
    })
    .on_complete(move || {
        let _ = on_complete.send(StreamOutput::Complete);
    })
    .on_error(move |e| {
        let _ = tx.send(StreamOutput::Failed(e));
    });

    let id = sse.connect(url, handlers).await?;
    info!(connection = %id, "Streaming {}", url);

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                warn!("Interrupted, closing stream");
                sse.disconnect(&id);
                return Ok(());
            }
            output = rx.recv() => match output {
                Some(StreamOutput::Event(event)) => println!("{}", event.data),
                Some(StreamOutput::Complete) => {
                    info!("Stream complete");
                    return Ok(());
                }
                Some(StreamOutput::Failed(e)) => {
                    error!("Stream failed: {}", e);
                    return Err(ApiError::Transport(e));
                }
                // Ended without a done signal
                None => return Ok(()),
            }
        }
    }
}

pub fn run_config_check(config: &Config) -> Result<()> {
    info!("Checking configuration...");

    config::validate(config)?;
    info!("✓ Configuration is valid");

    let describe = |base_url: &str| {
        if base_url.is_empty() {
            "(none, URLs used as given)".to_string()
        } else {
            base_url.to_string()
        }
    };
    info!("  REST base URL: {}", describe(&config.rest.base_url));
    info!("  SSE base URL: {}", describe(&config.sse.base_url));
    info!("  Duplicate plugins: {:?}", config.plugins.duplicate_policy);

    if config.mock.enabled {
        let map = config::load_mock_fixtures(&config.mock)?.unwrap_or_else(MockMap::new);
        info!("✓ Mock fixtures loaded ({} routes)", map.len());
        for key in map.keys() {
            info!("    {}", key);
        }
    }

    info!("✓ All checks passed");
    Ok(())
}
