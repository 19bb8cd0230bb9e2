pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod plugin;
pub mod protocol;
pub mod state;
pub mod transport;

pub use error::{ApiError, Result, TransportError};
pub use plugin::{ApiPlugin, PluginRegistry, ProtocolKind};
pub use protocol::{RestProtocol, SseProtocol};
