//! Protocol engines
//!
//! Each engine owns its transport and its instance-scoped plugins, and runs
//! calls through a chain built from the global registry followed by its own.

pub mod rest;
pub mod sse;
pub mod stream;

pub use rest::RestProtocol;
pub use sse::{ConnectionId, ConnectionState, SseProtocol, StreamHandlers, StreamSource};
