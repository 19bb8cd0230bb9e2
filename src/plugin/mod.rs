//! Plugin pipeline for API protocols
//!
//! Every outbound REST call and every SSE connection passes through an ordered
//! chain of plugins that can observe, rewrite, or short-circuit it before the
//! network is touched.
//!
//! # Execution order
//!
//! - **Request**: global plugins for the protocol kind, then instance plugins,
//!   in registration order. The first short circuit stops the pass.
//! - **Response**: every plugin of the chain in reverse order, including the
//!   ones that never saw the request because of an earlier short circuit.
//! - **Error**: reverse order; the first plugin that recovers wins.
//!
//! # Modules
//!
//! - `schema`: request/response values and hook outcomes
//! - `registry`: type-keyed plugin collections per protocol kind
//! - `chain`: snapshot-based chain execution
//! - `mock`: declarative mock plugin

pub mod chain;
pub mod mock;
pub mod registry;
pub mod schema;

pub use chain::{PluginChain, RequestPass};
pub use mock::{MockMap, MockPlugin};
pub use registry::{DuplicatePolicy, PluginRegistry, ProtocolKind};
pub use schema::{
    ErrorOutcome, Headers, HttpMethod, RequestContext, RequestOutcome, ResponseBody,
    ResponseContext, ShortCircuit, SHORT_CIRCUIT_HEADER,
};

use crate::error::{ApiError, TransportError};
use async_trait::async_trait;

/// Interceptor hooks around a protocol call.
///
/// Plugins are identified by their concrete type: a registry holds at most one
/// plugin of each type per protocol kind.
#[async_trait]
pub trait ApiPlugin: Send + Sync + 'static {
    /// Name used in logs and error messages
    fn name(&self) -> &'static str;

    /// Rewrite the request or answer it without touching the network.
    async fn on_request(&self, ctx: RequestContext) -> RequestOutcome {
        RequestOutcome::Continue(ctx)
    }

    async fn on_response(
        &self,
        response: ResponseContext,
        _ctx: &RequestContext,
    ) -> Result<ResponseContext, ApiError> {
        Ok(response)
    }

    /// Recover from a transport failure or pass it on, possibly rewritten.
    async fn on_error(&self, error: TransportError, _ctx: &RequestContext) -> ErrorOutcome {
        ErrorOutcome::Propagate(error)
    }

    /// Release anything the plugin holds. Called once when it leaves a registry.
    fn destroy(&self) {}
}
