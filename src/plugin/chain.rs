//! Plugin chain execution logic
//!
//! This module handles the request, response and error passes over a frozen
//! plugin snapshot.

use crate::error::{ApiError, TransportError};
use crate::plugin::registry::{PluginEntry, PluginRegistry, ProtocolKind};
use crate::plugin::schema::{
    ErrorOutcome, RequestContext, RequestOutcome, ResponseContext, ShortCircuit,
};
use tracing::{debug, info, warn};

/// Outcome of the request pass over a whole chain
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPass {
    /// Every hook ran; the call goes to the network with this context
    Forward(RequestContext),
    /// A plugin answered. `ctx` is the context that plugin received, with the
    /// edits of every plugin before it.
    Answered {
        ctx: RequestContext,
        short_circuit: ShortCircuit,
    },
}

/// Ordered plugins applied to one call of one protocol kind
#[derive(Debug, Clone)]
pub struct PluginChain {
    kind: ProtocolKind,
    plugins: Vec<PluginEntry>,
}

impl PluginChain {
    /// Freeze `global ++ instance` for the given kind
    pub fn build(kind: ProtocolKind, global: &PluginRegistry, instance: &PluginRegistry) -> Self {
        let global_plugins = global.get_all(kind);
        let instance_plugins = instance.get_all(kind);

        let mut plugins = Vec::with_capacity(global_plugins.len() + instance_plugins.len());
        plugins.extend(global_plugins.iter().cloned());
        plugins.extend(instance_plugins.iter().cloned());

        Self { kind, plugins }
    }

    pub fn kind(&self) -> ProtocolKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|e| e.name()).collect()
    }

    /// Run `on_request` hooks in order until one short-circuits
    pub async fn run_request(&self, mut ctx: RequestContext) -> RequestPass {
        for (index, entry) in self.plugins.iter().enumerate() {
            debug!(
                "Running on_request {}/{}: '{}'",
                index + 1,
                self.plugins.len(),
                entry.name()
            );

            // Plugins consume the context; keep the copy they were handed
            let seen = ctx.clone();
            match entry.plugin().on_request(ctx).await {
                RequestOutcome::Continue(next) => ctx = next,
                RequestOutcome::ShortCircuit(short_circuit) => {
                    info!(
                        plugin = entry.name(),
                        kind = %self.kind,
                        "Request short-circuited"
                    );
                    return RequestPass::Answered {
                        ctx: seen,
                        short_circuit,
                    };
                }
            }
        }

        RequestPass::Forward(ctx)
    }

    /// Run `on_response` hooks over the whole chain in reverse order.
    ///
    /// Plugins after a short-circuiting one still see the response.
    pub async fn run_response(
        &self,
        mut response: ResponseContext,
        ctx: &RequestContext,
    ) -> Result<ResponseContext, ApiError> {
        for entry in self.plugins.iter().rev() {
            debug!("Running on_response: '{}'", entry.name());
            response = entry.plugin().on_response(response, ctx).await?;
        }
        Ok(response)
    }

    /// Give every plugin, in reverse order, a chance to recover from a transport failure
    pub async fn run_error(
        &self,
        mut error: TransportError,
        ctx: &RequestContext,
    ) -> Result<ResponseContext, ApiError> {
        for entry in self.plugins.iter().rev() {
            debug!("Running on_error: '{}'", entry.name());
            match entry.plugin().on_error(error, ctx).await {
                ErrorOutcome::Propagate(next) => error = next,
                ErrorOutcome::Recover(response) => {
                    info!(
                        plugin = entry.name(),
                        kind = %self.kind,
                        status = response.status,
                        "Transport error recovered by plugin"
                    );
                    return Ok(response);
                }
            }
        }

        warn!(kind = %self.kind, error = %error, "Transport error not recovered");
        Err(ApiError::Transport(error))
    }
}
