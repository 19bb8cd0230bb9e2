//! Shared fixtures for the pipeline integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use hai3_api::error::{ApiError, TransportError};
use hai3_api::plugin::{ApiPlugin, RequestContext, RequestOutcome, ResponseContext};
use hai3_api::transport::HttpTransport;
use serde_json::json;
use std::sync::{Arc, Mutex};

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Answers every call with `{"echo": <url>}` and keeps the contexts it saw
#[derive(Default)]
pub struct RecordingTransport {
    pub calls: Mutex<Vec<RequestContext>>,
}

impl RecordingTransport {
    pub fn calls(&self) -> Vec<RequestContext> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for RecordingTransport {
    async fn send(&self, ctx: &RequestContext) -> Result<ResponseContext, TransportError> {
        self.calls.lock().unwrap().push(ctx.clone());
        Ok(ResponseContext::ok(json!({ "echo": ctx.url })))
    }
}

/// Journals every hook as `<name>:<hook>`
macro_rules! tracing_plugin {
    ($($ty:ident => $name:literal),+ $(,)?) => {
        $(
            pub struct $ty(pub Journal);

            #[async_trait]
            impl ApiPlugin for $ty {
                fn name(&self) -> &'static str {
                    $name
                }

                async fn on_request(&self, ctx: RequestContext) -> RequestOutcome {
                    self.0.lock().unwrap().push(format!("{}:request", $name));
                    RequestOutcome::Continue(ctx)
                }

                async fn on_response(
                    &self,
                    response: ResponseContext,
                    _ctx: &RequestContext,
                ) -> Result<ResponseContext, ApiError> {
                    self.0.lock().unwrap().push(format!("{}:response", $name));
                    Ok(response)
                }

                fn destroy(&self) {
                    self.0.lock().unwrap().push(format!("{}:destroy", $name));
                }
            }
        )+
    };
}

tracing_plugin!(P1 => "p1", P2 => "p2", P3 => "p3");
