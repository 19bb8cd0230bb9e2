//! REST protocol engine
//!
//! Runs one request/response cycle through the plugin chain:
//! request hooks, then either the short-circuit response or the real transport
//! call (with error hooks on failure), then response hooks in reverse order.
//! The engine never retries on its own.

use crate::config::RestConfig;
use crate::error::{ApiError, Result};
use crate::plugin::{
    ApiPlugin, HttpMethod, PluginChain, PluginRegistry, ProtocolKind, RequestContext,
    RequestPass, ResponseBody, ResponseContext,
};
use crate::state::{Metrics, RequestTimer};
use crate::transport::{HttpTransport, ReqwestTransport};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

pub struct RestProtocol {
    config: RestConfig,
    transport: Arc<dyn HttpTransport>,
    global: Arc<PluginRegistry>,
    plugins: PluginRegistry,
    metrics: Option<Arc<Metrics>>,
}

impl RestProtocol {
    /// Engine backed by a reqwest client built from `config`
    pub fn new(config: RestConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: RestConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            config,
            transport,
            global: PluginRegistry::global(),
            plugins: PluginRegistry::new(),
            metrics: None,
        }
    }

    /// Use `registry` instead of the process-wide default for global plugins
    pub fn with_registry(mut self, registry: Arc<PluginRegistry>) -> Self {
        self.global = registry;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    /// Plugins that apply to this instance only
    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn add_plugin<P: ApiPlugin>(&self, plugin: Arc<P>) -> Result<()> {
        self.plugins.add(ProtocolKind::Rest, plugin)
    }

    pub fn remove_plugin<P: ApiPlugin>(&self) -> bool {
        self.plugins.remove::<P>(ProtocolKind::Rest)
    }

    pub fn has_plugin<P: ApiPlugin>(&self) -> bool {
        self.plugins.has::<P>(ProtocolKind::Rest)
    }

    pub async fn get(&self, url: &str) -> Result<ResponseBody> {
        self.request(HttpMethod::Get, url, None).await
    }

    pub async fn post(&self, url: &str, body: Option<Value>) -> Result<ResponseBody> {
        self.request(HttpMethod::Post, url, body).await
    }

    pub async fn put(&self, url: &str, body: Option<Value>) -> Result<ResponseBody> {
        self.request(HttpMethod::Put, url, body).await
    }

    pub async fn patch(&self, url: &str, body: Option<Value>) -> Result<ResponseBody> {
        self.request(HttpMethod::Patch, url, body).await
    }

    pub async fn delete(&self, url: &str) -> Result<ResponseBody> {
        self.request(HttpMethod::Delete, url, None).await
    }

    /// Response body of the call after all plugins ran
    pub async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Value>,
    ) -> Result<ResponseBody> {
        Ok(self.request_full(method, url, body).await?.data)
    }

    /// Like `request`, deserializing a JSON body into `T`
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Value>,
    ) -> Result<T> {
        match self.request(method, url, body).await? {
            ResponseBody::Json(value) => Ok(serde_json::from_value(value)?),
            ResponseBody::Binary(_) => Err(ApiError::Validation(format!(
                "{method} {url} returned a binary body"
            ))),
        }
    }

    /// The full response, status and headers included
    pub async fn request_full(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Value>,
    ) -> Result<ResponseContext> {
        if url.trim().is_empty() {
            return Err(ApiError::Validation("Request URL cannot be empty".into()));
        }

        let timer = self.metrics.clone().map(RequestTimer::new);
        let span = info_span!("rest_request", method = %method, url = %url);
        let result = self.execute(method, url, body).instrument(span).await;

        if let Some(timer) = timer {
            match &result {
                Ok(_) => timer.finish(),
                Err(_) => timer.fail(),
            }
        }
        result
    }

    fn build_context(&self, method: HttpMethod, url: &str, body: Option<Value>) -> RequestContext {
        let mut ctx = RequestContext::new(method, url);
        ctx.headers = self.config.headers.clone();
        let has_content_type = ctx
            .headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("content-type"));
        if body.is_some() && !has_content_type {
            ctx.headers
                .insert("content-type".to_string(), "application/json".to_string());
        }
        ctx.with_body(body)
    }

    async fn execute(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Value>,
    ) -> Result<ResponseContext> {
        let ctx = self.build_context(method, url, body);
        let chain = PluginChain::build(ProtocolKind::Rest, &self.global, &self.plugins);
        debug!(plugins = chain.len(), "Executing REST plugin chain");

        let (response, ctx) = match chain.run_request(ctx).await {
            RequestPass::Answered { ctx, short_circuit } => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_short_circuit();
                }
                let mut response = short_circuit.response;
                response.mark_short_circuited();
                (response, ctx)
            }
            RequestPass::Forward(ctx) => match self.transport.send(&ctx).await {
                Ok(response) => (response, ctx),
                Err(error) => {
                    warn!(error = %error, "Transport call failed");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_transport_error();
                    }
                    let response = chain.run_error(error, &ctx).await?;
                    if let Some(metrics) = &self.metrics {
                        metrics.record_recovery();
                    }
                    (response, ctx)
                }
            },
        };

        chain.run_response(response, &ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::plugin::{ErrorOutcome, MockMap, MockPlugin, RequestOutcome, SHORT_CIRCUIT_HEADER};
    use async_trait::async_trait;
    use mockall::mock;
    use mockall::predicate::always;
    use serde_json::json;

    mock! {
        Transport {}

        #[async_trait]
        impl HttpTransport for Transport {
            async fn send(&self, ctx: &RequestContext) -> std::result::Result<ResponseContext, TransportError>;
        }
    }

    fn protocol(transport: MockTransport) -> RestProtocol {
        RestProtocol::with_transport(RestConfig::new("http://api.local"), Arc::new(transport))
            .with_registry(Arc::new(PluginRegistry::new()))
    }

    struct Fallback;

    #[async_trait]
    impl ApiPlugin for Fallback {
        fn name(&self) -> &'static str {
            "fallback"
        }

        async fn on_error(&self, error: TransportError, _ctx: &RequestContext) -> ErrorOutcome {
            match error.status() {
                Some(503) => ErrorOutcome::Recover(ResponseContext::ok(json!({"offline": true}))),
                _ => ErrorOutcome::Propagate(error),
            }
        }
    }

    struct AuthHeader;

    #[async_trait]
    impl ApiPlugin for AuthHeader {
        fn name(&self) -> &'static str {
            "auth-header"
        }

        async fn on_request(&self, ctx: RequestContext) -> RequestOutcome {
            RequestOutcome::Continue(ctx.with_header("authorization", "Bearer token"))
        }
    }

    #[tokio::test]
    async fn test_short_circuit_skips_transport() {
        let mut transport = MockTransport::new();
        transport.expect_send().never();

        let rest = protocol(transport);
        rest.add_plugin(Arc::new(MockPlugin::new(
            MockMap::new().with("GET /ping", |_| json!({"ok": true})).unwrap(),
        )))
        .unwrap();

        let response = rest.request_full(HttpMethod::Get, "/ping", None).await.unwrap();
        assert_eq!(response.data, ResponseBody::Json(json!({"ok": true})));
        assert_eq!(response.header(SHORT_CIRCUIT_HEADER), Some("true"));
    }

    #[tokio::test]
    async fn test_transport_receives_plugin_changes_and_defaults() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|ctx: &RequestContext| {
                ctx.url == "/users"
                    && ctx.headers.get("authorization").map(String::as_str) == Some("Bearer token")
                    && ctx.headers.get("x-client").map(String::as_str) == Some("hai3")
                    && ctx.headers.get("content-type").map(String::as_str)
                        == Some("application/json")
            })
            .times(1)
            .returning(|_| Ok(ResponseContext::new(201, json!({"id": 1}))));

        let rest = RestProtocol::with_transport(
            RestConfig::new("http://api.local").with_header("x-client", "hai3"),
            Arc::new(transport),
        )
        .with_registry(Arc::new(PluginRegistry::new()));
        rest.add_plugin(Arc::new(AuthHeader)).unwrap();

        let body = rest
            .post("/users", Some(json!({"name": "Ada"})))
            .await
            .unwrap();
        assert_eq!(body, ResponseBody::Json(json!({"id": 1})));
    }

    #[tokio::test]
    async fn test_error_recovered_by_plugin() {
        let mut transport = MockTransport::new();
        transport.expect_send().with(always()).times(1).returning(|_| {
            Err(TransportError::Status {
                status: 503,
                message: "Service Unavailable".into(),
            })
        });

        let rest = protocol(transport);
        rest.add_plugin(Arc::new(Fallback)).unwrap();

        let body = rest.get("/status").await.unwrap();
        assert_eq!(body, ResponseBody::Json(json!({"offline": true})));
    }

    #[tokio::test]
    async fn test_unrecovered_error_propagates() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| Err(TransportError::Status {
                status: 404,
                message: "Not Found".into(),
            }));

        let metrics = Arc::new(Metrics::new());
        let rest = protocol(transport).with_metrics(metrics.clone());
        rest.add_plugin(Arc::new(Fallback)).unwrap();

        let err = rest.get("/missing").await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
        assert_eq!(err.status(), Some(404));
        assert_eq!(metrics.failed_requests.get(), 1);
        assert_eq!(metrics.transport_errors_total.get(), 1);
        assert_eq!(metrics.recovered_errors_total.get(), 0);
    }

    #[tokio::test]
    async fn test_empty_url_is_rejected() {
        let mut transport = MockTransport::new();
        transport.expect_send().never();

        let err = protocol(transport).get("  ").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn test_request_json_deserializes() {
        #[derive(serde::Deserialize)]
        struct User {
            name: String,
        }

        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .returning(|_| Ok(ResponseContext::ok(json!({"name": "Ada"}))));

        let user: User = protocol(transport)
            .request_json(HttpMethod::Get, "/users/1", None)
            .await
            .unwrap();
        assert_eq!(user.name, "Ada");
    }

    #[tokio::test]
    async fn test_instance_plugins_are_scoped() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| Ok(ResponseContext::ok(json!("network"))));

        let shared = Arc::new(PluginRegistry::new());
        let mocked = RestProtocol::with_transport(RestConfig::default(), Arc::new(MockTransport::new()))
            .with_registry(shared.clone());
        mocked
            .add_plugin(Arc::new(MockPlugin::new(
                MockMap::new().with("GET /a", |_| json!("mock")).unwrap(),
            )))
            .unwrap();
        let plain = RestProtocol::with_transport(RestConfig::default(), Arc::new(transport))
            .with_registry(shared);

        assert!(mocked.has_plugin::<MockPlugin>());
        assert!(!plain.has_plugin::<MockPlugin>());
        assert_eq!(mocked.get("/a").await.unwrap(), ResponseBody::Json(json!("mock")));
        assert_eq!(plain.get("/a").await.unwrap(), ResponseBody::Json(json!("network")));

        assert!(mocked.remove_plugin::<MockPlugin>());
        assert!(!mocked.has_plugin::<MockPlugin>());
    }

    #[tokio::test]
    async fn test_configured_content_type_is_not_duplicated() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|ctx: &RequestContext| {
                let content_types: Vec<_> = ctx
                    .headers
                    .iter()
                    .filter(|(name, _)| name.eq_ignore_ascii_case("content-type"))
                    .collect();
                content_types.len() == 1
                    && content_types[0].1 == "application/merge-patch+json"
            })
            .times(1)
            .returning(|_| Ok(ResponseContext::ok(json!({}))));

        let rest = RestProtocol::with_transport(
            RestConfig::default().with_header("Content-Type", "application/merge-patch+json"),
            Arc::new(transport),
        )
        .with_registry(Arc::new(PluginRegistry::new()));

        rest.patch("/x", Some(json!({"name": "Ada"}))).await.unwrap();
    }

    #[tokio::test]
    async fn test_body_gets_json_content_type() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|ctx: &RequestContext| {
                ctx.headers.get("content-type").map(String::as_str) == Some("application/json")
            })
            .times(1)
            .returning(|_| Ok(ResponseContext::ok(json!({}))));

        protocol(transport)
            .post("/items", Some(json!({"id": 1})))
            .await
            .unwrap();
    }
}
