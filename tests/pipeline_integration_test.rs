//! End-to-end tests for the REST plugin pipeline
//!
//! Covers hook ordering across global and instance registries, short
//! circuits, registry lifecycle, and snapshot isolation of in-flight calls.

mod common;

use async_trait::async_trait;
use common::{entries, journal, RecordingTransport, P1, P2, P3};
use hai3_api::config::RestConfig;
use hai3_api::error::ApiError;
use hai3_api::plugin::{
    ApiPlugin, DuplicatePolicy, HttpMethod, MockMap, MockPlugin, PluginRegistry, ProtocolKind,
    RequestContext, RequestOutcome, ResponseContext, SHORT_CIRCUIT_HEADER,
};
use hai3_api::protocol::RestProtocol;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn engine(registry: &Arc<PluginRegistry>, transport: &Arc<RecordingTransport>) -> RestProtocol {
    RestProtocol::with_transport(RestConfig::default(), transport.clone())
        .with_registry(registry.clone())
}

#[tokio::test]
async fn test_global_then_instance_order() {
    let log = journal();
    let registry = Arc::new(PluginRegistry::new());
    registry.add(ProtocolKind::Rest, Arc::new(P1(log.clone()))).unwrap();
    registry.add(ProtocolKind::Rest, Arc::new(P2(log.clone()))).unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let rest = engine(&registry, &transport);
    rest.add_plugin(Arc::new(P3(log.clone()))).unwrap();

    let body = rest.get("/users").await.unwrap();
    assert_eq!(body.as_json(), Some(&json!({"echo": "/users"})));
    assert_eq!(
        entries(&log),
        vec![
            "p1:request",
            "p2:request",
            "p3:request",
            "p3:response",
            "p2:response",
            "p1:response",
        ]
    );
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn test_mock_short_circuit_skips_network() {
    let log = journal();
    let registry = Arc::new(PluginRegistry::new());
    registry.add(ProtocolKind::Rest, Arc::new(P1(log.clone()))).unwrap();
    registry
        .add(
            ProtocolKind::Rest,
            Arc::new(MockPlugin::new(
                MockMap::new().with("GET /ping", |_| json!({"pong": true})).unwrap(),
            )),
        )
        .unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let rest = engine(&registry, &transport);
    rest.add_plugin(Arc::new(P3(log.clone()))).unwrap();

    let response = rest
        .request_full(HttpMethod::Get, "/ping", None)
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.header(SHORT_CIRCUIT_HEADER), Some("true"));
    assert_eq!(response.data.as_json(), Some(&json!({"pong": true})));
    assert!(transport.calls().is_empty());
    // P3 never saw the request but still sees the response
    assert_eq!(entries(&log), vec!["p1:request", "p3:response", "p1:response"]);

    // Unmapped routes still reach the transport
    rest.get("/other").await.unwrap();
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn test_mock_patterns_and_runtime_swap() {
    let mock = Arc::new(MockPlugin::new(
        MockMap::new()
            .with("GET /users/:id", |_| json!({"kind": "pattern"}))
            .unwrap()
            .with("GET /users/me", |_| json!({"kind": "exact"}))
            .unwrap()
            .with("POST /users", |body| json!({"created": body.cloned()}))
            .unwrap(),
    ));
    let registry = Arc::new(PluginRegistry::new());
    let transport = Arc::new(RecordingTransport::default());
    let rest = engine(&registry, &transport);
    rest.add_plugin(mock.clone()).unwrap();

    let me = rest.get("/users/me").await.unwrap();
    assert_eq!(me.as_json(), Some(&json!({"kind": "exact"})));

    let other = rest.get("/users/42?expand=true").await.unwrap();
    assert_eq!(other.as_json(), Some(&json!({"kind": "pattern"})));

    let created = rest.post("/users", Some(json!({"name": "Ada"}))).await.unwrap();
    assert_eq!(created.as_json(), Some(&json!({"created": {"name": "Ada"}})));

    mock.set_mock_map(MockMap::new().with("GET /health", |_| json!("ok")).unwrap());
    rest.get("/users/me").await.unwrap();
    assert_eq!(transport.calls().len(), 1);
    assert_eq!(rest.get("/health").await.unwrap().as_json(), Some(&json!("ok")));
}

#[tokio::test(start_paused = true)]
async fn test_mock_delay_applies_before_response() {
    let registry = Arc::new(PluginRegistry::new());
    let transport = Arc::new(RecordingTransport::default());
    let rest = engine(&registry, &transport);
    rest.add_plugin(Arc::new(
        MockPlugin::new(MockMap::new().with("GET /slow", |_| json!(1)).unwrap())
            .with_delay(Duration::from_millis(300)),
    ))
    .unwrap();

    let start = tokio::time::Instant::now();
    rest.get("/slow").await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_registry_lifecycle() {
    let log = journal();
    let registry = PluginRegistry::new();

    registry.add(ProtocolKind::Rest, Arc::new(P1(log.clone()))).unwrap();
    registry.add(ProtocolKind::Sse, Arc::new(P1(log.clone()))).unwrap();
    registry.add(ProtocolKind::Rest, Arc::new(P2(log.clone()))).unwrap();

    let err = registry
        .add(ProtocolKind::Rest, Arc::new(P1(log.clone())))
        .unwrap_err();
    assert!(matches!(err, ApiError::DuplicatePlugin { kind: ProtocolKind::Rest, .. }));

    assert!(registry.has::<P1>(ProtocolKind::Rest));
    assert!(!registry.has::<P2>(ProtocolKind::Sse));
    let names: Vec<_> = registry
        .get_all(ProtocolKind::Rest)
        .iter()
        .map(|e| e.name())
        .collect();
    assert_eq!(names, vec!["p1", "p2"]);

    assert!(registry.remove::<P2>(ProtocolKind::Rest));
    assert!(!registry.remove::<P2>(ProtocolKind::Rest));

    registry.clear(ProtocolKind::Rest);
    assert!(registry.is_empty(ProtocolKind::Rest));
    assert!(registry.has::<P1>(ProtocolKind::Sse));

    registry.reset_all();
    assert!(registry.is_empty(ProtocolKind::Sse));

    // One destroy per registration: P2 removed, P1 cleared twice
    let destroyed = entries(&log);
    assert_eq!(destroyed, vec!["p2:destroy", "p1:destroy", "p1:destroy"]);
}

#[tokio::test]
async fn test_replace_policy_keeps_position() {
    let log = journal();
    let registry = PluginRegistry::with_policy(DuplicatePolicy::Replace);
    registry.add(ProtocolKind::Rest, Arc::new(P1(log.clone()))).unwrap();
    registry.add(ProtocolKind::Rest, Arc::new(P2(log.clone()))).unwrap();
    registry.add(ProtocolKind::Rest, Arc::new(P1(log.clone()))).unwrap();

    assert_eq!(registry.len(ProtocolKind::Rest), 2);
    assert_eq!(registry.get_all(ProtocolKind::Rest)[0].name(), "p1");
    assert_eq!(entries(&log), vec!["p1:destroy"]);
}

/// Holds the request until released, so registry changes can land mid-flight
struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl ApiPlugin for Gate {
    fn name(&self) -> &'static str {
        "gate"
    }

    async fn on_request(&self, ctx: RequestContext) -> RequestOutcome {
        self.entered.notify_one();
        self.release.notified().await;
        RequestOutcome::Continue(ctx)
    }
}

#[tokio::test]
async fn test_in_flight_call_uses_its_snapshot() {
    let log = journal();
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let registry = Arc::new(PluginRegistry::new());
    registry
        .add(
            ProtocolKind::Rest,
            Arc::new(Gate {
                entered: entered.clone(),
                release: release.clone(),
            }),
        )
        .unwrap();
    registry.add(ProtocolKind::Rest, Arc::new(P1(log.clone()))).unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let rest = Arc::new(engine(&registry, &transport));

    let call = tokio::spawn({
        let rest = rest.clone();
        async move { rest.get("/snapshot").await }
    });

    entered.notified().await;
    assert!(registry.remove::<P1>(ProtocolKind::Rest));
    registry.add(ProtocolKind::Rest, Arc::new(P2(log.clone()))).unwrap();
    release.notify_one();

    call.await.unwrap().unwrap();
    let seen: Vec<_> = entries(&log)
        .into_iter()
        .filter(|e| !e.ends_with(":destroy"))
        .collect();
    assert_eq!(seen, vec!["p1:request", "p1:response"]);

    let names: Vec<_> = registry
        .get_all(ProtocolKind::Rest)
        .iter()
        .map(|e| e.name())
        .collect();
    assert_eq!(names, vec!["gate", "p2"]);
}

/// Tags each request and records the tag it sees again on the way back
struct RequestTagger {
    seen: Arc<std::sync::Mutex<Vec<Option<String>>>>,
}

#[async_trait]
impl ApiPlugin for RequestTagger {
    fn name(&self) -> &'static str {
        "request-tagger"
    }

    async fn on_request(&self, ctx: RequestContext) -> RequestOutcome {
        RequestOutcome::Continue(ctx.with_header("x-request-id", "42"))
    }

    async fn on_response(
        &self,
        response: ResponseContext,
        ctx: &RequestContext,
    ) -> Result<ResponseContext, ApiError> {
        self.seen
            .lock()
            .unwrap()
            .push(ctx.headers.get("x-request-id").cloned());
        Ok(response)
    }
}

#[tokio::test]
async fn test_response_hooks_see_edited_context_after_short_circuit() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let registry = Arc::new(PluginRegistry::new());
    registry
        .add(ProtocolKind::Rest, Arc::new(RequestTagger { seen: seen.clone() }))
        .unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let rest = engine(&registry, &transport);
    rest.add_plugin(Arc::new(MockPlugin::new(
        MockMap::new().with("GET /mocked", |_| json!("mock")).unwrap(),
    )))
    .unwrap();

    rest.get("/network").await.unwrap();
    rest.get("/mocked").await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Some("42".to_string()), Some("42".to_string())]
    );
    assert_eq!(transport.calls().len(), 1);
}
