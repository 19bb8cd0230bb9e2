//! Declarative mock plugin
//!
//! Matches requests against a `"<METHOD> <path>"` map and answers them with a
//! synthetic 200 response instead of calling the network.

use crate::error::{ApiError, Result};
use crate::plugin::schema::{
    HttpMethod, RequestContext, RequestOutcome, ResponseContext, ShortCircuit,
    SHORT_CIRCUIT_HEADER,
};
use crate::plugin::ApiPlugin;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Builds response data from the request body
pub type MockResponseFactory = Arc<dyn Fn(Option<&Value>) -> Value + Send + Sync>;

#[derive(Clone)]
struct MockRoute {
    method: HttpMethod,
    path: String,
    factory: MockResponseFactory,
}

/// Ordered map of mock routes. Pattern routes are tried in insertion order.
#[derive(Clone, Default)]
pub struct MockMap {
    routes: Vec<MockRoute>,
    exact: HashMap<(HttpMethod, String), usize>,
}

impl MockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the route for `key` (`"GET /users/:id"`)
    pub fn insert<F>(&mut self, key: &str, factory: F) -> Result<()>
    where
        F: Fn(Option<&Value>) -> Value + Send + Sync + 'static,
    {
        let (method, path) = parse_key(key)?;
        let route = MockRoute {
            method,
            path: path.clone(),
            factory: Arc::new(factory),
        };

        match self.exact.get(&(method, path.clone())) {
            Some(&index) => self.routes[index] = route,
            None => {
                self.exact.insert((method, path), self.routes.len());
                self.routes.push(route);
            }
        }
        Ok(())
    }

    /// Builder form of `insert`
    pub fn with<F>(mut self, key: &str, factory: F) -> Result<Self>
    where
        F: Fn(Option<&Value>) -> Value + Send + Sync + 'static,
    {
        self.insert(key, factory)?;
        Ok(self)
    }

    /// Routes that always answer with a fixed JSON value
    pub fn from_fixtures(fixtures: &serde_json::Map<String, Value>) -> Result<Self> {
        let mut map = Self::new();
        for (key, value) in fixtures {
            let value = value.clone();
            map.insert(key, move |_| value.clone())?;
        }
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.routes
            .iter()
            .map(|route| format!("{} {}", route.method, route.path))
    }

    /// Exact `METHOD url` first, then the first matching `:param` pattern
    pub fn find(&self, method: HttpMethod, url: &str) -> Option<MockResponseFactory> {
        if let Some(&index) = self.exact.get(&(method, url.to_string())) {
            return Some(self.routes[index].factory.clone());
        }

        self.routes
            .iter()
            .find(|route| route.method == method && matches_pattern(&route.path, url))
            .map(|route| route.factory.clone())
    }
}

impl fmt::Debug for MockMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

fn parse_key(key: &str) -> Result<(HttpMethod, String)> {
    let (method, path) = key
        .trim()
        .split_once(' ')
        .ok_or_else(|| ApiError::Validation(format!("Invalid mock key '{key}'")))?;

    let path = path.trim();
    if path.is_empty() {
        return Err(ApiError::Validation(format!(
            "Mock key '{key}' has an empty path"
        )));
    }

    Ok((method.parse()?, path.to_string()))
}

/// `:name` segments match any single non-empty segment; others must be equal.
/// The query string of `url` is ignored.
pub fn matches_pattern(pattern: &str, url: &str) -> bool {
    let path = url.split('?').next().unwrap_or(url);
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();

    pattern_segments.len() == path_segments.len()
        && pattern_segments
            .iter()
            .zip(&path_segments)
            .all(|(expected, actual)| {
                if expected.starts_with(':') {
                    !actual.is_empty()
                } else {
                    expected == actual
                }
            })
}

/// Offline stand-in for the network
pub struct MockPlugin {
    map: ArcSwap<MockMap>,
    delay: Duration,
}

impl MockPlugin {
    pub fn new(map: MockMap) -> Self {
        Self {
            map: ArcSwap::from_pointee(map),
            delay: Duration::ZERO,
        }
    }

    /// Simulated latency before each mocked response
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace the whole map. Matches already resolved keep their factory.
    pub fn set_mock_map(&self, map: MockMap) {
        debug!(routes = map.len(), "Replacing mock map");
        self.map.store(Arc::new(map));
    }

    pub fn mock_map(&self) -> Arc<MockMap> {
        self.map.load_full()
    }
}

#[async_trait]
impl ApiPlugin for MockPlugin {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn on_request(&self, ctx: RequestContext) -> RequestOutcome {
        let Some(factory) = self.map.load().find(ctx.method, &ctx.url) else {
            return RequestOutcome::Continue(ctx);
        };

        debug!(method = %ctx.method, url = %ctx.url, "Serving mocked response");

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let data = factory(ctx.body.as_ref());
        RequestOutcome::ShortCircuit(ShortCircuit::new(
            ResponseContext::ok(data).with_header(SHORT_CIRCUIT_HEADER, "true"),
        ))
    }
}
