use super::sse::decode_event_stream;
use super::{EventStream, HttpTransport, StreamTransport};
use crate::config::{RestConfig, SseConfig};
use crate::error::TransportError;
use crate::plugin::{Headers, RequestContext, ResponseBody, ResponseContext};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use tracing::debug;

/// Join a request URL onto a base URL. Absolute URLs are used as is.
pub fn resolve_url(base_url: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") || base_url.is_empty() {
        return url.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        url.trim_start_matches('/')
    )
}

fn build_client(with_credentials: bool, timeout: Option<std::time::Duration>) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder().cookie_store(with_credentials);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| TransportError::ConnectionFailed(format!("Failed to build HTTP client: {e}")))
}

fn apply_headers(
    mut request: reqwest::RequestBuilder,
    headers: &Headers,
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    request
}

fn collect_headers(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// JSON bodies are parsed, text becomes a JSON string, anything else stays binary
fn decode_body(content_type: Option<&str>, bytes: Bytes) -> Result<ResponseBody, TransportError> {
    if bytes.is_empty() {
        return Ok(ResponseBody::Json(serde_json::Value::Null));
    }

    match content_type {
        Some(ct) if ct.contains("json") => serde_json::from_slice(&bytes)
            .map(ResponseBody::Json)
            .map_err(|e| TransportError::InvalidFormat(format!("Invalid JSON body: {e}"))),
        Some(ct) if !ct.starts_with("text/") => Ok(ResponseBody::Binary(bytes)),
        _ => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Ok(ResponseBody::Json(serde_json::Value::String(text))),
            Err(_) => Ok(ResponseBody::Binary(bytes)),
        },
    }
}

/// Prefer a `message` field from a JSON error body, else the status reason
fn error_message(status: reqwest::StatusCode, bytes: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(bytes)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown status")
                .to_string()
        })
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(config: &RestConfig) -> Result<Self, TransportError> {
        Ok(Self {
            client: build_client(config.with_credentials, config.timeout())?,
            base_url: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, ctx: &RequestContext) -> Result<ResponseContext, TransportError> {
        let url = resolve_url(&self.base_url, &ctx.url);
        debug!(method = %ctx.method, url = %url, "Sending HTTP request");

        let mut request = apply_headers(self.client.request(ctx.method.into(), &url), &ctx.headers);
        if let Some(body) = &ctx.body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = collect_headers(response.headers());
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: error_message(status, &bytes),
            });
        }

        Ok(ResponseContext {
            status: status.as_u16(),
            headers,
            data: decode_body(content_type.as_deref(), bytes)?,
        })
    }
}

pub struct ReqwestStreamTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestStreamTransport {
    pub fn new(config: &SseConfig) -> Result<Self, TransportError> {
        Ok(Self {
            // Streams are long-lived; no overall request timeout
            client: build_client(config.with_credentials, None)?,
            base_url: config.base_url.clone(),
        })
    }
}

#[async_trait]
impl StreamTransport for ReqwestStreamTransport {
    async fn open(&self, ctx: &RequestContext) -> Result<EventStream, TransportError> {
        let url = resolve_url(&self.base_url, &ctx.url);
        debug!(url = %url, "Opening event stream");

        let response = apply_headers(self.client.request(ctx.method.into(), &url), &ctx.headers)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let bytes = response.bytes().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: error_message(status, &bytes),
            });
        }

        Ok(decode_event_stream(response.bytes_stream()))
    }
}
