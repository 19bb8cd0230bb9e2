//! Request/response values passed through plugin chains
//!
//! These are plain owned values. A `RequestContext` is built fresh for every call
//! and handed from hook to hook by value, so no two calls ever share one.

use crate::error::{ApiError, TransportError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Header set on every short-circuited response
pub const SHORT_CIRCUIT_HEADER: &str = "x-short-circuit";

pub type Headers = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(ApiError::Validation(format!(
                "Unsupported HTTP method '{other}'"
            ))),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
        }
    }
}

/// An in-flight request as seen by plugins
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub method: HttpMethod,
    /// URL relative to the protocol's base URL
    pub url: String,
    pub headers: Headers,
    pub body: Option<Value>,
}

impl RequestContext {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Response payload. Anything that is not JSON or text stays as raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Binary(Bytes),
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Binary(_) => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Binary(_) => None,
        }
    }
}

impl From<Value> for ResponseBody {
    fn from(value: Value) -> Self {
        ResponseBody::Json(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseContext {
    pub status: u16,
    pub headers: Headers,
    pub data: ResponseBody,
}

impl ResponseContext {
    pub fn new(status: u16, data: impl Into<ResponseBody>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            data: data.into(),
        }
    }

    pub fn ok(data: impl Into<ResponseBody>) -> Self {
        Self::new(200, data)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_short_circuited(&self) -> bool {
        self.header(SHORT_CIRCUIT_HEADER) == Some("true")
    }

    /// Add the short-circuit marker unless a plugin already set one.
    pub(crate) fn mark_short_circuited(&mut self) {
        if self.header(SHORT_CIRCUIT_HEADER).is_none() {
            self.headers
                .insert(SHORT_CIRCUIT_HEADER.to_string(), "true".to_string());
        }
    }
}

/// A synthetic response that replaces the network call
#[derive(Debug, Clone, PartialEq)]
pub struct ShortCircuit {
    pub response: ResponseContext,
}

impl ShortCircuit {
    pub fn new(response: ResponseContext) -> Self {
        Self { response }
    }
}

/// Result of an `on_request` hook
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Continue(RequestContext),
    ShortCircuit(ShortCircuit),
}

/// Result of an `on_error` hook
#[derive(Debug)]
pub enum ErrorOutcome {
    Propagate(TransportError),
    Recover(ResponseContext),
}
