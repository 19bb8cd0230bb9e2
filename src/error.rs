use crate::plugin::ProtocolKind;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Plugin '{name}' is already registered for {kind}")]
    DuplicatePlugin { kind: ProtocolKind, name: &'static str },

    #[error("Request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Plugin '{name}' failed: {reason}")]
    Plugin { name: &'static str, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ApiError {
    /// HTTP status of the failed call, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Transport(e) => e.status(),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Server responded with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Request error: {0}")]
    Request(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Transport closed")]
    Closed,

    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::ConnectionFailed(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::Status {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Environment variable error: {0}")]
    EnvVar(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_exposed_for_http_failures() {
        let err: ApiError = TransportError::Status {
            status: 404,
            message: "Not Found".into(),
        }
        .into();
        assert_eq!(err.status(), Some(404));
        assert_eq!(
            err.to_string(),
            "Request failed: Server responded with status 404: Not Found"
        );

        let err: ApiError = TransportError::Timeout.into();
        assert_eq!(err.status(), None);
    }
}
