use crate::plugin::{DuplicatePolicy, Headers};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub rest: RestConfig,
    #[serde(default)]
    pub sse: SseConfig,
    #[serde(default)]
    pub plugins: PluginSettings,
    #[serde(default)]
    pub mock: MockConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RestConfig {
    #[serde(default)]
    pub base_url: String,
    /// Whole-request timeout; unset means no timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Keep and send cookies across requests
    #[serde(default)]
    pub with_credentials: bool,
    /// Headers added to every request
    #[serde(default)]
    pub headers: Headers,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SseConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub with_credentials: bool,
    #[serde(default)]
    pub headers: Headers,
    /// Pause before each word of a simulated stream
    #[serde(default = "default_chunk_delay")]
    pub chunk_delay_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PluginSettings {
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MockConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub delay_ms: u64,
    /// JSON or YAML object of `"METHOD /path": response` entries
    #[serde(default)]
    pub fixtures: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_chunk_delay() -> u64 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            with_credentials: false,
            headers: Headers::new(),
            chunk_delay_ms: default_chunk_delay(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_credentials(mut self, enabled: bool) -> Self {
        self.with_credentials = enabled;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl SseConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

impl MockConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}
