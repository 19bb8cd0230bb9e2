use super::schema::{Config, MockConfig};
use crate::error::{ApiError, ConfigError, Result};
use crate::plugin::MockMap;
use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::str::FromStr;

static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env substitution pattern"));

const ENV_PREFIX: &str = "HAI3_API_";

pub fn load_from_env_or_file() -> Result<Config> {
    let config: Config = Figment::new()
        .merge(Toml::file("hai3-api.toml"))
        .merge(Json::file("hai3-api.json"))
        .merge(Yaml::file("hai3-api.yaml"))
        .merge(Yaml::file("hai3-api.yml"))
        // HAI3_API_REST__BASE_URL -> rest.base_url
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    finish(config)
}

pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into());
        }
    };

    let config: Config = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    finish(config)
}

fn finish(config: Config) -> Result<Config> {
    let config = apply_env_substitutions(config)?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    validate_base_url("rest.base_url", &config.rest.base_url)?;
    validate_base_url("sse.base_url", &config.sse.base_url)?;

    if let Some(timeout_ms) = config.rest.timeout_ms {
        if timeout_ms == 0 {
            return Err(ConfigError::Validation("rest.timeout_ms must be greater than 0".into()).into());
        }
        if timeout_ms > 600_000 {
            return Err(ConfigError::Validation(
                "rest.timeout_ms cannot exceed 600000ms (10 minutes)".into(),
            )
            .into());
        }
    }

    if config.sse.chunk_delay_ms > 10_000 {
        return Err(ConfigError::Validation("sse.chunk_delay_ms cannot exceed 10000ms".into()).into());
    }

    if config.mock.enabled {
        if let Some(path) = &config.mock.fixtures {
            if !path.is_file() {
                return Err(ConfigError::Validation(format!(
                    "Mock fixtures file does not exist: {}",
                    path.display()
                ))
                .into());
            }
        }
    }

    if tracing::Level::from_str(&config.logging.level).is_err() {
        return Err(ConfigError::Validation(format!(
            "Unknown log level '{}'",
            config.logging.level
        ))
        .into());
    }

    Ok(())
}

fn validate_base_url(field: &str, base_url: &str) -> Result<()> {
    // Empty means request URLs are used as given
    if base_url.is_empty() {
        return Ok(());
    }

    let parsed = url::Url::parse(base_url)
        .map_err(|e| ConfigError::Validation(format!("{field} is not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Validation(format!(
            "{field} must use http or https, got '{}'",
            parsed.scheme()
        ))
        .into());
    }
    Ok(())
}

fn apply_env_substitutions(mut config: Config) -> Result<Config> {
    config.rest.base_url = substitute_env_vars(&config.rest.base_url)?;
    for value in config.rest.headers.values_mut() {
        *value = substitute_env_vars(value)?;
    }

    config.sse.base_url = substitute_env_vars(&config.sse.base_url)?;
    for value in config.sse.headers.values_mut() {
        *value = substitute_env_vars(value)?;
    }

    Ok(config)
}

/// Expand `${VAR}` and `${VAR:-default}`
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();

    for cap in ENV_VAR_PATTERN.captures_iter(input) {
        let var_name = &cap[1];
        let value = match var_name.split_once(":-") {
            Some((name, default)) => std::env::var(name).unwrap_or_else(|_| default.to_string()),
            None => std::env::var(var_name).map_err(|_| {
                ConfigError::EnvVar(format!("Environment variable '{var_name}' not found"))
            })?,
        };
        result = result.replace(&cap[0], &value);
    }

    Ok(result)
}

/// Build a mock map from the configured fixtures file, if any
pub fn load_mock_fixtures(mock: &MockConfig) -> Result<Option<MockMap>> {
    let Some(path) = &mock.fixtures else {
        return Ok(None);
    };

    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Parse(format!("Failed to read {}: {e}", path.display()))
    })?;

    let value: serde_json::Value = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("Invalid YAML fixtures: {e}")))?,
        _ => serde_json::from_str(&content)?,
    };

    let fixtures = value.as_object().ok_or_else(|| {
        ApiError::Config(ConfigError::Validation(
            "Mock fixtures must be an object of \"METHOD /path\" keys".into(),
        ))
    })?;

    MockMap::from_fixtures(fixtures).map(Some)
}
