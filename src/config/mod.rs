mod loader;
mod schema;

pub use loader::{load_from_env_or_file, load_from_path, load_mock_fixtures, validate};
pub use schema::{Config, LoggingConfig, MockConfig, PluginSettings, RestConfig, SseConfig};
