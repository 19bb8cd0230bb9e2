use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use hai3_api::commands;
use hai3_api::config;
use hai3_api::error::{ApiError, Result};
use hai3_api::logging;
use hai3_api::plugin::HttpMethod;
use hai3_api::state::Metrics;

#[derive(Parser, Debug)]
#[command(name = "hai3-api")]
#[command(about = "Run REST and SSE calls through the protocol plugin pipeline", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (YAML/JSON/TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Print Prometheus metrics to stderr when the command finishes
    #[arg(long, global = true)]
    metrics: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Send one REST request and print the response body
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: HttpMethod,
        url: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },
    /// Open an SSE stream and print each event until it ends
    Stream { url: String },
    /// Validate configuration and mock fixtures
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => config::load_from_path(path)?,
        None => config::load_from_env_or_file()?,
    };

    logging::init(&config.logging, args.debug);
    match &args.config {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("Configuration loaded from default locations"),
    }

    let metrics = Arc::new(Metrics::new());

    let result = match args.command {
        Command::Check => commands::run_config_check(&config),
        Command::Request { method, url, body } => {
            let body = body
                .map(|raw| serde_json::from_str::<Value>(&raw))
                .transpose()
                .map_err(|e| ApiError::Validation(format!("--body is not valid JSON: {e}")));
            match body {
                Ok(body) => {
                    let registry = commands::build_registry(&config)?;
                    commands::run_request(&config, registry, metrics.clone(), method, &url, body)
                        .await
                        .and_then(|value| {
                            println!("{}", serde_json::to_string_pretty(&value)?);
                            Ok(())
                        })
                }
                Err(e) => Err(e),
            }
        }
        Command::Stream { url } => {
            let registry = commands::build_registry(&config)?;
            commands::run_stream(&config, registry, metrics.clone(), &url).await
        }
    };

    if args.metrics {
        eprint!("{}", metrics.encode_text());
    }

    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}
