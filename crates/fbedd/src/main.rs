//! fbedd: self-hosted file store daemon
//!
//! Usage:
//!   fbedd [--config /etc/fbed/config.toml] [--log info] [--log-format text|json]

mod api;
mod daemon;
mod jobs;
mod metrics;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use fbed_core::config::{DaemonConfig, FbedConfig};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "fbedd", version, about = "Self-hosted file store daemon")]
struct Cli {
    /// Path to fbed.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "FBED_CONFIG",
        default_value = "/etc/fbed/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to daemon.log_level
    #[arg(long, env = "FBED_LOG")]
    log: Option<String>,

    /// Log format (json, text); defaults to daemon.log_format
    #[arg(long, env = "FBED_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // logging settings may come from the file, so it is read first
    let loaded = load_config(&cli.config).await?;
    let found = loaded.is_some();
    let config = loaded.unwrap_or_default();

    let (level, format) = log_settings(&cli, &config.daemon)?;
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "fbedd starting"
    );
    if !found {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    daemon::run(config).await
}

/// Read the config file; `None` when it does not exist.
async fn load_config(path: &Path) -> Result<Option<FbedConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config {}", path.display()))?;
    let config =
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(Some(config))
}

/// Command-line flags win over the `[daemon]` section.
fn log_settings(cli: &Cli, daemon: &DaemonConfig) -> Result<(String, LogFormat)> {
    let level = cli.log.clone().unwrap_or_else(|| daemon.log_level.clone());
    let format = match &cli.log_format {
        Some(format) => format.clone(),
        None => LogFormat::from_str(&daemon.log_format, true)
            .map_err(|e| anyhow!("daemon.log_format {:?}: {e}", daemon.log_format))?,
    };
    Ok((level, format))
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
