//! Price pusher - Entry Point
//!
//! Keeps on-chain price feeds in sync with an off-chain price service.

use anyhow::Result;
use clap::{Parser, Subcommand};
use pusher_bot::config::{AdapterKind, DEFAULT_CONFIG_PATH};
use pusher_bot::{AppConfig, Application, ChainSelection};
use tracing::info;

/// Pushes off-chain prices to on-chain price feeds when they drift.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PUSHER_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log filter used when RUST_LOG is not set (e.g. "info,pusher=debug")
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Serve Prometheus metrics over HTTP
    #[arg(long, global = true)]
    enable_metrics: bool,

    /// Port for the metrics endpoint (implies --enable-metrics)
    #[arg(long, global = true)]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every configured chain
    Run,
    /// Run a single chain
    Chain {
        /// Chain id as configured in [[chains]]
        chain_id: String,
    },
    /// Run every chain using the in-memory simulated adapter
    Simulated,
    /// Validate the configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    pusher_ws::init_crypto();

    let args = Args::parse();

    // Determine config path: CLI arg > PUSHER_CONFIG env var > default
    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var("PUSHER_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = AppConfig::from_file(&config_path)?;

    let log_level = args
        .log_level
        .as_deref()
        .or(config.telemetry.log_level.as_deref());
    pusher_telemetry::init_logging(log_level)?;

    info!("Starting price pusher v{}", env!("CARGO_PKG_VERSION"));
    info!(config_path = %config_path, "Configuration loaded");

    let selection = match args.command {
        Command::Check => {
            config.validate()?;
            info!(
                feeds = config.feeds.len(),
                chains = config.chains.len(),
                "Configuration is valid"
            );
            return Ok(());
        }
        Command::Run => ChainSelection::All,
        Command::Chain { chain_id } => ChainSelection::One(chain_id),
        Command::Simulated => ChainSelection::Kind(AdapterKind::Simulated),
    };

    let metrics_port = match (args.metrics_port, args.enable_metrics) {
        (Some(port), _) => Some(port),
        (None, true) => Some(config.telemetry.metrics_port),
        (None, false) => None,
    };

    let app = Application::new(config)?.with_metrics_port(metrics_port);
    app.run(selection).await?;

    Ok(())
}
