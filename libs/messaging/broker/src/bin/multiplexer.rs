//! Multiplexer broker binary
//!
//! Usage:
//!   multiplexer --config config/multiplexer.toml
//!   multiplexer --port 31889 --stats-interval 60

use anyhow::Result;
use broker::Broker;
use clap::Parser;
use config::MultiplexerConfig;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "multiplexer")]
#[command(about = "Multiplexer message broker")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface to bind, overrides the configuration file
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overrides the configuration file
    #[arg(short, long)]
    port: Option<u16>,

    /// Seconds between traffic summaries (0 disables)
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let mut config = MultiplexerConfig::load(args.config.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {:#}", e);
        e
    })?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(secs) = args.stats_interval {
        config.server.stats_interval_secs = secs;
    }

    info!(
        "Starting Multiplexer on {} with {} routing rules",
        config.server.bind_address(),
        config.routing.rules.len()
    );

    let broker = Broker::new(config);
    let listener = broker.listen().await?;

    tokio::select! {
        served = broker.serve(listener) => {
            if let Err(e) = served {
                error!("Broker failed: {:#}", e);
                return Err(e);
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for CTRL+C: {}", e);
            }
            info!("Received shutdown signal");
        }
    }

    broker.shutdown();
    Ok(())
}

fn init_logging(args: &Args) {
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    // RUST_LOG wins over --log-level when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));

    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
