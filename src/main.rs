//! Main entry point for the bar-resampler CLI

use bar_resampler::cli::{Cli, Commands};
use bar_resampler::metrics::init_metrics;
use bar_resampler::shutdown::{listen_for_ctrl_c, ShutdownCoordinator};
use clap::Parser;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bar_resampler=info"));

    // logs go to stderr so command output on stdout stays machine readable
    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Arc::new(Cli::parse());

    if let Some(addr) = cli.metrics_addr {
        if let Err(e) = init_metrics(addr).await {
            error!("Failed to start metrics exporter: {}", e);
            std::process::exit(1);
        }
    }

    let shutdown = ShutdownCoordinator::shared();
    listen_for_ctrl_c(Arc::clone(&shutdown));

    // resampling and queries are blocking file IO
    let result = tokio::task::spawn_blocking({
        let cli = Arc::clone(&cli);
        move || match &cli.command {
            Commands::Resample(cmd) => cmd.execute(&cli, shutdown),
            Commands::Query(cmd) => cmd.execute(&cli),
            Commands::Datasets(cmd) => cmd.execute(&cli),
            Commands::Index(cmd) => cmd.execute(&cli),
        }
    })
    .await
    .map_err(|e| anyhow::anyhow!("command task failed: {e}"))
    .and_then(|r| r.map_err(|e| anyhow::anyhow!(e)));

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
}
