//! CLI command implementations

pub mod error;
pub mod inspect;
pub mod query;
pub mod resample;

pub use error::CliError;
pub use inspect::{DatasetsCommand, IndexCommand};
pub use query::QueryCommand;
pub use resample::ResampleCommand;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Output format of command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

/// Bar resampler CLI
#[derive(Parser, Debug)]
#[command(name = "bar-resampler")]
#[command(about = "Resample OHLCV bars into timeframe datasets and query them", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Storage root holding raw input, datasets and locks
    #[arg(long, global = true, default_value = "data")]
    pub data_dir: PathBuf,

    /// Output format (json or human)
    #[arg(long, global = true, value_enum, default_value = "human")]
    pub output_format: OutputFormat,

    /// Serve Prometheus metrics on this address
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resample raw bars of one or more symbols
    Resample(ResampleCommand),

    /// Read rows of a dataset with optional indicators
    Query(QueryCommand),

    /// List discovered datasets
    Datasets(DatasetsCommand),

    /// Show or reset a checkpoint index
    Index(IndexCommand),
}
