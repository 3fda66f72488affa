//! # Bar Resampler Library
//!
//! Incremental multi-timeframe OHLCV resampling with a crash-safe checkpoint
//! protocol, plus a warmup-aware range query engine for the resampled output.
//!
//! ## Features
//!
//! - **Positional Storage**: fixed 64-byte binary records or CSV rows with a source `offset` column
//! - **Exactly-Once Resampling**: every batch commits data first and then an atomically replaced
//!   `(input_offset, output_offset)` index, so a crash never duplicates or loses a candle
//! - **Trading Sessions**: per-session timeframes and boundary merge rules
//! - **Warmup-Aware Queries**: slices are extended backwards so indicators have enough history
//! - **Writer Locking**: one active writer per symbol and day through advisory file locks
//!
//! ## Quick Start
//!
//! ```no_run
//! use bar_resampler::config::ResampleConfig;
//! use bar_resampler::layout::StorageLayout;
//! use bar_resampler::resample::ResamplePipeline;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let layout = StorageLayout::new("./data");
//! let config = ResampleConfig::load("./resample.json")?;
//! let pipeline = ResamplePipeline::new(layout, config);
//!
//! // Resample everything that arrived since the last run
//! let summary = pipeline.run_symbol("EURUSD")?;
//! println!("{} candles committed", summary.candles_committed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`codec`] - Binary and text bar codecs behind reader/writer traits
//! - [`index`] - Checkpoint index with atomic replacement
//! - [`config`] - Layered resample configuration
//! - [`session`] - Trading session resolution
//! - [`resample`] - Bucketing, session merging, the engine and the pipeline
//! - [`registry`] - Dataset discovery
//! - [`query`] - Warmup-aware query engine and indicator dispatch
//! - [`lock`] - Per symbol/day writer locks

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};

/// CLI command implementations
pub mod cli;

/// Binary and text bar codecs
pub mod codec;

/// Resample configuration documents and resolver
pub mod config;

/// Error taxonomy
pub mod error;

/// Checkpoint index
pub mod index;

/// Storage path conventions
pub mod layout;

/// Writer lock manager
pub mod lock;

/// Metrics collection
pub mod metrics;

/// Range queries and indicator dispatch
pub mod query;

/// Dataset discovery and registry
pub mod registry;

/// Resampling engine and pipeline
pub mod resample;

/// Trading session resolution
pub mod session;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Timeframe identifiers
pub mod timeframe;

pub use error::{Error, Result};
pub use timeframe::Timeframe;

/// OHLCV bar
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    /// Bar open time (Unix timestamp in milliseconds, UTC)
    pub timestamp: u64,
    /// Open price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Close price
    pub close: f64,
    /// Traded volume
    pub volume: f64,
}

impl Bar {
    /// Create a bar
    pub fn new(timestamp: u64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Validate bar data integrity
    pub fn validate(&self) -> std::result::Result<(), String> {
        let prices = [self.open, self.high, self.low, self.close, self.volume];
        if prices.iter().any(|v| !v.is_finite()) {
            return Err(format!("Non-finite value in bar at {}", self.timestamp));
        }

        if self.high < self.open || self.high < self.close {
            return Err(format!(
                "High ({}) must be >= open ({}) and close ({})",
                self.high, self.open, self.close
            ));
        }

        if self.low > self.open || self.low > self.close {
            return Err(format!(
                "Low ({}) must be <= open ({}) and close ({})",
                self.low, self.open, self.close
            ));
        }

        if self.volume < 0.0 {
            return Err(format!("Volume must be non-negative, got {}", self.volume));
        }

        Ok(())
    }

    /// Fold a later bar into this one
    pub fn absorb(&mut self, later: &Bar) {
        self.high = self.high.max(later.high);
        self.low = self.low.min(later.low);
        self.close = later.close;
        self.volume += later.volume;
    }
}

/// Round a price to `decimals` places
pub fn round_decimals(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
