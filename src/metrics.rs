//! Observability metrics for the resampler and query engine
//!
//! ## Architecture
//!
//! - Uses `metrics` crate for low-overhead metric collection
//! - Optional Prometheus exporter for a scrape endpoint (`--metrics-addr`)
//! - Recording is a no-op until an exporter is installed, so library users
//!   and tests pay nothing

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

const BATCHES_COMMITTED: &str = "resample_batches_committed_total";
const CANDLES_WRITTEN: &str = "resample_candles_written_total";
const BARS_READ: &str = "resample_bars_read_total";
const RUNS_FAILED: &str = "resample_runs_failed_total";
const RUN_DURATION: &str = "resample_run_duration_seconds";
const OUTPUT_OFFSET: &str = "resample_output_offset_bytes";
const QUERY_REQUESTS: &str = "query_requests_total";
const QUERY_ROWS: &str = "query_rows_returned";
const REGISTRY_DATASETS: &str = "registry_datasets";

/// Address of the installed exporter, if any
static EXPORTER: Lazy<Mutex<Option<SocketAddr>>> = Lazy::new(|| Mutex::new(None));

/// Install the Prometheus exporter on `addr`.
///
/// Idempotent: later calls keep the first exporter.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut exporter = EXPORTER.lock().await;
    if let Some(existing) = *exporter {
        debug!(%existing, "Metrics exporter already installed");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_resample_metrics();
    describe_query_metrics();

    *exporter = Some(addr);
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

fn describe_resample_metrics() {
    describe_counter!(BATCHES_COMMITTED, Unit::Count, "Batches whose checkpoint index was committed");
    describe_counter!(CANDLES_WRITTEN, Unit::Count, "Confirmed candles appended to datasets");
    describe_counter!(BARS_READ, Unit::Count, "Raw or lower-timeframe bars read by engines");
    describe_counter!(RUNS_FAILED, Unit::Count, "Engine runs that ended with an error");
    describe_histogram!(RUN_DURATION, Unit::Seconds, "Wall time of one engine run");
    describe_gauge!(OUTPUT_OFFSET, Unit::Bytes, "Committed output offset of a dataset");
}

fn describe_query_metrics() {
    describe_counter!(QUERY_REQUESTS, Unit::Count, "Queries served, labelled by outcome");
    describe_histogram!(QUERY_ROWS, Unit::Count, "Rows returned per query");
    describe_gauge!(REGISTRY_DATASETS, Unit::Count, "Datasets currently known to the registry");
}

/// Whether an exporter is installed
pub async fn is_initialized() -> bool {
    EXPORTER.lock().await.is_some()
}

/// Metrics of one engine run
pub struct ResampleRunMetrics {
    labels: [(&'static str, String); 2],
    started: Instant,
}

impl ResampleRunMetrics {
    /// Start tracking a run
    pub fn start(symbol: impl Into<String>, timeframe: impl Into<String>) -> Self {
        Self {
            labels: [("symbol", symbol.into()), ("timeframe", timeframe.into())],
            started: Instant::now(),
        }
    }

    fn symbol(&self) -> &str {
        &self.labels[0].1
    }

    fn timeframe(&self) -> &str {
        &self.labels[1].1
    }

    /// Record a committed batch
    pub fn record_commit(&self, bars_read: u64, candles: u64, output_offset: u64) {
        counter!(BATCHES_COMMITTED, &self.labels).increment(1);
        counter!(BARS_READ, &self.labels).increment(bars_read);
        counter!(CANDLES_WRITTEN, &self.labels).increment(candles);
        gauge!(OUTPUT_OFFSET, &self.labels).set(output_offset as f64);
    }

    /// Record the end of a successful run
    pub fn record_complete(&self) {
        histogram!(RUN_DURATION, "timeframe" => self.timeframe().to_string())
            .record(self.started.elapsed().as_secs_f64());
    }

    /// Record a failed run
    pub fn record_failure(&self, error: &str) {
        counter!(RUNS_FAILED, &self.labels).increment(1);
        error!(
            symbol = %self.symbol(),
            timeframe = %self.timeframe(),
            error = %error,
            duration_ms = self.started.elapsed().as_millis(),
            "Resample run failed"
        );
    }
}

/// Record the outcome of a query
pub fn record_query(outcome: &'static str, rows: usize) {
    counter!(QUERY_REQUESTS, "outcome" => outcome).increment(1);
    histogram!(QUERY_ROWS).record(rows as f64);
}

/// Record the registry size after a refresh
pub fn record_registry_size(datasets: usize) {
    gauge!(REGISTRY_DATASETS).set(datasets as f64);
}
