//! Query command

use super::{Cli, CliError, OutputFormat};
use crate::query::{Modifier, QueryEngine, QueryRequest, SortOrder};
use crate::registry::SharedRegistry;
use chrono::{DateTime, NaiveDate};
use clap::Args;
use std::sync::Arc;

/// Query arguments
#[derive(Debug, Args)]
pub struct QueryCommand {
    /// Symbol
    pub symbol: String,

    /// Timeframe ident such as 5m or 1h
    pub timeframe: String,

    /// Inclusive start: epoch millis, YYYY-MM-DD or RFC3339
    #[arg(long, value_parser = parse_timestamp, default_value = "0")]
    pub after: u64,

    /// Exclusive end: epoch millis, YYYY-MM-DD or RFC3339
    #[arg(long, value_parser = parse_timestamp)]
    pub until: Option<u64>,

    /// Maximum rows
    #[arg(long, default_value_t = crate::config::DEFAULT_QUERY_LIMIT)]
    pub limit: usize,

    /// Row order: asc or desc
    #[arg(long, default_value = "desc")]
    pub order: SortOrder,

    /// Indicator such as sma_20 or zscore_50 (repeatable)
    #[arg(long = "indicator")]
    pub indicators: Vec<String>,

    /// Drop the last row of the dataset
    #[arg(long, default_value_t = false)]
    pub skip_last: bool,
}

/// Parse epoch millis, `YYYY-MM-DD` (midnight UTC) or RFC3339
fn parse_timestamp(input: &str) -> Result<u64, String> {
    let input = input.trim();
    if let Ok(ms) = input.parse::<u64>() {
        return Ok(ms);
    }
    let ms = if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        dt.timestamp_millis()
    } else if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{input}Z")) {
        dt.timestamp_millis()
    } else {
        let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
            .map_err(|e| format!("invalid time {input:?}: {e}"))?;
        date.and_hms_opt(0, 0, 0)
            .ok_or_else(|| format!("invalid time {input:?}"))?
            .and_utc()
            .timestamp_millis()
    };
    u64::try_from(ms).map_err(|_| format!("time {input:?} is before the epoch"))
}

impl QueryCommand {
    /// Request described by the arguments
    pub fn request(&self) -> QueryRequest {
        let mut request = QueryRequest::new(
            &self.symbol,
            &self.timeframe,
            self.after,
            self.until.unwrap_or(u64::MAX),
        )
        .with_limit(self.limit)
        .with_order(self.order)
        .with_indicators(self.indicators.iter().cloned());
        if self.skip_last {
            request = request.with_modifier(Modifier::SkipLast);
        }
        request
    }

    /// Run the query and print its rows
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let registry = Arc::new(SharedRegistry::open(&cli.data_dir)?);
        let engine = QueryEngine::new(registry);
        let rows = engine.get_data(&self.request())?;

        match cli.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            OutputFormat::Human => {
                for row in &rows {
                    let stamp = DateTime::from_timestamp_millis(row.bar.timestamp as i64)
                        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| row.bar.timestamp.to_string());
                    let mut line = format!(
                        "{stamp} | o={} h={} l={} c={} v={}",
                        row.bar.open, row.bar.high, row.bar.low, row.bar.close, row.bar.volume
                    );
                    for (name, value) in &row.indicators {
                        match value {
                            Some(v) => line.push_str(&format!(" {name}={v:.6}")),
                            None => line.push_str(&format!(" {name}=-")),
                        }
                    }
                    println!("{line}");
                }
                println!("{} rows", rows.len());
            }
        }
        Ok(())
    }
}
