//! Warmup-aware range queries
//!
//! A query selects the rows of `[after_ms, until_ms)` but reads up to
//! `warmup` extra rows before them so indicators have history for the first
//! returned row. The positional slice is planned by [`plan_slice`] before
//! anything is read.

use super::indicator::{IndicatorRegistry, IndicatorRequest};
use crate::codec::binary::BinaryBarReader;
use crate::codec::{open_reader, StorageFormat};
use crate::config::DEFAULT_QUERY_LIMIT;
use crate::metrics::record_query;
use crate::registry::{Dataset, SharedRegistry};
use crate::{Bar, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Order of returned rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest first
    Asc,
    /// Newest first
    #[default]
    Desc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order {other:?}, expected asc or desc")),
        }
    }
}

/// Query modifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    /// Drop the last row of the dataset, which may still be forming
    SkipLast,
}

impl FromStr for Modifier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "skiplast" => Ok(Modifier::SkipLast),
            other => Err(format!("unknown modifier {other:?}")),
        }
    }
}

/// Extra query options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Active modifiers
    pub modifiers: Vec<Modifier>,
}

impl QueryOptions {
    /// Whether `modifier` is active
    pub fn has(&self, modifier: Modifier) -> bool {
        self.modifiers.contains(&modifier)
    }
}

/// One `get_data` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Symbol
    pub symbol: String,
    /// Timeframe ident
    pub timeframe: String,
    /// Inclusive lower timestamp
    pub after_ms: u64,
    /// Exclusive upper timestamp
    pub until_ms: u64,
    /// Maximum rows returned
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Row order
    #[serde(default)]
    pub order: SortOrder,
    /// Indicator request strings
    #[serde(default)]
    pub indicators: Vec<String>,
    /// Modifiers
    #[serde(default)]
    pub options: QueryOptions,
}

fn default_limit() -> usize {
    DEFAULT_QUERY_LIMIT
}

impl QueryRequest {
    /// Newest-first query with the default limit
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>, after_ms: u64, until_ms: u64) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            after_ms,
            until_ms,
            limit: DEFAULT_QUERY_LIMIT,
            order: SortOrder::default(),
            indicators: Vec::new(),
            options: QueryOptions::default(),
        }
    }

    /// Set the row limit
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Set the order
    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Request indicators
    pub fn with_indicators<I, S>(mut self, indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indicators = indicators.into_iter().map(Into::into).collect();
        self
    }

    /// Add a modifier
    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        if !self.options.has(modifier) {
            self.options.modifiers.push(modifier);
        }
        self
    }
}

/// Returned row: the bar plus one value per indicator column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRow {
    /// Bar
    #[serde(flatten)]
    pub bar: Bar,
    /// Indicator columns; `None` where history was insufficient
    #[serde(flatten)]
    pub indicators: BTreeMap<String, Option<f64>>,
}

/// Positional rows `[start, end)` to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceBounds {
    /// First row
    pub start: usize,
    /// One past the last row
    pub end: usize,
}

impl SliceBounds {
    /// Number of rows
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the slice is empty
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Plan the rows to read.
///
/// `lower` and `upper` are the first rows at or after `after_ms` and
/// `until_ms`. The slice starts `warmup` rows early and holds at most
/// `limit + warmup` rows: `desc` keeps the newest end, `asc` the oldest.
pub fn plan_slice(
    lower: usize,
    upper: usize,
    row_count: usize,
    warmup: usize,
    limit: usize,
    order: SortOrder,
    skip_last: bool,
) -> SliceBounds {
    let mut start = lower.saturating_sub(warmup);
    let mut end = upper;
    let span = limit.saturating_add(warmup);
    if end.saturating_sub(start) > span {
        match order {
            SortOrder::Desc => start = end - span,
            SortOrder::Asc => end = start + span,
        }
    }
    end = end.min(row_count);
    if skip_last && end == row_count && end > 0 {
        end -= 1;
    }
    start = start.min(end);
    SliceBounds { start, end }
}

/// Random access to the rows of one dataset
trait RowSource {
    fn row_count(&self) -> usize;

    /// First row whose timestamp is at or after `ts`
    fn lower_bound(&mut self, ts: u64) -> Result<usize>;

    fn rows(&mut self, bounds: SliceBounds) -> Result<Vec<Bar>>;
}

/// Binary datasets are searched and read in place
struct BinaryRows {
    reader: BinaryBarReader,
    count: usize,
}

impl RowSource for BinaryRows {
    fn row_count(&self) -> usize {
        self.count
    }

    fn lower_bound(&mut self, ts: u64) -> Result<usize> {
        let (mut lo, mut hi) = (0usize, self.count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.reader.timestamp_at(mid as u64)? < ts {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    fn rows(&mut self, bounds: SliceBounds) -> Result<Vec<Bar>> {
        self.reader.read_range(bounds.start as u64, bounds.end as u64)
    }
}

/// Text datasets are loaded whole
struct LoadedRows {
    bars: Vec<Bar>,
}

impl RowSource for LoadedRows {
    fn row_count(&self) -> usize {
        self.bars.len()
    }

    fn lower_bound(&mut self, ts: u64) -> Result<usize> {
        Ok(self.bars.partition_point(|b| b.timestamp < ts))
    }

    fn rows(&mut self, bounds: SliceBounds) -> Result<Vec<Bar>> {
        Ok(self.bars[bounds.start..bounds.end].to_vec())
    }
}

fn open_rows(dataset: &Dataset) -> Result<Box<dyn RowSource>> {
    match dataset.format {
        StorageFormat::Binary => {
            let reader = BinaryBarReader::open(&dataset.path)?;
            let count = reader.record_count()? as usize;
            Ok(Box::new(BinaryRows { reader, count }))
        }
        StorageFormat::Text => {
            let bars = open_reader(&dataset.path)?
                .read_all(0)?
                .into_iter()
                .map(|p| p.bar)
                .collect();
            Ok(Box::new(LoadedRows { bars }))
        }
    }
}

/// Serves [`QueryRequest`]s against the shared dataset registry
pub struct QueryEngine {
    registry: Arc<SharedRegistry>,
    indicators: IndicatorRegistry,
}

impl QueryEngine {
    /// Engine with the built-in indicators
    pub fn new(registry: Arc<SharedRegistry>) -> Self {
        Self {
            registry,
            indicators: IndicatorRegistry::with_builtins(),
        }
    }

    /// Replace the indicator registry
    pub fn with_indicators(mut self, indicators: IndicatorRegistry) -> Self {
        self.indicators = indicators;
        self
    }

    /// Indicator registry in use
    pub fn indicators(&self) -> &IndicatorRegistry {
        &self.indicators
    }

    /// Rows of `[after_ms, until_ms)` with indicator columns, at most `limit`
    pub fn get_data(&self, request: &QueryRequest) -> Result<Vec<QueryRow>> {
        let span = tracing::info_span!(
            "query",
            symbol = %request.symbol,
            timeframe = %request.timeframe,
        );
        let _enter = span.enter();

        match self.execute(request) {
            Ok(rows) => {
                record_query("ok", rows.len());
                Ok(rows)
            }
            Err(e) => {
                record_query(if e.is_not_found() { "not_found" } else { "error" }, 0);
                Err(e)
            }
        }
    }

    fn execute(&self, request: &QueryRequest) -> Result<Vec<QueryRow>> {
        let registry = self.registry.snapshot();
        let dataset = registry
            .find(&request.symbol, &request.timeframe)
            .ok_or_else(|| Error::DataNotFound {
                symbol: request.symbol.clone(),
                timeframe: request.timeframe.clone(),
            })?;

        let requests: Vec<IndicatorRequest> = self.indicators.parse_all(&request.indicators)?;
        let warmup = requests
            .iter()
            .map(IndicatorRequest::warmup_count)
            .max()
            .unwrap_or(0);

        let mut source = open_rows(dataset)?;
        let lower = source.lower_bound(request.after_ms)?;
        let upper = source.lower_bound(request.until_ms)?;
        let bounds = plan_slice(
            lower,
            upper,
            source.row_count(),
            warmup,
            request.limit,
            request.order,
            request.options.has(Modifier::SkipLast),
        );
        debug!(
            lower,
            upper,
            start = bounds.start,
            end = bounds.end,
            warmup,
            "Planned query slice"
        );
        if bounds.is_empty() {
            return Ok(Vec::new());
        }

        let bars = source.rows(bounds)?;
        let columns = self.indicators.dispatch(&requests, &bars)?;

        let mut rows: Vec<QueryRow> = bars
            .iter()
            .filter(|b| b.timestamp >= request.after_ms && b.timestamp < request.until_ms)
            .map(|bar| QueryRow {
                bar: *bar,
                indicators: columns
                    .iter()
                    .map(|(name, values)| (name.clone(), values.get(&bar.timestamp).copied()))
                    .collect(),
            })
            .collect();

        if request.order == SortOrder::Desc {
            rows.reverse();
        }
        rows.truncate(request.limit);
        Ok(rows)
    }
}
