//! Resample configuration
//!
//! A [`ResampleConfig`] document holds global defaults plus per-symbol
//! overrides. [`resolve`] layers them (global, then symbol, then session) into
//! one [`ResampleSymbolConfig`] without touching the inputs.

use crate::codec::StorageFormat;
use crate::resample::MergeRule;
use crate::session::{parse_time_of_day, SessionSchedule};
use crate::{Error, Result, Timeframe};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Raw bars read per engine batch.
/// 50,000 one-minute bars is about five weeks of data and about 3 MB of binary
/// input, large enough to amortize the index commit and small enough to keep
/// the pending window cheap to re-bucket.
pub const DEFAULT_BATCH_SIZE: usize = 50_000;

/// Decimal places kept on aggregated prices.
/// 8 places covers crypto quotes; FX symbols usually override it to 5.
pub const DEFAULT_ROUND_DECIMALS: u32 = 8;

/// Granularity of raw input bars
pub const DEFAULT_INPUT_TIMEFRAME: &str = "1m";

/// Name of the synthetic all-day session
pub const DEFAULT_SESSION: &str = "default";

/// Rows returned by a query when the caller gives no limit
pub const DEFAULT_QUERY_LIMIT: usize = 1_000;

/// How often the dataset registry fingerprint is checked.
/// Resample runs commit every few seconds at most, so 30 seconds keeps
/// discovery current without walking the tree constantly.
pub const REGISTRY_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_round_decimals() -> u32 {
    DEFAULT_ROUND_DECIMALS
}

fn default_input_timeframe() -> String {
    DEFAULT_INPUT_TIMEFRAME.to_string()
}

fn default_timeframes() -> BTreeMap<String, ResampleTimeframe> {
    ["1m", "5m", "15m", "1h", "4h", "1d"]
        .into_iter()
        .map(|tf| (tf.to_string(), ResampleTimeframe::default()))
        .collect()
}

/// Per-timeframe hints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResampleTimeframe {
    /// Timeframe whose output feeds this one (raw input when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// `HH:MM:SS` anchor of the bucket grid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Key suffix of rows folded by the session merger
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_with: Option<String>,
    /// Position of the anchor row relative to a folded row
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

impl ResampleTimeframe {
    /// Fields set in `over` win; everything else comes from `self`
    pub fn overlay(&self, over: &ResampleTimeframe) -> ResampleTimeframe {
        ResampleTimeframe {
            source: over.source.clone().or_else(|| self.source.clone()),
            origin: over.origin.clone().or_else(|| self.origin.clone()),
            ends_with: over.ends_with.clone().or_else(|| self.ends_with.clone()),
            offset: over.offset.or(self.offset),
        }
    }

    /// Merge rule described by the hint, if any
    pub fn merge_rule(&self) -> Option<MergeRule> {
        match (&self.ends_with, self.offset) {
            (Some(ends_with), Some(offset)) => Some(MergeRule::new(ends_with.clone(), offset)),
            _ => None,
        }
    }

    /// Bucket grid anchor in ms after midnight
    pub fn origin_ms(&self) -> Result<u64> {
        match &self.origin {
            Some(origin) => parse_time_of_day(origin),
            None => Ok(0),
        }
    }
}

/// Inclusive time-of-day range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// `HH:MM:SS` start
    pub from_time: String,
    /// `HH:MM:SS` end, inclusive to the second
    pub to_time: String,
}

impl TimeRange {
    /// Build a range from two `HH:MM:SS` strings
    pub fn new(from_time: impl Into<String>, to_time: impl Into<String>) -> Self {
        Self {
            from_time: from_time.into(),
            to_time: to_time.into(),
        }
    }

    /// The whole UTC day
    pub fn all_day() -> Self {
        Self::new("00:00:00", "23:59:59")
    }
}

/// Trading session: named ranges sharing one timeframe map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingSession {
    /// Range name to time range; range names become candle key suffixes
    pub ranges: BTreeMap<String, TimeRange>,
    /// Session-level timeframe overrides
    pub timeframes: BTreeMap<String, ResampleTimeframe>,
}

/// Global defaults section of the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalDefaults {
    /// Decimal places of aggregated prices
    pub round_decimals: u32,
    /// Raw bars per batch
    pub batch_size: usize,
    /// Granularity of raw bars
    pub input_timeframe: String,
    /// Dataset encoding
    pub format: StorageFormat,
    /// Timeframes to produce
    pub timeframes: BTreeMap<String, ResampleTimeframe>,
    /// Trading sessions
    pub sessions: BTreeMap<String, TradingSession>,
    /// Timeframes removed everywhere
    pub skip_timeframes: Vec<String>,
}

impl Default for GlobalDefaults {
    fn default() -> Self {
        Self {
            round_decimals: default_round_decimals(),
            batch_size: default_batch_size(),
            input_timeframe: default_input_timeframe(),
            format: StorageFormat::default(),
            timeframes: default_timeframes(),
            sessions: BTreeMap::new(),
            skip_timeframes: Vec::new(),
        }
    }
}

/// Per-symbol overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolOverride {
    /// Overrides `round_decimals`
    pub round_decimals: Option<u32>,
    /// Overrides `batch_size`
    pub batch_size: Option<usize>,
    /// Overrides `input_timeframe`
    pub input_timeframe: Option<String>,
    /// Overrides `format`
    pub format: Option<StorageFormat>,
    /// Per-timeframe overlays on top of the global map
    pub timeframes: BTreeMap<String, ResampleTimeframe>,
    /// Replaces the global sessions when set
    pub sessions: Option<BTreeMap<String, TradingSession>>,
    /// Replaces the global skip list when set
    pub skip_timeframes: Option<Vec<String>>,
}

/// Resample configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleConfig {
    /// Global defaults
    #[serde(rename = "default")]
    pub defaults: GlobalDefaults,
    /// Symbol overrides keyed by symbol
    pub symbols: BTreeMap<String, SymbolOverride>,
}

impl ResampleConfig {
    /// Load a JSON document
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_json(&contents)
    }

    /// Parse a JSON document
    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).map_err(|e| Error::Config(format!("invalid config: {e}")))
    }

    /// Resolved configuration for `symbol`
    pub fn symbol_config(&self, symbol: &str) -> Result<ResampleSymbolConfig> {
        resolve(&self.defaults, self.symbols.get(symbol))
    }

    /// Symbols with explicit overrides
    pub fn configured_symbols(&self) -> Vec<String> {
        self.symbols.keys().cloned().collect()
    }
}

/// Fully resolved configuration of one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct ResampleSymbolConfig {
    /// Decimal places of aggregated prices
    pub round_decimals: u32,
    /// Raw bars per batch
    pub batch_size: usize,
    /// Granularity of raw bars
    pub input_timeframe: String,
    /// Dataset encoding
    pub format: StorageFormat,
    /// Symbol-level timeframe map
    pub timeframes: BTreeMap<String, ResampleTimeframe>,
    /// Sessions, each with its own complete timeframe map
    pub sessions: BTreeMap<String, TradingSession>,
    /// Timeframes that were removed
    pub skip_timeframes: Vec<String>,
}

impl ResampleSymbolConfig {
    /// Session schedule of the symbol
    pub fn schedule(&self) -> Result<SessionSchedule> {
        SessionSchedule::new(&self.sessions)
    }

    /// Hint for `timeframe` as seen by `session`
    pub fn hint(&self, session: &str, timeframe: &str) -> Option<&ResampleTimeframe> {
        self.sessions
            .get(session)
            .and_then(|s| s.timeframes.get(timeframe))
    }

    /// Distinct merge rules of `timeframe` across the symbol and its sessions
    pub fn merge_rules(&self, timeframe: &str) -> Vec<MergeRule> {
        let mut rules: Vec<MergeRule> = Vec::new();
        let hints = self
            .timeframes
            .get(timeframe)
            .into_iter()
            .chain(self.sessions.values().filter_map(|s| s.timeframes.get(timeframe)));
        for rule in hints.filter_map(ResampleTimeframe::merge_rule) {
            if !rules.contains(&rule) {
                rules.push(rule);
            }
        }
        rules
    }

    /// Parsed input timeframe
    pub fn input_timeframe(&self) -> Result<Timeframe> {
        parse_timeframe(&self.input_timeframe)
    }
}

fn parse_timeframe(ident: &str) -> Result<Timeframe> {
    ident
        .parse::<Timeframe>()
        .map_err(|e| Error::Config(format!("timeframe {ident:?}: {e}")))
}

fn overlay_map(
    base: &BTreeMap<String, ResampleTimeframe>,
    over: &BTreeMap<String, ResampleTimeframe>,
) -> BTreeMap<String, ResampleTimeframe> {
    let mut out = base.clone();
    for (ident, hint) in over {
        let merged = match base.get(ident) {
            Some(existing) => existing.overlay(hint),
            None => hint.clone(),
        };
        out.insert(ident.clone(), merged);
    }
    out
}

/// Layer global defaults, symbol overrides and session overrides.
///
/// Every timeframe referenced at any level ends up in the symbol map and in
/// every session map, minus the skipped ones. With no sessions configured a
/// `default` session spanning the whole day is synthesized.
pub fn resolve(
    global: &GlobalDefaults,
    symbol: Option<&SymbolOverride>,
) -> Result<ResampleSymbolConfig> {
    let empty = SymbolOverride::default();
    let symbol = symbol.unwrap_or(&empty);

    let skip: BTreeSet<String> = symbol
        .skip_timeframes
        .as_ref()
        .unwrap_or(&global.skip_timeframes)
        .iter()
        .cloned()
        .collect();

    let mut timeframes = overlay_map(&global.timeframes, &symbol.timeframes);

    let mut sessions = symbol
        .sessions
        .as_ref()
        .unwrap_or(&global.sessions)
        .clone();
    if sessions.is_empty() {
        let mut ranges = BTreeMap::new();
        ranges.insert(DEFAULT_SESSION.to_string(), TimeRange::all_day());
        sessions.insert(
            DEFAULT_SESSION.to_string(),
            TradingSession {
                ranges,
                timeframes: BTreeMap::new(),
            },
        );
    }

    // timeframes only mentioned by a session are still produced
    for session in sessions.values() {
        for ident in session.timeframes.keys() {
            timeframes.entry(ident.clone()).or_default();
        }
    }

    for session in sessions.values_mut() {
        session.timeframes = overlay_map(&timeframes, &session.timeframes);
        session.timeframes.retain(|ident, _| !skip.contains(ident));
    }
    timeframes.retain(|ident, _| !skip.contains(ident));

    let resolved = ResampleSymbolConfig {
        round_decimals: symbol.round_decimals.unwrap_or(global.round_decimals),
        batch_size: symbol.batch_size.unwrap_or(global.batch_size),
        input_timeframe: symbol
            .input_timeframe
            .clone()
            .unwrap_or_else(|| global.input_timeframe.clone()),
        format: symbol.format.unwrap_or(global.format),
        timeframes,
        sessions,
        skip_timeframes: skip.into_iter().collect(),
    };
    validate(&resolved)?;

    debug!(
        timeframes = resolved.timeframes.len(),
        sessions = resolved.sessions.len(),
        "Resolved symbol configuration"
    );
    Ok(resolved)
}

fn validate(config: &ResampleSymbolConfig) -> Result<()> {
    if config.batch_size == 0 {
        return Err(Error::Config("batch_size must be positive".to_string()));
    }
    parse_timeframe(&config.input_timeframe)?;

    let maps = std::iter::once(&config.timeframes)
        .chain(config.sessions.values().map(|s| &s.timeframes));
    for map in maps {
        for (ident, hint) in map {
            parse_timeframe(ident)?;
            hint.origin_ms()?;
            match (&hint.ends_with, hint.offset) {
                (Some(_), Some(0)) => {
                    return Err(Error::Config(format!(
                        "timeframe {ident}: merge offset must not be 0"
                    )))
                }
                (Some(_), None) | (None, Some(_)) => {
                    return Err(Error::Config(format!(
                        "timeframe {ident}: ends_with and offset must be set together"
                    )))
                }
                _ => {}
            }
        }
    }
    config.schedule()?;
    Ok(())
}
