//! Indicator calculators
//!
//! A request string is `name` or `name_arg1_arg2...`. The registry finds the
//! longest registered prefix and hands the remaining parts to
//! [`Indicator::position_args`]. Calculated columns are keyed by bar
//! timestamp so the query engine can join them back onto its rows.

use crate::{Bar, Error, Result};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Named numeric arguments of one indicator request
pub type IndicatorOptions = BTreeMap<String, f64>;

/// Values of one output column keyed by bar timestamp
pub type ColumnValues = BTreeMap<u64, f64>;

/// Static description of an indicator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorMeta {
    /// Positional argument names, in order
    pub args: Vec<&'static str>,
    /// Column suffixes; the empty suffix is the request label itself
    pub columns: Vec<&'static str>,
}

/// One output column of a calculation
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorColumn {
    /// Suffix appended to the request label, empty for the main column
    pub suffix: &'static str,
    /// Values; rows without enough history are absent
    pub values: ColumnValues,
}

/// Calculator over a chronological bar slice
pub trait Indicator: Send + Sync {
    /// Registry name
    fn name(&self) -> &'static str;

    /// Human readable description
    fn description(&self) -> &'static str;

    /// Arguments and columns
    fn meta(&self) -> IndicatorMeta;

    /// Turn positional request arguments into options
    fn position_args(&self, args: &[&str]) -> Result<IndicatorOptions> {
        let meta = self.meta();
        if args.len() > meta.args.len() {
            return Err(Error::InvalidQuery(format!(
                "{} takes at most {} arguments, got {}",
                self.name(),
                meta.args.len(),
                args.len()
            )));
        }
        let mut options = IndicatorOptions::new();
        for (name, raw) in meta.args.iter().zip(args) {
            let value: f64 = raw.parse().map_err(|_| {
                Error::InvalidQuery(format!("{}: argument {name} is not a number: {raw:?}", self.name()))
            })?;
            options.insert((*name).to_string(), value);
        }
        Ok(options)
    }

    /// Rows of history needed before the first valid value
    fn warmup_count(&self, options: &IndicatorOptions) -> usize;

    /// Compute every column over `bars`
    fn calculate(&self, bars: &[Bar], options: &IndicatorOptions) -> Result<Vec<IndicatorColumn>>;
}

fn period(name: &str, options: &IndicatorOptions) -> Result<usize> {
    let value = options.get("period").copied().unwrap_or(DEFAULT_PERIOD as f64);
    if value < 1.0 || value.fract() != 0.0 {
        return Err(Error::InvalidQuery(format!(
            "{name}: period must be a positive integer, got {value}"
        )));
    }
    Ok(value as usize)
}

const DEFAULT_PERIOD: usize = 20;

/// Simple moving average of closes
#[derive(Debug, Default)]
pub struct Sma;

impl Indicator for Sma {
    fn name(&self) -> &'static str {
        "sma"
    }

    fn description(&self) -> &'static str {
        "Simple moving average of close"
    }

    fn meta(&self) -> IndicatorMeta {
        IndicatorMeta {
            args: vec!["period"],
            columns: vec![""],
        }
    }

    fn warmup_count(&self, options: &IndicatorOptions) -> usize {
        period(self.name(), options).map_or(0, |p| p - 1)
    }

    fn calculate(&self, bars: &[Bar], options: &IndicatorOptions) -> Result<Vec<IndicatorColumn>> {
        let period = period(self.name(), options)?;
        let mut values = ColumnValues::new();
        let mut sum = 0.0;
        for (i, bar) in bars.iter().enumerate() {
            sum += bar.close;
            if i >= period {
                sum -= bars[i - period].close;
            }
            if i + 1 >= period {
                values.insert(bar.timestamp, sum / period as f64);
            }
        }
        Ok(vec![IndicatorColumn { suffix: "", values }])
    }
}

/// Z-score of close over a rolling window, plus its direction.
///
/// The direction is `1.0` when the z-score rose since the previous row and
/// `-1.0` otherwise; an unchanged z-score counts as down.
#[derive(Debug, Default)]
pub struct ZScore;

impl Indicator for ZScore {
    fn name(&self) -> &'static str {
        "zscore"
    }

    fn description(&self) -> &'static str {
        "Rolling z-score of close with direction"
    }

    fn meta(&self) -> IndicatorMeta {
        IndicatorMeta {
            args: vec!["period"],
            columns: vec!["", "direction"],
        }
    }

    fn warmup_count(&self, options: &IndicatorOptions) -> usize {
        period(self.name(), options).unwrap_or(1)
    }

    fn calculate(&self, bars: &[Bar], options: &IndicatorOptions) -> Result<Vec<IndicatorColumn>> {
        let period = period(self.name(), options)?;
        let mut scores = ColumnValues::new();
        let mut direction = ColumnValues::new();
        let mut previous: Option<f64> = None;

        for end in period..=bars.len() {
            let window = &bars[end - period..end];
            let mean = window.iter().map(|b| b.close).sum::<f64>() / period as f64;
            let variance = window
                .iter()
                .map(|b| (b.close - mean).powi(2))
                .sum::<f64>()
                / period as f64;
            let std = variance.sqrt();
            let last = &bars[end - 1];
            let z = if std > 0.0 { (last.close - mean) / std } else { 0.0 };

            scores.insert(last.timestamp, z);
            if let Some(prev) = previous {
                direction.insert(last.timestamp, if z > prev { 1.0 } else { -1.0 });
            }
            previous = Some(z);
        }

        Ok(vec![
            IndicatorColumn {
                suffix: "",
                values: scores,
            },
            IndicatorColumn {
                suffix: "direction",
                values: direction,
            },
        ])
    }
}

/// Parsed indicator request
#[derive(Clone)]
pub struct IndicatorRequest {
    /// Request string as given, used as the column label
    pub label: String,
    /// Calculator
    pub indicator: Arc<dyn Indicator>,
    /// Options from the positional arguments
    pub options: IndicatorOptions,
}

impl std::fmt::Debug for IndicatorRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndicatorRequest")
            .field("label", &self.label)
            .field("indicator", &self.indicator.name())
            .field("options", &self.options)
            .finish()
    }
}

impl IndicatorRequest {
    /// Warmup rows of this request
    pub fn warmup_count(&self) -> usize {
        self.indicator.warmup_count(&self.options)
    }

    fn column_name(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            self.label.clone()
        } else {
            format!("{}_{suffix}", self.label)
        }
    }
}

/// Static table of calculators
#[derive(Clone, Default)]
pub struct IndicatorRegistry {
    indicators: BTreeMap<&'static str, Arc<dyn Indicator>>,
}

impl IndicatorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `sma` and `zscore`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Sma));
        registry.register(Arc::new(ZScore));
        registry
    }

    /// Add or replace a calculator
    pub fn register(&mut self, indicator: Arc<dyn Indicator>) {
        self.indicators.insert(indicator.name(), indicator);
    }

    /// Calculator by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Indicator>> {
        self.indicators.get(name).cloned()
    }

    /// Registered names with descriptions
    pub fn describe(&self) -> Vec<(&'static str, &'static str)> {
        self.indicators
            .values()
            .map(|i| (i.name(), i.description()))
            .collect()
    }

    /// Parse `name[_arg...]`
    pub fn parse(&self, request: &str) -> Result<IndicatorRequest> {
        let parts: Vec<&str> = request.split('_').collect();
        for split in (1..=parts.len()).rev() {
            let name = parts[..split].join("_");
            if let Some(indicator) = self.get(&name) {
                let options = indicator.position_args(&parts[split..])?;
                return Ok(IndicatorRequest {
                    label: request.to_string(),
                    indicator,
                    options,
                });
            }
        }
        Err(Error::InvalidQuery(format!("unknown indicator {request:?}")))
    }

    /// Parse every request string
    pub fn parse_all(&self, requests: &[String]) -> Result<Vec<IndicatorRequest>> {
        requests.iter().map(|r| self.parse(r)).collect()
    }

    /// Run every request over `bars` in parallel; returns named columns
    pub fn dispatch(
        &self,
        requests: &[IndicatorRequest],
        bars: &[Bar],
    ) -> Result<Vec<(String, ColumnValues)>> {
        let per_request: Vec<Vec<(String, ColumnValues)>> = requests
            .par_iter()
            .map(|request| -> Result<Vec<(String, ColumnValues)>> {
                let columns = request.indicator.calculate(bars, &request.options)?;
                Ok(columns
                    .into_iter()
                    .map(|c| (request.column_name(c.suffix), c.values))
                    .collect())
            })
            .collect::<Result<_>>()?;
        Ok(per_request.into_iter().flatten().collect())
    }
}
