//! Grouping bars into timeframe buckets

use crate::codec::PositionedBar;
use crate::config::{ResampleSymbolConfig, DEFAULT_SESSION};
use crate::error::ProcessingError;
use crate::session::SessionSchedule;
use crate::timeframe::DAY_MS;
use crate::{round_decimals, Bar, Result, Timeframe};
use chrono::DateTime;
use std::collections::HashMap;

/// Aggregated bucket
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    /// `YYYY-MM-DD HH:MM:SS[_range]`, used by merge rules
    pub key: String,
    /// Session that produced the candle
    pub session: String,
    /// Session range that produced the candle
    pub range: String,
    /// Aggregated bar
    pub bar: Bar,
    /// Exclusive end of the bucket
    pub end_ms: u64,
    /// Input position of the first bar in the bucket
    pub first_offset: u64,
    /// Input position right after the last bar in the bucket
    pub next_offset: u64,
    /// Whether no further input can land in this bucket
    pub closed: bool,
}

/// Format a candle key
pub fn candle_key(timestamp: u64, range: &str) -> String {
    let stamp = DateTime::from_timestamp_millis(timestamp as i64)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string());
    if range == DEFAULT_SESSION {
        stamp
    } else {
        format!("{stamp}_{range}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BucketId {
    start: u64,
    /// open of the session range occurrence, 0 for multi-day timeframes
    occurrence: u64,
    session: String,
    range: String,
}

/// Buckets bars of one symbol into one target timeframe
#[derive(Debug, Clone)]
pub struct Bucketer {
    timeframe: Timeframe,
    schedule: SessionSchedule,
    /// origin per session; sessions without the timeframe are absent
    origins: HashMap<String, u64>,
    input_duration_ms: u64,
    round_decimals: u32,
}

impl Bucketer {
    /// Prepare bucketing of `ident` for a resolved symbol configuration
    pub fn new(
        ident: &str,
        config: &ResampleSymbolConfig,
        input_duration_ms: u64,
    ) -> Result<Self> {
        let timeframe: Timeframe = ident.parse().map_err(crate::Error::Config)?;
        let mut origins = HashMap::new();
        for session in config.sessions.keys() {
            if let Some(hint) = config.hint(session, ident) {
                origins.insert(session.clone(), hint.origin_ms()?);
            }
        }
        Ok(Self {
            timeframe,
            schedule: config.schedule()?,
            origins,
            input_duration_ms,
            round_decimals: config.round_decimals,
        })
    }

    /// Target timeframe
    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Group `bars` (strictly increasing timestamps) into candles.
    ///
    /// `end_offset` is the input position right after the last bar. Intraday
    /// buckets follow each other, so every candle but the last is closed.
    /// Multi-day buckets hold one candle per session range, all of which stay
    /// open until a bar of a later bucket arrives. An open candle is closed
    /// once the final input bar reaches its bucket end.
    pub fn bucket(&self, bars: &[PositionedBar], end_offset: u64) -> Result<Vec<Candle>> {
        let mut candles: Vec<Candle> = Vec::new();
        let mut ids: Vec<BucketId> = Vec::new();
        let mut last_ts: Option<u64> = None;
        let duration = self.timeframe.duration_ms();
        let intraday = duration <= DAY_MS;

        for (i, positioned) in bars.iter().enumerate() {
            let bar = &positioned.bar;
            if let Some(prev) = last_ts {
                if bar.timestamp <= prev {
                    return Err(ProcessingError::ResampleLogic(format!(
                        "bar at {} does not follow {} (input offset {})",
                        bar.timestamp, prev, positioned.position
                    ))
                    .into());
                }
            }
            last_ts = Some(bar.timestamp);

            let next_offset = bars.get(i + 1).map_or(end_offset, |b| b.position);
            let window = self.schedule.resolve(bar.timestamp)?;
            let Some(origin) = self.origins.get(&window.session) else {
                continue;
            };

            let start = self.timeframe.bucket_start(bar.timestamp, *origin);
            let id = BucketId {
                start,
                occurrence: if intraday { window.open_ms } else { 0 },
                session: window.session.clone(),
                range: window.range.clone(),
            };

            let open = if intraday {
                ids.last().filter(|last| **last == id).map(|_| ids.len() - 1)
            } else {
                ids.iter().rposition(|other| *other == id)
            };
            if let Some(idx) = open {
                let candle = &mut candles[idx];
                candle.bar.absorb(bar);
                candle.next_offset = next_offset;
                continue;
            }

            for (candle, other) in candles.iter_mut().zip(&ids) {
                if intraday || other.start != start {
                    candle.closed = true;
                }
            }
            let timestamp = start.max(window.open_ms);
            let mut end_ms = start + duration;
            if intraday {
                end_ms = end_ms.min(window.close_ms);
            }
            candles.push(Candle {
                key: candle_key(timestamp, &window.range),
                session: window.session.clone(),
                range: window.range.clone(),
                bar: Bar { timestamp, ..*bar },
                end_ms,
                first_offset: positioned.position,
                next_offset,
                closed: false,
            });
            ids.push(id);
        }

        if let Some(ts) = last_ts {
            for candle in candles.iter_mut().filter(|c| !c.closed) {
                if ts + self.input_duration_ms >= candle.end_ms {
                    candle.closed = true;
                }
            }
        }

        for candle in &mut candles {
            let b = &mut candle.bar;
            b.open = round_decimals(b.open, self.round_decimals);
            b.high = round_decimals(b.high, self.round_decimals);
            b.low = round_decimals(b.low, self.round_decimals);
            b.close = round_decimals(b.close, self.round_decimals);
        }

        Ok(candles)
    }
}
