//! Timeframe identifiers and bucket alignment
//!
//! Identifiers are `<count><unit>` strings such as `1m`, `15m`, `4h`, `1d` or
//! `1W`. Units: `s` seconds, `m` minutes, `h` hours, `d` days, `W` weeks.
//! Weekly buckets start on Monday 00:00 UTC.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Milliseconds in one second
pub const SECOND_MS: u64 = 1_000;
/// Milliseconds in one minute
pub const MINUTE_MS: u64 = 60 * SECOND_MS;
/// Milliseconds in one hour
pub const HOUR_MS: u64 = 60 * MINUTE_MS;
/// Milliseconds in one day
pub const DAY_MS: u64 = 24 * HOUR_MS;
/// Milliseconds in one week
pub const WEEK_MS: u64 = 7 * DAY_MS;

/// 1970-01-01 was a Thursday; the first Monday is four days later.
const EPOCH_TO_MONDAY_MS: u64 = 4 * DAY_MS;

/// Unit part of a timeframe identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    /// Seconds
    Second,
    /// Minutes
    Minute,
    /// Hours
    Hour,
    /// Days
    Day,
    /// Weeks (Monday aligned)
    Week,
}

impl TimeUnit {
    fn millis(&self) -> u64 {
        match self {
            TimeUnit::Second => SECOND_MS,
            TimeUnit::Minute => MINUTE_MS,
            TimeUnit::Hour => HOUR_MS,
            TimeUnit::Day => DAY_MS,
            TimeUnit::Week => WEEK_MS,
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            TimeUnit::Second => "s",
            TimeUnit::Minute => "m",
            TimeUnit::Hour => "h",
            TimeUnit::Day => "d",
            TimeUnit::Week => "W",
        }
    }
}

/// Fixed-duration bucket size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeframe {
    count: u32,
    unit: TimeUnit,
}

impl Timeframe {
    /// Create a timeframe from its parts
    pub fn new(count: u32, unit: TimeUnit) -> Result<Self, String> {
        if count == 0 {
            return Err("Timeframe count must be positive".to_string());
        }
        Ok(Self { count, unit })
    }

    /// Number of units
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Unit
    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Bucket duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.count as u64 * self.unit.millis()
    }

    /// Start of the bucket containing `timestamp_ms`.
    ///
    /// `origin_ms` shifts the bucket grid by a time-of-day offset so that
    /// e.g. 4h buckets can start at 01:00 instead of midnight.
    pub fn bucket_start(&self, timestamp_ms: u64, origin_ms: u64) -> u64 {
        let anchor = match self.unit {
            TimeUnit::Week => EPOCH_TO_MONDAY_MS + origin_ms,
            _ => origin_ms,
        } as i128;
        let duration = self.duration_ms() as i128;
        let ts = timestamp_ms as i128;
        let start = anchor + (ts - anchor).div_euclid(duration) * duration;
        start.max(0) as u64
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.count, self.unit.suffix())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("Invalid timeframe: {s}"))?;
        let (digits, unit) = s.split_at(split);
        let count: u32 = digits
            .parse()
            .map_err(|_| format!("Invalid timeframe: {s}"))?;
        let unit = match unit {
            "s" => TimeUnit::Second,
            "m" | "min" => TimeUnit::Minute,
            "h" => TimeUnit::Hour,
            "d" | "D" => TimeUnit::Day,
            "W" | "w" => TimeUnit::Week,
            _ => return Err(format!("Invalid timeframe unit in {s}")),
        };
        Timeframe::new(count, unit)
    }
}
