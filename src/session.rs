//! Trading session resolution
//!
//! Sessions are made of named time-of-day ranges in UTC. A range whose end is
//! before its start wraps past midnight. Range ends are inclusive to the
//! second, so `00:00:00`-`23:59:59` covers the whole day.

use crate::config::TradingSession;
use crate::error::BatchError;
use crate::timeframe::{DAY_MS, SECOND_MS};
use crate::{Error, Result};
use chrono::{NaiveTime, Timelike};
use std::collections::BTreeMap;

/// Parse `HH:MM:SS` into milliseconds after midnight
pub fn parse_time_of_day(value: &str) -> Result<u64> {
    let time = NaiveTime::parse_from_str(value.trim(), "%H:%M:%S")
        .map_err(|e| Error::Config(format!("invalid time of day {value:?}: {e}")))?;
    Ok(time.num_seconds_from_midnight() as u64 * SECOND_MS)
}

#[derive(Debug, Clone)]
struct ScheduledRange {
    session: String,
    range: String,
    from_ms: u64,
    /// exclusive end
    until_ms: u64,
}

impl ScheduledRange {
    fn wraps(&self) -> bool {
        self.until_ms <= self.from_ms
    }

    fn window(&self, timestamp: u64) -> Option<SessionWindow> {
        let tod = timestamp % DAY_MS;
        let day = timestamp - tod;
        let (open_ms, close_ms) = if !self.wraps() {
            if tod < self.from_ms || tod >= self.until_ms {
                return None;
            }
            (day + self.from_ms, day + self.until_ms)
        } else if tod >= self.from_ms {
            (day + self.from_ms, day + DAY_MS + self.until_ms)
        } else if tod < self.until_ms {
            ((day + self.from_ms).saturating_sub(DAY_MS), day + self.until_ms)
        } else {
            return None;
        };
        Some(SessionWindow {
            session: self.session.clone(),
            range: self.range.clone(),
            open_ms,
            close_ms,
        })
    }
}

/// Occurrence of a session range that contains a bar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionWindow {
    /// Session name
    pub session: String,
    /// Range name
    pub range: String,
    /// Start of this occurrence
    pub open_ms: u64,
    /// Exclusive end of this occurrence
    pub close_ms: u64,
}

/// Resolves bar timestamps to session ranges
#[derive(Debug, Clone)]
pub struct SessionSchedule {
    ranges: Vec<ScheduledRange>,
}

impl SessionSchedule {
    /// Build a schedule from resolved sessions.
    ///
    /// When ranges overlap the first one in session/range name order wins.
    pub fn new(sessions: &BTreeMap<String, TradingSession>) -> Result<Self> {
        let mut ranges = Vec::new();
        for (session, def) in sessions {
            for (range, times) in &def.ranges {
                let from_ms = parse_time_of_day(&times.from_time)?;
                let until_ms = parse_time_of_day(&times.to_time)? + SECOND_MS;
                ranges.push(ScheduledRange {
                    session: session.clone(),
                    range: range.clone(),
                    from_ms,
                    until_ms,
                });
            }
        }
        if ranges.is_empty() {
            return Err(Error::Config("no session ranges configured".to_string()));
        }
        Ok(Self { ranges })
    }

    /// Window containing `timestamp`
    pub fn resolve(&self, timestamp: u64) -> Result<SessionWindow> {
        self.ranges
            .iter()
            .find_map(|r| r.window(timestamp))
            .ok_or_else(|| {
                BatchError::SessionResolution {
                    timestamp,
                    reason: "outside every configured session range".to_string(),
                }
                .into()
            })
    }
}
