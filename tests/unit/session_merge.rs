//! Unit tests for session bucketing followed by merge rules

use crate::common::{stepped_bars, DAY, HOUR, MINUTE};
use bar_resampler::codec::PositionedBar;
use bar_resampler::config::ResampleConfig;
use bar_resampler::resample::{apply_merge_rules, candle_key, Bucketer};
use bar_resampler::Bar;

fn positioned(bars: Vec<Bar>) -> Vec<PositionedBar> {
    bars.into_iter()
        .enumerate()
        .map(|(i, bar)| PositionedBar {
            position: 8 + i as u64 * 64,
            bar,
        })
        .collect()
}

fn end_offset(bars: &[PositionedBar]) -> u64 {
    bars.last().map_or(8, |b| b.position + 64)
}

#[test]
fn test_overnight_tail_folds_into_evening_row() {
    let config = ResampleConfig::from_json(
        r#"{"default": {
            "input_timeframe": "1h",
            "timeframes": {"1d": {"ends_with": "_end", "offset": -1}},
            "sessions": {"fx": {"ranges": {
                "ny": {"from_time": "17:00:00", "to_time": "23:59:59"},
                "ny_end": {"from_time": "00:00:00", "to_time": "04:59:59"}
            }}}
        }}"#,
    )
    .unwrap()
    .symbol_config("EURUSD")
    .unwrap();

    // 17:00 on day one through 04:00 on day two
    let bars = positioned(stepped_bars(DAY + 17 * HOUR, HOUR, 12));
    let bucketer = Bucketer::new("1d", &config, HOUR).unwrap();
    let candles = bucketer.bucket(&bars, end_offset(&bars)).unwrap();
    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].key, "2024-01-01 17:00:00_ny");
    assert_eq!(candles[1].key, "2024-01-02 00:00:00_ny_end");

    let merged = apply_merge_rules(candles, &config.merge_rules("1d")).unwrap();
    assert_eq!(merged.len(), 1);
    let day = &merged[0];
    assert_eq!(day.key, "2024-01-01 17:00:00_ny");
    assert_eq!(day.bar, Bar::new(DAY + 17 * HOUR, 100.0, 111.5, 99.5, 111.25, 120.0));
    assert_eq!(day.first_offset, 8);
    assert_eq!(day.next_offset, end_offset(&bars));
}

#[test]
fn test_pre_open_folds_into_following_row() {
    let config = ResampleConfig::from_json(
        r#"{"default": {
            "timeframes": {"1d": {"ends_with": "_pre", "offset": 1}},
            "sessions": {"day": {"ranges": {
                "pre": {"from_time": "00:00:00", "to_time": "00:59:59"},
                "main": {"from_time": "01:00:00", "to_time": "23:59:59"}
            }}}
        }}"#,
    )
    .unwrap()
    .symbol_config("EURUSD")
    .unwrap();

    // two pre-open bars then three regular ones
    let bars = positioned(stepped_bars(DAY + 30 * MINUTE, 15 * MINUTE, 5));
    let bucketer = Bucketer::new("1d", &config, MINUTE).unwrap();
    let candles = bucketer.bucket(&bars, end_offset(&bars)).unwrap();
    assert_eq!(
        candles.iter().map(|c| c.key.as_str()).collect::<Vec<_>>(),
        vec!["2024-01-01 00:00:00_pre", "2024-01-01 01:00:00_main"]
    );

    let merged = apply_merge_rules(candles, &config.merge_rules("1d")).unwrap();
    assert_eq!(merged.len(), 1);
    // the anchor keeps its timestamp and close, the folded row gives the open
    assert_eq!(merged[0].bar, Bar::new(DAY + HOUR, 100.0, 104.5, 99.5, 104.25, 50.0));
    assert_eq!(merged[0].first_offset, 8);
}

#[test]
fn test_default_session_keys_have_no_suffix() {
    assert_eq!(candle_key(DAY, "default"), "2024-01-01 00:00:00");
    assert_eq!(candle_key(DAY + HOUR, "ny_end"), "2024-01-01 01:00:00_ny_end");
}

#[test]
fn test_orphaned_tail_is_an_error() {
    let config = ResampleConfig::from_json(
        r#"{"default": {
            "input_timeframe": "1h",
            "timeframes": {"1d": {"ends_with": "_end", "offset": -1}},
            "sessions": {"fx": {"ranges": {
                "ny": {"from_time": "17:00:00", "to_time": "23:59:59"},
                "ny_end": {"from_time": "00:00:00", "to_time": "04:59:59"}
            }}}
        }}"#,
    )
    .unwrap()
    .symbol_config("EURUSD")
    .unwrap();

    // only the after-midnight part: nothing to fold into
    let bars = positioned(stepped_bars(DAY, HOUR, 3));
    let candles = Bucketer::new("1d", &config, HOUR)
        .unwrap()
        .bucket(&bars, end_offset(&bars))
        .unwrap();
    assert!(apply_merge_rules(candles, &config.merge_rules("1d")).is_err());
}
