//! Integration tests for warmup-aware queries

use crate::common::{stepped_bars, write_dataset, DAY, MINUTE};
use bar_resampler::codec::StorageFormat;
use bar_resampler::layout::StorageLayout;
use bar_resampler::query::{Modifier, QueryEngine, QueryRequest, SortOrder};
use bar_resampler::registry::SharedRegistry;
use bar_resampler::Error;
use std::sync::Arc;
use tempfile::TempDir;

/// 200 one-minute rows for EURUSD in `format`
fn engine_with_rows(format: StorageFormat) -> (TempDir, QueryEngine) {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    write_dataset(&layout, format, "1m", "EURUSD", &stepped_bars(DAY, MINUTE, 200));
    let registry = Arc::new(SharedRegistry::open(dir.path()).unwrap());
    (dir, QueryEngine::new(registry))
}

fn minute(i: u64) -> u64 {
    DAY + i * MINUTE
}

#[test]
fn test_window_with_warmup_indicator() {
    let (_dir, engine) = engine_with_rows(StorageFormat::Binary);
    let request = QueryRequest::new("EURUSD", "1m", minute(120), minute(170))
        .with_limit(100)
        .with_indicators(["sma_51"]);

    let rows = engine.get_data(&request).unwrap();
    assert_eq!(rows.len(), 50);
    // newest first by default
    assert_eq!(rows[0].bar.timestamp, minute(169));
    assert_eq!(rows[49].bar.timestamp, minute(120));

    // the oldest returned row already has a full window of history
    let sma = rows[49].indicators["sma_51"].unwrap();
    assert!((sma - 195.25).abs() < 1e-9);
}

#[test]
fn test_limit_keeps_requested_end() {
    let (_dir, engine) = engine_with_rows(StorageFormat::Binary);

    let desc = engine
        .get_data(&QueryRequest::new("EURUSD", "1m", 0, u64::MAX).with_limit(10))
        .unwrap();
    let stamps: Vec<u64> = desc.iter().map(|r| r.bar.timestamp).collect();
    assert_eq!(stamps.first(), Some(&minute(199)));
    assert_eq!(stamps.last(), Some(&minute(190)));

    let asc = engine
        .get_data(
            &QueryRequest::new("EURUSD", "1m", 0, u64::MAX)
                .with_limit(10)
                .with_order(SortOrder::Asc),
        )
        .unwrap();
    assert_eq!(asc.len(), 10);
    assert_eq!(asc[0].bar.timestamp, minute(0));
    assert_eq!(asc[9].bar.timestamp, minute(9));
}

#[test]
fn test_skiplast_drops_only_the_final_row() {
    let (_dir, engine) = engine_with_rows(StorageFormat::Binary);
    let all = QueryRequest::new("EURUSD", "1m", 0, u64::MAX).with_order(SortOrder::Asc);

    let rows = engine
        .get_data(&all.clone().with_modifier(Modifier::SkipLast))
        .unwrap();
    assert_eq!(rows.len(), 199);
    assert_eq!(rows.last().unwrap().bar.timestamp, minute(198));

    // a window ending before the last row is unaffected
    let inner = QueryRequest::new("EURUSD", "1m", minute(10), minute(20))
        .with_modifier(Modifier::SkipLast);
    assert_eq!(engine.get_data(&inner).unwrap().len(), 10);
    assert_eq!(engine.get_data(&all).unwrap().len(), 200);
}

#[test]
fn test_text_dataset_matches_binary() {
    let (_bin_dir, binary) = engine_with_rows(StorageFormat::Binary);
    let (_csv_dir, text) = engine_with_rows(StorageFormat::Text);
    let request = QueryRequest::new("EURUSD", "1m", minute(50), minute(80))
        .with_indicators(["zscore_10", "sma_5"]);

    let from_binary = binary.get_data(&request).unwrap();
    let from_text = text.get_data(&request).unwrap();
    assert_eq!(from_binary.len(), 30);
    assert_eq!(from_binary, from_text);
    assert!(from_binary[0].indicators.contains_key("zscore_10_direction"));
}

#[test]
fn test_missing_dataset_is_not_found() {
    let (_dir, engine) = engine_with_rows(StorageFormat::Binary);
    let err = engine
        .get_data(&QueryRequest::new("GBPUSD", "1m", 0, u64::MAX))
        .unwrap_err();
    assert!(err.is_not_found());

    let err = engine
        .get_data(&QueryRequest::new("EURUSD", "5m", 0, u64::MAX))
        .unwrap_err();
    assert!(matches!(err, Error::DataNotFound { .. }));
}

#[test]
fn test_unknown_indicator_is_rejected() {
    let (_dir, engine) = engine_with_rows(StorageFormat::Binary);
    let request = QueryRequest::new("EURUSD", "1m", 0, u64::MAX).with_indicators(["macd"]);
    assert!(matches!(
        engine.get_data(&request).unwrap_err(),
        Error::InvalidQuery(_)
    ));
}

#[test]
fn test_empty_window() {
    let (_dir, engine) = engine_with_rows(StorageFormat::Binary);
    let rows = engine
        .get_data(&QueryRequest::new("EURUSD", "1m", minute(500), minute(600)))
        .unwrap();
    assert!(rows.is_empty());
}
