//! Integration tests for resampling engines and the pipeline

use crate::common::{append_bars, read_bars, stepped_bars, write_raw, DAY, HOUR, MINUTE};
use bar_resampler::codec::StorageFormat;
use bar_resampler::config::ResampleConfig;
use bar_resampler::index::{CheckpointIndex, Offsets};
use bar_resampler::layout::StorageLayout;
use bar_resampler::resample::{EngineJob, ResampleEngine, ResamplePipeline};
use bar_resampler::shutdown::ShutdownCoordinator;
use bar_resampler::{Bar, Error};
use tempfile::TempDir;

fn config(json: &str) -> ResampleConfig {
    ResampleConfig::from_json(json).unwrap()
}

fn pipeline(layout: &StorageLayout, json: &str) -> ResamplePipeline {
    ResamplePipeline::new(layout.clone(), config(json)).with_fsync(false)
}

#[test]
fn test_three_minutes_into_one_candle() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("raw.bin");
    append_bars(
        &raw,
        StorageFormat::Binary,
        &[
            Bar::new(DAY, 1.0, 1.5, 0.9, 1.2, 10.0),
            Bar::new(DAY + MINUTE, 1.2, 2.0, 1.1, 1.8, 20.0),
            Bar::new(DAY + 2 * MINUTE, 1.8, 1.9, 0.5, 1.4, 30.0),
        ],
    );

    let symbol_config = ResampleConfig::default().symbol_config("EURUSD").unwrap();
    let job = EngineJob {
        symbol: "EURUSD".to_string(),
        timeframe: "3m".to_string(),
        input_path: raw.clone(),
        input_duration_ms: MINUTE,
        output_path: dir.path().join("3m.bin"),
        index_path: dir.path().join("3m.idx"),
    };
    let summary = ResampleEngine::new(job, &symbol_config)
        .unwrap()
        .with_fsync(false)
        .run()
        .unwrap();

    assert_eq!(summary.candles_committed, 1);
    let bars = read_bars(&dir.path().join("3m.bin"));
    assert_eq!(bars, vec![Bar::new(DAY, 1.0, 2.0, 0.5, 1.4, 60.0)]);

    // checkpoint is past all three input bars
    let offsets = CheckpointIndex::new(dir.path().join("3m.idx"))
        .read()
        .unwrap()
        .offsets();
    assert_eq!(offsets, Offsets::new(8 + 3 * 64, 8 + 64));
    assert_eq!(std::fs::metadata(&raw).unwrap().len(), offsets.input_offset);
}

#[test]
fn test_rerun_over_frozen_input_is_byte_identical() {
    let json = r#"{"default": {"timeframes": {"5m": {}, "15m": {"source": "5m"}, "1h": {}}}}"#;
    let bars = stepped_bars(DAY, MINUTE, 97);

    let once = TempDir::new().unwrap();
    let once_layout = StorageLayout::new(once.path());
    write_raw(&once_layout, "EURUSD", StorageFormat::Binary, &bars);
    pipeline(&once_layout, json).run_symbol("EURUSD").unwrap();

    let twice = TempDir::new().unwrap();
    let twice_layout = StorageLayout::new(twice.path());
    write_raw(&twice_layout, "EURUSD", StorageFormat::Binary, &bars);
    pipeline(&twice_layout, json).run_symbol("EURUSD").unwrap();
    pipeline(&twice_layout, json).run_symbol("EURUSD").unwrap();

    for tf in ["5m", "15m", "1h"] {
        let data = |layout: &StorageLayout| {
            std::fs::read(layout.dataset_path(StorageFormat::Binary, tf, "EURUSD")).unwrap()
        };
        let index = |layout: &StorageLayout| {
            std::fs::read(layout.index_path(StorageFormat::Binary, tf, "EURUSD")).unwrap()
        };
        assert_eq!(data(&once_layout), data(&twice_layout), "{tf} data differs");
        assert_eq!(index(&once_layout), index(&twice_layout), "{tf} index differs");
    }
}

#[test]
fn test_incremental_runs_match_single_run() {
    let json = r#"{"default": {"timeframes": {"5m": {}, "1h": {}}}}"#;
    let bars = stepped_bars(DAY, MINUTE, 130);

    let whole = TempDir::new().unwrap();
    let whole_layout = StorageLayout::new(whole.path());
    write_raw(&whole_layout, "EURUSD", StorageFormat::Binary, &bars);
    pipeline(&whole_layout, json).run_symbol("EURUSD").unwrap();

    let parts = TempDir::new().unwrap();
    let parts_layout = StorageLayout::new(parts.path());
    for chunk in [&bars[..7], &bars[7..64], &bars[64..]] {
        write_raw(&parts_layout, "EURUSD", StorageFormat::Binary, chunk);
        pipeline(&parts_layout, json).run_symbol("EURUSD").unwrap();
    }

    for tf in ["5m", "1h"] {
        let whole_bars = read_bars(&whole_layout.dataset_path(StorageFormat::Binary, tf, "EURUSD"));
        let part_bars = read_bars(&parts_layout.dataset_path(StorageFormat::Binary, tf, "EURUSD"));
        assert_eq!(whole_bars, part_bars, "{tf} differs");
    }
    // 130 minutes: 26 five-minute candles, the 02:00 hour still forming
    let hourly = read_bars(&whole_layout.dataset_path(StorageFormat::Binary, "1h", "EURUSD"));
    assert_eq!(hourly.len(), 3);
    assert_eq!(hourly[2].timestamp, DAY + 2 * HOUR);
    assert_eq!(hourly[2].volume, 100.0);
}

#[test]
fn test_bytes_past_committed_offset_are_rebuilt() {
    let json = r#"{"default": {"timeframes": {"5m": {}, "15m": {"source": "5m"}}}}"#;
    let bars = stepped_bars(DAY, MINUTE, 97);

    let clean = TempDir::new().unwrap();
    let clean_layout = StorageLayout::new(clean.path());
    write_raw(&clean_layout, "EURUSD", StorageFormat::Binary, &bars);
    pipeline(&clean_layout, json).run_symbol("EURUSD").unwrap();

    let crashed = TempDir::new().unwrap();
    let layout = StorageLayout::new(crashed.path());
    write_raw(&layout, "EURUSD", StorageFormat::Binary, &bars[..52]);
    pipeline(&layout, json).run_symbol("EURUSD").unwrap();

    // a crash after the data write leaves rows and a torn record past the index
    for tf in ["5m", "15m"] {
        let path = layout.dataset_path(StorageFormat::Binary, tf, "EURUSD");
        append_bars(&path, StorageFormat::Binary, &stepped_bars(DAY, MINUTE, 3));
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        std::io::Write::write_all(&mut file, &[0xAB; 10]).unwrap();
    }

    write_raw(&layout, "EURUSD", StorageFormat::Binary, &bars[52..]);
    pipeline(&layout, json).run_symbol("EURUSD").unwrap();

    for tf in ["5m", "15m"] {
        let data = |layout: &StorageLayout| {
            std::fs::read(layout.dataset_path(StorageFormat::Binary, tf, "EURUSD")).unwrap()
        };
        assert_eq!(data(&clean_layout), data(&layout), "{tf} data differs");

        let rows = read_bars(&layout.dataset_path(StorageFormat::Binary, tf, "EURUSD"));
        assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp), "{tf} has duplicates");
    }
}

#[test]
fn test_unanchored_pre_row_is_withheld() {
    let json = r#"{
        "default": {
            "input_timeframe": "1h",
            "timeframes": {"1d": {}},
            "sessions": {
                "fx": {
                    "ranges": {
                        "pre": {"from_time": "00:00:00", "to_time": "00:59:59"},
                        "main": {"from_time": "01:00:00", "to_time": "23:59:59"}
                    },
                    "timeframes": {"1d": {"ends_with": "_pre", "offset": 1}}
                }
            }
        }
    }"#;
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    let daily_path = layout.dataset_path(StorageFormat::Binary, "1d", "EURUSD");
    let index = CheckpointIndex::new(layout.index_path(StorageFormat::Binary, "1d", "EURUSD"));

    write_raw(&layout, "EURUSD", StorageFormat::Binary, &stepped_bars(DAY, HOUR, 1));
    pipeline(&layout, json).run_symbol("EURUSD").unwrap();
    // the pre-open row has no anchor yet, so nothing readable is written
    assert!(read_bars(&daily_path).is_empty());
    assert_eq!(index.read().unwrap().offsets(), Offsets::new(8, 8));

    write_raw(&layout, "EURUSD", StorageFormat::Binary, &stepped_bars(DAY + HOUR, HOUR, 3));
    pipeline(&layout, json).run_symbol("EURUSD").unwrap();
    assert_eq!(
        read_bars(&daily_path),
        vec![Bar::new(DAY + HOUR, 100.0, 102.5, 99.5, 102.25, 40.0)]
    );
    assert_eq!(index.read().unwrap().offsets(), Offsets::new(8, 8));
}

#[test]
fn test_text_datasets_carry_source_offsets() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    write_raw(&layout, "EURUSD", StorageFormat::Text, &stepped_bars(DAY, MINUTE, 10));
    let json = r#"{"default": {"format": "text", "timeframes": {"5m": {}}}}"#;
    let summary = pipeline(&layout, json).run_symbol("EURUSD").unwrap();
    assert_eq!(summary.candles_committed(), 2);

    let path = layout.dataset_path(StorageFormat::Text, "5m", "EURUSD");
    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines[0], "timestamp,open,high,low,close,volume,offset");
    assert_eq!(lines.len(), 3);

    let bars = read_bars(&path);
    assert_eq!(bars[0].timestamp, DAY);
    assert_eq!(bars[1].timestamp, DAY + 5 * MINUTE);
    assert_eq!(bars[1].open, 105.0);
    assert_eq!(bars[1].volume, 50.0);
}

#[test]
fn test_overnight_tail_folds_into_session_row() {
    let json = r#"{
        "default": {
            "input_timeframe": "1h",
            "timeframes": {"1d": {}},
            "sessions": {
                "fx": {
                    "ranges": {
                        "A": {"from_time": "00:00:00", "to_time": "11:59:59"},
                        "A_end": {"from_time": "12:00:00", "to_time": "23:59:59"}
                    },
                    "timeframes": {"1d": {"ends_with": "_end", "offset": -1}}
                }
            }
        }
    }"#;
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    // two full days plus the first hour of a third
    let bars = stepped_bars(DAY, HOUR, 49);
    write_raw(&layout, "EURUSD", StorageFormat::Binary, &bars);

    let summary = pipeline(&layout, json).run_symbol("EURUSD").unwrap();
    // day two stays provisional until day three's tail can no longer change it
    assert_eq!(summary.candles_committed(), 1);

    let daily = read_bars(&layout.dataset_path(StorageFormat::Binary, "1d", "EURUSD"));
    assert_eq!(daily.len(), 3);
    let first = daily[0];
    assert_eq!(first.timestamp, DAY);
    assert_eq!(first.open, 100.0);
    assert_eq!(first.high, 123.5);
    assert_eq!(first.low, 99.5);
    assert_eq!(first.close, 123.25);
    assert_eq!(first.volume, 240.0);
    assert_eq!(daily[1].timestamp, DAY + 24 * HOUR);
    assert_eq!(daily[1].volume, 240.0);
    assert_eq!(daily[2].timestamp, DAY + 48 * HOUR);
}

#[test]
fn test_shutdown_before_run_commits_nothing() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    write_raw(&layout, "EURUSD", StorageFormat::Binary, &stepped_bars(DAY, MINUTE, 10));
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let summary = pipeline(&layout, r#"{"default": {"timeframes": {"5m": {}}}}"#)
        .with_shutdown(shutdown)
        .run_symbol("EURUSD")
        .unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.candles_committed(), 0);
}

#[test]
fn test_out_of_order_input_halts() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    let mut bars = stepped_bars(DAY, MINUTE, 5);
    bars.swap(2, 3);
    write_raw(&layout, "EURUSD", StorageFormat::Binary, &bars);

    let err = pipeline(&layout, r#"{"default": {"timeframes": {"5m": {}}}}"#)
        .run_symbol("EURUSD")
        .unwrap_err();
    assert!(matches!(err, Error::Processing(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_bar_outside_sessions_is_batch_error() {
    let json = r#"{
        "default": {
            "timeframes": {"1h": {}},
            "sessions": {
                "ny": {"ranges": {"ny": {"from_time": "14:30:00", "to_time": "20:59:59"}}}
            }
        }
    }"#;
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    write_raw(&layout, "SPY", StorageFormat::Binary, &stepped_bars(DAY, MINUTE, 3));

    let err = pipeline(&layout, json).run_symbol("SPY").unwrap_err();
    assert!(matches!(err, Error::Batch(_)));
}
