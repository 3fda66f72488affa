//! End-to-end tests of the command line

use crate::common::{stepped_bars, write_raw, DAY, MINUTE};
use assert_cmd::Command;
use bar_resampler::codec::StorageFormat;
use bar_resampler::layout::StorageLayout;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

fn bin(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("bar-resampler").unwrap();
    cmd.env("RUST_LOG", "off")
        .args(["--data-dir", data_dir.to_str().unwrap()]);
    cmd
}

fn json_stdout(cmd: &mut Command) -> Value {
    let output = cmd
        .args(["--output-format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).unwrap()
}

/// Raw EURUSD minutes plus a config producing 5m and 15m
fn seeded() -> TempDir {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    write_raw(&layout, "EURUSD", StorageFormat::Binary, &stepped_bars(DAY, MINUTE, 20));
    std::fs::write(
        dir.path().join("config.json"),
        r#"{"default": {"timeframes": {"5m": {}, "15m": {"source": "5m"}}}}"#,
    )
    .unwrap();
    dir
}

fn resample(dir: &TempDir) -> Value {
    let config = dir.path().join("config.json");
    json_stdout(bin(dir.path()).args([
        "resample",
        "--no-fsync",
        "--config",
        config.to_str().unwrap(),
    ]))
}

#[test]
fn test_resample_then_list_datasets() {
    let dir = seeded();
    let report = resample(&dir);
    assert_eq!(report[0]["symbol"], "EURUSD");
    assert_eq!(report[0]["status"], "ok");
    let timeframes: Vec<&str> = report[0]["timeframes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["timeframe"].as_str().unwrap())
        .collect();
    assert_eq!(timeframes, vec!["5m", "15m"]);

    let datasets = json_stdout(bin(dir.path()).arg("datasets"));
    let datasets = datasets.as_array().unwrap();
    assert_eq!(datasets.len(), 2);
    assert!(datasets.iter().all(|d| d["symbol"] == "EURUSD"));
    assert!(datasets.iter().all(|d| d["output_offset"].as_u64().unwrap() > 8));
}

#[test]
fn test_query_with_indicator() {
    let dir = seeded();
    resample(&dir);

    let rows = json_stdout(bin(dir.path()).args([
        "query",
        "EURUSD",
        "5m",
        "--after",
        "2024-01-01",
        "--limit",
        "2",
        "--order",
        "asc",
        "--indicator",
        "sma_2",
    ]));
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["timestamp"], DAY);
    assert_eq!(rows[0]["close"], 104.25);
    assert!(rows[0]["sma_2"].is_null());
    assert_eq!(rows[1]["sma_2"], 106.75);
}

#[test]
fn test_index_show_and_reset() {
    let dir = seeded();
    resample(&dir);

    let shown = json_stdout(bin(dir.path()).args(["index", "show", "EURUSD", "5m"]));
    assert!(shown["input_offset"].as_u64().unwrap() > 8);

    bin(dir.path())
        .args(["index", "reset", "EURUSD", "5m"])
        .assert()
        .success();
    let shown = json_stdout(bin(dir.path()).args(["index", "show", "EURUSD", "5m"]));
    assert_eq!(shown["input_offset"], 0);
    assert_eq!(shown["output_offset"], 0);

    // the next run rebuilds the dataset from scratch
    let report = resample(&dir);
    assert_eq!(report[0]["status"], "ok");
}

#[test]
fn test_failures_exit_nonzero() {
    let dir = seeded();
    // unknown dataset
    bin(dir.path())
        .args(["query", "EURUSD", "1h"])
        .assert()
        .failure();
    // symbol without raw input
    bin(dir.path())
        .args(["resample", "--no-fsync", "GBPUSD"])
        .assert()
        .failure();
    // malformed time
    bin(dir.path())
        .args(["query", "EURUSD", "5m", "--after", "yesterday"])
        .assert()
        .failure();
}
