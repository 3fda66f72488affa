//! Integration tests for dataset discovery after resampling

use crate::common::{stepped_bars, write_raw, DAY, MINUTE};
use bar_resampler::codec::StorageFormat;
use bar_resampler::config::ResampleConfig;
use bar_resampler::layout::StorageLayout;
use bar_resampler::registry::{DatasetRegistry, SharedRegistry};
use bar_resampler::resample::ResamplePipeline;
use tempfile::TempDir;

#[test]
fn test_pipeline_output_is_discovered() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    write_raw(&layout, "EURUSD", StorageFormat::Binary, &stepped_bars(DAY, MINUTE, 20));
    write_raw(&layout, "GBPUSD", StorageFormat::Binary, &stepped_bars(DAY, MINUTE, 20));

    let config =
        ResampleConfig::from_json(r#"{"default": {"timeframes": {"5m": {}, "15m": {}}}}"#).unwrap();
    let pipeline = ResamplePipeline::new(layout.clone(), config).with_fsync(false);
    let symbols = vec!["EURUSD".to_string(), "GBPUSD".to_string()];
    for (symbol, outcome) in pipeline.run_symbols(&symbols, Some(2)).unwrap() {
        assert!(outcome.is_ok(), "{symbol} failed");
    }

    let registry = DatasetRegistry::discover(dir.path()).unwrap();
    assert_eq!(registry.len(), 4);
    assert_eq!(registry.get_available_timeframes("GBPUSD"), vec!["5m", "15m"]);
    let dataset = registry.find("EURUSD", "15m").unwrap();
    assert_eq!(
        dataset.path,
        layout.dataset_path(StorageFormat::Binary, "15m", "EURUSD")
    );
    assert!(dataset.index_path().exists());
    // raw input and lock files are not datasets
    assert!(registry.find("EURUSD", "raw").is_none());
}

#[test]
fn test_empty_root() {
    let dir = TempDir::new().unwrap();
    assert!(DatasetRegistry::discover(dir.path()).unwrap().is_empty());
}

#[test]
fn test_shared_registry_sees_new_timeframes() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    write_raw(&layout, "EURUSD", StorageFormat::Binary, &stepped_bars(DAY, MINUTE, 20));
    let shared = SharedRegistry::open(dir.path()).unwrap();
    assert!(shared.snapshot().is_empty());

    let config = ResampleConfig::from_json(r#"{"default": {"timeframes": {"5m": {}}}}"#).unwrap();
    ResamplePipeline::new(layout, config)
        .with_fsync(false)
        .run_symbol("EURUSD")
        .unwrap();

    assert!(shared.refresh_if_changed().unwrap());
    assert_eq!(shared.snapshot().get_available_timeframes("EURUSD"), vec!["5m"]);
    assert!(!shared.refresh_if_changed().unwrap());
}
