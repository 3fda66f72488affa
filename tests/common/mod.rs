//! Shared fixtures for integration tests

#![allow(dead_code)]

#[allow(unused_imports)]
use bar_resampler::codec::{BarReader, BarWriter};
use bar_resampler::codec::{open_reader, open_writer, StorageFormat};
use bar_resampler::layout::StorageLayout;
use bar_resampler::Bar;
use std::path::Path;

/// 2024-01-01 00:00:00 UTC
pub const DAY: u64 = 1_704_067_200_000;
pub const MINUTE: u64 = 60_000;
pub const HOUR: u64 = 3_600_000;

/// One bar per step starting at `start`; prices climb by 1.0 per bar
pub fn stepped_bars(start: u64, step: u64, count: u64) -> Vec<Bar> {
    (0..count)
        .map(|i| {
            let p = 100.0 + i as f64;
            Bar::new(start + i * step, p, p + 0.5, p - 0.5, p + 0.25, 10.0)
        })
        .collect()
}

pub fn append_bars(path: &Path, format: StorageFormat, bars: &[Bar]) {
    let mut writer = open_writer(path, format).unwrap();
    writer.write_batch(bars, None).unwrap();
    writer.flush(false).unwrap();
}

pub fn write_raw(layout: &StorageLayout, symbol: &str, format: StorageFormat, bars: &[Bar]) {
    layout.ensure_directories().unwrap();
    append_bars(&layout.raw_path(symbol, format), format, bars);
}

pub fn write_dataset(
    layout: &StorageLayout,
    format: StorageFormat,
    timeframe: &str,
    symbol: &str,
    bars: &[Bar],
) {
    let path = layout.dataset_path(format, timeframe, symbol);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    append_bars(&path, format, bars);
}

pub fn read_bars(path: &Path) -> Vec<Bar> {
    open_reader(path)
        .unwrap()
        .read_all(0)
        .unwrap()
        .into_iter()
        .map(|p| p.bar)
        .collect()
}
