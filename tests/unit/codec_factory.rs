//! Unit tests for format selection and the reader/writer contract

use crate::common::{stepped_bars, DAY, MINUTE};
use bar_resampler::codec::{detect_format, open_reader, open_writer, StorageFormat};
use tempfile::TempDir;

#[test]
fn test_both_formats_store_the_same_bars() {
    let dir = TempDir::new().unwrap();
    let bars = stepped_bars(DAY, MINUTE, 25);

    for format in StorageFormat::all() {
        let path = dir.path().join(format!("EURUSD.{}", format.extension()));
        let mut writer = open_writer(&path, format).unwrap();
        writer.write_batch(&bars[..10], None).unwrap();
        writer.write_batch(&bars[10..], None).unwrap();
        let end = writer.tell();
        writer.finalize().unwrap();
        assert_eq!(end, std::fs::metadata(&path).unwrap().len(), "{format}");

        let mut reader = open_reader(&path).unwrap();
        let stored: Vec<_> = reader.read_all(0).unwrap().into_iter().map(|p| p.bar).collect();
        assert_eq!(stored, bars, "{format}");
    }
}

#[test]
fn test_positions_resume_reads() {
    let dir = TempDir::new().unwrap();
    let bars = stepped_bars(DAY, MINUTE, 12);

    for format in StorageFormat::all() {
        let path = dir.path().join(format!("GBPUSD.{}", format.extension()));
        let mut writer = open_writer(&path, format).unwrap();
        writer.write_batch(&bars, None).unwrap();
        writer.finalize().unwrap();

        let mut reader = open_reader(&path).unwrap();
        let first = reader.read_batch(0, 5).unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(first.bars[0].position, reader.data_start());

        // a fresh reader continues exactly where the first batch stopped
        let mut resumed = open_reader(&path).unwrap();
        let rest = resumed.read_batch(first.next_offset, 100).unwrap();
        assert_eq!(rest.len(), 7, "{format}");
        assert_eq!(rest.bars[0].bar, bars[5]);
        assert_eq!(rest.next_offset, std::fs::metadata(&path).unwrap().len());
    }
}

#[test]
fn test_limit_hides_trailing_bars() {
    let dir = TempDir::new().unwrap();
    let bars = stepped_bars(DAY, MINUTE, 10);

    for format in StorageFormat::all() {
        let path = dir.path().join(format!("USDJPY.{}", format.extension()));
        let mut writer = open_writer(&path, format).unwrap();
        writer.write_batch(&bars[..4], None).unwrap();
        let limit = writer.tell();
        writer.write_batch(&bars[4..], None).unwrap();
        writer.finalize().unwrap();

        let mut reader = open_reader(&path).unwrap();
        reader.set_limit(Some(limit));
        let visible = reader.read_all(0).unwrap();
        assert_eq!(visible.len(), 4, "{format}");
        reader.seek(limit).unwrap();
        assert!(reader.eof().unwrap());
    }
}

#[test]
fn test_truncate_to_data_start_empties_file() {
    let dir = TempDir::new().unwrap();
    for format in StorageFormat::all() {
        let path = dir.path().join(format!("AUDUSD.{}", format.extension()));
        let mut writer = open_writer(&path, format).unwrap();
        writer.write_batch(&stepped_bars(DAY, MINUTE, 3), None).unwrap();
        let start = writer.data_start();
        writer.truncate(start).unwrap();
        assert_eq!(writer.tell(), start);
        writer.finalize().unwrap();

        assert!(open_reader(&path).unwrap().read_all(0).unwrap().is_empty());
        // the file keeps its header so detection still works
        assert_eq!(detect_format(&path).unwrap(), format);
    }
}

#[test]
fn test_unknown_extension_is_sniffed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("EURUSD.raw");
    let mut writer = open_writer(&path, StorageFormat::Binary).unwrap();
    writer.write_batch(&stepped_bars(DAY, MINUTE, 2), None).unwrap();
    writer.finalize().unwrap();

    assert_eq!(detect_format(&path).unwrap(), StorageFormat::Binary);
    assert_eq!(open_reader(&path).unwrap().read_all(0).unwrap().len(), 2);
}
