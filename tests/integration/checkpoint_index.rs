//! Integration tests for the checkpoint index

use bar_resampler::index::{CheckpointIndex, IndexRead, Offsets};
use bar_resampler::Error;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

#[test]
fn test_write_read_round_trip() {
    let dir = TempDir::new().unwrap();
    let index = CheckpointIndex::new(dir.path().join("EURUSD.idx")).with_fsync(false);

    for (input, output) in [(0, 0), (8, 8), (8 + 64 * 3, 8 + 64), (u64::MAX, 1)] {
        index.write(Offsets::new(input, output)).unwrap();
        assert_eq!(
            index.read().unwrap(),
            IndexRead::Existing(Offsets::new(input, output))
        );
    }
}

#[test]
fn test_file_format_is_two_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("EURUSD.idx");
    CheckpointIndex::new(&path)
        .write(Offsets::new(456, 72))
        .unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "456\n72\n");
}

#[test]
fn test_missing_index_is_fresh_start() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("EURUSD.idx");
    let index = CheckpointIndex::new(&path);

    let read = index.read().unwrap();
    assert!(read.is_fresh());
    assert_eq!(read.offsets(), Offsets::new(0, 0));
    // the fresh state was persisted
    assert!(path.exists());
    assert!(!index.read().unwrap().is_fresh());
}

#[test]
fn test_interrupted_write_leaves_previous_index() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("EURUSD.idx");
    let index = CheckpointIndex::new(&path);
    index.write(Offsets::new(200, 72)).unwrap();
    let before = std::fs::read(&path).unwrap();

    // a temp file that never reaches the rename
    {
        let mut temp = NamedTempFile::new_in(dir.path()).unwrap();
        write!(temp, "999\n999\n").unwrap();
        temp.flush().unwrap();
    }

    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert_eq!(index.read().unwrap().offsets(), Offsets::new(200, 72));
    // no temp files linger
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_corrupted_index() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("EURUSD.idx");
    let index = CheckpointIndex::new(&path);

    std::fs::write(&path, "12\n").unwrap();
    let err = index.read().unwrap_err();
    assert!(matches!(err, Error::IndexCorruption { .. }));
    assert!(err.is_fatal());

    std::fs::write(&path, "12\nabc\n").unwrap();
    assert!(matches!(
        index.read().unwrap_err(),
        Error::IndexCorruption { .. }
    ));

    std::fs::write(&path, "-5\n10\n").unwrap();
    assert!(matches!(
        index.read().unwrap_err(),
        Error::IndexCorruption { .. }
    ));
}

#[test]
fn test_negative_offsets_rejected_before_write() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("EURUSD.idx");
    let index = CheckpointIndex::new(&path);
    index.write(Offsets::new(10, 20)).unwrap();

    let err = index.write_checked(-1, 20).unwrap_err();
    assert!(matches!(err, Error::IndexValidation(_)));
    assert_eq!(index.read().unwrap().offsets(), Offsets::new(10, 20));
}

#[test]
fn test_reset() {
    let dir = TempDir::new().unwrap();
    let index = CheckpointIndex::new(dir.path().join("EURUSD.idx"));
    index.write(Offsets::new(10, 20)).unwrap();
    index.reset().unwrap();
    assert_eq!(index.read().unwrap().offsets(), Offsets::new(0, 0));
}
