//! Bar codecs
//!
//! Two encodings of the same positional bar store: fixed-width binary records
//! and CSV rows. Both are addressed by byte offset, so a checkpoint can point
//! into either one and readers can resume from it.

use crate::{Bar, Result};
use std::path::PathBuf;

pub mod binary;
pub mod factory;
pub mod text;

pub use factory::{detect_format, open_reader, open_writer, StorageFormat};

/// Bar together with the byte offset it was read from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionedBar {
    /// Byte offset of the record
    pub position: u64,
    /// Decoded bar
    pub bar: Bar,
}

/// Result of a single `read_batch` call
#[derive(Debug, Clone, Default)]
pub struct BarBatch {
    /// Complete records in file order
    pub bars: Vec<PositionedBar>,
    /// Offset right after the last returned record
    pub next_offset: u64,
}

impl BarBatch {
    /// Whether no record was read
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Number of records read
    pub fn len(&self) -> usize {
        self.bars.len()
    }
}

/// Positional bar reader
///
/// Implementations never return a partially written record; a truncated tail
/// is treated as not yet written.
pub trait BarReader: Send {
    /// Read up to `batch_size` complete records starting at `offset`.
    ///
    /// Offsets before the first record (inside a header) are moved to the
    /// first record.
    fn read_batch(&mut self, offset: u64, batch_size: usize) -> Result<BarBatch>;

    /// Move the cursor used by [`BarReader::read_next`]
    fn seek(&mut self, offset: u64) -> Result<()>;

    /// Current cursor position
    fn tell(&self) -> u64;

    /// Whether the cursor is at the end of readable data
    fn eof(&mut self) -> Result<bool>;

    /// Offset of the first record
    fn data_start(&self) -> u64;

    /// Never read at or beyond `limit` bytes
    fn set_limit(&mut self, limit: Option<u64>);

    /// Read the next batch from the cursor and advance it
    fn read_next(&mut self, batch_size: usize) -> Result<BarBatch> {
        let batch = self.read_batch(self.tell(), batch_size)?;
        self.seek(batch.next_offset)?;
        Ok(batch)
    }

    /// Read every remaining record from `offset`
    fn read_all(&mut self, offset: u64) -> Result<Vec<PositionedBar>> {
        let mut out = Vec::new();
        let mut offset = offset;
        loop {
            let batch = self.read_batch(offset, 4096)?;
            if batch.is_empty() {
                return Ok(out);
            }
            offset = batch.next_offset;
            out.extend(batch.bars);
        }
    }
}

/// Positional bar writer
///
/// Writes land at the write position, normally the end of the data.
/// [`BarWriter::rewind`] moves the position back over existing bytes and
/// [`BarWriter::truncate`] cuts the data at a position.
pub trait BarWriter: Send {
    /// Append bars and return the number of bytes written.
    ///
    /// `source_offset` is the input position the bars were derived from.
    /// Encodings with an offset column record it; others ignore it.
    fn write_batch(&mut self, bars: &[Bar], source_offset: Option<u64>) -> Result<u64>;

    /// Cut the data back to `size` bytes (never into a header)
    fn truncate(&mut self, size: u64) -> Result<()>;

    /// Move the write position to `offset` (never into a header) without
    /// shrinking the file; later writes overwrite the bytes in place
    fn rewind(&mut self, offset: u64) -> Result<()>;

    /// Flush buffers, optionally syncing file contents to disk
    fn flush(&mut self, fsync: bool) -> Result<()>;

    /// Current write position
    fn tell(&self) -> u64;

    /// Offset of the first record
    fn data_start(&self) -> u64;

    /// Flush, sync and close, returning the file path
    fn finalize(self: Box<Self>) -> Result<PathBuf>;
}
