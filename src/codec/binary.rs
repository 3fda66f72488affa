//! Fixed-width binary bar records
//!
//! Layout of one record (little endian, 64 bytes):
//!
//! | bytes  | field     |
//! |--------|-----------|
//! | 0..8   | timestamp (u64 ms) |
//! | 8..48  | open, high, low, close, volume (f64) |
//! | 48..64 | reserved padding (2 x u64, zero) |
//!
//! Files created by this crate start with the 8-byte magic `DUKASBIN`.
//! Files without it are accepted and read from offset 0.

use super::{BarBatch, BarReader, BarWriter, PositionedBar};
use crate::{Bar, Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Size of one encoded bar
pub const RECORD_SIZE: u64 = 64;

/// Magic header of binary bar files
pub const MAGIC: &[u8; 8] = b"DUKASBIN";

const HEADER_SIZE: u64 = MAGIC.len() as u64;

/// Encode a bar into its fixed-width record
pub fn encode_record(bar: &Bar) -> [u8; RECORD_SIZE as usize] {
    let mut buf = [0u8; RECORD_SIZE as usize];
    buf[0..8].copy_from_slice(&bar.timestamp.to_le_bytes());
    let values = [bar.open, bar.high, bar.low, bar.close, bar.volume];
    for (i, value) in values.iter().enumerate() {
        let start = 8 + i * 8;
        buf[start..start + 8].copy_from_slice(&value.to_le_bytes());
    }
    buf
}

/// Decode one record; `offset` is only used for error reporting
pub fn decode_record(buf: &[u8], offset: u64) -> Result<Bar> {
    if buf.len() < RECORD_SIZE as usize {
        return Err(Error::invalid_record(
            offset,
            format!("short record: {} bytes", buf.len()),
        ));
    }
    let word = |i: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&buf[i * 8..i * 8 + 8]);
        b
    };
    let bar = Bar {
        timestamp: u64::from_le_bytes(word(0)),
        open: f64::from_le_bytes(word(1)),
        high: f64::from_le_bytes(word(2)),
        low: f64::from_le_bytes(word(3)),
        close: f64::from_le_bytes(word(4)),
        volume: f64::from_le_bytes(word(5)),
    };
    if [bar.open, bar.high, bar.low, bar.close, bar.volume]
        .iter()
        .any(|v| !v.is_finite())
    {
        return Err(Error::invalid_record(offset, "non-finite price or volume"));
    }
    Ok(bar)
}

/// Check whether a file starts with the binary magic
pub fn has_magic(file: &mut File) -> Result<bool> {
    let mut head = [0u8; HEADER_SIZE as usize];
    file.seek(SeekFrom::Start(0))?;
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(&head == MAGIC)
}

/// Reader over a binary bar file
pub struct BinaryBarReader {
    file: File,
    data_start: u64,
    cursor: u64,
    limit: Option<u64>,
}

impl BinaryBarReader {
    /// Open an existing binary bar file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path.as_ref())?;
        let data_start = if has_magic(&mut file)? { HEADER_SIZE } else { 0 };
        debug!(path = %path.as_ref().display(), data_start, "Opened binary bar reader");
        Ok(Self {
            file,
            data_start,
            cursor: data_start,
            limit: None,
        })
    }

    fn readable_end(&self) -> Result<u64> {
        let len = self.file.metadata()?.len();
        Ok(match self.limit {
            Some(limit) => len.min(limit),
            None => len,
        })
    }

    /// Number of complete records in the file (ignoring the limit)
    pub fn record_count(&self) -> Result<u64> {
        let len = self.file.metadata()?.len();
        Ok(len.saturating_sub(self.data_start) / RECORD_SIZE)
    }

    /// Read records `[start, end)` by index
    pub fn read_range(&mut self, start: u64, end: u64) -> Result<Vec<Bar>> {
        let end = end.min(self.record_count()?);
        if start >= end {
            return Ok(Vec::new());
        }
        let offset = self.data_start + start * RECORD_SIZE;
        let batch = self.read_batch(offset, (end - start) as usize)?;
        Ok(batch.bars.into_iter().map(|p| p.bar).collect())
    }

    /// Timestamp of the record at `index`
    pub fn timestamp_at(&mut self, index: u64) -> Result<u64> {
        let offset = self.data_start + index * RECORD_SIZE;
        let mut buf = [0u8; 8];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

impl BarReader for BinaryBarReader {
    fn read_batch(&mut self, offset: u64, batch_size: usize) -> Result<BarBatch> {
        let offset = offset.max(self.data_start);
        if (offset - self.data_start) % RECORD_SIZE != 0 {
            return Err(Error::invalid_record(
                offset,
                "offset is not aligned to a record boundary",
            ));
        }

        let end = self.readable_end()?;
        let available = end.saturating_sub(offset) / RECORD_SIZE;
        let count = available.min(batch_size as u64);
        if count == 0 {
            return Ok(BarBatch {
                bars: Vec::new(),
                next_offset: offset,
            });
        }

        let mut buf = vec![0u8; (count * RECORD_SIZE) as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;

        let mut bars = Vec::with_capacity(count as usize);
        for (i, chunk) in buf.chunks_exact(RECORD_SIZE as usize).enumerate() {
            let position = offset + i as u64 * RECORD_SIZE;
            bars.push(PositionedBar {
                position,
                bar: decode_record(chunk, position)?,
            });
        }

        Ok(BarBatch {
            bars,
            next_offset: offset + count * RECORD_SIZE,
        })
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.cursor = offset.max(self.data_start);
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.cursor
    }

    fn eof(&mut self) -> Result<bool> {
        Ok(self.readable_end()?.saturating_sub(self.cursor) < RECORD_SIZE)
    }

    fn data_start(&self) -> u64 {
        self.data_start
    }

    fn set_limit(&mut self, limit: Option<u64>) {
        self.limit = limit;
    }
}

/// Writer for a binary bar file
pub struct BinaryBarWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    data_start: u64,
    position: u64,
}

impl BinaryBarWriter {
    /// Open or create a binary bar file, positioned at its end.
    ///
    /// New (empty) files get the magic header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();
        let data_start = if len == 0 {
            file.write_all(MAGIC)?;
            HEADER_SIZE
        } else if has_magic(&mut file)? {
            HEADER_SIZE
        } else {
            0
        };
        let position = file.seek(SeekFrom::End(0))?;

        debug!(path = %path.display(), data_start, position, "Opened binary bar writer");

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            data_start,
            position,
        })
    }
}

impl BarWriter for BinaryBarWriter {
    fn write_batch(&mut self, bars: &[Bar], _source_offset: Option<u64>) -> Result<u64> {
        for bar in bars {
            self.writer.write_all(&encode_record(bar))?;
        }
        let written = bars.len() as u64 * RECORD_SIZE;
        self.position += written;
        Ok(written)
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        let size = size.max(self.data_start);
        self.writer.flush()?;
        self.writer.get_ref().set_len(size)?;
        self.writer.seek(SeekFrom::Start(size))?;
        self.position = size;
        Ok(())
    }

    fn rewind(&mut self, offset: u64) -> Result<()> {
        let offset = offset.max(self.data_start);
        self.writer.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    fn flush(&mut self, fsync: bool) -> Result<()> {
        self.writer.flush()?;
        if fsync {
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.position
    }

    fn data_start(&self) -> u64 {
        self.data_start
    }

    fn finalize(mut self: Box<Self>) -> Result<PathBuf> {
        self.flush(true)?;
        Ok(self.path)
    }
}
