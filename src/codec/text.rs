//! CSV bar encoding
//!
//! One header row followed by `timestamp,open,high,low,close,volume,offset`
//! rows. `offset` traces each row back to the input position it was built
//! from. Raw input files may omit the `offset` column, and may carry
//! timestamps as `YYYY-MM-DD HH:MM:SS` instead of epoch milliseconds.

use super::{BarBatch, BarReader, BarWriter, PositionedBar};
use crate::{Bar, Error, Result};
use chrono::NaiveDateTime;
use csv::{ByteRecord, ReaderBuilder, WriterBuilder};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Header row written to new text files
pub const HEADER: &str = "timestamp,open,high,low,close,volume,offset\n";

const READ_CHUNK: usize = 64 * 1024;

/// Length of the header row, or 0 when the first line is data
fn detect_header(file: &mut File) -> Result<u64> {
    file.seek(SeekFrom::Start(0))?;
    let mut first = String::new();
    BufReader::new(&mut *file).read_line(&mut first)?;
    if !first.ends_with('\n') {
        // header still being written, or empty file
        return Ok(if first.is_empty() { 0 } else { first.len() as u64 });
    }
    let leading = first.split(',').next().unwrap_or("").trim();
    if leading.parse::<u64>().is_ok() || parse_datetime(leading).is_some() {
        Ok(0)
    } else {
        Ok(first.len() as u64)
    }
}

fn parse_datetime(field: &str) -> Option<u64> {
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(field, fmt).ok())
        .and_then(|dt| u64::try_from(dt.and_utc().timestamp_millis()).ok())
}

fn parse_field<T: std::str::FromStr>(record: &ByteRecord, idx: usize, offset: u64) -> Result<T> {
    let raw = record
        .get(idx)
        .ok_or_else(|| Error::invalid_record(offset, format!("missing column {idx}")))?;
    let text = std::str::from_utf8(raw)
        .map_err(|_| Error::invalid_record(offset, "row is not valid UTF-8"))?;
    text.trim()
        .parse::<T>()
        .map_err(|_| Error::invalid_record(offset, format!("cannot parse column {idx}: {text:?}")))
}

/// Decode one CSV row
pub fn decode_row(record: &ByteRecord, offset: u64) -> Result<Bar> {
    if record.len() < 6 {
        return Err(Error::invalid_record(
            offset,
            format!("expected at least 6 columns, found {}", record.len()),
        ));
    }
    let timestamp = match parse_field::<u64>(record, 0, offset) {
        Ok(ts) => ts,
        Err(err) => std::str::from_utf8(&record[0])
            .ok()
            .and_then(|s| parse_datetime(s.trim()))
            .ok_or(err)?,
    };
    let bar = Bar {
        timestamp,
        open: parse_field(record, 1, offset)?,
        high: parse_field(record, 2, offset)?,
        low: parse_field(record, 3, offset)?,
        close: parse_field(record, 4, offset)?,
        volume: parse_field(record, 5, offset)?,
    };
    if [bar.open, bar.high, bar.low, bar.close, bar.volume]
        .iter()
        .any(|v| !v.is_finite())
    {
        return Err(Error::invalid_record(offset, "non-finite price or volume"));
    }
    Ok(bar)
}

/// Reader over a CSV bar file
pub struct TextBarReader {
    file: File,
    data_start: u64,
    cursor: u64,
    limit: Option<u64>,
}

impl TextBarReader {
    /// Open an existing CSV bar file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path.as_ref())?;
        let data_start = detect_header(&mut file)?;
        debug!(path = %path.as_ref().display(), data_start, "Opened text bar reader");
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

    /// Read bytes from `offset` until `rows` complete lines are buffered or
    /// data runs out. Returns the buffer cut after its last complete line.
    fn read_lines(&mut self, offset: u64, rows: usize) -> Result<Vec<u8>> {
        let end = self.readable_end()?;
        let mut buf = Vec::new();
        if offset >= end {
            return Ok(buf);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut handle = (&self.file).take(end - offset);
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut lines = 0usize;
        loop {
            let n = handle.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            lines += chunk[..n].iter().filter(|b| **b == b'\n').count();
            buf.extend_from_slice(&chunk[..n]);
            if lines > rows {
                break;
            }
        }
        let complete = buf.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
        buf.truncate(complete);
        Ok(buf)
    }
}

impl BarReader for TextBarReader {
    fn read_batch(&mut self, offset: u64, batch_size: usize) -> Result<BarBatch> {
        let offset = offset.max(self.data_start);
        let buf = self.read_lines(offset, batch_size)?;

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(buf.as_slice());

        let mut bars = Vec::with_capacity(batch_size.min(4096));
        let mut record = ByteRecord::new();
        let mut next_offset = offset;
        while bars.len() < batch_size {
            let start = reader.position().byte();
            if !reader.read_byte_record(&mut record)? {
                break;
            }
            let position = offset + record.position().map_or(start, |p| p.byte());
            bars.push(PositionedBar {
                position,
                bar: decode_row(&record, position)?,
            });
            next_offset = offset + reader.position().byte();
        }
        // trailing blank lines are consumed without producing records
        if bars.len() < batch_size {
            next_offset = offset + buf.len() as u64;
        }

        Ok(BarBatch { bars, next_offset })
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.cursor = offset.max(self.data_start);
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.cursor
    }

    fn eof(&mut self) -> Result<bool> {
        let end = self.readable_end()?;
        if self.cursor >= end {
            return Ok(true);
        }
        Ok(self.read_lines(self.cursor, 1)?.is_empty())
    }

    fn data_start(&self) -> u64 {
        self.data_start
    }

    fn set_limit(&mut self, limit: Option<u64>) {
        self.limit = limit;
    }
}

/// Writer for a CSV bar file
pub struct TextBarWriter {
    path: PathBuf,
    file: File,
    data_start: u64,
    position: u64,
}

impl TextBarWriter {
    /// Open or create a CSV bar file, positioned at its end.
    ///
    /// New (empty) files get the header row.
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

        let data_start = if file.metadata()?.len() == 0 {
            file.write_all(HEADER.as_bytes())?;
            HEADER.len() as u64
        } else {
            detect_header(&mut file)?
        };
        let position = file.seek(SeekFrom::End(0))?;

        debug!(path = %path.display(), data_start, position, "Opened text bar writer");

        Ok(Self {
            path,
            file,
            data_start,
            position,
        })
    }
}

impl BarWriter for TextBarWriter {
    fn write_batch(&mut self, bars: &[Bar], source_offset: Option<u64>) -> Result<u64> {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::with_capacity(bars.len() * 64));
        for bar in bars {
            writer.flush()?;
            let row_start = self.position + writer.get_ref().len() as u64;
            let offset = source_offset.unwrap_or(row_start);
            writer.write_record(&[
                bar.timestamp.to_string(),
                bar.open.to_string(),
                bar.high.to_string(),
                bar.low.to_string(),
                bar.close.to_string(),
                bar.volume.to_string(),
                offset.to_string(),
            ])?;
        }
        let out = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        self.file.write_all(&out)?;
        self.position += out.len() as u64;
        Ok(out.len() as u64)
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        let size = size.max(self.data_start);
        self.file.set_len(size)?;
        self.file.seek(SeekFrom::Start(size))?;
        self.position = size;
        Ok(())
    }

    fn rewind(&mut self, offset: u64) -> Result<()> {
        let offset = offset.max(self.data_start);
        self.file.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    fn flush(&mut self, fsync: bool) -> Result<()> {
        self.file.flush()?;
        if fsync {
            self.file.sync_data()?;
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
