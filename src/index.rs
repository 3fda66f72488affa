//! Checkpoint index persistence
//!
//! An index file holds two lines, `input_offset` and `output_offset`, marking
//! the last fully committed boundary of one dataset. It is replaced with a
//! temp file + atomic rename, so readers only ever see the old or the new
//! pair.

use crate::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Committed offsets of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Offsets {
    /// Next unread byte of the input
    pub input_offset: u64,
    /// End of committed output
    pub output_offset: u64,
}

impl Offsets {
    /// Create offsets from unsigned values
    pub fn new(input_offset: u64, output_offset: u64) -> Self {
        Self {
            input_offset,
            output_offset,
        }
    }

    /// Validate signed offsets coming from an external caller
    pub fn try_new(input_offset: i64, output_offset: i64) -> Result<Self> {
        if input_offset < 0 || output_offset < 0 {
            return Err(Error::IndexValidation(format!(
                "offsets must be non-negative (input={input_offset}, output={output_offset})"
            )));
        }
        Ok(Self::new(input_offset as u64, output_offset as u64))
    }
}

/// How [`CheckpointIndex::read`] found the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexRead {
    /// No index existed; `(0, 0)` was persisted
    Created(Offsets),
    /// Offsets loaded from an existing index
    Existing(Offsets),
}

impl IndexRead {
    /// Offsets regardless of origin
    pub fn offsets(&self) -> Offsets {
        match self {
            IndexRead::Created(o) | IndexRead::Existing(o) => *o,
        }
    }

    /// Whether this is a fresh start
    pub fn is_fresh(&self) -> bool {
        matches!(self, IndexRead::Created(_))
    }
}

/// Checkpoint index of one dataset
#[derive(Debug, Clone)]
pub struct CheckpointIndex {
    path: PathBuf,
    fsync: bool,
}

impl CheckpointIndex {
    /// Index at `path`, syncing every write to disk
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            fsync: true,
        }
    }

    /// Turn fsync on commit on or off
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    /// Index file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the index file exists
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the committed offsets.
    ///
    /// A missing index is persisted as `(0, 0)` before being returned.
    pub fn read(&self) -> Result<IndexRead> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let offsets = Offsets::default();
                self.write(offsets)?;
                info!(path = %self.path.display(), "Created fresh checkpoint index");
                return Ok(IndexRead::Created(offsets));
            }
            Err(e) => return Err(e.into()),
        };

        let values: Vec<u64> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(2)
            .map(|l| l.parse::<u64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| self.corruption(format!("unparseable offset: {e}")))?;

        if values.len() < 2 {
            return Err(self.corruption(format!("expected 2 offsets, found {}", values.len())));
        }

        let offsets = Offsets::new(values[0], values[1]);
        debug!(
            path = %self.path.display(),
            input_offset = offsets.input_offset,
            output_offset = offsets.output_offset,
            "Loaded checkpoint index"
        );
        Ok(IndexRead::Existing(offsets))
    }

    /// Atomically replace the index with `offsets`
    pub fn write(&self, offsets: Offsets) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| self.write_error(e))?;

        let mut temp_file =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| self.write_error(e))?;
        write!(
            temp_file,
            "{}\n{}\n",
            offsets.input_offset, offsets.output_offset
        )
        .map_err(|e| self.write_error(e))?;
        temp_file.flush().map_err(|e| self.write_error(e))?;
        if self.fsync {
            temp_file
                .as_file()
                .sync_all()
                .map_err(|e| self.write_error(e))?;
        }

        temp_file
            .persist(&self.path)
            .map_err(|e| self.write_error(e.error))?;

        if self.fsync {
            if let Ok(dir) = std::fs::File::open(parent) {
                if let Err(e) = dir.sync_all() {
                    warn!(path = %parent.display(), error = %e, "Failed to sync index directory");
                }
            }
        }

        debug!(
            path = %self.path.display(),
            input_offset = offsets.input_offset,
            output_offset = offsets.output_offset,
            "Committed checkpoint index"
        );
        Ok(())
    }

    /// Validate and write signed offsets
    pub fn write_checked(&self, input_offset: i64, output_offset: i64) -> Result<()> {
        self.write(Offsets::try_new(input_offset, output_offset)?)
    }

    /// Reset the index to `(0, 0)`
    pub fn reset(&self) -> Result<()> {
        warn!(path = %self.path.display(), "Resetting checkpoint index");
        self.write(Offsets::default())
    }

    fn corruption(&self, reason: String) -> Error {
        Error::IndexCorruption {
            path: self.path.clone(),
            reason,
        }
    }

    fn write_error(&self, err: std::io::Error) -> Error {
        Error::IndexWrite {
            path: self.path.clone(),
            reason: err.to_string(),
        }
    }
}
