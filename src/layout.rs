//! Storage path conventions
//!
//! ```text
//! {root}/raw/{symbol}.{bin|csv}              raw input bars
//! {root}/{mode}/{timeframe}/{symbol}.{ext}   resampled dataset
//! {root}/{mode}/{timeframe}/{symbol}.idx     its checkpoint index
//! {root}/locks/{symbol}_{YYYYMMDD}.lck       writer lock
//! ```
//!
//! `mode` is `bin` or `csv` and matches the dataset extension.

use crate::codec::StorageFormat;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

/// Directory holding raw input
pub const RAW_DIR: &str = "raw";

/// Directory holding lock files
pub const LOCKS_DIR: &str = "locks";

/// Extension of checkpoint index files
pub const INDEX_EXTENSION: &str = "idx";

/// Path builder rooted at a storage directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Layout rooted at `root`
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Raw input file of `symbol` in `format`
    pub fn raw_path(&self, symbol: &str, format: StorageFormat) -> PathBuf {
        self.root
            .join(RAW_DIR)
            .join(format!("{}.{}", sanitize_symbol(symbol), format.extension()))
    }

    /// Existing raw input of `symbol`, binary preferred
    pub fn find_raw_input(&self, symbol: &str) -> Option<PathBuf> {
        StorageFormat::all()
            .into_iter()
            .map(|format| self.raw_path(symbol, format))
            .find(|path| path.is_file())
    }

    /// Directory of one timeframe in one mode
    pub fn timeframe_dir(&self, format: StorageFormat, timeframe: &str) -> PathBuf {
        self.root.join(format.mode_dir()).join(timeframe)
    }

    /// Dataset file of `symbol`/`timeframe`
    pub fn dataset_path(&self, format: StorageFormat, timeframe: &str, symbol: &str) -> PathBuf {
        self.timeframe_dir(format, timeframe)
            .join(format!("{}.{}", sanitize_symbol(symbol), format.extension()))
    }

    /// Checkpoint index next to the dataset
    pub fn index_path(&self, format: StorageFormat, timeframe: &str, symbol: &str) -> PathBuf {
        self.dataset_path(format, timeframe, symbol)
            .with_extension(INDEX_EXTENSION)
    }

    /// Directory holding lock files
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(LOCKS_DIR)
    }

    /// Lock file of `symbol` on `date`
    pub fn lock_path(&self, symbol: &str, date: NaiveDate) -> PathBuf {
        self.locks_dir().join(format!("{}.lck", lock_key(symbol, date)))
    }

    /// Create the raw and lock directories
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.root.join(RAW_DIR))?;
        std::fs::create_dir_all(self.locks_dir())
    }
}

/// `symbol_YYYYMMDD`
pub fn lock_key(symbol: &str, date: NaiveDate) -> String {
    format!("{}_{}", sanitize_symbol(symbol), date.format("%Y%m%d"))
}

/// Sanitize symbol name for filesystem safety
///
/// Prevents path traversal by replacing dangerous characters:
/// - `/`, `\`, `:` → `_` (directory separators)
/// - `..` → `__` (parent directory reference)
///
/// Preserves case.
pub fn sanitize_symbol(name: &str) -> String {
    name.replace("..", "__").replace(['/', '\\', ':'], "_")
}
