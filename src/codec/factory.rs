//! Format selection for bar files

use super::binary::{self, BinaryBarReader, BinaryBarWriter};
use super::text::{TextBarReader, TextBarWriter};
use super::{BarReader, BarWriter};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

/// On-disk encoding of a bar file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    /// Fixed 64-byte records
    #[default]
    Binary,
    /// CSV rows
    Text,
}

impl StorageFormat {
    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            StorageFormat::Binary => "bin",
            StorageFormat::Text => "csv",
        }
    }

    /// Directory name under the storage root
    pub fn mode_dir(&self) -> &'static str {
        match self {
            StorageFormat::Binary => "bin",
            StorageFormat::Text => "csv",
        }
    }

    /// Every known format
    pub fn all() -> [StorageFormat; 2] {
        [StorageFormat::Binary, StorageFormat::Text]
    }
}

impl std::fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mode_dir())
    }
}

impl FromStr for StorageFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bin" | "binary" => Ok(StorageFormat::Binary),
            "csv" | "text" => Ok(StorageFormat::Text),
            other => Err(format!("Unknown storage format: {other}")),
        }
    }
}

/// Pick the format of `path`.
///
/// `.bin` and `.csv` decide by extension. Anything else is sniffed for the
/// binary magic; files that don't carry it are treated as text.
pub fn detect_format(path: &Path) -> Result<StorageFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("bin") => return Ok(StorageFormat::Binary),
        Some("csv") => return Ok(StorageFormat::Text),
        _ => {}
    }
    let mut file = File::open(path)?;
    if binary::has_magic(&mut file)? {
        Ok(StorageFormat::Binary)
    } else {
        Ok(StorageFormat::Text)
    }
}

/// Open a reader for an existing bar file
pub fn open_reader(path: &Path) -> Result<Box<dyn BarReader>> {
    Ok(match detect_format(path)? {
        StorageFormat::Binary => Box::new(BinaryBarReader::open(path)?),
        StorageFormat::Text => Box::new(TextBarReader::open(path)?),
    })
}

/// Open (creating if needed) a writer for a bar file
pub fn open_writer(path: &Path, format: StorageFormat) -> Result<Box<dyn BarWriter>> {
    Ok(match format {
        StorageFormat::Binary => Box::new(BinaryBarWriter::open(path)?),
        StorageFormat::Text => Box::new(TextBarWriter::open(path)?),
    })
}
