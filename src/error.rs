//! Error taxonomy for the resampling and storage engine
//!
//! Every fallible operation in the crate returns [`Error`]. Processing, batch
//! and worker failures are grouped in their own enums and nested into the
//! root type, so callers can either match on the category or just propagate
//! with `?`.

use std::path::PathBuf;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No dataset is registered for the requested symbol/timeframe
    #[error("dataset not found: {symbol}/{timeframe}")]
    DataNotFound {
        /// Requested symbol
        symbol: String,
        /// Requested timeframe
        timeframe: String,
    },

    /// Index file exists but cannot be parsed
    #[error("index corrupted at {path}: {reason}")]
    IndexCorruption {
        /// Index file path
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// Offsets rejected before they reached disk
    #[error("index validation failed: {0}")]
    IndexValidation(String),

    /// Temp file write or atomic rename failed
    #[error("index write failed at {path}: {reason}")]
    IndexWrite {
        /// Index file path
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// Record decoding or resampling failure
    #[error("processing error: {0}")]
    Processing(#[from] ProcessingError),

    /// Batch orchestration failure
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    /// Worker orchestration failure
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Invalid configuration document or argument
    #[error("configuration error: {0}")]
    Config(String),

    /// Query arguments that cannot be served, such as an unknown indicator
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while decoding, bucketing or merging bars
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    /// A stored or raw record could not be decoded
    #[error("invalid record at offset {offset}: {reason}")]
    InvalidRecord {
        /// Byte offset of the record
        offset: u64,
        /// Decoding failure
        reason: String,
    },

    /// Input violates an assumption of the bucketing logic
    #[error("resample logic error: {0}")]
    ResampleLogic(String),

    /// A batch expected to carry data had no usable rows
    #[error("empty batch at input offset {offset}")]
    EmptyBatch {
        /// Input offset the batch was read from
        offset: u64,
    },

    /// A merge rule points outside the batch
    #[error("post-processing error: {0}")]
    PostProcessing(String),
}

/// Errors raised while assembling a batch
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// No trading session covers a bar
    #[error("no trading session covers timestamp {timestamp}: {reason}")]
    SessionResolution {
        /// Bar timestamp in ms
        timestamp: u64,
        /// Resolution failure
        reason: String,
    },
}

/// Errors raised by engine workers and the pipeline around them
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// A timeframe would read past its source's committed output
    #[error("dependency error: {0}")]
    Dependency(String),

    /// Data was written but the checkpoint could not be committed
    #[error("transaction failed after writing output (input_offset={input_offset}, output_offset={output_offset}): {reason}")]
    Transaction {
        /// Input offset that should have been committed
        input_offset: u64,
        /// Output offset that should have been committed
        output_offset: u64,
        /// Index write failure
        reason: String,
    },

    /// A worker pool or worker thread could not be started
    #[error("failed to start worker: {0}")]
    ForkProcess(String),
}

impl Error {
    /// Shorthand for a malformed record
    pub fn invalid_record(offset: u64, reason: impl Into<String>) -> Self {
        ProcessingError::InvalidRecord {
            offset,
            reason: reason.into(),
        }
        .into()
    }

    /// Integrity and configuration failures that must halt the pipeline
    /// and reach an operator instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::IndexCorruption { .. }
                | Error::IndexValidation(_)
                | Error::Config(_)
                | Error::Processing(ProcessingError::PostProcessing(_))
                | Error::Processing(ProcessingError::ResampleLogic(_))
                | Error::Worker(WorkerError::Dependency(_))
        )
    }

    /// Outcomes that end a run normally; callers just poll again later.
    pub fn is_normal_termination(&self) -> bool {
        matches!(self, Error::Processing(ProcessingError::EmptyBatch { .. }))
    }

    /// Whether recovery must re-derive offsets from disk before a retry
    pub fn requires_recovery(&self) -> bool {
        matches!(self, Error::Worker(WorkerError::Transaction { .. }))
    }

    /// Query callers treat this as an absent result
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::DataNotFound { .. })
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        let offset = err.position().map(|p| p.byte()).unwrap_or(0);
        match err.into_kind() {
            csv::ErrorKind::Io(io) => Error::Io(io),
            other => Error::invalid_record(offset, format!("{other:?}")),
        }
    }
}
