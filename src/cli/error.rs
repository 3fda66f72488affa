//! CLI error types and conversions

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Engine error
    #[error(transparent)]
    Engine(#[from] crate::Error),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Output could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Some symbols failed to resample
    #[error("{failed} of {total} symbols failed")]
    PartialFailure {
        /// Failed symbols
        failed: usize,
        /// Requested symbols
        total: usize,
    },
}
