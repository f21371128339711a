use std::path::PathBuf;
use thiserror::Error;

/// A request that cannot be executed. Raised before anything runs.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Blank code or empty path
    #[error("source is empty")]
    EmptySource,

    /// No scripted input responses
    #[error("input sequence must contain at least one value")]
    EmptyInputSequence,

    /// Timeout not a positive finite duration
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    /// Entry call without a function name
    #[error("entry function name is empty")]
    EmptyEntryName,

    /// Script could not be read
    #[error("failed to read {path}: {source}")]
    SourceRead {
        /// Script path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Working directory is missing
    #[error("working directory does not exist: {0}")]
    MissingWorkingDirectory(PathBuf),

    /// Request shape is inconsistent
    #[error("malformed request: {0}")]
    InvalidShape(String),
}
