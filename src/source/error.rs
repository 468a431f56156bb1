//! Source error types

use thiserror::Error;

/// Errors raised by a log source
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// Archive or API missing or incompatible
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// Reading the archive failed
    #[error("IO error: {0}")]
    Io(String),

    /// A record in the archive could not be decoded
    #[error("Malformed record at line {line}: {error}")]
    Malformed { line: usize, error: String },

    /// A stream broke off before completing
    #[error("Stream error: {0}")]
    Stream(String),
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::Io(err.to_string())
    }
}

/// Result type alias for source operations
pub type SourceResult<T> = Result<T, SourceError>;
