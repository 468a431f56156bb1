//! Ingestion error types

use crate::source::SourceError;
use thiserror::Error;

/// Errors that can occur while loading archives into the store
#[derive(Error, Debug)]
pub enum IngestError {
    /// The source failed on both the fast and the slow path
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// The load was cancelled; callers treat this as a silent stop
    #[error("Load cancelled")]
    Cancelled,

    /// A worker task panicked or was aborted
    #[error("Worker failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(err: tokio::task::JoinError) -> Self {
        IngestError::Join(err.to_string())
    }
}

impl IngestError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestError::Cancelled)
    }
}

/// Result type alias for ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IngestError::from(SourceError::Unavailable("no archive".to_string()));
        assert_eq!(err.to_string(), "Source error: Source unavailable: no archive");
        assert!(!err.is_cancelled());
        assert!(IngestError::Cancelled.is_cancelled());
    }
}
