//! Query error types
//!
//! Evaluation itself never fails; these cover parsing query text and
//! persisting saved queries.

use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// Query text could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Saved query list could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key-value store failure
    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// Filesystem failure while opening the store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No saved query with this name
    #[error("Saved query not found: {0}")]
    NotFound(String),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
