//! View error types

use crate::query::QueryError;
use thiserror::Error;

/// Errors raised while regenerating a view
#[derive(Error, Debug)]
pub enum ViewError {
    /// Query text could not be parsed
    #[error("Invalid query: {0}")]
    Query(#[from] QueryError),

    /// A batch worker panicked or was aborted
    #[error("Filter worker failed: {0}")]
    Worker(String),
}

impl From<tokio::task::JoinError> for ViewError {
    fn from(err: tokio::task::JoinError) -> Self {
        ViewError::Worker(err.to_string())
    }
}

/// Result type alias for view operations
pub type ViewResult<T> = Result<T, ViewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_conversion() {
        let err: ViewError = QueryError::Parse("unexpected `)`".to_string()).into();
        assert!(matches!(err, ViewError::Query(_)));
        assert!(err.to_string().starts_with("Invalid query"));
    }
}
