//! Error types for the caching layer
//!
//! Provides unified error handling using thiserror.
//!
//! Runtime backend failures never cross the [`crate::cache::Cache`] trait:
//! they are absorbed at the backend boundary into a no-op or a miss. Only
//! constructors surface errors, because a misconfigured backend can never
//! succeed later.

use thiserror::Error;

use crate::cache::CodecError;

// == Cache Error Enum ==
/// Unified error type for the caching layer.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Required connection target or document source missing or invalid at
    /// construction time. Always fatal.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Backend unreachable or timed out (network-class failure).
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Backend rejected or failed an operation for a reason other than
    /// connectivity.
    #[error("Backend failure: {0}")]
    Backend(String),

    /// A stored entry could not be decoded.
    #[error("Corrupt cache entry: {0}")]
    Corrupt(#[from] CodecError),

    /// Content encoding not supported by the re-encoding constructor.
    #[error("Unsupported content encoding: {0}")]
    UnsupportedEncoding(String),
}

impl CacheError {
    // == Is Connectivity ==
    /// Returns true for network-class failures that should flip a backend's
    /// link state rather than be logged per call.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, CacheError::Unavailable(_))
    }
}

// == SQL Error Mapping ==
impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                CacheError::Unavailable(err.to_string())
            }
            other => CacheError::Backend(other.to_string()),
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the caching layer.
pub type Result<T> = std::result::Result<T, CacheError>;

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_is_connectivity() {
        let err = CacheError::Unavailable("connection refused".to_string());
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_backend_is_not_connectivity() {
        let err = CacheError::Backend("constraint violation".to_string());
        assert!(!err.is_connectivity());
    }

    #[test]
    fn test_pool_timeout_maps_to_unavailable() {
        let err: CacheError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, CacheError::Unavailable(_)));
    }

    #[test]
    fn test_row_not_found_maps_to_backend() {
        let err: CacheError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CacheError::Backend(_)));
    }
}
