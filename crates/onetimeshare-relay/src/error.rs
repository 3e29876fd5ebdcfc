//! Relay error types

use thiserror::Error;

use crate::codec::CodecError;
use crate::storage::StoreError;

/// Result type alias
pub type Result<T> = std::result::Result<T, RelayError>;

/// Relay errors
///
/// `NotFound`, `RateLimited` and `Validation` are expected outcomes that map
/// straight to a caller-visible response. `StorageUnavailable` is an
/// infrastructure fault and is never retried inside the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Secret never existed, was already consumed, or has expired
    #[error("Secret not found or already read")]
    NotFound,

    /// Admission controller rejected the request
    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds until the current window rolls over
        retry_after_secs: u64,
    },

    /// Store unreachable, timed out, or returned something unusable
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),
}

impl RelayError {
    /// HTTP-equivalent status code for the outer routing layer
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::NotFound => 404,
            RelayError::RateLimited { .. } => 429,
            RelayError::StorageUnavailable(_) => 503,
            RelayError::Validation(_) => 400,
        }
    }

    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::RateLimited { .. } | RelayError::StorageUnavailable(_)
        )
    }
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        RelayError::StorageUnavailable(err.to_string())
    }
}

impl From<CodecError> for RelayError {
    fn from(err: CodecError) -> Self {
        RelayError::StorageUnavailable(format!("corrupt record: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(RelayError::NotFound.status_code(), 404);
        assert_eq!(
            RelayError::RateLimited { retry_after_secs: 3 }.status_code(),
            429
        );
        assert_eq!(
            RelayError::StorageUnavailable("down".into()).status_code(),
            503
        );
        assert_eq!(RelayError::Validation("bad".into()).status_code(), 400);
    }

    #[test]
    fn test_retryable() {
        assert!(RelayError::RateLimited { retry_after_secs: 1 }.is_retryable());
        assert!(RelayError::StorageUnavailable("x".into()).is_retryable());
        assert!(!RelayError::NotFound.is_retryable());
        assert!(!RelayError::Validation("x".into()).is_retryable());
    }

    #[test]
    fn test_store_error_maps_to_unavailable() {
        let err: RelayError = StoreError::Connection("refused".into()).into();
        assert!(matches!(err, RelayError::StorageUnavailable(_)));
        assert!(err.to_string().contains("refused"));
    }
}
