//! Error types for Memoric

use thiserror::Error;

/// Result type alias for Memoric operations
pub type Result<T> = std::result::Result<T, MemoricError>;

/// Main error type for Memoric
#[derive(Error, Debug)]
pub enum MemoricError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    #[error("Scope unauthorized: {0}")]
    ScopeUnauthorized(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Dependency failure: {0}")]
    DependencyFailure(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MemoricError {
    /// Stable error kind identifier, per the error handling design.
    pub fn kind(&self) -> &'static str {
        match self {
            MemoricError::Database(_) => "Internal",
            MemoricError::Serialization(_) => "Internal",
            MemoricError::Storage(_) => "Internal",
            MemoricError::InvalidArgument(_) => "InvalidArgument",
            MemoricError::NotFound(_) => "NotFound",
            MemoricError::StorageConflict(_) => "StorageConflict",
            MemoricError::ScopeUnauthorized(_) => "ScopeUnauthorized",
            MemoricError::Timeout(_) => "Timeout",
            MemoricError::DependencyFailure(_) => "DependencyFailure",
            MemoricError::Internal(_) => "Internal",
        }
    }

    /// Whether a caller could reasonably retry this operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MemoricError::Timeout(_) | MemoricError::StorageConflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_for_domain_variants() {
        assert_eq!(
            MemoricError::InvalidArgument("x".into()).kind(),
            "InvalidArgument"
        );
        assert_eq!(MemoricError::NotFound("x".into()).kind(), "NotFound");
        assert_eq!(
            MemoricError::ScopeUnauthorized("x".into()).kind(),
            "ScopeUnauthorized"
        );
    }

    #[test]
    fn timeout_and_conflict_are_retryable() {
        assert!(MemoricError::Timeout("x".into()).is_retryable());
        assert!(MemoricError::StorageConflict("x".into()).is_retryable());
        assert!(!MemoricError::NotFound("x".into()).is_retryable());
    }
}
