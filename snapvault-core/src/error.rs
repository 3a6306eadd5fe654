//! Error types for SnapVault

use thiserror::Error;

/// Result type alias for archive operations
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Archive error types
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// IO operation on the underlying store failed
    #[error("store error: {0}")]
    Store(#[from] std::io::Error),

    /// Snapshot schema is invalid or incompatible with the archive
    #[error("schema error: {0}")]
    Schema(String),

    /// Two snapshot rows share a primary key
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Document rows arrived out of the required sort order
    #[error("unsorted input: {0}")]
    UnsortedInput(String),

    /// Checkout or rollback of a version that is not in the archive
    #[error("unknown version: {0}")]
    Version(u64),

    /// An archive invariant was violated
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Malformed record in the persisted archive
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Malformed snapshot document input
    #[error("document error: {0}")]
    Document(String),
}

impl ArchiveError {
    /// Check if the error was caused by invalid caller input rather than by
    /// the archive itself
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ArchiveError::Schema(_)
                | ArchiveError::DuplicateKey(_)
                | ArchiveError::UnsortedInput(_)
                | ArchiveError::Version(_)
                | ArchiveError::Document(_)
        )
    }

    /// Check if the error indicates a corrupted archive
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ArchiveError::Integrity(_) | ArchiveError::Serialization(_)
        )
    }
}
