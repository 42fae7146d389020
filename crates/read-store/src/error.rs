use common::AggregateKind;
use thiserror::Error;

/// Errors that can occur when interacting with the read store.
#[derive(Debug, Error)]
pub enum ReadStoreError {
    /// A concurrency conflict occurred when saving a snapshot.
    /// The stored version did not match the version the writer read.
    #[error(
        "Concurrency conflict for {kind} {id}: expected version {expected:?}, found {actual:?}"
    )]
    ConcurrencyConflict {
        kind: AggregateKind,
        id: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// The store refused the call. Only raised by the in-memory store.
    #[error("Read store unavailable")]
    Unavailable,

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReadStoreError {
    /// Returns true for errors that a retry of the same write may resolve.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ReadStoreError::Serialization(_))
    }
}

/// Result type for read store operations.
pub type Result<T> = std::result::Result<T, ReadStoreError>;
