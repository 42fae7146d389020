use std::sync::Arc;
use std::time::Duration;

use common::{AggregateKind, TagParseError};
use thiserror::Error;

/// Errors returned to query callers.
///
/// `Clone` so one single-flight result can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// The aggregate does not exist. An expected outcome, not a failure.
    #[error("{kind} not found: {id}")]
    NotFound { kind: AggregateKind, id: String },

    #[error("Invalid tags: {0}")]
    InvalidTags(#[from] TagParseError),

    #[error("Read store error: {0}")]
    ReadStore(Arc<read_store::ReadStoreError>),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Encoding error: {0}")]
    Encoding(Arc<serde_json::Error>),
}

impl QueryError {
    /// True for errors caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, QueryError::NotFound { .. } | QueryError::InvalidTags(_))
    }
}

impl From<read_store::ReadStoreError> for QueryError {
    fn from(e: read_store::ReadStoreError) -> Self {
        QueryError::ReadStore(Arc::new(e))
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(e: serde_json::Error) -> Self {
        QueryError::Encoding(Arc::new(e))
    }
}

/// Result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;
