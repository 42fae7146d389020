//! Projection error types.

use std::time::Duration;

use thiserror::Error;

use crate::consumer::PartitionId;

/// Errors that can occur while projecting an event.
///
/// Read store, domain and timeout errors fail the event so the message is
/// redelivered. The engine only logs mirror and cache errors.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// An error occurred in the read store.
    #[error("Read store error: {0}")]
    ReadStore(#[from] read_store::ReadStoreError),

    /// The transition rejected the event.
    #[error("Domain error: {0}")]
    Domain(#[from] domain::DomainError),

    /// An error occurred in the search mirror.
    #[error("Search mirror error: {0}")]
    Search(#[from] search::SearchError),

    /// An error occurred in the cache.
    #[error("Cache error: {0}")]
    Cache(#[from] cache::CacheError),

    /// A store call did not finish in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

/// Errors raised while dispatching a message.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// Errors raised by a message log.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Unknown partition: {0}")]
    UnknownPartition(PartitionId),

    #[error("Cannot commit {partition} at {position}: beyond the last message")]
    CommitOutOfRange {
        partition: PartitionId,
        position: common::LogPosition,
    },

    #[error("Message log error: {0}")]
    Log(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
