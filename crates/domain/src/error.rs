//! Domain error types.

use common::AggregateKind;
use thiserror::Error;

/// Errors that can occur while running a transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// A mutation arrived for an aggregate the read store does not hold yet.
    ///
    /// Usually the create event is still in flight on another partition, so
    /// the event is worth redelivering.
    #[error("Aggregate not found: {kind} with id {id}")]
    MissingAggregate { kind: AggregateKind, id: String },
}
