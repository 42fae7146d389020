//! Core snapshot and domain event traits, plus the projection decision types.

use common::{AggregateKind, OrderingToken};
use serde::{Serialize, de::DeserializeOwned};

/// Trait for decoded domain events.
///
/// Domain events are facts produced by the command side. They are immutable
/// and named in past tense.
pub trait DomainEvent: Send + Sync + Clone {
    /// Returns the event type name carried in the message key.
    fn event_type(&self) -> &'static str;

    /// Returns the business id of the aggregate the event targets.
    fn aggregate_id(&self) -> &str;
}

/// Trait for read-side aggregate snapshots.
///
/// A snapshot is the fully projected, read-optimized state of one aggregate.
/// Only the projection engine produces snapshots; readers never mutate them.
pub trait AggregateSnapshot: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The aggregate type of this snapshot.
    fn kind() -> AggregateKind;

    /// Returns the stable business id.
    fn business_id(&self) -> &str;

    /// Number of events applied so far. Starts at 1 after creation.
    fn version(&self) -> u64;

    /// Ordering token of the last applied event.
    fn last_event(&self) -> OrderingToken;
}

/// A cache entry (or family of entries) made stale by a projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheTarget {
    /// The point-lookup entry of one aggregate.
    Entity(AggregateKind, String),
    /// Every search result cached for an aggregate type.
    QueryFamily(AggregateKind),
}

/// A side effect requested by a transition, applied by the engine in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Persist the new snapshot to the read store. Always first.
    PersistSnapshot,
    /// Upsert the new snapshot into the search mirror.
    MirrorUpsert,
    /// Invalidate cache entries after the snapshot is persisted.
    Invalidate(CacheTarget),
}

/// A snapshot produced by a transition together with its side effects.
#[derive(Debug, Clone)]
pub struct Projected<T> {
    pub snapshot: T,
    /// Version the stored snapshot must still have when the new one is
    /// written. `None` means the snapshot must not exist yet.
    pub expected_version: Option<u64>,
    pub effects: Vec<Effect>,
}

/// Result of running a transition function.
#[derive(Debug, Clone)]
pub enum Decision<T> {
    /// The event is newer than the stored state and produced a new snapshot.
    Apply(Projected<T>),
    /// The event is not newer than what is already stored.
    Stale {
        stored: OrderingToken,
        incoming: OrderingToken,
    },
}

impl<T> Decision<T> {
    pub fn is_stale(&self) -> bool {
        matches!(self, Decision::Stale { .. })
    }
}

/// Returns a stale decision when `incoming` does not supersede `stored`.
pub(crate) fn guard<T>(stored: OrderingToken, incoming: OrderingToken) -> Option<Decision<T>> {
    if incoming.supersedes(&stored) {
        None
    } else {
        Some(Decision::Stale { stored, incoming })
    }
}
