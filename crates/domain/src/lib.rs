//! Domain layer of the catalog read side.
//!
//! This crate provides:
//! - Event payloads published by the command side and their decoding
//! - Product and order snapshots
//! - Pure transition functions that turn (snapshot, event) into a
//!   [`Decision`]: either a stale no-op or a new snapshot plus side effects

pub mod aggregate;
pub mod error;
pub mod events;
pub mod order;
pub mod product;

pub use aggregate::{AggregateSnapshot, CacheTarget, Decision, DomainEvent, Effect, Projected};
pub use error::DomainError;
pub use events::{
    CatalogEvent, EventKind, InventoryEvent, OrderChange, OrderEvent, ProductChange,
    ProductEvent, ProductTagEvent,
};
pub use order::{Order, OrderItem};
pub use product::{Product, ProductTag};
