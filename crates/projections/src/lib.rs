//! Read-side projections.
//!
//! - [`ProjectionEngine`] applies decoded events to the read store, search
//!   mirror and cache
//! - [`EventDispatcher`] routes log messages to the engine by topic and type
//! - [`ConsumerGroup`] drives the dispatcher over a partitioned [`MessageLog`]
//! - [`Reconciler`] repairs search mirror drift
//! - `KafkaLog` (feature `kafka`) reads the log from a Kafka cluster

pub mod consumer;
pub mod dispatcher;
pub mod engine;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod reconciler;

pub use consumer::{
    ConsumerGroup, ConsumerSettings, InMemoryLog, LogMessage, MessageLog, PartitionId,
};
pub use dispatcher::{DispatchOutcome, EventDispatcher, TopicConfig};
pub use engine::{ProjectionEngine, ProjectionOutcome};
pub use error::{ConsumerError, DispatchError, ProjectionError, Result};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaLog, KafkaLogConfig};
pub use reconciler::{Reconciler, SweepReport};
