//! Routes log messages to the projection engine.

use common::OrderingToken;
use domain::{CatalogEvent, EventKind};
use tracing::Span;

use crate::consumer::LogMessage;
use crate::engine::{ProjectionEngine, ProjectionOutcome};
use crate::error::DispatchError;

/// Topic names per event family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    pub product: String,
    pub inventory: String,
    pub order: String,
}

impl TopicConfig {
    pub fn new(
        product: impl Into<String>,
        inventory: impl Into<String>,
        order: impl Into<String>,
    ) -> Self {
        Self {
            product: product.into(),
            inventory: inventory.into(),
            order: order.into(),
        }
    }

    /// The topic `kind` is expected on.
    pub fn topic_for(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::ProductCreated
            | EventKind::ProductUpdated
            | EventKind::ProductTagAdded
            | EventKind::ProductTagRemoved => &self.product,
            EventKind::InventoryUpdated => &self.inventory,
            EventKind::OrderCreated => &self.order,
        }
    }

    pub fn all(&self) -> [&str; 3] {
        [&self.product, &self.inventory, &self.order]
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self::new("products", "inventory", "orders")
    }
}

/// What the dispatcher did with a message. Every outcome may be committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied,
    Stale,
    /// Unknown topic or event type.
    Ignored,
    /// The message can never be decoded.
    Poisoned,
}

impl From<ProjectionOutcome> for DispatchOutcome {
    fn from(outcome: ProjectionOutcome) -> Self {
        match outcome {
            ProjectionOutcome::Applied => DispatchOutcome::Applied,
            ProjectionOutcome::Stale => DispatchOutcome::Stale,
        }
    }
}

/// Decodes messages and hands them to the projection engine.
#[derive(Clone)]
pub struct EventDispatcher {
    engine: ProjectionEngine,
    topics: TopicConfig,
    span: Span,
}

impl EventDispatcher {
    pub fn new(engine: ProjectionEngine, topics: TopicConfig) -> Self {
        Self {
            engine,
            topics,
            span: tracing::info_span!("event_dispatcher"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn topics(&self) -> &TopicConfig {
        &self.topics
    }

    /// Handles one message.
    ///
    /// `Err` means the message must not be committed and will be redelivered.
    #[tracing::instrument(
        skip(self, message),
        fields(topic = %message.topic, position = %message.position)
    )]
    pub async fn dispatch(&self, message: &LogMessage) -> Result<DispatchOutcome, DispatchError> {
        let Ok(key) = std::str::from_utf8(&message.key) else {
            return Ok(self.poisoned(message, "message key is not UTF-8"));
        };

        let Some(kind) = EventKind::from_key(key) else {
            return Ok(self.ignored(message, key, "unknown event type"));
        };

        if !self.topics.all().contains(&message.topic.as_str()) {
            return Ok(self.ignored(message, key, "unknown topic"));
        }
        if self.topics.topic_for(kind) != message.topic {
            return Ok(self.ignored(message, key, "event type not expected on this topic"));
        }

        let event = match CatalogEvent::decode(kind, &message.payload) {
            Ok(event) => event,
            Err(e) => return Ok(self.poisoned(message, &e.to_string())),
        };

        // The log timestamp wins over any timestamp inside the payload
        let token = OrderingToken::new(message.produced_at, message.position);
        let outcome = self.engine.apply(&event, token).await?;
        Ok(outcome.into())
    }

    fn ignored(&self, message: &LogMessage, key: &str, reason: &str) -> DispatchOutcome {
        metrics::counter!("dispatcher_messages_ignored").increment(1);
        tracing::warn!(
            parent: &self.span,
            topic = %message.topic,
            event_type = key,
            reason,
            "Ignoring message"
        );
        DispatchOutcome::Ignored
    }

    fn poisoned(&self, message: &LogMessage, reason: &str) -> DispatchOutcome {
        metrics::counter!("dispatcher_messages_poisoned").increment(1);
        tracing::error!(
            parent: &self.span,
            topic = %message.topic,
            partition = %message.partition,
            position = %message.position,
            reason,
            "Dropping poison message"
        );
        DispatchOutcome::Poisoned
    }
}
