//! Event payloads published by the command side.

use common::{AggregateKind, OrderId, ProductId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::order::OrderItem;
use crate::product::ProductTag;

/// The event types the read side understands.
///
/// The type travels out-of-band in the message key, e.g. `"ProductCreated"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ProductCreated,
    ProductUpdated,
    ProductTagAdded,
    ProductTagRemoved,
    InventoryUpdated,
    OrderCreated,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::ProductCreated,
        EventKind::ProductUpdated,
        EventKind::ProductTagAdded,
        EventKind::ProductTagRemoved,
        EventKind::InventoryUpdated,
        EventKind::OrderCreated,
    ];

    /// Parses the message key literal. Unknown literals yield `None`.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == key)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ProductCreated => "ProductCreated",
            EventKind::ProductUpdated => "ProductUpdated",
            EventKind::ProductTagAdded => "ProductTagAdded",
            EventKind::ProductTagRemoved => "ProductTagRemoved",
            EventKind::InventoryUpdated => "InventoryUpdated",
            EventKind::OrderCreated => "OrderCreated",
        }
    }

    /// The aggregate type this event mutates.
    pub fn aggregate(&self) -> AggregateKind {
        match self {
            EventKind::OrderCreated => AggregateKind::Order,
            _ => AggregateKind::Product,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of ProductCreated and ProductUpdated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductEvent {
    #[serde(alias = "id")]
    pub product_id: ProductId,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub tags: Vec<ProductTag>,
}

/// Payload of ProductTagAdded and ProductTagRemoved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductTagEvent {
    #[serde(alias = "id")]
    pub product_id: ProductId,
    #[serde(default)]
    pub tag_id: String,
    #[serde(default, alias = "name")]
    pub tag_name: String,
    #[serde(default, alias = "value")]
    pub tag_value: String,
}

/// Payload of InventoryUpdated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEvent {
    #[serde(default)]
    pub inventory_id: String,
    pub product_id: ProductId,
    pub quantity: i64,
    #[serde(default)]
    pub version: i64,
}

/// Payload of OrderCreated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    #[serde(alias = "id")]
    pub order_id: OrderId,
    #[serde(default)]
    pub order_number: String,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

/// A decoded mutation of a product.
#[derive(Debug, Clone, PartialEq)]
pub enum ProductChange {
    Created(ProductEvent),
    Updated(ProductEvent),
    TagAdded(ProductTagEvent),
    TagRemoved(ProductTagEvent),
    InventoryUpdated(InventoryEvent),
}

impl ProductChange {
    pub fn product_id(&self) -> &ProductId {
        match self {
            ProductChange::Created(e) | ProductChange::Updated(e) => &e.product_id,
            ProductChange::TagAdded(e) | ProductChange::TagRemoved(e) => &e.product_id,
            ProductChange::InventoryUpdated(e) => &e.product_id,
        }
    }
}

impl DomainEvent for ProductChange {
    fn event_type(&self) -> &'static str {
        match self {
            ProductChange::Created(_) => EventKind::ProductCreated.as_str(),
            ProductChange::Updated(_) => EventKind::ProductUpdated.as_str(),
            ProductChange::TagAdded(_) => EventKind::ProductTagAdded.as_str(),
            ProductChange::TagRemoved(_) => EventKind::ProductTagRemoved.as_str(),
            ProductChange::InventoryUpdated(_) => EventKind::InventoryUpdated.as_str(),
        }
    }

    fn aggregate_id(&self) -> &str {
        self.product_id().as_str()
    }
}

/// A decoded mutation of an order.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderChange {
    Created(OrderEvent),
}

impl OrderChange {
    pub fn order_id(&self) -> &OrderId {
        match self {
            OrderChange::Created(e) => &e.order_id,
        }
    }
}

impl DomainEvent for OrderChange {
    fn event_type(&self) -> &'static str {
        match self {
            OrderChange::Created(_) => EventKind::OrderCreated.as_str(),
        }
    }

    fn aggregate_id(&self) -> &str {
        self.order_id().as_str()
    }
}

/// Any decoded event, ready for the projection engine.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEvent {
    Product(ProductChange),
    Order(OrderChange),
}

impl CatalogEvent {
    /// Decodes a JSON payload for the given event type.
    pub fn decode(kind: EventKind, payload: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EventKind::ProductCreated => {
                CatalogEvent::Product(ProductChange::Created(serde_json::from_slice(payload)?))
            }
            EventKind::ProductUpdated => {
                CatalogEvent::Product(ProductChange::Updated(serde_json::from_slice(payload)?))
            }
            EventKind::ProductTagAdded => {
                CatalogEvent::Product(ProductChange::TagAdded(serde_json::from_slice(payload)?))
            }
            EventKind::ProductTagRemoved => {
                CatalogEvent::Product(ProductChange::TagRemoved(serde_json::from_slice(payload)?))
            }
            EventKind::InventoryUpdated => CatalogEvent::Product(ProductChange::InventoryUpdated(
                serde_json::from_slice(payload)?,
            )),
            EventKind::OrderCreated => {
                CatalogEvent::Order(OrderChange::Created(serde_json::from_slice(payload)?))
            }
        })
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            CatalogEvent::Product(change) => change.event_type(),
            CatalogEvent::Order(change) => change.event_type(),
        }
    }

    pub fn aggregate_id(&self) -> &str {
        match self {
            CatalogEvent::Product(change) => change.aggregate_id(),
            CatalogEvent::Order(change) => change.aggregate_id(),
        }
    }
}
