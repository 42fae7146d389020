//! Order snapshot and its transition function.

use chrono::{DateTime, Utc};
use common::{AggregateKind, OrderId, OrderingToken};
use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateSnapshot, CacheTarget, Decision, Effect, Projected, guard};
use crate::error::DomainError;
use crate::events::{OrderChange, OrderEvent};

/// A line item of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub sku: String,
    pub quantity: i64,
    pub unit_price: f64,
    #[serde(default)]
    pub total_price: f64,
}

/// Read-side snapshot of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: OrderId,
    pub order_number: String,
    pub total_amount: f64,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    pub last_event: OrderingToken,
}

impl Order {
    /// Computes the next snapshot for `change`, or a stale decision.
    pub fn project(
        current: Option<&Order>,
        change: &OrderChange,
        token: OrderingToken,
    ) -> Result<Decision<Order>, DomainError> {
        let OrderChange::Created(event) = change;

        let next = match current {
            None => created(event, token),
            Some(existing) => {
                if let Some(stale) = guard(existing.last_event, token) {
                    return Ok(stale);
                }
                Order {
                    version: existing.version + 1,
                    created_at: existing.created_at,
                    updated_at: existing.updated_at.max(token.produced_at),
                    ..created(event, token)
                }
            }
        };

        Ok(Decision::Apply(Projected {
            expected_version: current.map(|o| o.version),
            effects: vec![
                Effect::PersistSnapshot,
                Effect::Invalidate(CacheTarget::Entity(
                    AggregateKind::Order,
                    next.order_id.to_string(),
                )),
            ],
            snapshot: next,
        }))
    }
}

impl AggregateSnapshot for Order {
    fn kind() -> AggregateKind {
        AggregateKind::Order
    }

    fn business_id(&self) -> &str {
        self.order_id.as_str()
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn last_event(&self) -> OrderingToken {
        self.last_event
    }
}

fn created(event: &OrderEvent, token: OrderingToken) -> Order {
    Order {
        order_id: event.order_id.clone(),
        order_number: event.order_number.clone(),
        total_amount: event.total_amount,
        items: event.items.clone(),
        created_at: token.produced_at,
        updated_at: token.produced_at,
        version: 1,
        last_event: token,
    }
}
