//! Product snapshot and its transition function.

use chrono::{DateTime, Utc};
use common::{AggregateKind, OrderingToken, ProductId, Tag};
use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateSnapshot, CacheTarget, Decision, Effect, Projected, guard};
use crate::error::DomainError;
use crate::events::{ProductChange, ProductEvent, ProductTagEvent};

/// A tag attached to a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductTag {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    pub value: String,
}

impl ProductTag {
    pub fn new(id: impl Into<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    /// True when this tag satisfies a search criterion.
    pub fn matches(&self, criterion: &Tag) -> bool {
        self.name == criterion.name && self.value == criterion.value
    }

    /// Fills in a deterministic id when the producer omitted one, so that
    /// replays and removals address the same tag.
    fn with_resolved_id(mut self) -> Self {
        if self.id.is_empty() {
            self.id = format!("{}:{}", self.name, self.value);
        }
        self
    }
}

/// Read-side snapshot of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub tags: Vec<ProductTag>,
    pub current_inventory: i64,
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    pub last_event: OrderingToken,
    /// Inventory events arrive on their own topic and are ordered separately.
    #[serde(default)]
    pub inventory_event: Option<OrderingToken>,
}

impl Product {
    /// True when every criterion is matched by at least one tag.
    pub fn has_all_tags<'a>(&self, criteria: impl IntoIterator<Item = &'a Tag>) -> bool {
        criteria
            .into_iter()
            .all(|criterion| self.tags.iter().any(|tag| tag.matches(criterion)))
    }

    /// Computes the next snapshot for `change`, or a stale decision.
    ///
    /// Pure: performs no I/O. `current` is what the read store holds now.
    pub fn project(
        current: Option<&Product>,
        change: &ProductChange,
        token: OrderingToken,
    ) -> Result<Decision<Product>, DomainError> {
        let existing = match (change, current) {
            (ProductChange::Created(event), None) => {
                return Ok(apply(None, created(event, token), false));
            }
            (_, Some(existing)) => existing,
            (_, None) => {
                return Err(DomainError::MissingAggregate {
                    kind: AggregateKind::Product,
                    id: change.product_id().to_string(),
                });
            }
        };

        let stored = match change {
            ProductChange::InventoryUpdated(_) => existing.inventory_event,
            _ => Some(existing.last_event),
        };
        if let Some(stored) = stored
            && let Some(stale) = guard(stored, token)
        {
            return Ok(stale);
        }

        let mut next = existing.clone();
        let tags_changed = match change {
            ProductChange::Created(event) => {
                next.sku = event.sku.clone();
                next.name = event.name.clone();
                next.description = event.description.clone();
                next.price = event.price;
                next.tags = resolve_tags(&event.tags);
                true
            }
            ProductChange::Updated(event) => {
                next.name = event.name.clone();
                next.description = event.description.clone();
                next.price = event.price;
                false
            }
            ProductChange::TagAdded(event) => {
                let tag = tag_from_event(event);
                match next.tags.iter_mut().find(|t| t.id == tag.id) {
                    Some(slot) => *slot = tag,
                    None => next.tags.push(tag),
                }
                true
            }
            ProductChange::TagRemoved(event) => {
                let id = tag_from_event(event).id;
                next.tags.retain(|t| t.id != id);
                true
            }
            ProductChange::InventoryUpdated(event) => {
                next.current_inventory = event.quantity;
                next.inventory_event = Some(token);
                next.version += 1;
                next.updated_at = next.updated_at.max(token.produced_at);
                return Ok(apply(Some(existing), next, false));
            }
        };

        Ok(apply(Some(existing), next.advance(token), tags_changed))
    }

    fn advance(mut self, token: OrderingToken) -> Self {
        self.version += 1;
        self.last_event = token;
        self.updated_at = self.updated_at.max(token.produced_at);
        self
    }
}

impl AggregateSnapshot for Product {
    fn kind() -> AggregateKind {
        AggregateKind::Product
    }

    fn business_id(&self) -> &str {
        self.product_id.as_str()
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn last_event(&self) -> OrderingToken {
        self.last_event
    }
}

fn created(event: &ProductEvent, token: OrderingToken) -> Product {
    Product {
        product_id: event.product_id.clone(),
        sku: event.sku.clone(),
        name: event.name.clone(),
        description: event.description.clone(),
        price: event.price,
        tags: resolve_tags(&event.tags),
        current_inventory: 0,
        images: Vec::new(),
        created_at: token.produced_at,
        updated_at: token.produced_at,
        version: 1,
        last_event: token,
        inventory_event: None,
    }
}

fn resolve_tags(tags: &[ProductTag]) -> Vec<ProductTag> {
    tags.iter().cloned().map(ProductTag::with_resolved_id).collect()
}

fn tag_from_event(event: &ProductTagEvent) -> ProductTag {
    ProductTag::new(&event.tag_id, &event.tag_name, &event.tag_value).with_resolved_id()
}

/// Builds the effect list for a product write.
///
/// The query family is invalidated when tags changed, or when the product is
/// tagged before or after the write and may therefore sit in cached results.
fn apply(previous: Option<&Product>, next: Product, tags_changed: bool) -> Decision<Product> {
    let searchable = !next.tags.is_empty() || previous.is_some_and(|p| !p.tags.is_empty());

    let mut effects = vec![
        Effect::PersistSnapshot,
        Effect::MirrorUpsert,
        Effect::Invalidate(CacheTarget::Entity(
            AggregateKind::Product,
            next.product_id.to_string(),
        )),
    ];
    if tags_changed || searchable {
        effects.push(Effect::Invalidate(CacheTarget::QueryFamily(
            AggregateKind::Product,
        )));
    }

    Decision::Apply(Projected {
        expected_version: previous.map(|p| p.version),
        snapshot: next,
        effects,
    })
}
