//! Applies decoded events to the read store, search mirror and cache.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cache::{Cache, KeySpace};
use common::OrderingToken;
use domain::{
    CacheTarget, CatalogEvent, Decision, DomainEvent, Effect, Order, OrderChange, Product,
    ProductChange,
};
use read_store::ReadStore;
use search::SearchMirror;
use tracing::Span;

use crate::{ProjectionError, Result};

pub(crate) const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionOutcome {
    /// The snapshot was written.
    Applied,
    /// The stored snapshot already reflects this event or a later one.
    Stale,
}

/// Awaits a store call, failing with `Timeout` once `after` elapses.
pub(crate) async fn bounded<T, E, F>(
    operation: &'static str,
    after: Duration,
    call: F,
) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    ProjectionError: From<E>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ProjectionError::Timeout { operation, after }),
    }
}

/// Runs transitions and their side effects.
///
/// For each event the read store write commits first. Mirror upserts and
/// cache invalidations follow and only log on failure.
#[derive(Clone)]
pub struct ProjectionEngine {
    store: Arc<dyn ReadStore>,
    mirror: Arc<dyn SearchMirror>,
    cache: Arc<dyn Cache>,
    keys: KeySpace,
    timeout: Duration,
    span: Span,
}

impl ProjectionEngine {
    pub fn new(
        store: Arc<dyn ReadStore>,
        mirror: Arc<dyn SearchMirror>,
        cache: Arc<dyn Cache>,
        keys: KeySpace,
    ) -> Self {
        Self {
            store,
            mirror,
            cache,
            keys,
            timeout: DEFAULT_STORE_TIMEOUT,
            span: tracing::info_span!("projection_engine"),
        }
    }

    /// Bounds every backend call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Parent span for everything this engine logs.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Projects one event. `token` orders it against what is stored.
    pub async fn apply(
        &self,
        event: &CatalogEvent,
        token: OrderingToken,
    ) -> Result<ProjectionOutcome> {
        match event {
            CatalogEvent::Product(change) => self.apply_product(change, token).await,
            CatalogEvent::Order(change) => self.apply_order(change, token).await,
        }
    }

    async fn apply_product(
        &self,
        change: &ProductChange,
        token: OrderingToken,
    ) -> Result<ProjectionOutcome> {
        let current = bounded(
            "load product",
            self.timeout,
            self.store.get_product(change.product_id()),
        )
        .await?;

        let projected = match Product::project(current.as_ref(), change, token)? {
            Decision::Stale { stored, incoming } => {
                return Ok(self.stale(change, stored, incoming));
            }
            Decision::Apply(projected) => projected,
        };

        let product = &projected.snapshot;
        for effect in &projected.effects {
            match effect {
                Effect::PersistSnapshot => {
                    bounded(
                        "save product",
                        self.timeout,
                        self.store.save_product(product, projected.expected_version),
                    )
                    .await?
                }
                Effect::MirrorUpsert => self.mirror_product(product).await,
                Effect::Invalidate(target) => self.invalidate(target).await,
            }
        }

        Ok(self.applied(change, product.version))
    }

    async fn apply_order(
        &self,
        change: &OrderChange,
        token: OrderingToken,
    ) -> Result<ProjectionOutcome> {
        let current = bounded(
            "load order",
            self.timeout,
            self.store.get_order(change.order_id()),
        )
        .await?;

        let projected = match Order::project(current.as_ref(), change, token)? {
            Decision::Stale { stored, incoming } => {
                return Ok(self.stale(change, stored, incoming));
            }
            Decision::Apply(projected) => projected,
        };

        let order = &projected.snapshot;
        for effect in &projected.effects {
            match effect {
                Effect::PersistSnapshot => {
                    bounded(
                        "save order",
                        self.timeout,
                        self.store.save_order(order, projected.expected_version),
                    )
                    .await?
                }
                // Orders are not searchable
                Effect::MirrorUpsert => {}
                Effect::Invalidate(target) => self.invalidate(target).await,
            }
        }

        Ok(self.applied(change, order.version))
    }

    async fn mirror_product(&self, product: &Product) {
        if let Err(e) = bounded("mirror product", self.timeout, self.mirror.upsert(product)).await {
            tracing::error!(
                parent: &self.span,
                product_id = %product.product_id,
                version = product.version,
                error = %e,
                "Failed to mirror product snapshot"
            );
        }
    }

    async fn invalidate(&self, target: &CacheTarget) {
        let result = match target {
            CacheTarget::Entity(kind, id) => {
                let key = self.keys.entity(*kind, id);
                bounded("invalidate key", self.timeout, self.cache.invalidate(&key))
                    .await
                    .map(|()| 1)
            }
            CacheTarget::QueryFamily(kind) => {
                let family = self.keys.query_family(*kind);
                bounded(
                    "invalidate family",
                    self.timeout,
                    self.cache.invalidate_family(&family),
                )
                .await
            }
        };

        match result {
            Ok(removed) => {
                tracing::trace!(
                    parent: &self.span,
                    cache_target = ?target,
                    removed,
                    "Cache invalidated"
                );
            }
            Err(e) => {
                tracing::warn!(
                    parent: &self.span,
                    cache_target = ?target,
                    error = %e,
                    "Failed to invalidate cache"
                );
            }
        }
    }

    fn applied(&self, event: &impl DomainEvent, version: u64) -> ProjectionOutcome {
        metrics::counter!("projection_events_applied", "event_type" => event.event_type())
            .increment(1);
        tracing::debug!(
            parent: &self.span,
            event_type = event.event_type(),
            aggregate_id = event.aggregate_id(),
            version,
            "Event applied"
        );
        ProjectionOutcome::Applied
    }

    fn stale(
        &self,
        event: &impl DomainEvent,
        stored: OrderingToken,
        incoming: OrderingToken,
    ) -> ProjectionOutcome {
        metrics::counter!("projection_events_stale", "event_type" => event.event_type())
            .increment(1);
        tracing::debug!(
            parent: &self.span,
            event_type = event.event_type(),
            aggregate_id = event.aggregate_id(),
            %stored,
            %incoming,
            "Skipping stale event"
        );
        ProjectionOutcome::Stale
    }
}
