use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cache::{Cache, CacheFamily, CacheKey, Generation, KeySpace};
use common::{AggregateKind, OrderId, ProductId, SearchPage, TagSet};
use domain::{Order, Product};
use read_store::ReadStore;
use search::SearchMirror;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::Span;

use crate::{QueryError, Result, SingleFlight};

/// Tuning for the query path.
#[derive(Debug, Clone)]
pub struct QuerySettings {
    /// Lifetime of populated cache entries.
    pub cache_ttl: Duration,
    /// Upper bound for every backend call.
    pub store_timeout: Duration,
    /// Maximum items per search page.
    pub search_limit: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            store_timeout: Duration::from_secs(5),
            search_limit: 100,
        }
    }
}

/// Serves point lookups and tag searches.
///
/// Cache misses for the same key are collapsed into one backend fetch. Cache
/// and search mirror failures degrade to the next source; only read store
/// failures reach the caller.
///
/// A fill is written back only if no invalidation touched the key's family
/// while the backend fetch was in flight. Otherwise a slow fetch could cache
/// a snapshot the projection has already replaced.
pub struct QueryService {
    store: Arc<dyn ReadStore>,
    mirror: Arc<dyn SearchMirror>,
    cache: Arc<dyn Cache>,
    keys: KeySpace,
    settings: QuerySettings,
    products: SingleFlight<Result<Option<Product>>>,
    orders: SingleFlight<Result<Option<Order>>>,
    searches: SingleFlight<Result<SearchPage<Product>>>,
    span: Span,
}

impl QueryService {
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
            settings: QuerySettings::default(),
            products: SingleFlight::new(),
            orders: SingleFlight::new(),
            searches: SingleFlight::new(),
            span: tracing::info_span!("query_service"),
        }
    }

    pub fn with_settings(mut self, settings: QuerySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn settings(&self) -> &QuerySettings {
        &self.settings
    }

    /// Looks up a product by id.
    pub async fn get_product(&self, id: &ProductId) -> Result<Product> {
        let key = self.keys.entity(AggregateKind::Product, id.as_str());
        if let Some(product) = self.cached(&key).await {
            return Ok(product);
        }

        let fetched = self
            .products
            .run(key.as_str(), async {
                if let Some(product) = self.lookup(&key).await {
                    return Ok(Some(product));
                }
                let seen = self.generation(key.family()).await;
                let product = self
                    .bounded("load product", self.store.get_product(id))
                    .await?;
                if let Some(product) = &product {
                    self.populate(&key, product, seen).await;
                }
                Ok(product)
            })
            .await?;

        fetched.ok_or_else(|| QueryError::NotFound {
            kind: AggregateKind::Product,
            id: id.to_string(),
        })
    }

    /// Looks up an order by id.
    pub async fn get_order(&self, id: &OrderId) -> Result<Order> {
        let key = self.keys.entity(AggregateKind::Order, id.as_str());
        if let Some(order) = self.cached(&key).await {
            return Ok(order);
        }

        let fetched = self
            .orders
            .run(key.as_str(), async {
                if let Some(order) = self.lookup(&key).await {
                    return Ok(Some(order));
                }
                let seen = self.generation(key.family()).await;
                let order = self.bounded("load order", self.store.get_order(id)).await?;
                if let Some(order) = &order {
                    self.populate(&key, order, seen).await;
                }
                Ok(order)
            })
            .await?;

        fetched.ok_or_else(|| QueryError::NotFound {
            kind: AggregateKind::Order,
            id: id.to_string(),
        })
    }

    /// Finds products carrying every tag in `tags`.
    ///
    /// An empty tag set matches nothing and touches no backend.
    pub async fn search_products(&self, tags: &TagSet) -> Result<SearchPage<Product>> {
        if tags.is_empty() {
            return Ok(SearchPage::empty());
        }

        let key = self.keys.query(AggregateKind::Product, &tags.fingerprint());
        if let Some(page) = self.cached(&key).await {
            return Ok(page);
        }

        self.searches
            .run(key.as_str(), async {
                if let Some(page) = self.lookup(&key).await {
                    return Ok(page);
                }
                let seen = self.generation(key.family()).await;
                let page = self.search_backends(tags).await?;
                self.populate(&key, &page, seen).await;
                Ok(page)
            })
            .await
    }

    /// Parses a `name:value,name:value` expression and searches with it.
    pub async fn search_products_str(&self, raw: &str) -> Result<SearchPage<Product>> {
        let tags = TagSet::parse(raw)?;
        self.search_products(&tags).await
    }

    async fn search_backends(&self, tags: &TagSet) -> Result<SearchPage<Product>> {
        let limit = self.settings.search_limit;
        let reason = match tokio::time::timeout(
            self.settings.store_timeout,
            self.mirror.query(tags, limit),
        )
        .await
        {
            Ok(Ok(page)) => return Ok(page),
            Ok(Err(e)) => e.to_string(),
            Err(_) => "timed out".to_string(),
        };

        metrics::counter!("search_mirror_fallbacks").increment(1);
        tracing::warn!(
            parent: &self.span,
            tags = %tags,
            reason = %reason,
            "Search mirror failed, falling back to read store"
        );
        self.bounded("search products", self.store.search_products(tags, limit))
            .await
    }

    async fn bounded<T, E, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        QueryError: From<E>,
    {
        let after = self.settings.store_timeout;
        match tokio::time::timeout(after, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(QueryError::Timeout { operation, after }),
        }
    }

    /// Cache read that records hit/miss metrics.
    async fn cached<T: DeserializeOwned + Send>(&self, key: &CacheKey) -> Option<T> {
        let value = self.lookup(key).await;
        if value.is_some() {
            metrics::counter!("cache_hits").increment(1);
        } else {
            metrics::counter!("cache_misses").increment(1);
        }
        value
    }

    /// Cache read. Errors and undecodable values count as misses.
    async fn lookup<T: DeserializeOwned + Send>(&self, key: &CacheKey) -> Option<T> {
        let read = self.cache.get(key);
        let bytes = match tokio::time::timeout(self.settings.store_timeout, read).await {
            Ok(Ok(bytes)) => bytes?,
            Ok(Err(e)) => {
                tracing::warn!(parent: &self.span, key = %key, error = %e, "Cache read failed");
                return None;
            }
            Err(_) => {
                tracing::warn!(parent: &self.span, key = %key, "Cache read timed out");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(
                    parent: &self.span,
                    key = %key,
                    error = %e,
                    "Ignoring undecodable cache entry"
                );
                None
            }
        }
    }

    /// Generation of `family` before a backend fetch. None if the cache
    /// cannot tell, in which case the result is not cached.
    async fn generation(&self, family: &CacheFamily) -> Option<Generation> {
        let read = self.cache.generation(family);
        match tokio::time::timeout(self.settings.store_timeout, read).await {
            Ok(Ok(generation)) => Some(generation),
            Ok(Err(e)) => {
                tracing::warn!(
                    parent: &self.span,
                    family = %family,
                    error = %e,
                    "Cache generation read failed"
                );
                None
            }
            Err(_) => {
                tracing::warn!(
                    parent: &self.span,
                    family = %family,
                    "Cache generation read timed out"
                );
                None
            }
        }
    }

    async fn populate<T: Serialize + Sync>(
        &self,
        key: &CacheKey,
        value: &T,
        seen: Option<Generation>,
    ) {
        let Some(seen) = seen else {
            return;
        };
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(
                    parent: &self.span,
                    key = %key,
                    error = %e,
                    "Cannot encode cache entry"
                );
                return;
            }
        };

        let write = self
            .cache
            .set_if_current(key, bytes, self.settings.cache_ttl, seen);
        match tokio::time::timeout(self.settings.store_timeout, write).await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                metrics::counter!("cache_fills_discarded").increment(1);
                tracing::debug!(
                    parent: &self.span,
                    key = %key,
                    generation = %seen,
                    "Invalidated during fetch, not caching"
                );
            }
            Ok(Err(e)) => {
                tracing::warn!(parent: &self.span, key = %key, error = %e, "Cache write failed");
            }
            Err(_) => {
                tracing::warn!(parent: &self.span, key = %key, "Cache write timed out");
            }
        }
    }
}
