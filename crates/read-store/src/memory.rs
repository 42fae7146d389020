use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use common::{AggregateKind, OrderId, ProductId, SearchPage, TagSet};
use domain::{Order, Product};
use tokio::sync::RwLock;

use crate::{
    ReadStoreError, Result,
    store::{OrderStore, ProductStore},
};

#[derive(Default)]
struct State {
    products: BTreeMap<ProductId, Product>,
    orders: HashMap<OrderId, Order>,
}

/// In-memory read store for tests and local runs.
///
/// Provides the same interface and concurrency rules as the PostgreSQL
/// implementation. Failures can be injected to exercise retry paths.
#[derive(Clone, Default)]
pub struct InMemoryReadStore {
    state: Arc<RwLock<State>>,
    unavailable: Arc<AtomicBool>,
    failing_writes: Arc<AtomicUsize>,
}

impl InMemoryReadStore {
    /// Creates a new empty in-memory read store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` writes fail with `Unavailable`.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Returns the number of stored products.
    pub async fn product_count(&self) -> usize {
        self.state.read().await.products.len()
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ReadStoreError::Unavailable);
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_available()?;
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ReadStoreError::Unavailable);
        }
        Ok(())
    }
}

fn check_version(
    kind: AggregateKind,
    id: &str,
    stored: Option<u64>,
    expected: Option<u64>,
) -> Result<()> {
    if stored != expected {
        return Err(ReadStoreError::ConcurrencyConflict {
            kind,
            id: id.to_string(),
            expected,
            actual: stored,
        });
    }
    Ok(())
}

#[async_trait]
impl ProductStore for InMemoryReadStore {
    async fn get_product(&self, id: &ProductId) -> Result<Option<Product>> {
        self.check_available()?;
        Ok(self.state.read().await.products.get(id).cloned())
    }

    async fn save_product(&self, product: &Product, expected_version: Option<u64>) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;

        let stored = state.products.get(&product.product_id).map(|p| p.version);
        check_version(
            AggregateKind::Product,
            product.product_id.as_str(),
            stored,
            expected_version,
        )?;

        state
            .products
            .insert(product.product_id.clone(), product.clone());
        Ok(())
    }

    async fn search_products(&self, tags: &TagSet, limit: usize) -> Result<SearchPage<Product>> {
        self.check_available()?;
        let state = self.state.read().await;

        // BTreeMap iteration is already in product id order
        let mut total = 0u64;
        let mut items = Vec::new();
        for product in state.products.values().filter(|p| p.has_all_tags(tags.iter())) {
            total += 1;
            if items.len() < limit {
                items.push(product.clone());
            }
        }

        Ok(SearchPage::new(items, total))
    }

    async fn list_products(
        &self,
        after: Option<&ProductId>,
        limit: usize,
    ) -> Result<Vec<Product>> {
        self.check_available()?;
        let state = self.state.read().await;

        let products = state
            .products
            .values()
            .filter(|p| after.is_none_or(|after| &p.product_id > after))
            .take(limit)
            .cloned()
            .collect();
        Ok(products)
    }
}

#[async_trait]
impl OrderStore for InMemoryReadStore {
    async fn get_order(&self, id: &OrderId) -> Result<Option<Order>> {
        self.check_available()?;
        Ok(self.state.read().await.orders.get(id).cloned())
    }

    async fn save_order(&self, order: &Order, expected_version: Option<u64>) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;

        let stored = state.orders.get(&order.order_id).map(|o| o.version);
        check_version(
            AggregateKind::Order,
            order.order_id.as_str(),
            stored,
            expected_version,
        )?;

        state.orders.insert(order.order_id.clone(), order.clone());
        Ok(())
    }
}
