use async_trait::async_trait;
use common::{OrderId, ProductId, SearchPage, TagSet};
use domain::{Order, Product};

use crate::Result;

/// Persistence for product snapshots.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Loads the current snapshot of a product.
    ///
    /// Returns None if the product has never been projected.
    async fn get_product(&self, id: &ProductId) -> Result<Option<Product>>;

    /// Saves a product snapshot.
    ///
    /// `expected_version` is the version the caller read before computing the
    /// snapshot; `None` means the caller expects the product to be absent.
    /// Fails with `ConcurrencyConflict` if the stored version differs.
    async fn save_product(&self, product: &Product, expected_version: Option<u64>) -> Result<()>;

    /// Returns products carrying every tag in `tags`, ordered by product id.
    ///
    /// At most `limit` items are returned; `total` counts every match.
    async fn search_products(&self, tags: &TagSet, limit: usize) -> Result<SearchPage<Product>>;

    /// Pages through all products in product id order, starting after `after`.
    async fn list_products(&self, after: Option<&ProductId>, limit: usize)
    -> Result<Vec<Product>>;
}

/// Persistence for order snapshots.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Loads the current snapshot of an order.
    async fn get_order(&self, id: &OrderId) -> Result<Option<Order>>;

    /// Saves an order snapshot with the same concurrency rules as products.
    async fn save_order(&self, order: &Order, expected_version: Option<u64>) -> Result<()>;
}

/// The complete read store: products and orders.
pub trait ReadStore: ProductStore + OrderStore {}

// Blanket implementation for anything that stores both
impl<T: ProductStore + OrderStore + ?Sized> ReadStore for T {}
