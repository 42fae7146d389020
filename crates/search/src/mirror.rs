use async_trait::async_trait;
use common::{ProductId, SearchPage, TagSet};
use domain::Product;

use crate::Result;

/// A searchable copy of product snapshots.
#[async_trait]
pub trait SearchMirror: Send + Sync {
    /// Indexes a snapshot, replacing any older copy of the same product.
    ///
    /// A snapshot with a lower version than the indexed one is ignored.
    async fn upsert(&self, product: &Product) -> Result<()>;

    /// Returns products carrying every tag in `tags`, ordered by product id.
    ///
    /// At most `limit` items are returned; `total` counts every match.
    async fn query(&self, tags: &TagSet, limit: usize) -> Result<SearchPage<Product>>;

    /// The version of the indexed copy of a product, if any.
    async fn indexed_version(&self, id: &ProductId) -> Result<Option<u64>>;
}
