use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{ProductId, SearchPage, Tag, TagSet};
use domain::Product;
use tokio::sync::RwLock;

use crate::{Result, SearchError, mirror::SearchMirror};

#[derive(Default)]
struct Index {
    documents: BTreeMap<ProductId, Product>,
    postings: HashMap<Tag, BTreeSet<ProductId>>,
}

impl Index {
    fn remove_postings(&mut self, product: &Product) {
        for tag in &product.tags {
            let key = Tag::new(tag.name.clone(), tag.value.clone());
            if let Some(ids) = self.postings.get_mut(&key) {
                ids.remove(&product.product_id);
                if ids.is_empty() {
                    self.postings.remove(&key);
                }
            }
        }
    }

    fn add_postings(&mut self, product: &Product) {
        for tag in &product.tags {
            self.postings
                .entry(Tag::new(tag.name.clone(), tag.value.clone()))
                .or_default()
                .insert(product.product_id.clone());
        }
    }

    /// Intersects the posting lists of every criterion.
    fn matching(&self, tags: &TagSet) -> BTreeSet<ProductId> {
        let criteria = tags.canonical();
        let mut lists = criteria.iter().map(|tag| self.postings.get(tag));

        let Some(first) = lists.next() else {
            return self.documents.keys().cloned().collect();
        };
        let mut matches = first.cloned().unwrap_or_default();
        for list in lists {
            match list {
                Some(ids) => matches.retain(|id| ids.contains(id)),
                None => matches.clear(),
            }
            if matches.is_empty() {
                break;
            }
        }
        matches
    }
}

/// In-memory inverted tag index.
///
/// Can be switched unavailable to exercise fallback paths.
#[derive(Clone, Default)]
pub struct InMemorySearchIndex {
    index: Arc<RwLock<Index>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of indexed products.
    pub async fn document_count(&self) -> usize {
        self.index.read().await.documents.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SearchError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl SearchMirror for InMemorySearchIndex {
    async fn upsert(&self, product: &Product) -> Result<()> {
        self.check_available()?;
        let mut index = self.index.write().await;

        if let Some(existing) = index.documents.get(&product.product_id).cloned() {
            if existing.version > product.version {
                tracing::debug!(
                    product_id = %product.product_id,
                    indexed = existing.version,
                    incoming = product.version,
                    "Ignoring older snapshot"
                );
                return Ok(());
            }
            index.remove_postings(&existing);
        }

        index.add_postings(product);
        index
            .documents
            .insert(product.product_id.clone(), product.clone());
        Ok(())
    }

    async fn query(&self, tags: &TagSet, limit: usize) -> Result<SearchPage<Product>> {
        self.check_available()?;
        let index = self.index.read().await;

        let matches = index.matching(tags);
        let items = matches
            .iter()
            .take(limit)
            .filter_map(|id| index.documents.get(id).cloned())
            .collect();

        Ok(SearchPage::new(items, matches.len() as u64))
    }

    async fn indexed_version(&self, id: &ProductId) -> Result<Option<u64>> {
        self.check_available()?;
        Ok(self.index.read().await.documents.get(id).map(|p| p.version))
    }
}
