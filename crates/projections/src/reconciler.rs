//! Repairs search mirror drift from the read store.

use std::sync::Arc;
use std::time::Duration;

use cache::{Cache, KeySpace};
use common::{AggregateKind, ProductId};
use read_store::ReadStore;
use search::SearchMirror;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::Result;
use crate::engine::{DEFAULT_STORE_TIMEOUT, bounded};

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub repaired: usize,
}

/// Pages through the read store and re-mirrors every product whose indexed
/// version differs from the stored one.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ReadStore>,
    mirror: Arc<dyn SearchMirror>,
    cache: Arc<dyn Cache>,
    keys: KeySpace,
    page_size: usize,
    timeout: Duration,
    span: Span,
}

impl Reconciler {
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
            page_size: 500,
            timeout: DEFAULT_STORE_TIMEOUT,
            span: tracing::info_span!("search_reconciler"),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Runs one full pass.
    ///
    /// Invalidates cached product searches when anything was repaired.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut after: Option<ProductId> = None;

        loop {
            let page = bounded(
                "list products",
                self.timeout,
                self.store.list_products(after.as_ref(), self.page_size),
            )
            .await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.product_id.clone());

            for product in &page {
                report.scanned += 1;
                let indexed = bounded(
                    "indexed version",
                    self.timeout,
                    self.mirror.indexed_version(&product.product_id),
                )
                .await?;
                if indexed == Some(product.version) {
                    continue;
                }

                bounded("mirror product", self.timeout, self.mirror.upsert(product)).await?;
                report.repaired += 1;
                tracing::debug!(
                    parent: &self.span,
                    product_id = %product.product_id,
                    indexed = ?indexed,
                    stored = product.version,
                    "Repaired mirrored product"
                );
            }

            if page.len() < self.page_size {
                break;
            }
        }

        if report.repaired > 0 {
            metrics::counter!("search_mirror_repairs").increment(report.repaired as u64);
            let family = self.keys.query_family(AggregateKind::Product);
            bounded(
                "invalidate family",
                self.timeout,
                self.cache.invalidate_family(&family),
            )
            .await?;
        }

        tracing::info!(
            parent: &self.span,
            scanned = report.scanned,
            repaired = report.repaired,
            "Reconciliation sweep complete"
        );
        Ok(report)
    }

    /// Sweeps every `interval` until `shutdown` is cancelled.
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::warn!(parent: &self.span, error = %e, "Reconciliation sweep failed");
                    }
                }
            }
        }

        tracing::debug!(parent: &self.span, "Reconciler stopped");
    }
}
