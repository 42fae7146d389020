//! Integration tests for the query path over in-memory backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cache::{Cache, InMemoryCache, KeySpace};
use chrono::{DateTime, Utc};
use common::{
    AggregateKind, LogPosition, OrderId, OrderingToken, ProductId, SearchPage, TagSet,
};
use domain::{Order, Product, ProductTag};
use projections::{EventDispatcher, InMemoryLog, ProjectionEngine, TopicConfig};
use query::{QueryError, QueryService, QuerySettings};
use read_store::{InMemoryReadStore, OrderStore, ProductStore};
use search::{InMemorySearchIndex, SearchMirror};
use serde_json::json;
use tokio::sync::Notify;

/// Parks one store read after it has returned, until released.
#[derive(Clone, Default)]
struct Gate {
    loaded: Arc<Notify>,
    release: Arc<Notify>,
}

impl Gate {
    async fn pass(&self) {
        self.loaded.notify_one();
        self.release.notified().await;
    }
}

/// Read store wrapper that counts product loads and can be slowed down.
#[derive(Clone)]
struct CountingStore {
    inner: InMemoryReadStore,
    product_loads: Arc<AtomicUsize>,
    searches: Arc<AtomicUsize>,
    delay: Duration,
    held: Arc<Mutex<Option<Gate>>>,
}

impl CountingStore {
    fn new(inner: InMemoryReadStore, delay: Duration) -> Self {
        Self {
            inner,
            product_loads: Arc::new(AtomicUsize::new(0)),
            searches: Arc::new(AtomicUsize::new(0)),
            delay,
            held: Arc::new(Mutex::new(None)),
        }
    }

    /// The next product load or search parks on the returned gate.
    fn hold_next_read(&self) -> Gate {
        let gate = Gate::default();
        *self.held.lock().unwrap() = Some(gate.clone());
        gate
    }

    async fn after_read(&self) {
        let gate = self.held.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
    }

    fn product_loads(&self) -> usize {
        self.product_loads.load(Ordering::SeqCst)
    }

    fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProductStore for CountingStore {
    async fn get_product(&self, id: &ProductId) -> read_store::Result<Option<Product>> {
        self.product_loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let product = self.inner.get_product(id).await;
        self.after_read().await;
        product
    }

    async fn save_product(
        &self,
        product: &Product,
        expected_version: Option<u64>,
    ) -> read_store::Result<()> {
        self.inner.save_product(product, expected_version).await
    }

    async fn search_products(
        &self,
        tags: &TagSet,
        limit: usize,
    ) -> read_store::Result<SearchPage<Product>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let page = self.inner.search_products(tags, limit).await;
        self.after_read().await;
        page
    }

    async fn list_products(
        &self,
        after: Option<&ProductId>,
        limit: usize,
    ) -> read_store::Result<Vec<Product>> {
        self.inner.list_products(after, limit).await
    }
}

#[async_trait]
impl OrderStore for CountingStore {
    async fn get_order(&self, id: &OrderId) -> read_store::Result<Option<Order>> {
        self.inner.get_order(id).await
    }

    async fn save_order(
        &self,
        order: &Order,
        expected_version: Option<u64>,
    ) -> read_store::Result<()> {
        self.inner.save_order(order, expected_version).await
    }
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn product(id: &str, tags: &[(&str, &str)]) -> Product {
    Product {
        product_id: ProductId::new(id),
        sku: format!("SKU-{id}"),
        name: format!("Product {id}"),
        description: String::new(),
        price: 5.0,
        tags: tags
            .iter()
            .map(|(n, v)| ProductTag::new(format!("{n}:{v}"), *n, *v))
            .collect(),
        current_inventory: 1,
        images: Vec::new(),
        created_at: at(0),
        updated_at: at(0),
        version: 1,
        last_event: OrderingToken::new(at(0), LogPosition::new(0)),
        inventory_event: None,
    }
}

struct Fixture {
    store: CountingStore,
    mirror: InMemorySearchIndex,
    cache: InMemoryCache,
    keys: KeySpace,
    service: Arc<QueryService>,
}

async fn fixture(delay: Duration, settings: QuerySettings, products: &[Product]) -> Fixture {
    let inner = InMemoryReadStore::new();
    let mirror = InMemorySearchIndex::new();
    for p in products {
        inner.save_product(p, None).await.unwrap();
        mirror.upsert(p).await.unwrap();
    }

    let store = CountingStore::new(inner, delay);
    let cache = InMemoryCache::new();
    let keys = KeySpace::new("test");
    let service = QueryService::new(
        Arc::new(store.clone()),
        Arc::new(mirror.clone()),
        Arc::new(cache.clone()),
        keys.clone(),
    )
    .with_settings(settings);

    Fixture {
        store,
        mirror,
        cache,
        keys,
        service: Arc::new(service),
    }
}

fn ids(page: &SearchPage<Product>) -> Vec<&str> {
    page.items.iter().map(|p| p.product_id.as_str()).collect()
}

#[tokio::test]
async fn concurrent_cold_lookups_fetch_once() {
    let f = fixture(
        Duration::from_millis(50),
        QuerySettings::default(),
        &[product("P1", &[])],
    )
    .await;

    let lookups = (0..16).map(|_| {
        let service = Arc::clone(&f.service);
        tokio::spawn(async move { service.get_product(&ProductId::new("P1")).await })
    });
    let results = futures_util::future::join_all(lookups).await;

    for result in results {
        assert_eq!(result.unwrap().unwrap().product_id, ProductId::new("P1"));
    }
    assert_eq!(f.store.product_loads(), 1);
}

#[tokio::test]
async fn second_lookup_is_served_from_cache() {
    let f = fixture(Duration::ZERO, QuerySettings::default(), &[product("P1", &[])]).await;
    let id = ProductId::new("P1");

    f.service.get_product(&id).await.unwrap();
    f.service.get_product(&id).await.unwrap();

    assert_eq!(f.store.product_loads(), 1);
}

#[tokio::test]
async fn not_found_is_not_cached() {
    let f = fixture(Duration::ZERO, QuerySettings::default(), &[]).await;
    let id = ProductId::new("missing");

    for expected_loads in 1..=2 {
        let err = f.service.get_product(&id).await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::NotFound {
                kind: AggregateKind::Product,
                ..
            }
        ));
        assert!(err.is_client_error());
        assert_eq!(f.store.product_loads(), expected_loads);
    }
}

#[tokio::test]
async fn undecodable_cache_entry_is_a_miss() {
    let f = fixture(Duration::ZERO, QuerySettings::default(), &[product("P1", &[])]).await;
    let key = f.keys.entity(AggregateKind::Product, "P1");
    f.cache
        .set(&key, b"not json".to_vec(), Duration::from_secs(60))
        .await
        .unwrap();

    let found = f.service.get_product(&ProductId::new("P1")).await.unwrap();
    assert_eq!(found.name, "Product P1");
    assert_eq!(f.store.product_loads(), 1);
}

#[tokio::test]
async fn unavailable_cache_degrades_to_store() {
    let f = fixture(Duration::ZERO, QuerySettings::default(), &[product("P1", &[])]).await;
    f.cache.set_unavailable(true);

    let id = ProductId::new("P1");
    f.service.get_product(&id).await.unwrap();
    f.service.get_product(&id).await.unwrap();
    assert_eq!(f.store.product_loads(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_store_times_out() {
    let settings = QuerySettings {
        store_timeout: Duration::from_millis(100),
        ..QuerySettings::default()
    };
    let f = fixture(Duration::from_secs(10), settings, &[product("P1", &[])]).await;

    let err = f
        .service
        .get_product(&ProductId::new("P1"))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Timeout { .. }));
    assert!(!err.is_client_error());
}

#[tokio::test]
async fn search_falls_back_to_store_with_same_results() {
    let catalog = [
        product("P1", &[("color", "red"), ("size", "m")]),
        product("P2", &[("color", "red")]),
        product("P3", &[("size", "m")]),
    ];
    let f = fixture(Duration::ZERO, QuerySettings::default(), &catalog).await;
    let tags = TagSet::parse("color:red").unwrap();

    let from_mirror = f.service.search_products(&tags).await.unwrap();
    assert_eq!(f.store.searches(), 0);

    // Drop the cached page so the next search reaches the backends again
    f.cache
        .invalidate_family(&f.keys.query_family(AggregateKind::Product))
        .await
        .unwrap();
    f.mirror.set_unavailable(true);

    let from_store = f.service.search_products(&tags).await.unwrap();
    assert_eq!(f.store.searches(), 1);
    assert_eq!(from_store, from_mirror);
    assert_eq!(ids(&from_store), vec!["P1", "P2"]);
}

#[tokio::test]
async fn adding_tags_never_widens_results() {
    let catalog = [
        product("P1", &[("color", "red"), ("size", "m")]),
        product("P2", &[("color", "red"), ("size", "l")]),
        product("P3", &[("color", "blue"), ("size", "m")]),
    ];
    let f = fixture(Duration::ZERO, QuerySettings::default(), &catalog).await;

    let mut previous: Option<Vec<String>> = None;
    for raw in ["size:m", "size:m,color:red", "size:m,color:red,fit:slim"] {
        let page = f.service.search_products_str(raw).await.unwrap();
        let current: Vec<String> = ids(&page).into_iter().map(String::from).collect();
        if let Some(previous) = &previous {
            assert!(current.iter().all(|id| previous.contains(id)), "{raw}");
        }
        previous = Some(current);
    }
    assert_eq!(previous, Some(Vec::new()));
}

#[tokio::test]
async fn equivalent_tag_orders_share_a_cache_entry() {
    let f = fixture(
        Duration::ZERO,
        QuerySettings::default(),
        &[product("P1", &[("color", "red"), ("size", "m")])],
    )
    .await;
    f.mirror.set_unavailable(true);

    f.service
        .search_products_str("color:red,size:m")
        .await
        .unwrap();
    f.service
        .search_products_str(" size : m , color:red")
        .await
        .unwrap();
    assert_eq!(f.store.searches(), 1);
}

#[tokio::test]
async fn empty_and_invalid_tag_sets() {
    let f = fixture(Duration::ZERO, QuerySettings::default(), &[product("P1", &[])]).await;

    let page = f.service.search_products(&TagSet::default()).await.unwrap();
    assert_eq!(page, SearchPage::empty());
    assert_eq!(f.store.searches(), 0);

    let err = f.service.search_products_str("color").await.unwrap_err();
    assert!(matches!(err, QueryError::InvalidTags(_)));
    assert!(err.is_client_error());
}

#[tokio::test]
async fn search_limit_caps_items_not_total() {
    let catalog: Vec<Product> = (0..5)
        .map(|i| product(&format!("P{i}"), &[("color", "red")]))
        .collect();
    let settings = QuerySettings {
        search_limit: 2,
        ..QuerySettings::default()
    };
    let f = fixture(Duration::ZERO, settings, &catalog).await;

    let page = f.service.search_products_str("color:red").await.unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total, 5);
}

#[tokio::test]
async fn projected_changes_are_visible_to_queries() {
    let store = InMemoryReadStore::new();
    let mirror = InMemorySearchIndex::new();
    let cache = InMemoryCache::new();
    let keys = KeySpace::new("test");

    let engine = ProjectionEngine::new(
        Arc::new(store.clone()),
        Arc::new(mirror.clone()),
        Arc::new(cache.clone()),
        keys.clone(),
    );
    let dispatcher = EventDispatcher::new(engine, TopicConfig::default());
    let service = QueryService::new(
        Arc::new(store.clone()),
        Arc::new(mirror.clone()),
        Arc::new(cache.clone()),
        keys,
    );
    let log = InMemoryLog::new(1);

    let created = json!({
        "productId": "P1",
        "sku": "SKU1",
        "name": "Shirt",
        "description": "Cotton",
        "price": 9.99,
        "tags": [],
    });
    let message = log
        .publish("P1", "products", "ProductCreated", created.to_string(), at(0))
        .await;
    dispatcher.dispatch(&message).await.unwrap();

    let found = service.get_product(&ProductId::new("P1")).await.unwrap();
    assert_eq!(found.name, "Shirt");

    let red = TagSet::parse("color:red").unwrap();
    let before = service.search_products(&red).await.unwrap();
    assert_eq!(before.total, 0);

    let tagged = json!({ "productId": "P1", "tagId": "T1", "tagName": "color", "tagValue": "red" });
    let message = log
        .publish("P1", "products", "ProductTagAdded", tagged.to_string(), at(1))
        .await;
    dispatcher.dispatch(&message).await.unwrap();

    let after = service.search_products(&red).await.unwrap();
    assert_eq!(after.total, 1);
    assert_eq!(ids(&after), vec!["P1"]);

    let found = service.get_product(&ProductId::new("P1")).await.unwrap();
    assert_eq!(found.tags.len(), 1);
    assert_eq!(found.version, 2);
}

#[tokio::test]
async fn orders_are_looked_up_through_the_cache() {
    let inner = InMemoryReadStore::new();
    let order = Order {
        order_id: OrderId::new("O1"),
        order_number: "ORD-1".to_string(),
        total_amount: 10.0,
        items: Vec::new(),
        created_at: at(0),
        updated_at: at(0),
        version: 1,
        last_event: OrderingToken::new(at(0), LogPosition::new(0)),
    };
    inner.save_order(&order, None).await.unwrap();
    let cache = InMemoryCache::new();
    let service = QueryService::new(
        Arc::new(inner.clone()),
        Arc::new(InMemorySearchIndex::new()),
        Arc::new(cache.clone()),
        KeySpace::new("test"),
    );

    assert_eq!(service.get_order(&OrderId::new("O1")).await.unwrap(), order);
    assert_eq!(cache.len().await, 1);

    // Served from the cache while the store is down
    inner.set_unavailable(true);
    assert_eq!(service.get_order(&OrderId::new("O1")).await.unwrap(), order);

    let err = service.get_order(&OrderId::new("O2")).await.unwrap_err();
    assert!(matches!(err, QueryError::ReadStore(_)));
}

fn dispatcher_over(f: &Fixture) -> EventDispatcher {
    let engine = ProjectionEngine::new(
        Arc::new(f.store.inner.clone()),
        Arc::new(InMemorySearchIndex::new()),
        Arc::new(f.cache.clone()),
        f.keys.clone(),
    );
    EventDispatcher::new(engine, TopicConfig::default())
}

#[tokio::test]
async fn lookup_racing_a_projected_update_does_not_cache_the_old_snapshot() {
    let f = fixture(Duration::ZERO, QuerySettings::default(), &[product("P1", &[])]).await;
    let dispatcher = dispatcher_over(&f);
    let log = InMemoryLog::new(1);
    let id = ProductId::new("P1");

    let gate = f.store.hold_next_read();
    let reader = {
        let service = Arc::clone(&f.service);
        let id = id.clone();
        tokio::spawn(async move { service.get_product(&id).await })
    };
    gate.loaded.notified().await;

    let updated = json!({ "productId": "P1", "name": "Renamed", "description": "", "price": 5.0 });
    let message = log
        .publish("P1", "products", "ProductUpdated", updated.to_string(), at(1))
        .await;
    dispatcher.dispatch(&message).await.unwrap();

    gate.release.notify_one();
    let stale = reader.await.unwrap().unwrap();
    assert_eq!(stale.version, 1);

    let fresh = f.service.get_product(&id).await.unwrap();
    assert_eq!(fresh.name, "Renamed");
    assert_eq!(fresh.version, 2);
    assert_eq!(f.store.product_loads(), 2);
}

#[tokio::test]
async fn search_racing_a_projected_tag_change_does_not_cache_the_old_page() {
    let catalog = [product("P1", &[("color", "red")]), product("P2", &[])];
    let f = fixture(Duration::ZERO, QuerySettings::default(), &catalog).await;
    f.mirror.set_unavailable(true);
    let dispatcher = dispatcher_over(&f);
    let log = InMemoryLog::new(1);
    let red = TagSet::parse("color:red").unwrap();

    let gate = f.store.hold_next_read();
    let reader = {
        let service = Arc::clone(&f.service);
        let red = red.clone();
        tokio::spawn(async move { service.search_products(&red).await })
    };
    gate.loaded.notified().await;

    let tagged = json!({ "productId": "P2", "tagId": "T2", "tagName": "color", "tagValue": "red" });
    let message = log
        .publish("P2", "products", "ProductTagAdded", tagged.to_string(), at(1))
        .await;
    dispatcher.dispatch(&message).await.unwrap();

    gate.release.notify_one();
    let stale = reader.await.unwrap().unwrap();
    assert_eq!(ids(&stale), vec!["P1"]);

    let fresh = f.service.search_products(&red).await.unwrap();
    assert_eq!(ids(&fresh), vec!["P1", "P2"]);
    assert_eq!(f.store.searches(), 2);
}
