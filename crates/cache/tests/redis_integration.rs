//! Redis integration tests
//!
//! These tests start a Redis container and need a Docker daemon.
//! Run with:
//!
//! ```bash
//! cargo test -p cache --test redis_integration -- --ignored
//! ```

use std::sync::Arc;
use std::time::Duration;

use cache::{Cache, KeySpace, RedisCache};
use common::{AggregateKind, TagSet};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Redis>,
    url: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Redis::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(6379).await.unwrap();

            Arc::new(ContainerInfo {
                container,
                url: format!("redis://{}:{}", host, port),
            })
        })
        .await
        .clone()
}

/// Each test gets its own namespace so tests can share the container.
async fn get_test_cache(namespace: &str) -> (RedisCache, KeySpace) {
    let info = get_container_info().await;
    let cache = RedisCache::new(&info.url).await.unwrap();
    (cache, KeySpace::new(namespace))
}

#[tokio::test]
#[ignore = "requires docker"]
async fn set_get_and_invalidate() {
    let (cache, keys) = get_test_cache("it-basic").await;
    let key = keys.entity(AggregateKind::Product, "P1");

    cache
        .set(&key, b"{\"productId\":\"P1\"}".to_vec(), Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(
        cache.get(&key).await.unwrap(),
        Some(b"{\"productId\":\"P1\"}".to_vec())
    );

    cache.invalidate(&key).await.unwrap();
    assert_eq!(cache.get(&key).await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn values_expire() {
    let (cache, keys) = get_test_cache("it-ttl").await;
    let key = keys.entity(AggregateKind::Order, "O1");

    cache
        .set(&key, b"v".to_vec(), Duration::from_millis(100))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(cache.get(&key).await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn invalidate_family_removes_members() {
    let (cache, keys) = get_test_cache("it-family").await;
    let ttl = Duration::from_secs(30);
    let red = keys.query(
        AggregateKind::Product,
        &TagSet::parse("color:red").unwrap().fingerprint(),
    );
    let blue = keys.query(
        AggregateKind::Product,
        &TagSet::parse("color:blue").unwrap().fingerprint(),
    );
    let entity = keys.entity(AggregateKind::Product, "P1");

    for key in [&red, &blue, &entity] {
        cache.set(key, b"v".to_vec(), ttl).await.unwrap();
    }

    let removed = cache
        .invalidate_family(&keys.query_family(AggregateKind::Product))
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(cache.get(&red).await.unwrap(), None);
    assert_eq!(cache.get(&blue).await.unwrap(), None);
    assert!(cache.get(&entity).await.unwrap().is_some());

    let removed = cache
        .invalidate_family(&keys.query_family(AggregateKind::Product))
        .await
        .unwrap();
    assert_eq!(removed, 0);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn expired_members_are_trimmed_from_the_family() {
    let (cache, keys) = get_test_cache("it-trim").await;
    let family = keys.entity_family(AggregateKind::Product);

    for i in 0..50 {
        let key = keys.entity(AggregateKind::Product, &format!("P{i}"));
        cache
            .set(&key, b"v".to_vec(), Duration::from_millis(50))
            .await
            .unwrap();
    }
    assert_eq!(cache.family_members(&family).await.unwrap(), 50);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let fresh = keys.entity(AggregateKind::Product, "fresh");
    cache
        .set(&fresh, b"v".to_vec(), Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(cache.family_members(&family).await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn fill_racing_an_invalidation_is_discarded() {
    let (cache, keys) = get_test_cache("it-generation").await;
    let ttl = Duration::from_secs(30);
    let key = keys.entity(AggregateKind::Product, "P1");

    let seen = cache.generation(key.family()).await.unwrap();
    cache.invalidate(&key).await.unwrap();

    assert!(
        !cache
            .set_if_current(&key, b"stale".to_vec(), ttl, seen)
            .await
            .unwrap()
    );
    assert_eq!(cache.get(&key).await.unwrap(), None);

    let seen = cache.generation(key.family()).await.unwrap();
    assert!(
        cache
            .set_if_current(&key, b"fresh".to_vec(), ttl, seen)
            .await
            .unwrap()
    );
    assert_eq!(cache.get(&key).await.unwrap(), Some(b"fresh".to_vec()));

    let queries = keys.query_family(AggregateKind::Product);
    let before = cache.generation(&queries).await.unwrap();
    cache.invalidate_family(&queries).await.unwrap();
    assert!(cache.generation(&queries).await.unwrap() > before);
}
