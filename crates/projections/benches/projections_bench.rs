use std::sync::Arc;

use cache::{InMemoryCache, KeySpace};
use chrono::{DateTime, Utc};
use criterion::{Criterion, criterion_group, criterion_main};
use projections::{EventDispatcher, InMemoryLog, LogMessage, ProjectionEngine, TopicConfig};
use read_store::InMemoryReadStore;
use search::InMemorySearchIndex;
use serde_json::json;

fn dispatcher() -> EventDispatcher {
    let engine = ProjectionEngine::new(
        Arc::new(InMemoryReadStore::new()),
        Arc::new(InMemorySearchIndex::new()),
        Arc::new(InMemoryCache::new()),
        KeySpace::new("bench"),
    );
    EventDispatcher::new(engine, TopicConfig::default())
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap_or_default()
}

/// Publish N products, each with a create, a tag and an update (3N messages).
async fn populate_log(n: usize) -> Vec<LogMessage> {
    let log = InMemoryLog::new(1);
    let mut messages = Vec::with_capacity(n * 3);
    for i in 0..n {
        let id = format!("P{i}");
        let created = json!({
            "productId": id,
            "sku": format!("SKU-{i}"),
            "name": "Widget",
            "price": 10.0,
            "tags": [{ "name": "color", "value": "red" }],
        });
        let tag = json!({ "productId": id, "tagName": "size", "tagValue": "m" });
        let updated = json!({ "productId": id, "name": "Widget v2", "price": 12.0 });

        let t = i as i64 * 3;
        messages.push(
            log.publish(&id, "products", "ProductCreated", created.to_string(), at(t))
                .await,
        );
        messages.push(
            log.publish(&id, "products", "ProductTagAdded", tag.to_string(), at(t + 1))
                .await,
        );
        messages.push(
            log.publish(&id, "products", "ProductUpdated", updated.to_string(), at(t + 2))
                .await,
        );
    }
    messages
}

fn bench_project_100_products(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let messages = rt.block_on(populate_log(100));

    c.bench_function("projections/apply_300_messages", |b| {
        b.iter(|| {
            rt.block_on(async {
                let dispatcher = dispatcher();
                for message in &messages {
                    dispatcher.dispatch(message).await.unwrap();
                }
            });
        });
    });
}

fn bench_replay_is_stale(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let messages = rt.block_on(populate_log(100));
    let dispatcher = dispatcher();
    rt.block_on(async {
        for message in &messages {
            dispatcher.dispatch(message).await.unwrap();
        }
    });

    c.bench_function("projections/replay_300_stale_messages", |b| {
        b.iter(|| {
            rt.block_on(async {
                for message in &messages {
                    dispatcher.dispatch(message).await.unwrap();
                }
            });
        });
    });
}

criterion_group!(benches, bench_project_100_products, bench_replay_is_stale);
criterion_main!(benches);
