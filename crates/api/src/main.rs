//! API server entry point.
//!
//! Wires the read store, search mirror, cache and message log, starts the
//! consumer group
//! and the search mirror reconciler, then serves queries until SIGINT or
//! SIGTERM. Shutdown stops the HTTP listener, drains the partition workers
//! and only then closes the database pool.

use std::sync::Arc;

use api::{Backends, Config, LogFormat};
use cache::{Cache, InMemoryCache, RedisCache};
#[cfg(feature = "kafka")]
use projections::{KafkaLog, KafkaLogConfig};
use projections::{
    ConsumerGroup, EventDispatcher, InMemoryLog, MessageLog, ProjectionEngine, Reconciler,
};
use read_store::{InMemoryReadStore, PostgresReadStore, ReadStore};
use search::InMemorySearchIndex;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Connects the configured backends, in memory where no URL is given.
async fn connect(config: &Config) -> (Backends, Option<PgPool>) {
    let (store, pool): (Arc<dyn ReadStore>, Option<PgPool>) = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(config.store_timeout)
                .connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresReadStore::new(pool.clone());
            store
                .run_migrations()
                .await
                .expect("failed to run read store migrations");
            tracing::info!("using PostgreSQL read store");
            let store: Arc<dyn ReadStore> = Arc::new(store);
            (store, Some(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory read store");
            let store: Arc<dyn ReadStore> = Arc::new(InMemoryReadStore::new());
            (store, None)
        }
    };

    let cache: Arc<dyn Cache> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisCache::new(url)
                .await
                .expect("failed to connect to Redis"),
        ),
        None => {
            tracing::warn!("REDIS_URL not set, using in-memory cache");
            Arc::new(InMemoryCache::new())
        }
    };

    let backends = Backends {
        store,
        mirror: Arc::new(InMemorySearchIndex::new()),
        cache,
    };
    (backends, pool)
}

/// Opens the Kafka log when brokers are configured, the in-memory log otherwise.
async fn message_log(config: &Config) -> Arc<dyn MessageLog> {
    #[cfg(feature = "kafka")]
    if let Some(brokers) = &config.kafka_brokers {
        let kafka = KafkaLogConfig::new(
            brokers.clone(),
            config.consumer_group.clone(),
            config.topic_names(),
        );
        let log = KafkaLog::connect(kafka)
            .await
            .expect("failed to connect to Kafka");
        return Arc::new(log);
    }

    if config.kafka_brokers.is_some() {
        tracing::warn!(
            "KAFKA_BROKERS set but built without the kafka feature, using in-memory log"
        );
    } else {
        tracing::warn!("KAFKA_BROKERS not set, using in-memory message log");
    }
    Arc::new(InMemoryLog::new(config.log_partitions))
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Connect backends
    let (backends, pool) = connect(&config).await;
    let keys = config.key_space();

    // 4. Start the projection pipeline
    let shutdown = CancellationToken::new();
    let engine = ProjectionEngine::new(
        Arc::clone(&backends.store),
        Arc::clone(&backends.mirror),
        Arc::clone(&backends.cache),
        keys.clone(),
    )
    .with_timeout(config.store_timeout);
    let dispatcher = EventDispatcher::new(engine, config.topics());
    let log = message_log(&config).await;
    let group = ConsumerGroup::new(log, dispatcher).with_settings(config.consumer_settings());

    let consumer = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { group.run(shutdown).await }
    });

    let reconciler = (!config.reconcile_interval.is_zero()).then(|| {
        let reconciler = Reconciler::new(
            Arc::clone(&backends.store),
            Arc::clone(&backends.mirror),
            Arc::clone(&backends.cache),
            keys.clone(),
        )
        .with_timeout(config.store_timeout);
        let interval = config.reconcile_interval;
        let shutdown = shutdown.clone();
        tokio::spawn(async move { reconciler.run(interval, shutdown).await })
    });

    // 5. Build the application
    let state = api::create_default_state(&backends, keys, config.query_settings());
    let app = api::create_app(state, metrics_handle, &config.base_path);

    // 6. Serve until a signal arrives
    let addr = config.addr();
    tracing::info!(%addr, base_path = %config.base_path, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                tokio::select! {
                    () = shutdown_signal() => shutdown.cancel(),
                    () = shutdown.cancelled() => {}
                }
            }
        })
        .await
        .expect("server error");

    // 7. Drain background work before closing connections
    shutdown.cancel();
    match consumer.await {
        Ok(Ok(())) => tracing::info!("consumer group drained"),
        Ok(Err(e)) => tracing::error!(error = %e, "consumer group failed"),
        Err(e) => tracing::error!(error = %e, "consumer group task panicked"),
    }
    if let Some(reconciler) = reconciler
        && let Err(e) = reconciler.await
    {
        tracing::error!(error = %e, "reconciler task panicked");
    }
    if let Some(pool) = pool {
        pool.close().await;
    }

    tracing::info!("server shut down gracefully");
}
