//! HTTP query API for the catalog read side.
//!
//! Serves product lookups, tag searches and order lookups through the
//! cache-aside [`QueryService`], wrapped in a JSON envelope, plus health and
//! Prometheus metrics endpoints.

pub mod config;
pub mod error;
pub mod response;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use cache::{Cache, InMemoryCache, KeySpace};
use metrics_exporter_prometheus::PrometheusHandle;
use query::{QueryService, QuerySettings};
use read_store::{InMemoryReadStore, ReadStore};
use search::{InMemorySearchIndex, SearchMirror};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, LogFormat};
pub use error::ApiError;
pub use routes::AppState;

/// The three stores behind the read side.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn ReadStore>,
    pub mirror: Arc<dyn SearchMirror>,
    pub cache: Arc<dyn Cache>,
}

impl Backends {
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemoryReadStore::new()),
            mirror: Arc::new(InMemorySearchIndex::new()),
            cache: Arc::new(InMemoryCache::new()),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
///
/// Query routes are nested under `base_path`; `/health` and `/metrics` stay
/// at the root.
pub fn create_app(
    state: Arc<AppState>,
    metrics_handle: PrometheusHandle,
    base_path: &str,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    let queries = Router::new()
        .route("/products/search", get(routes::products::search))
        .route("/products/{id}", get(routes::products::get))
        .route("/orders/{id}", get(routes::orders::get))
        .with_state(state);

    let queries = if base_path.is_empty() {
        queries
    } else {
        Router::new().nest(base_path, queries)
    };

    Router::new()
        .route("/health", get(routes::health::check))
        .merge(queries)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over `backends`.
pub fn create_default_state(
    backends: &Backends,
    keys: KeySpace,
    settings: QuerySettings,
) -> Arc<AppState> {
    let queries = QueryService::new(
        Arc::clone(&backends.store),
        Arc::clone(&backends.mirror),
        Arc::clone(&backends.cache),
        keys,
    )
    .with_settings(settings);

    Arc::new(AppState { queries })
}
