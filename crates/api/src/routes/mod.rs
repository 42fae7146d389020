//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod orders;
pub mod products;

use query::QueryService;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub queries: QueryService,
}
