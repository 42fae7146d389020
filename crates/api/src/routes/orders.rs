//! Order lookup endpoint.

use std::sync::Arc;

use axum::extract::{OriginalUri, Path, State};
use axum::response::Response;
use common::OrderId;

use crate::error::ApiError;
use crate::response::respond;
use crate::routes::AppState;

/// GET {base}/orders/{id}
#[tracing::instrument(skip(state, uri))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
) -> Response {
    let result = if id.trim().is_empty() {
        Err(ApiError::bad_request("Order ID is required"))
    } else {
        state
            .queries
            .get_order(&OrderId::new(id))
            .await
            .map_err(ApiError::from)
    };
    respond(uri.path(), result)
}
