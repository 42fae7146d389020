//! Product lookup and tag search endpoints.

use std::sync::Arc;

use axum::extract::{OriginalUri, Path, Query, State};
use axum::response::Response;
use common::{ProductId, SearchPage, TagSet};
use domain::Product;
use serde::Deserialize;

use crate::error::ApiError;
use crate::response::respond;
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub tags: Option<String>,
}

/// GET {base}/products/{id}
#[tracing::instrument(skip(state, uri))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
) -> Response {
    let result = find(&state, &id).await;
    respond(uri.path(), result)
}

/// GET {base}/products/search?tags=name:value,...
#[tracing::instrument(skip(state, uri))]
pub async fn search(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<SearchParams>,
) -> Response {
    let result = search_by_tags(&state, params.tags.as_deref()).await;
    respond(uri.path(), result)
}

async fn find(state: &AppState, id: &str) -> Result<Product, ApiError> {
    if id.trim().is_empty() {
        return Err(ApiError::bad_request("Product ID is required"));
    }
    Ok(state.queries.get_product(&ProductId::new(id)).await?)
}

async fn search_by_tags(
    state: &AppState,
    raw: Option<&str>,
) -> Result<SearchPage<Product>, ApiError> {
    let raw = raw.unwrap_or_default();
    if raw.trim().is_empty() {
        return Err(ApiError::bad_request("Tags parameter is required"));
    }
    let tags = TagSet::parse(raw).map_err(query::QueryError::from)?;
    Ok(state.queries.search_products(&tags).await?)
}
