use async_trait::async_trait;
use common::{AggregateKind, OrderId, ProductId, SearchPage, TagSet};
use domain::{Order, Product};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};

use crate::{
    ReadStoreError, Result,
    store::{OrderStore, ProductStore},
};

/// PostgreSQL-backed read store.
///
/// Each aggregate is one row holding its snapshot as a JSONB document plus
/// the version used for optimistic concurrency.
#[derive(Clone)]
pub struct PostgresReadStore {
    pool: PgPool,
}

/// Table layout shared by the product and order tables.
struct Table {
    kind: AggregateKind,
    name: &'static str,
    id_column: &'static str,
}

const PRODUCTS: Table = Table {
    kind: AggregateKind::Product,
    name: "products",
    id_column: "product_id",
};

const ORDERS: Table = Table {
    kind: AggregateKind::Order,
    name: "orders",
    id_column: "order_id",
};

impl PostgresReadStore {
    /// Creates a new PostgreSQL read store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_document<T: DeserializeOwned>(row: PgRow) -> Result<T> {
        let Json(document) = row.try_get::<Json<T>, _>("document")?;
        Ok(document)
    }

    #[tracing::instrument(skip(self, table), fields(table = table.name))]
    async fn load<T: DeserializeOwned + Send>(
        &self,
        table: &Table,
        id: &str,
    ) -> Result<Option<T>> {
        let sql = format!(
            "SELECT document FROM {} WHERE {} = $1",
            table.name, table.id_column
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_document).transpose()
    }

    async fn stored_version(&self, table: &Table, id: &str) -> Result<Option<u64>> {
        let sql = format!(
            "SELECT version FROM {} WHERE {} = $1",
            table.name, table.id_column
        );
        let version: Option<i64> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(version.map(|v| v as u64))
    }

    #[tracing::instrument(skip(self, table, document), fields(table = table.name))]
    async fn store<T: Serialize + Sync>(
        &self,
        table: &Table,
        id: &str,
        document: &T,
        version: u64,
        updated_at: chrono::DateTime<chrono::Utc>,
        expected_version: Option<u64>,
    ) -> Result<()> {
        let document = serde_json::to_value(document)?;

        let result = match expected_version {
            None => {
                let sql = format!(
                    r#"
                    INSERT INTO {} ({}, document, version, updated_at)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT ({}) DO NOTHING
                    "#,
                    table.name, table.id_column, table.id_column
                );
                sqlx::query(&sql)
                    .bind(id)
                    .bind(&document)
                    .bind(version as i64)
                    .bind(updated_at)
                    .execute(&self.pool)
                    .await?
            }
            Some(expected) => {
                let sql = format!(
                    r#"
                    UPDATE {} SET document = $2, version = $3, updated_at = $4
                    WHERE {} = $1 AND version = $5
                    "#,
                    table.name, table.id_column
                );
                sqlx::query(&sql)
                    .bind(id)
                    .bind(&document)
                    .bind(version as i64)
                    .bind(updated_at)
                    .bind(expected as i64)
                    .execute(&self.pool)
                    .await?
            }
        };

        if result.rows_affected() == 0 {
            let actual = self.stored_version(table, id).await?;
            return Err(ReadStoreError::ConcurrencyConflict {
                kind: table.kind,
                id: id.to_string(),
                expected: expected_version,
                actual,
            });
        }

        Ok(())
    }
}

/// Builds the JSONB containment argument for a tag criterion set.
fn tag_containment(tags: &TagSet) -> serde_json::Value {
    serde_json::Value::Array(
        tags.canonical()
            .into_iter()
            .map(|tag| serde_json::json!({ "name": tag.name, "value": tag.value }))
            .collect(),
    )
}

#[async_trait]
impl ProductStore for PostgresReadStore {
    async fn get_product(&self, id: &ProductId) -> Result<Option<Product>> {
        self.load(&PRODUCTS, id.as_str()).await
    }

    async fn save_product(&self, product: &Product, expected_version: Option<u64>) -> Result<()> {
        self.store(
            &PRODUCTS,
            product.product_id.as_str(),
            product,
            product.version,
            product.updated_at,
            expected_version,
        )
        .await
    }

    async fn search_products(&self, tags: &TagSet, limit: usize) -> Result<SearchPage<Product>> {
        let criteria = tag_containment(tags);

        let rows = sqlx::query(
            r#"
            SELECT document FROM products
            WHERE document -> 'tags' @> $1
            ORDER BY product_id ASC
            LIMIT $2
            "#,
        )
        .bind(&criteria)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE document -> 'tags' @> $1")
                .bind(&criteria)
                .fetch_one(&self.pool)
                .await?;

        let items = rows
            .into_iter()
            .map(Self::row_to_document)
            .collect::<Result<Vec<Product>>>()?;

        Ok(SearchPage::new(items, total as u64))
    }

    async fn list_products(
        &self,
        after: Option<&ProductId>,
        limit: usize,
    ) -> Result<Vec<Product>> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM products
            WHERE $1::TEXT IS NULL OR product_id > $1
            ORDER BY product_id ASC
            LIMIT $2
            "#,
        )
        .bind(after.map(|id| id.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_document).collect()
    }
}

#[async_trait]
impl OrderStore for PostgresReadStore {
    async fn get_order(&self, id: &OrderId) -> Result<Option<Order>> {
        self.load(&ORDERS, id.as_str()).await
    }

    async fn save_order(&self, order: &Order, expected_version: Option<u64>) -> Result<()> {
        self.store(
            &ORDERS,
            order.order_id.as_str(),
            order,
            order.version,
            order.updated_at,
            expected_version,
        )
        .await
    }
}
