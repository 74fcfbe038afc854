//! Postgres-backed product store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `DuplicateSku` | SKU already taken |
//! | Database (check constraint violation) | `23514` | `Invalid` | Check constraint rejected the row |
//! | Database (other) | Any other | `Unavailable` | Other database errors |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` | Connection failures |
//!
//! ## Atomic stock adjustment
//!
//! `adjust_stock` is a single conditional `UPDATE ... WHERE stock_quantity + $2 >= 0`.
//! Row-level locking serializes concurrent adjustments of the same product, so
//! the guard and the write are one step.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use stockroom_core::{ExpectedVersion, ProductId};
use stockroom_products::{ListQuery, Money, NewProduct, Product, ProductPage};

use super::r#trait::{ProductStore, StoreError};

const PRODUCT_COLUMNS: &str = "id, name, description, sku, price_currency, price_amount, \
     stock_quantity, category, attributes, created_at, updated_at, version";

/// Postgres-backed product store.
///
/// Uses a SQLx connection pool; `Send + Sync` and cheap to clone.
#[derive(Debug, Clone)]
pub struct PostgresProductStore {
    pool: PgPool,
}

impl PostgresProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_stock(&self, id: &ProductId) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT stock_quantity FROM products WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("current_stock", e))?;
        row.map(|r| r.try_get::<i64, _>("stock_quantity"))
            .transpose()
            .map_err(|e| StoreError::Unavailable(format!("failed to read stock: {e}")))
    }

    async fn exists(&self, id: &ProductId) -> Result<bool, StoreError> {
        Ok(self.current_stock(id).await?.is_some())
    }
}

#[async_trait::async_trait]
impl ProductStore for PostgresProductStore {
    #[instrument(skip(self, new), fields(sku = %new.sku), err)]
    async fn create(&self, new: NewProduct) -> Result<Product, StoreError> {
        let sku = new.sku.clone();
        let product = new.into_product(ProductId::generate(), Utc::now());

        let sql = format!(
            "INSERT INTO products ({PRODUCT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {PRODUCT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(product.id.as_str())
            .bind(&product.name)
            .bind(&product.description)
            .bind(&product.sku)
            .bind(&product.price.currency)
            .bind(product.price.amount)
            .bind(product.stock_quantity)
            .bind(&product.category)
            .bind(Json(&product.attributes))
            .bind(product.created_at)
            .bind(product.updated_at)
            .bind(product.version as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::DuplicateSku(sku.clone())
                } else {
                    map_sqlx_error("create", e)
                }
            })?;

        decode(&row)
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn get(&self, id: &ProductId) -> Result<Product, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        decode(&row)
    }

    #[instrument(skip(self, product), fields(product_id = %product.id), err)]
    async fn update(
        &self,
        product: Product,
        expected: ExpectedVersion,
    ) -> Result<Product, StoreError> {
        let expected_version: Option<i64> = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(v as i64),
        };

        let sql = format!(
            "UPDATE products SET \
                 name = $2, description = $3, sku = $4, price_currency = $5, price_amount = $6, \
                 stock_quantity = $7, category = $8, attributes = $9, \
                 updated_at = NOW(), version = version + 1 \
             WHERE id = $1 AND ($10::bigint IS NULL OR version = $10) \
             RETURNING {PRODUCT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(product.id.as_str())
            .bind(&product.name)
            .bind(&product.description)
            .bind(&product.sku)
            .bind(&product.price.currency)
            .bind(product.price.amount)
            .bind(product.stock_quantity)
            .bind(&product.category)
            .bind(Json(&product.attributes))
            .bind(expected_version)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::DuplicateSku(product.sku.clone())
                } else {
                    map_sqlx_error("update", e)
                }
            })?;

        match row {
            Some(row) => decode(&row),
            None if self.exists(&product.id).await? => Err(StoreError::Conflict(format!(
                "product {} changed since version {:?}",
                product.id, expected
            ))),
            None => Err(StoreError::NotFound(product.id)),
        }
    }

    #[instrument(skip(self), err)]
    async fn list(&self, query: &ListQuery) -> Result<ProductPage, StoreError> {
        let category = query.category.as_deref();

        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS total FROM products WHERE ($1::text IS NULL OR category = $1)",
        )
        .bind(category)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_products", e))?
        .try_get("total")
        .map_err(|e| StoreError::Unavailable(format!("failed to read count: {e}")))?;

        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE ($1::text IS NULL OR category = $1) \
             ORDER BY created_at ASC, id ASC \
             LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(category)
            .bind(i64::from(query.page_size))
            .bind(query.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_products", e))?;

        let items = rows.iter().map(decode).collect::<Result<Vec<_>, _>>()?;
        Ok(ProductPage {
            items,
            total: total.max(0) as u64,
            page: query.page,
            page_size: query.page_size,
        })
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn delete(&self, id: &ProductId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(product_id = %id, delta), err)]
    async fn adjust_stock(&self, id: &ProductId, delta: i64) -> Result<i64, StoreError> {
        if delta == 0 {
            return Err(StoreError::Invalid("delta cannot be zero".to_string()));
        }

        let row = sqlx::query(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity + $2,
                updated_at = NOW(),
                version = version + 1
            WHERE id = $1 AND stock_quantity + $2 >= 0
            RETURNING stock_quantity
            "#,
        )
        .bind(id.as_str())
        .bind(delta)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("adjust_stock", e))?;

        if let Some(row) = row {
            return row
                .try_get::<i64, _>("stock_quantity")
                .map_err(|e| StoreError::Unavailable(format!("failed to read stock: {e}")));
        }

        match self.current_stock(id).await? {
            Some(available) => Err(StoreError::InsufficientStock {
                product_id: id.clone(),
                available,
                requested: delta.saturating_neg(),
            }),
            None => Err(StoreError::NotFound(id.clone())),
        }
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::DuplicateSku(msg),
                Some("23514") => StoreError::Invalid(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {operation}"))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

fn decode(row: &PgRow) -> Result<Product, StoreError> {
    let row = ProductRow::from_row(row)
        .map_err(|e| StoreError::Unavailable(format!("failed to decode product row: {e}")))?;
    Product::try_from(row)
}

// SQLx row types

#[derive(Debug)]
struct ProductRow {
    id: String,
    name: String,
    description: String,
    sku: String,
    price_currency: String,
    price_amount: i64,
    stock_quantity: i64,
    category: String,
    attributes: Json<BTreeMap<String, String>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            sku: row.try_get("sku")?,
            price_currency: row.try_get("price_currency")?,
            price_amount: row.try_get("price_amount")?,
            stock_quantity: row.try_get("stock_quantity")?,
            category: row.try_get("category")?,
            attributes: row.try_get("attributes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let id = ProductId::parse(row.id)
            .map_err(|e| StoreError::Unavailable(format!("corrupt product row: {e}")))?;
        Ok(Product {
            id,
            name: row.name,
            description: row.description,
            sku: row.sku,
            price: Money::new(row.price_currency, row.price_amount),
            stock_quantity: row.stock_quantity,
            category: row.category,
            attributes: row.attributes.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version.max(0) as u64,
        })
    }
}
