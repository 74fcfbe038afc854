use thiserror::Error;

use stockroom_core::{ExpectedVersion, ProductId};
use stockroom_products::{ListQuery, NewProduct, Product, ProductPage};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("product not found: {0}")]
    NotFound(ProductId),

    /// Optimistic concurrency check failed.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        available: i64,
        requested: i64,
    },

    #[error("sku already exists: {0}")]
    DuplicateSku(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    /// Transient failure of the backing storage.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Durable product records with atomic per-product stock adjustment.
///
/// Every write bumps the record's `version` and stamps `updated_at`.
#[async_trait::async_trait]
pub trait ProductStore: Send + Sync {
    /// Insert a new product. The store assigns the id, timestamps and version 1.
    ///
    /// Fails with `DuplicateSku` if another product already uses the SKU.
    async fn create(&self, new: NewProduct) -> Result<Product, StoreError>;

    async fn get(&self, id: &ProductId) -> Result<Product, StoreError>;

    /// Replace the catalog fields of an existing product.
    ///
    /// `created_at` is preserved. `expected` is checked against the stored
    /// version before writing.
    async fn update(
        &self,
        product: Product,
        expected: ExpectedVersion,
    ) -> Result<Product, StoreError>;

    /// Page through products ordered by `(created_at, id)` ascending.
    async fn list(&self, query: &ListQuery) -> Result<ProductPage, StoreError>;

    /// Remove a product. Returns `false` if it did not exist.
    async fn delete(&self, id: &ProductId) -> Result<bool, StoreError>;

    /// Atomically add `delta` to the stock quantity and return the new value.
    ///
    /// The check against zero and the write happen as one step: concurrent
    /// adjustments of the same product never both observe the same quantity.
    /// Fails with `InsufficientStock` (and leaves the product untouched) if the
    /// result would be negative.
    async fn adjust_stock(&self, id: &ProductId, delta: i64) -> Result<i64, StoreError>;
}
