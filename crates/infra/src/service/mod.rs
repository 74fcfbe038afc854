//! Inventory orchestration (application-level).
//!
//! `InventoryService` composes the Product Store, the Reservation Ledger and
//! the Stock Cache behind the operations the API exposes. It owns no state of
//! its own; every collaborator is injected at construction.
//!
//! ## Consistency model
//!
//! - The store is authoritative for stock; the cache is invalidated after every
//!   durable stock or catalog change and never consulted for reservations.
//! - Multi-item reservations decrement in ascending product-id order and roll
//!   back in reverse on any failure (see `reservation`).
//! - The ledger keys reservations by order id, making reserve idempotent.

mod error;
mod reaper;
mod reservation;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::instrument;

use stockroom_core::{ExpectedVersion, OrderId, ProductId};
use stockroom_inventory::{Reservation, StockCheck, StockItem, normalize_items};
use stockroom_products::{ListQuery, NewProduct, Product, ProductPage, ProductPatch};

use crate::cache::StockCache;
use crate::config::InventoryConfig;
use crate::ledger::{InMemoryReservationLedger, LedgerError, ReservationLedger};
use crate::product_store::{InMemoryProductStore, ProductStore, StoreError};
use crate::retry::RetryPolicy;

pub use error::ServiceError;
pub use reaper::{ReaperHandle, ReservationReaper};
pub use reservation::ExpiryReport;

/// Tunables for reservation handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    /// How long a reservation holds stock before the reaper may expire it.
    pub reservation_hold: Option<Duration>,
    /// Retry policy for ledger calls that are safe to repeat.
    pub ledger_retry: RetryPolicy,
    /// Upper bound on the decrement phase of a reservation.
    pub reserve_timeout: Option<Duration>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&InventoryConfig::default())
    }
}

impl From<&InventoryConfig> for ServiceSettings {
    fn from(config: &InventoryConfig) -> Self {
        Self {
            reservation_hold: config.reservation_hold,
            ledger_retry: config.ledger_retry.clone(),
            reserve_timeout: config.reserve_timeout,
        }
    }
}

/// Orchestrates catalog reads/writes, stock checks and reservations.
///
/// Cheap to clone; clones share the same collaborators.
#[derive(Clone)]
pub struct InventoryService {
    store: Arc<dyn ProductStore>,
    ledger: Arc<dyn ReservationLedger>,
    cache: StockCache,
    settings: ServiceSettings,
}

impl std::fmt::Debug for InventoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryService")
            .field("cache", &self.cache)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl InventoryService {
    pub fn new(
        store: Arc<dyn ProductStore>,
        ledger: Arc<dyn ReservationLedger>,
        cache: StockCache,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            ledger,
            cache,
            settings,
        }
    }

    /// Service over in-process drivers (tests/dev).
    pub fn in_memory(settings: ServiceSettings, cache_ttl: Duration) -> Self {
        Self::new(
            Arc::new(InMemoryProductStore::new()),
            Arc::new(InMemoryReservationLedger::new()),
            StockCache::in_memory(cache_ttl),
            settings,
        )
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn cache(&self) -> &StockCache {
        &self.cache
    }

    // ---------------------------------------------------------------------
    // Catalog
    // ---------------------------------------------------------------------

    #[instrument(skip(self, new), fields(sku = %new.sku), err)]
    pub async fn create_product(&self, new: NewProduct) -> Result<Product, ServiceError> {
        new.validate()?;
        // The id is unknown until the insert; anything that touches it
        // afterwards moves its epoch off the one captured here.
        let epoch = self.cache.unseen_epoch();
        let product = self.store.create(new).await?;
        self.cache.populate(&product, epoch).await;
        tracing::info!(product_id = %product.id, "product created");
        Ok(product)
    }

    /// Cache-aside read. Misses fall through to the store and fill the cache;
    /// absent products are not cached.
    #[instrument(skip(self), fields(product_id = %id), err)]
    pub async fn get_product(&self, id: &ProductId) -> Result<Product, ServiceError> {
        if let Some(product) = self.cache.get(id).await {
            tracing::debug!("cache hit");
            return Ok(product);
        }
        let epoch = self.cache.epoch(id);
        let product = self.store.get(id).await?;
        self.cache.populate(&product, epoch).await;
        Ok(product)
    }

    /// Apply a partial update guarded by the version that was read.
    ///
    /// A concurrent write (including a stock change) surfaces as `Conflict`.
    #[instrument(skip(self, patch), fields(product_id = %id), err)]
    pub async fn update_product(
        &self,
        id: &ProductId,
        patch: ProductPatch,
    ) -> Result<Product, ServiceError> {
        let current = self.get_product(id).await?;
        if patch.is_empty() {
            return Ok(current);
        }

        let next = patch.apply_to(&current, Utc::now())?;
        match self
            .store
            .update(next, ExpectedVersion::Exact(current.version))
            .await
        {
            Ok(updated) => {
                self.cache.refresh(&updated).await;
                tracing::info!(version = updated.version, "product updated");
                Ok(updated)
            }
            Err(err @ (StoreError::Conflict(_) | StoreError::NotFound(_))) => {
                // The read may have come from a stale cache entry.
                self.cache.invalidate(id).await;
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Returns `false` if the product did not exist.
    #[instrument(skip(self), fields(product_id = %id), err)]
    pub async fn delete_product(&self, id: &ProductId) -> Result<bool, ServiceError> {
        let deleted = self.store.delete(id).await?;
        self.cache.forget(id).await;
        if deleted {
            tracing::info!("product deleted");
        }
        Ok(deleted)
    }

    #[instrument(skip(self), err)]
    pub async fn list_products(&self, query: &ListQuery) -> Result<ProductPage, ServiceError> {
        Ok(self.store.list(query).await?)
    }

    // ---------------------------------------------------------------------
    // Stock
    // ---------------------------------------------------------------------

    /// Read-only availability check. Unknown products count as unavailable.
    #[instrument(skip(self, items), fields(items = items.len()), err)]
    pub async fn check_stock(&self, items: &[StockItem]) -> Result<StockCheck, ServiceError> {
        let items = normalize_items(items)?;
        let mut unavailable = Vec::new();
        for item in items {
            match self.get_product(&item.product_id).await {
                Ok(product) if product.can_fulfil(item.quantity) => {}
                Ok(_) | Err(ServiceError::NotFound(_)) => unavailable.push(item),
                Err(err) => return Err(err),
            }
        }
        Ok(StockCheck::from_unavailable(unavailable))
    }

    /// Add `delta` to a product's stock (negative to remove). Returns the new quantity.
    #[instrument(skip(self), fields(product_id = %id, delta), err)]
    pub async fn adjust_stock(&self, id: &ProductId, delta: i64) -> Result<i64, ServiceError> {
        if delta == 0 {
            return Err(ServiceError::Validation("delta cannot be zero".to_string()));
        }
        // Not negatable, so it has no removal quantity to report.
        if delta == i64::MIN {
            return Err(ServiceError::Validation("delta is out of range".to_string()));
        }
        let quantity = self.store.adjust_stock(id, delta).await?;
        self.cache.invalidate(id).await;
        tracing::info!(stock_quantity = quantity, "stock adjusted");
        Ok(quantity)
    }

    /// The active reservation for an order, or its most recent one.
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn get_reservation(&self, order_id: &OrderId) -> Result<Reservation, ServiceError> {
        self.settings
            .ledger_retry
            .run("ledger_get", LedgerError::is_transient, || {
                self.ledger.get(order_id)
            })
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("reservation for order {order_id}")))
    }
}
