//! Stock Cache: best-effort read acceleration for product records.
//!
//! The cache is never authoritative. Misses, driver errors and corrupt entries
//! all degrade to a store read; writers invalidate after every durable change.
//!
//! ## Stale fills
//!
//! A reader that misses, reads the store, and then fills the cache can race a
//! writer that changes the product and invalidates in between. `StockCache`
//! keeps a per-product invalidation epoch: readers capture it before reading
//! the store and `populate` drops the fill if an invalidation happened since.
//! The epoch lives in-process; across processes sharing one Redis the window
//! is bounded by the TTL.
//!
//! Epochs are drawn from one clock. Deleted products are forgotten: their
//! entry is dropped and the floor reported for untracked products moves to
//! the current clock, so any fill observed earlier no longer matches and the
//! map only holds products that still exist.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_driver;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;

use stockroom_core::ProductId;
use stockroom_products::Product;

pub use in_memory::InMemoryCacheDriver;
#[cfg(feature = "redis")]
pub use redis_driver::RedisCacheDriver;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache serialization error: {0}")]
    Serialization(String),
}

/// Key/value cache backend with per-entry TTL.
#[async_trait::async_trait]
pub trait CacheDriver: Send + Sync {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Epoch of an untracked product in a cache that has never forgotten one.
pub const FRESH_EPOCH: u64 = 0;

#[derive(Debug, Default)]
struct Epochs {
    by_product: HashMap<ProductId, u64>,
    clock: u64,
    /// Epoch reported for products without an entry.
    floor: u64,
}

impl Epochs {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Product cache over a `CacheDriver`, keyed `product:<id>`.
///
/// Every operation is best-effort: failures are logged and swallowed.
#[derive(Clone)]
pub struct StockCache {
    driver: Arc<dyn CacheDriver>,
    ttl: Duration,
    epochs: Arc<Mutex<Epochs>>,
}

impl std::fmt::Debug for StockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockCache").field("ttl", &self.ttl).finish()
    }
}

impl StockCache {
    pub fn new(driver: Arc<dyn CacheDriver>, ttl: Duration) -> Self {
        Self {
            driver,
            ttl,
            epochs: Arc::new(Mutex::new(Epochs::default())),
        }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(InMemoryCacheDriver::new()), ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key(id: &ProductId) -> String {
        format!("product:{id}")
    }

    fn epochs(&self) -> MutexGuard<'_, Epochs> {
        // The map only holds counters; a panic mid-update cannot leave it inconsistent.
        self.epochs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current invalidation epoch of a product.
    pub fn epoch(&self, id: &ProductId) -> u64 {
        let epochs = self.epochs();
        epochs.by_product.get(id).copied().unwrap_or(epochs.floor)
    }

    /// Epoch any product without an entry currently reports. Capture it before
    /// creating a product whose id is not known yet.
    pub fn unseen_epoch(&self) -> u64 {
        self.epochs().floor
    }

    /// Number of products with a tracked epoch.
    pub fn tracked_epochs(&self) -> usize {
        self.epochs().by_product.len()
    }

    /// Cached product, if any. Corrupt entries are evicted and reported as a miss.
    pub async fn get(&self, id: &ProductId) -> Option<Product> {
        let key = Self::key(id);
        let raw = match self.driver.get(&key).await {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(product_id = %id, error = %err, "cache read failed");
                return None;
            }
        };
        match serde_json::from_str::<Product>(&raw) {
            Ok(product) => Some(product),
            Err(err) => {
                tracing::warn!(product_id = %id, error = %err, "evicting corrupt cache entry");
                if let Err(err) = self.driver.delete(&key).await {
                    tracing::warn!(product_id = %id, error = %err, "cache delete failed");
                }
                None
            }
        }
    }

    /// Fill the cache with a product read at `observed_epoch`.
    ///
    /// Skipped if the product was invalidated after the epoch was observed;
    /// an invalidation racing the write itself removes the entry again.
    pub async fn populate(&self, product: &Product, observed_epoch: u64) {
        if self.epoch(&product.id) != observed_epoch {
            tracing::debug!(product_id = %product.id, "skipping stale cache fill");
            return;
        }

        let value = match serde_json::to_string(product) {
            Ok(value) => value,
            Err(err) => {
                let err = CacheError::Serialization(err.to_string());
                tracing::warn!(product_id = %product.id, error = %err, "cache fill failed");
                return;
            }
        };
        let key = Self::key(&product.id);
        if let Err(err) = self.driver.set(&key, value, self.ttl).await {
            tracing::warn!(product_id = %product.id, error = %err, "cache write failed");
            return;
        }

        if self.epoch(&product.id) != observed_epoch {
            if let Err(err) = self.driver.delete(&key).await {
                tracing::warn!(product_id = %product.id, error = %err, "cache delete failed");
            }
        }
    }

    /// Drop the cached entry and bump the product's epoch. Returns the new epoch.
    pub async fn invalidate(&self, id: &ProductId) -> u64 {
        let epoch = {
            let mut epochs = self.epochs();
            let epoch = epochs.tick();
            epochs.by_product.insert(id.clone(), epoch);
            epoch
        };
        self.evict(id).await;
        epoch
    }

    /// Invalidate a deleted product and stop tracking its epoch.
    pub async fn forget(&self, id: &ProductId) {
        {
            let mut epochs = self.epochs();
            epochs.by_product.remove(id);
            epochs.floor = epochs.tick();
        }
        self.evict(id).await;
    }

    async fn evict(&self, id: &ProductId) {
        if let Err(err) = self.driver.delete(&Self::key(id)).await {
            tracing::warn!(product_id = %id, error = %err, "cache invalidation failed");
        }
    }

    /// Replace the cached entry with a freshly written product.
    pub async fn refresh(&self, product: &Product) {
        let epoch = self.invalidate(&product.id).await;
        self.populate(product, epoch).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use chrono::Utc;
    use stockroom_products::{Money, NewProduct};

    fn product(stock: i64) -> Product {
        NewProduct {
            name: "Widget".to_string(),
            description: String::new(),
            sku: "W1".to_string(),
            price: Money::new("USD", 100),
            stock_quantity: stock,
            category: "tools".to_string(),
            attributes: BTreeMap::new(),
        }
        .into_product(ProductId::parse("p-1").unwrap(), Utc::now())
    }

    struct BrokenDriver;

    #[async_trait::async_trait]
    impl CacheDriver for BrokenDriver {
        async fn set(&self, _: &str, _: String, _: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }
        async fn get(&self, _: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }
        async fn delete(&self, _: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn populate_then_get() {
        let cache = StockCache::in_memory(Duration::from_secs(60));
        let p = product(100);
        cache.populate(&p, FRESH_EPOCH).await;
        assert_eq!(cache.get(&p.id).await, Some(p));
    }

    #[tokio::test]
    async fn invalidate_removes_entry_and_bumps_epoch() {
        let cache = StockCache::in_memory(Duration::from_secs(60));
        let p = product(100);
        cache.populate(&p, FRESH_EPOCH).await;

        assert_eq!(cache.invalidate(&p.id).await, 1);
        assert_eq!(cache.get(&p.id).await, None);
        assert_eq!(cache.epoch(&p.id), 1);
    }

    #[tokio::test]
    async fn fill_observed_before_invalidation_is_dropped() {
        let cache = StockCache::in_memory(Duration::from_secs(60));
        let stale = product(100);

        let observed = cache.epoch(&stale.id);
        // A writer changes stock and invalidates while the reader is in flight.
        cache.invalidate(&stale.id).await;
        cache.populate(&stale, observed).await;

        assert_eq!(cache.get(&stale.id).await, None);
    }

    #[tokio::test]
    async fn forget_drops_tracking_and_rejects_older_fills() {
        let cache = StockCache::in_memory(Duration::from_secs(60));
        let p = product(100);
        let other = NewProduct {
            sku: "W2".to_string(),
            ..NewProduct::default()
        }
        .into_product(ProductId::parse("p-2").unwrap(), Utc::now());

        // One reader has seen an invalidation, another never has.
        cache.invalidate(&p.id).await;
        let observed = cache.epoch(&p.id);
        let untouched = cache.epoch(&other.id);
        assert_eq!(cache.tracked_epochs(), 1);

        cache.forget(&p.id).await;
        assert_eq!(cache.tracked_epochs(), 0);

        cache.populate(&p, observed).await;
        cache.populate(&p, FRESH_EPOCH).await;
        cache.populate(&other, untouched).await;
        assert_eq!(cache.get(&p.id).await, None);
        assert_eq!(cache.get(&other.id).await, None);

        // Fills observed after the forget go through.
        cache.populate(&other, cache.unseen_epoch()).await;
        assert_eq!(cache.get(&other.id).await, Some(other));
    }

    #[tokio::test]
    async fn refresh_replaces_entry() {
        let cache = StockCache::in_memory(Duration::from_secs(60));
        cache.populate(&product(100), FRESH_EPOCH).await;
        let fresh = product(60);
        cache.refresh(&fresh).await;
        assert_eq!(cache.get(&fresh.id).await.unwrap().stock_quantity, 60);
    }

    #[tokio::test]
    async fn corrupt_entries_read_as_miss() {
        let driver = Arc::new(InMemoryCacheDriver::new());
        let cache = StockCache::new(driver.clone(), Duration::from_secs(60));
        let id = ProductId::parse("p-1").unwrap();
        driver
            .set(&StockCache::key(&id), "{not json".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.get(&id).await, None);
        assert_eq!(driver.get(&StockCache::key(&id)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn driver_failures_are_swallowed() {
        let cache = StockCache::new(Arc::new(BrokenDriver), Duration::from_secs(60));
        let p = product(1);
        cache.populate(&p, FRESH_EPOCH).await;
        assert_eq!(cache.get(&p.id).await, None);
        assert_eq!(cache.invalidate(&p.id).await, 1);
    }
}
