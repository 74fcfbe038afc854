//! Driver selection and service construction.

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;

use stockroom_infra::cache::RedisCacheDriver;
use stockroom_infra::schema::ensure_schema;
use stockroom_infra::{
    InMemoryProductStore, InMemoryReservationLedger, InventoryConfig, InventoryService,
    PostgresProductStore, PostgresReservationLedger, ProductStore, ReservationLedger,
    ServiceSettings, StockCache,
};

/// Wire the inventory service from configuration.
///
/// Postgres backs the product store and the reservation ledger when
/// `DATABASE_URL` is set; Redis backs the cache when `REDIS_URL` is set.
/// Anything unset falls back to the in-process driver.
pub async fn build_service(config: &InventoryConfig) -> anyhow::Result<InventoryService> {
    let (store, ledger): (Arc<dyn ProductStore>, Arc<dyn ReservationLedger>) =
        match &config.database_url {
            Some(url) => {
                let pool = PgPool::connect(url)
                    .await
                    .context("failed to connect to Postgres")?;
                ensure_schema(&pool)
                    .await
                    .context("failed to apply inventory schema")?;
                tracing::info!("using postgres product store and reservation ledger");
                (
                    Arc::new(PostgresProductStore::new(pool.clone())),
                    Arc::new(PostgresReservationLedger::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory store and ledger");
                (
                    Arc::new(InMemoryProductStore::new()),
                    Arc::new(InMemoryReservationLedger::new()),
                )
            }
        };

    let cache = match &config.redis_url {
        Some(url) => {
            let driver = RedisCacheDriver::connect(url)
                .await
                .context("failed to connect to Redis")?;
            tracing::info!("using redis stock cache");
            StockCache::new(Arc::new(driver), config.cache_ttl)
        }
        None => StockCache::in_memory(config.cache_ttl),
    };

    Ok(InventoryService::new(
        store,
        ledger,
        cache,
        ServiceSettings::from(config),
    ))
}
