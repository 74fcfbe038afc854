//! Infrastructure layer: storage drivers, cache, configuration and the
//! inventory orchestration service.

pub mod cache;
pub mod config;
pub mod ledger;
pub mod product_store;
pub mod retry;
pub mod schema;
pub mod service;


pub use cache::{CacheDriver, CacheError, InMemoryCacheDriver, StockCache};
pub use config::{ConfigError, InventoryConfig};
pub use ledger::{
    InMemoryReservationLedger, LedgerError, PostgresReservationLedger, ReservationLedger,
};
pub use product_store::{InMemoryProductStore, PostgresProductStore, ProductStore, StoreError};
pub use retry::RetryPolicy;
pub use service::{
    ExpiryReport, InventoryService, ReaperHandle, ReservationReaper, ServiceError,
    ServiceSettings,
};
