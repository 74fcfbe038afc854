//! Product Store boundary.
//!
//! The store is the single source of truth for product records and their
//! stock quantities. Stock changes go through `adjust_stock`, which is atomic
//! per product and never lets a quantity drop below zero.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryProductStore;
pub use postgres::PostgresProductStore;
pub use r#trait::{ProductStore, StoreError};
