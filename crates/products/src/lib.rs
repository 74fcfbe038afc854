//! Product catalog domain module.
//!
//! This crate contains the product record, its create/update requests and the
//! pure stock rules, implemented as deterministic domain logic (no IO, no HTTP,
//! no storage).

pub mod product;
pub mod query;

pub use product::{Money, NewProduct, Product, ProductPatch};
pub use query::{ListQuery, ProductPage, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
