//! `stockroom-core` — shared primitives for the inventory domain.
//!
//! This crate contains **pure domain** building blocks (no infrastructure concerns):
//! typed identifiers, the domain error model and optimistic concurrency expectations.

pub mod error;
pub mod id;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{OrderId, ProductId, ReservationId};
pub use version::ExpectedVersion;
