use thiserror::Error;

use stockroom_core::{DomainError, OrderId, ProductId};

use crate::ledger::LedgerError;
use crate::product_store::StoreError;

/// Errors surfaced by `InventoryService`.
///
/// A reservation that cannot be satisfied is not an error: it comes back as
/// `ReservationOutcome::Unavailable`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Malformed request (deterministic).
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("sku already exists: {0}")]
    DuplicateSku(String),

    /// Optimistic concurrency failure; re-read and retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A direct stock adjustment would drive the quantity below zero.
    #[error("insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        available: i64,
        requested: i64,
    },

    /// The order already holds an active reservation for different items.
    #[error("order {0} already holds a different reservation")]
    OrderConflict(OrderId),

    #[error("product store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("reservation ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// The caller cancelled or the deadline passed; every decrement was rolled back.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Whether the same request may succeed if retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Conflict(_)
                | ServiceError::StoreUnavailable(_)
                | ServiceError::LedgerUnavailable(_)
                | ServiceError::Cancelled(_)
        )
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                ServiceError::Validation(msg)
            }
            DomainError::NotFound => ServiceError::NotFound("resource".to_string()),
            DomainError::Conflict(msg) | DomainError::InvalidTransition(msg) => {
                ServiceError::Conflict(msg)
            }
            DomainError::InsufficientStock {
                available,
                requested,
            } => ServiceError::Validation(format!(
                "insufficient stock: available {available}, requested {requested}"
            )),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => ServiceError::NotFound(format!("product {id}")),
            StoreError::Conflict(msg) => ServiceError::Conflict(msg),
            StoreError::InsufficientStock {
                product_id,
                available,
                requested,
            } => ServiceError::InsufficientStock {
                product_id,
                available,
                requested,
            },
            StoreError::DuplicateSku(sku) => ServiceError::DuplicateSku(sku),
            StoreError::Invalid(msg) => ServiceError::Validation(msg),
            StoreError::Unavailable(msg) => ServiceError::StoreUnavailable(msg),
        }
    }
}

impl From<LedgerError> for ServiceError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::NotFound(id) => ServiceError::NotFound(format!("reservation {id}")),
            LedgerError::OrderConflict(order_id) => ServiceError::OrderConflict(order_id),
            LedgerError::AlreadyReleased { id, status } => {
                ServiceError::Conflict(format!("reservation {id} is already {status}"))
            }
            LedgerError::InvalidTransition(msg) => ServiceError::Conflict(msg),
            LedgerError::Unavailable(msg) => ServiceError::LedgerUnavailable(msg),
        }
    }
}
