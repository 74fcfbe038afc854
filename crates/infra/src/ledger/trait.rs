use chrono::{DateTime, Utc};
use thiserror::Error;

use stockroom_core::{OrderId, ReservationId};
use stockroom_inventory::{Reservation, ReservationStatus, StockItem};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("reservation not found: {0}")]
    NotFound(ReservationId),

    /// The order already holds an active reservation for different items.
    #[error("order {0} already holds a different active reservation")]
    OrderConflict(OrderId),

    #[error("reservation {id} is already {status}")]
    AlreadyReleased {
        id: ReservationId,
        status: ReservationStatus,
    },

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Transient failure of the backing storage.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

/// Result of recording a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// The reservation was recorded. Also returned when the same reservation
    /// id was already recorded by an earlier attempt.
    Created(Reservation),
    /// The order already holds an active reservation (different id) for the
    /// same items.
    Existing(Reservation),
}

/// What a release transition took off a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedStock {
    /// The reservation after the transition.
    pub reservation: Reservation,
    /// Quantities the caller must restore to stock.
    pub released: Vec<StockItem>,
}

/// Durable reservation records keyed by reservation id and order id.
#[async_trait::async_trait]
pub trait ReservationLedger: Send + Sync {
    /// Record a pending reservation.
    ///
    /// At most one active reservation may exist per order. If one exists with
    /// a different id, returns `Existing` when its items match and
    /// `OrderConflict` otherwise.
    async fn begin(&self, reservation: Reservation) -> Result<BeginOutcome, LedgerError>;

    /// Pending → Committed. Idempotent for committed reservations.
    async fn commit(&self, id: ReservationId) -> Result<Reservation, LedgerError>;

    /// Take items off an active reservation (all outstanding items when
    /// `items` is empty). Fails with `AlreadyReleased` for terminal reservations.
    async fn release(
        &self,
        id: ReservationId,
        items: &[StockItem],
    ) -> Result<ReleasedStock, LedgerError>;

    /// The active reservation for an order, or the most recent one if none is active.
    async fn get(&self, order_id: &OrderId) -> Result<Option<Reservation>, LedgerError>;

    async fn get_by_id(&self, id: ReservationId) -> Result<Option<Reservation>, LedgerError>;

    /// Mark every active reservation whose hold lapsed at `cutoff` as expired
    /// and return them (ordered by id). Outstanding items are kept on the
    /// records so the caller can restore them.
    async fn expire_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, LedgerError>;
}
