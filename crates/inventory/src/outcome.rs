//! Result types returned by stock checks, reservations and releases.
//!
//! Business-level unavailability is a normal result, never an error: callers
//! match on these types instead of inspecting error kinds.

use serde::{Deserialize, Serialize};

use stockroom_core::{OrderId, ReservationId};

use crate::reservation::{ReservationStatus, StockItem};

/// Items of an order that could not be satisfied. Returned, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableItem {
    pub order_id: OrderId,
    pub items: Vec<StockItem>,
}

/// Read-only availability check over a set of items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCheck {
    /// True iff every requested item can be satisfied from current stock.
    pub available: bool,
    /// Requested items that current stock cannot satisfy.
    pub unavailable: Vec<StockItem>,
}

impl StockCheck {
    pub fn from_unavailable(unavailable: Vec<StockItem>) -> Self {
        Self {
            available: unavailable.is_empty(),
            unavailable,
        }
    }
}

/// Outcome of a reservation attempt.
///
/// Infrastructure failures are reported through the surrounding `Result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReservationOutcome {
    /// Every item was reserved and recorded. `replayed` is set when the order
    /// had already been reserved and no stock was touched.
    Reserved {
        reservation_id: ReservationId,
        replayed: bool,
    },
    /// At least one item could not be satisfied; nothing was reserved.
    Unavailable(UnavailableItem),
}

impl ReservationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ReservationOutcome::Reserved { .. })
    }

    pub fn reservation_id(&self) -> Option<ReservationId> {
        match self {
            ReservationOutcome::Reserved { reservation_id, .. } => Some(*reservation_id),
            ReservationOutcome::Unavailable(_) => None,
        }
    }

    pub fn unavailable(&self) -> &[StockItem] {
        match self {
            ReservationOutcome::Reserved { .. } => &[],
            ReservationOutcome::Unavailable(u) => &u.items,
        }
    }
}

/// Outcome of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseOutcome {
    pub reservation_id: ReservationId,
    /// Quantities restored to stock by this call (empty for idempotent replays).
    pub released: Vec<StockItem>,
    /// Reservation status after the call.
    pub status: ReservationStatus,
}
