//! Reservation Ledger boundary.
//!
//! The ledger records reservations durably and enforces at most one active
//! (pending or committed) reservation per order id.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryReservationLedger;
pub use postgres::PostgresReservationLedger;
pub use r#trait::{BeginOutcome, LedgerError, ReleasedStock, ReservationLedger};
