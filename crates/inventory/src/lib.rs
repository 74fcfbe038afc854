//! Stock reservation domain module.
//!
//! This crate contains the reservation lifecycle rules (begin, commit, partial
//! release, expiry) and the result types of stock checks and reservations,
//! implemented purely as deterministic domain logic (no IO, no storage).

pub mod outcome;
pub mod reservation;

pub use outcome::{ReleaseOutcome, ReservationOutcome, StockCheck, UnavailableItem};
pub use reservation::{normalize_items, Reservation, ReservationStatus, StockItem};
