//! Reserve / release / expire.
//!
//! ## Reserve
//!
//! ```text
//! normalize items (merge duplicates, sort by product id)
//!   ↓
//! 1. ledger lookup by order id: active + same items → replay, different → OrderConflict
//!   ↓
//! 2. decrement each item in ascending order (atomic per product)
//!      insufficient / missing / store failure → restore applied items in reverse
//!      cancelled / past deadline              → restore applied items in reverse
//!   ↓
//! 3. ledger begin + commit (bounded retry)
//!      concurrent winner for the same order   → restore, return winner
//!      failure                                → void record, then restore
//!      void not confirmed                     → keep stock held by the record
//!   ↓
//! 4. invalidate cached products
//! ```
//!
//! The protocol runs on its own task. Dropping the caller's future cancels the
//! task at its next checkpoint and the task still finishes its rollback, so no
//! partial decrement survives a dropped request.
//!
//! Compensating increments are never retried: a retried increment whose first
//! attempt did land would create stock. A failed compensation is logged and
//! leaves stock under-counted.

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, instrument};

use stockroom_core::{OrderId, ReservationId};
use stockroom_inventory::{
    ReleaseOutcome, Reservation, ReservationOutcome, ReservationStatus, StockItem, UnavailableItem,
    normalize_items,
};

use super::{InventoryService, ServiceError};
use crate::ledger::{BeginOutcome, LedgerError, ReleasedStock};
use crate::product_store::StoreError;

/// Reservations expired by one reaper pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    pub expired: Vec<ReservationId>,
    /// Quantities given back to stock.
    pub restored: Vec<StockItem>,
}

impl InventoryService {
    /// Reserve every item for `order_id`, or none of them.
    ///
    /// Unsatisfiable requests come back as `ReservationOutcome::Unavailable`;
    /// errors are reserved for bad input and infrastructure failures, and in
    /// every error case stock is left as it was.
    pub async fn reserve_stock(
        &self,
        order_id: OrderId,
        items: Vec<StockItem>,
    ) -> Result<ReservationOutcome, ServiceError> {
        self.reserve_stock_with_cancel(order_id, items, CancellationToken::new())
            .await
    }

    /// `reserve_stock` with an external cancellation signal.
    ///
    /// Cancelling `cancel` (or dropping the returned future) rolls back any
    /// decrements made so far and yields `ServiceError::Cancelled`, unless the
    /// reservation already reached the ledger.
    #[instrument(skip(self, items, cancel), fields(order_id = %order_id, items = items.len()), err)]
    pub async fn reserve_stock_with_cancel(
        &self,
        order_id: OrderId,
        items: Vec<StockItem>,
        cancel: CancellationToken,
    ) -> Result<ReservationOutcome, ServiceError> {
        let items = normalize_items(&items)?;
        let deadline = self.settings.reserve_timeout.map(|t| Instant::now() + t);

        let token = cancel.child_token();
        let guard = token.clone().drop_guard();
        let this = self.clone();
        let task = tokio::spawn(
            async move { this.run_reservation(order_id, items, token, deadline).await }
                .in_current_span(),
        );
        let joined = task.await;
        guard.disarm();

        joined.map_err(|e| ServiceError::Internal(format!("reservation task failed: {e}")))?
    }

    async fn run_reservation(
        &self,
        order_id: OrderId,
        items: Vec<StockItem>,
        cancel: CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<ReservationOutcome, ServiceError> {
        // 1. Idempotent replay.
        let existing = self
            .settings
            .ledger_retry
            .run("ledger_get", LedgerError::is_transient, || {
                self.ledger.get(&order_id)
            })
            .await?;
        if let Some(existing) = existing.filter(Reservation::is_active) {
            if existing.same_items(&items) {
                if existing.status == ReservationStatus::Pending {
                    // Left behind by an attempt whose commit and void both failed.
                    self.settings
                        .ledger_retry
                        .run("ledger_commit", LedgerError::is_transient, || {
                            self.ledger.commit(existing.id)
                        })
                        .await?;
                }
                tracing::info!(reservation_id = %existing.id, "replayed reservation");
                return Ok(ReservationOutcome::Reserved {
                    reservation_id: existing.id,
                    replayed: true,
                });
            }
            return Err(ServiceError::OrderConflict(order_id));
        }

        // 2. Decrement in ascending product order.
        let mut applied: Vec<StockItem> = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            if let Some(reason) = interrupted(&cancel, deadline) {
                self.roll_back(&applied).await;
                tracing::warn!(reason, "reservation interrupted, rolled back");
                return Err(ServiceError::Cancelled(reason.to_string()));
            }

            match self
                .store
                .adjust_stock(&item.product_id, -item.quantity)
                .await
            {
                Ok(_) => applied.push(item.clone()),
                Err(StoreError::InsufficientStock { .. }) => {
                    self.roll_back(&applied).await;
                    let mut short = vec![item.clone()];
                    short.extend(self.shortfalls(&items[idx + 1..]).await);
                    tracing::info!(unavailable = short.len(), "reservation unavailable");
                    return Ok(ReservationOutcome::Unavailable(UnavailableItem {
                        order_id,
                        items: short,
                    }));
                }
                Err(err) => {
                    self.roll_back(&applied).await;
                    return Err(err.into());
                }
            }
        }

        if let Some(reason) = interrupted(&cancel, deadline) {
            self.roll_back(&applied).await;
            tracing::warn!(reason, "reservation interrupted, rolled back");
            return Err(ServiceError::Cancelled(reason.to_string()));
        }

        // 3. Record in the ledger.
        let hold = self
            .settings
            .reservation_hold
            .and_then(|h| chrono::Duration::from_std(h).ok());
        let reservation = Reservation::begin(
            ReservationId::new(),
            order_id.clone(),
            items,
            Utc::now(),
            hold,
        );
        let reservation_id = reservation.id;

        let begun = self
            .settings
            .ledger_retry
            .run("ledger_begin", LedgerError::is_transient, || {
                self.ledger.begin(reservation.clone())
            })
            .await;
        match begun {
            Ok(BeginOutcome::Created(_)) => {}
            Ok(BeginOutcome::Existing(winner)) => {
                // A concurrent request for the same order recorded first.
                self.roll_back(&applied).await;
                tracing::info!(reservation_id = %winner.id, "reservation raced a replay");
                return Ok(ReservationOutcome::Reserved {
                    reservation_id: winner.id,
                    replayed: true,
                });
            }
            Err(LedgerError::OrderConflict(_)) => {
                self.roll_back(&applied).await;
                return Err(ServiceError::OrderConflict(order_id));
            }
            Err(err) => return Err(self.abandon(reservation_id, &applied, err).await),
        }

        if let Err(err) = self
            .settings
            .ledger_retry
            .run("ledger_commit", LedgerError::is_transient, || {
                self.ledger.commit(reservation_id)
            })
            .await
        {
            return Err(self.abandon(reservation_id, &applied, err).await);
        }

        // 4. Invalidate.
        for item in &applied {
            self.cache.invalidate(&item.product_id).await;
        }
        tracing::info!(%reservation_id, "stock reserved");
        Ok(ReservationOutcome::Reserved {
            reservation_id,
            replayed: false,
        })
    }

    /// Release reserved stock for an order.
    ///
    /// Empty `items` releases everything outstanding; otherwise each named
    /// product is released up to its outstanding quantity. Releasing an
    /// already released or expired reservation succeeds without touching stock.
    #[instrument(skip(self, items), fields(order_id = %order_id, items = items.len()), err)]
    pub async fn release_stock(
        &self,
        order_id: OrderId,
        items: Vec<StockItem>,
    ) -> Result<ReleaseOutcome, ServiceError> {
        for item in &items {
            item.validate()?;
        }
        let this = self.clone();
        tokio::spawn(async move { this.run_release(order_id, items).await }.in_current_span())
            .await
            .map_err(|e| ServiceError::Internal(format!("release task failed: {e}")))?
    }

    async fn run_release(
        &self,
        order_id: OrderId,
        items: Vec<StockItem>,
    ) -> Result<ReleaseOutcome, ServiceError> {
        let reservation = self
            .settings
            .ledger_retry
            .run("ledger_get", LedgerError::is_transient, || {
                self.ledger.get(&order_id)
            })
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("reservation for order {order_id}")))?;

        if !reservation.is_active() {
            return Ok(ReleaseOutcome {
                reservation_id: reservation.id,
                released: Vec::new(),
                status: reservation.status,
            });
        }

        // Ledger first: once the transition is durable nobody else can
        // release the same quantities.
        let ReleasedStock {
            reservation,
            released,
        } = match self.ledger.release(reservation.id, &items).await {
            Ok(released) => released,
            Err(LedgerError::AlreadyReleased { id, status }) => {
                return Ok(ReleaseOutcome {
                    reservation_id: id,
                    released: Vec::new(),
                    status,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let mut failed = Vec::new();
        for item in &released {
            if let Err(err) = self.restore(item).await {
                failed.push(format!("{}: {err}", item.product_id));
            }
            self.cache.invalidate(&item.product_id).await;
        }
        if !failed.is_empty() {
            return Err(ServiceError::StoreUnavailable(format!(
                "released reservation {} but could not restore stock for {}",
                reservation.id,
                failed.join(", ")
            )));
        }

        tracing::info!(
            reservation_id = %reservation.id,
            status = %reservation.status,
            released = released.len(),
            "stock released"
        );
        Ok(ReleaseOutcome {
            reservation_id: reservation.id,
            released,
            status: reservation.status,
        })
    }

    /// Expire reservations whose hold lapsed at `cutoff` and give their
    /// outstanding stock back.
    #[instrument(skip(self), err)]
    pub async fn expire_reservations(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<ExpiryReport, ServiceError> {
        let expired = self
            .settings
            .ledger_retry
            .run("ledger_expire", LedgerError::is_transient, || {
                self.ledger.expire_older_than(cutoff)
            })
            .await?;

        let mut report = ExpiryReport::default();
        for reservation in expired {
            for item in &reservation.outstanding {
                match self.restore(item).await {
                    Ok(()) => report.restored.push(item.clone()),
                    Err(err) => tracing::error!(
                        reservation_id = %reservation.id,
                        product_id = %item.product_id,
                        quantity = item.quantity,
                        error = %err,
                        "failed to restore expired reservation stock"
                    ),
                }
                self.cache.invalidate(&item.product_id).await;
            }
            tracing::info!(
                reservation_id = %reservation.id,
                order_id = %reservation.order_id,
                "reservation expired"
            );
            report.expired.push(reservation.id);
        }
        Ok(report)
    }

    /// Give one item back to stock. A product deleted in the meantime is skipped.
    async fn restore(&self, item: &StockItem) -> Result<(), StoreError> {
        match self
            .store
            .adjust_stock(&item.product_id, item.quantity)
            .await
        {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound(id)) => {
                tracing::warn!(product_id = %id, "product gone, dropping restored stock");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Undo applied decrements in reverse order.
    async fn roll_back(&self, applied: &[StockItem]) {
        for item in applied.iter().rev() {
            if let Err(err) = self.restore(item).await {
                tracing::error!(
                    product_id = %item.product_id,
                    quantity = item.quantity,
                    error = %err,
                    "rollback failed; stock under-counted"
                );
            }
        }
        for item in applied {
            self.cache.invalidate(&item.product_id).await;
        }
    }

    /// Void a reservation that may or may not have been recorded, then roll back.
    ///
    /// Rollback only follows a confirmed void. If the ledger cannot confirm it,
    /// the decrements stay in place: a surviving record still holds them and a
    /// later release or expiry gives them back.
    async fn abandon(
        &self,
        id: ReservationId,
        applied: &[StockItem],
        cause: LedgerError,
    ) -> ServiceError {
        let voided = self
            .settings
            .ledger_retry
            .run("ledger_void", LedgerError::is_transient, || {
                self.ledger.release(id, &[])
            })
            .await;
        match voided {
            Ok(_) | Err(LedgerError::NotFound(_)) | Err(LedgerError::AlreadyReleased { .. }) => {
                self.roll_back(applied).await;
                cause.into()
            }
            Err(err) => {
                tracing::error!(
                    reservation_id = %id,
                    items = applied.len(),
                    error = %err,
                    "could not void reservation; its stock stays held"
                );
                for item in applied {
                    self.cache.invalidate(&item.product_id).await;
                }
                ServiceError::LedgerUnavailable(format!(
                    "reservation {id} could not be voided: {err}"
                ))
            }
        }
    }

    /// Remaining items that current stock cannot satisfy (best-effort).
    async fn shortfalls(&self, rest: &[StockItem]) -> Vec<StockItem> {
        let mut short = Vec::new();
        for item in rest {
            match self.store.get(&item.product_id).await {
                Ok(product) if product.can_fulfil(item.quantity) => {}
                Ok(_) | Err(StoreError::NotFound(_)) => short.push(item.clone()),
                Err(err) => {
                    tracing::debug!(product_id = %item.product_id, error = %err, "shortfall check skipped");
                }
            }
        }
        short
    }
}

fn interrupted(cancel: &CancellationToken, deadline: Option<Instant>) -> Option<&'static str> {
    if cancel.is_cancelled() {
        Some("cancelled by caller")
    } else if deadline.is_some_and(|d| Instant::now() >= d) {
        Some("reservation deadline exceeded")
    } else {
        None
    }
}
