use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use stockroom_core::{DomainError, OrderId, ReservationId};
use stockroom_inventory::{Reservation, StockItem};

use super::r#trait::{BeginOutcome, LedgerError, ReleasedStock, ReservationLedger};

#[derive(Debug, Default)]
struct Entries {
    by_id: HashMap<ReservationId, Reservation>,
    active_by_order: HashMap<OrderId, ReservationId>,
    latest_by_order: HashMap<OrderId, ReservationId>,
}

impl Entries {
    fn get_mut(&mut self, id: ReservationId) -> Result<&mut Reservation, LedgerError> {
        self.by_id.get_mut(&id).ok_or(LedgerError::NotFound(id))
    }

    /// Drop the active-order index entry once a reservation turns terminal.
    fn settle(&mut self, reservation: &Reservation) {
        if !reservation.is_active()
            && self.active_by_order.get(&reservation.order_id) == Some(&reservation.id)
        {
            self.active_by_order.remove(&reservation.order_id);
        }
    }
}

/// In-memory reservation ledger.
///
/// Intended for tests/dev. One mutex guards every entry and both order
/// indexes, so the active-per-order constraint holds across concurrent begins.
#[derive(Debug, Default)]
pub struct InMemoryReservationLedger {
    entries: Mutex<Entries>,
}

impl InMemoryReservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entries>, LedgerError> {
        self.entries
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".to_string()))
    }
}

fn map_transition_error(err: DomainError) -> LedgerError {
    LedgerError::InvalidTransition(err.to_string())
}

#[async_trait::async_trait]
impl ReservationLedger for InMemoryReservationLedger {
    async fn begin(&self, reservation: Reservation) -> Result<BeginOutcome, LedgerError> {
        let mut entries = self.lock()?;

        if let Some(existing) = entries.by_id.get(&reservation.id) {
            return Ok(BeginOutcome::Created(existing.clone()));
        }

        if let Some(active_id) = entries.active_by_order.get(&reservation.order_id) {
            let active = entries
                .by_id
                .get(active_id)
                .ok_or(LedgerError::NotFound(*active_id))?;
            return if active.same_items(&reservation.items) {
                Ok(BeginOutcome::Existing(active.clone()))
            } else {
                Err(LedgerError::OrderConflict(reservation.order_id))
            };
        }

        entries
            .active_by_order
            .insert(reservation.order_id.clone(), reservation.id);
        entries
            .latest_by_order
            .insert(reservation.order_id.clone(), reservation.id);
        entries.by_id.insert(reservation.id, reservation.clone());
        Ok(BeginOutcome::Created(reservation))
    }

    async fn commit(&self, id: ReservationId) -> Result<Reservation, LedgerError> {
        let mut entries = self.lock()?;
        let reservation = entries.get_mut(id)?;
        reservation.commit(Utc::now()).map_err(map_transition_error)?;
        Ok(reservation.clone())
    }

    async fn release(
        &self,
        id: ReservationId,
        items: &[StockItem],
    ) -> Result<ReleasedStock, LedgerError> {
        let mut entries = self.lock()?;
        let reservation = entries.get_mut(id)?;
        if !reservation.is_active() {
            return Err(LedgerError::AlreadyReleased {
                id,
                status: reservation.status,
            });
        }

        let released = reservation
            .release(items, Utc::now())
            .map_err(map_transition_error)?;
        let reservation = reservation.clone();
        entries.settle(&reservation);
        Ok(ReleasedStock {
            reservation,
            released,
        })
    }

    async fn get(&self, order_id: &OrderId) -> Result<Option<Reservation>, LedgerError> {
        let entries = self.lock()?;
        let id = entries
            .active_by_order
            .get(order_id)
            .or_else(|| entries.latest_by_order.get(order_id));
        Ok(id.and_then(|id| entries.by_id.get(id)).cloned())
    }

    async fn get_by_id(&self, id: ReservationId) -> Result<Option<Reservation>, LedgerError> {
        Ok(self.lock()?.by_id.get(&id).cloned())
    }

    async fn expire_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, LedgerError> {
        let mut entries = self.lock()?;
        let now = Utc::now();

        let mut expired = Vec::new();
        for reservation in entries.by_id.values_mut() {
            if reservation.is_expired_at(cutoff) {
                reservation.expire(now).map_err(map_transition_error)?;
                expired.push(reservation.clone());
            }
        }
        for reservation in &expired {
            entries.settle(reservation);
        }

        expired.sort_by_key(|r| r.id);
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use stockroom_core::ProductId;
    use stockroom_inventory::{ReservationStatus, normalize_items};

    fn item(p: &str, q: i64) -> StockItem {
        StockItem::new(ProductId::parse(p).unwrap(), q)
    }

    fn pending(order: &str, items: &[StockItem], hold: Option<Duration>) -> Reservation {
        Reservation::begin(
            ReservationId::new(),
            OrderId::parse(order).unwrap(),
            normalize_items(items).unwrap(),
            Utc::now(),
            hold,
        )
    }

    #[tokio::test]
    async fn begin_then_commit() {
        let ledger = InMemoryReservationLedger::new();
        let r = pending("O1", &[item("A", 5)], None);

        let created = ledger.begin(r.clone()).await.unwrap();
        assert_eq!(created, BeginOutcome::Created(r.clone()));

        let committed = ledger.commit(r.id).await.unwrap();
        assert_eq!(committed.status, ReservationStatus::Committed);
        // Committing twice is harmless.
        assert_eq!(ledger.commit(r.id).await.unwrap().status, ReservationStatus::Committed);
    }

    #[tokio::test]
    async fn repeated_begin_with_same_id_is_recognized() {
        let ledger = InMemoryReservationLedger::new();
        let r = pending("O1", &[item("A", 5)], None);
        ledger.begin(r.clone()).await.unwrap();
        assert!(matches!(
            ledger.begin(r.clone()).await.unwrap(),
            BeginOutcome::Created(ref got) if got.id == r.id
        ));
    }

    #[tokio::test]
    async fn one_active_reservation_per_order() {
        let ledger = InMemoryReservationLedger::new();
        let first = pending("O1", &[item("A", 5)], None);
        ledger.begin(first.clone()).await.unwrap();

        let same_items = pending("O1", &[item("A", 5)], None);
        match ledger.begin(same_items).await.unwrap() {
            BeginOutcome::Existing(r) => assert_eq!(r.id, first.id),
            other => panic!("Expected Existing, got {other:?}"),
        }

        let different = pending("O1", &[item("A", 6)], None);
        assert_eq!(
            ledger.begin(different).await,
            Err(LedgerError::OrderConflict(OrderId::parse("O1").unwrap()))
        );
    }

    #[tokio::test]
    async fn released_order_can_be_reserved_again() {
        let ledger = InMemoryReservationLedger::new();
        let first = pending("O1", &[item("A", 5)], None);
        ledger.begin(first.clone()).await.unwrap();
        let released = ledger.release(first.id, &[]).await.unwrap();
        assert_eq!(released.released, vec![item("A", 5)]);
        assert_eq!(released.reservation.status, ReservationStatus::Released);

        let second = pending("O1", &[item("A", 9)], None);
        assert!(matches!(
            ledger.begin(second.clone()).await.unwrap(),
            BeginOutcome::Created(_)
        ));
        let order = OrderId::parse("O1").unwrap();
        assert_eq!(ledger.get(&order).await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn release_twice_reports_already_released() {
        let ledger = InMemoryReservationLedger::new();
        let r = pending("O1", &[item("A", 5)], None);
        ledger.begin(r.clone()).await.unwrap();
        ledger.release(r.id, &[]).await.unwrap();

        assert_eq!(
            ledger.release(r.id, &[]).await,
            Err(LedgerError::AlreadyReleased {
                id: r.id,
                status: ReservationStatus::Released
            })
        );
    }

    #[tokio::test]
    async fn partial_release_keeps_reservation_active() {
        let ledger = InMemoryReservationLedger::new();
        let r = pending("O1", &[item("A", 5), item("B", 3)], None);
        ledger.begin(r.clone()).await.unwrap();

        let partial = ledger.release(r.id, &[item("A", 2)]).await.unwrap();
        assert_eq!(partial.released, vec![item("A", 2)]);
        assert!(partial.reservation.is_active());

        let order = OrderId::parse("O1").unwrap();
        let current = ledger.get(&order).await.unwrap().unwrap();
        assert_eq!(current.outstanding, vec![item("A", 3), item("B", 3)]);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let ledger = InMemoryReservationLedger::new();
        let id = ReservationId::new();
        assert_eq!(ledger.commit(id).await, Err(LedgerError::NotFound(id)));
        assert_eq!(ledger.release(id, &[]).await, Err(LedgerError::NotFound(id)));
        assert_eq!(ledger.get_by_id(id).await.unwrap(), None);
        assert_eq!(ledger.get(&OrderId::parse("nope").unwrap()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn expire_only_touches_lapsed_active_reservations() {
        let ledger = InMemoryReservationLedger::new();
        let short = pending("O1", &[item("A", 1)], Some(Duration::seconds(10)));
        let long = pending("O2", &[item("A", 1)], Some(Duration::hours(1)));
        let forever = pending("O3", &[item("A", 1)], None);
        for r in [&short, &long, &forever] {
            ledger.begin(r.clone()).await.unwrap();
        }

        let cutoff = Utc::now() + Duration::minutes(1);
        let expired = ledger.expire_older_than(cutoff).await.unwrap();
        assert_eq!(expired.iter().map(|r| r.id).collect::<Vec<_>>(), vec![short.id]);
        assert_eq!(expired[0].status, ReservationStatus::Expired);
        // Already expired entries are not reported again.
        assert!(ledger.expire_older_than(cutoff).await.unwrap().is_empty());

        let expired = ledger.get_by_id(short.id).await.unwrap().unwrap();
        assert_eq!(expired.status, ReservationStatus::Expired);
        assert_eq!(expired.outstanding, vec![item("A", 1)]);

        // The order is free again after expiry.
        let retry = pending("O1", &[item("A", 2)], None);
        assert!(matches!(ledger.begin(retry).await.unwrap(), BeginOutcome::Created(_)));
    }
}
