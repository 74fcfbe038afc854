use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, OrderId, ProductId, ReservationId};

/// A requested (or reserved) quantity of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl StockItem {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity <= 0 {
            return Err(DomainError::validation(format!(
                "quantity for product {} must be positive",
                self.product_id
            )));
        }
        Ok(())
    }
}

/// Canonical form of a reservation request.
///
/// Every quantity must be positive; duplicate product entries are merged and
/// the result is sorted by product id ascending. The ascending order is the
/// acquisition order every reservation uses, and its reverse is the rollback
/// order.
pub fn normalize_items(items: &[StockItem]) -> DomainResult<Vec<StockItem>> {
    if items.is_empty() {
        return Err(DomainError::validation("at least one item is required"));
    }
    merge_items(items)
}

fn merge_items(items: &[StockItem]) -> DomainResult<Vec<StockItem>> {
    let mut merged: BTreeMap<ProductId, i64> = BTreeMap::new();
    for item in items {
        item.validate()?;
        let qty = merged.entry(item.product_id.clone()).or_insert(0);
        *qty = qty
            .checked_add(item.quantity)
            .ok_or_else(|| DomainError::validation("quantity overflows"))?;
    }
    Ok(merged
        .into_iter()
        .map(|(product_id, quantity)| StockItem::new(product_id, quantity))
        .collect())
}

/// Reservation status lifecycle.
///
/// `Pending` and `Committed` are active (they hold stock); `Released` and
/// `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Committed,
    Released,
    Expired,
}

impl ReservationStatus {
    pub fn is_active(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Committed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Committed => "committed",
            ReservationStatus::Released => "released",
            ReservationStatus::Expired => "expired",
        }
    }
}

impl core::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ReservationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReservationStatus::Pending),
            "committed" => Ok(ReservationStatus::Committed),
            "released" => Ok(ReservationStatus::Released),
            "expired" => Ok(ReservationStatus::Expired),
            other => Err(DomainError::validation(format!(
                "unknown reservation status: {other}"
            ))),
        }
    }
}

/// A durable claim against stock quantities, keyed by order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub order_id: OrderId,
    /// Items as originally reserved (normalized).
    pub items: Vec<StockItem>,
    /// Items still held; shrinks on partial release.
    pub outstanding: Vec<StockItem>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Start a pending reservation. `items` must already be normalized.
    pub fn begin(
        id: ReservationId,
        order_id: OrderId,
        items: Vec<StockItem>,
        now: DateTime<Utc>,
        hold: Option<Duration>,
    ) -> Self {
        Self {
            id,
            order_id,
            outstanding: items.clone(),
            items,
            status: ReservationStatus::Pending,
            created_at: now,
            updated_at: now,
            expires_at: hold.map(|h| now + h),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Whether a replayed request asks for exactly the reserved items.
    pub fn same_items(&self, normalized: &[StockItem]) -> bool {
        self.items == normalized
    }

    /// Whether an active reservation's hold has lapsed at `cutoff`.
    pub fn is_expired_at(&self, cutoff: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at.is_some_and(|at| at <= cutoff)
    }

    /// Pending → Committed. Committing twice is a no-op.
    pub fn commit(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            ReservationStatus::Pending => {
                self.status = ReservationStatus::Committed;
                self.updated_at = now;
                Ok(())
            }
            ReservationStatus::Committed => Ok(()),
            other => Err(DomainError::invalid_transition(format!(
                "cannot commit a {other} reservation"
            ))),
        }
    }

    /// Release held stock, returning what was actually released.
    ///
    /// An empty request releases everything outstanding. Otherwise only the
    /// products named in the request are released, each capped at its
    /// outstanding quantity; items not held by this reservation are ignored.
    /// The reservation becomes `Released` once nothing is outstanding.
    pub fn release(
        &mut self,
        request: &[StockItem],
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<StockItem>> {
        if !self.is_active() {
            return Err(DomainError::invalid_transition(format!(
                "cannot release a {} reservation",
                self.status
            )));
        }

        let released = if request.is_empty() {
            std::mem::take(&mut self.outstanding)
        } else {
            let wanted = merge_items(request)?;
            let mut released = Vec::new();
            for want in wanted {
                if let Some(held) = self
                    .outstanding
                    .iter_mut()
                    .find(|held| held.product_id == want.product_id)
                {
                    let qty = want.quantity.min(held.quantity);
                    held.quantity -= qty;
                    released.push(StockItem::new(want.product_id, qty));
                }
            }
            self.outstanding.retain(|held| held.quantity > 0);
            released
        };

        if self.outstanding.is_empty() {
            self.status = ReservationStatus::Released;
        }
        self.updated_at = now;
        Ok(released)
    }

    /// Active → Expired. Outstanding items are kept so the caller can restore them.
    pub fn expire(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.is_active() {
            return Err(DomainError::invalid_transition(format!(
                "cannot expire a {} reservation",
                self.status
            )));
        }
        self.status = ReservationStatus::Expired;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn pid(s: &str) -> ProductId {
        ProductId::parse(s).unwrap()
    }

    fn item(p: &str, q: i64) -> StockItem {
        StockItem::new(pid(p), q)
    }

    fn reservation(items: &[StockItem]) -> Reservation {
        Reservation::begin(
            ReservationId::new(),
            OrderId::parse("O1").unwrap(),
            normalize_items(items).unwrap(),
            test_time(),
            Some(Duration::minutes(15)),
        )
    }

    #[test]
    fn normalize_sorts_and_merges() {
        let items = normalize_items(&[item("B", 3), item("A", 5), item("B", 2)]).unwrap();
        assert_eq!(items, vec![item("A", 5), item("B", 5)]);
    }

    #[test]
    fn normalize_rejects_empty_and_non_positive() {
        assert!(matches!(normalize_items(&[]), Err(DomainError::Validation(_))));
        assert!(matches!(
            normalize_items(&[item("A", 0)]),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            normalize_items(&[item("A", -2)]),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn begin_creates_pending_reservation_with_expiry() {
        let r = reservation(&[item("A", 5)]);
        assert_eq!(r.status, ReservationStatus::Pending);
        assert_eq!(r.outstanding, r.items);
        assert_eq!(r.expires_at, Some(test_time() + Duration::minutes(15)));
    }

    #[test]
    fn commit_is_idempotent() {
        let mut r = reservation(&[item("A", 5)]);
        r.commit(test_time()).unwrap();
        r.commit(test_time()).unwrap();
        assert_eq!(r.status, ReservationStatus::Committed);
    }

    #[test]
    fn commit_rejects_released_reservation() {
        let mut r = reservation(&[item("A", 5)]);
        r.release(&[], test_time()).unwrap();
        assert!(matches!(
            r.commit(test_time()),
            Err(DomainError::InvalidTransition(_))
        ));
    }

    #[test]
    fn full_release_transitions_to_released() {
        let mut r = reservation(&[item("A", 5), item("B", 3)]);
        r.commit(test_time()).unwrap();
        let released = r.release(&[], test_time()).unwrap();
        assert_eq!(released, vec![item("A", 5), item("B", 3)]);
        assert_eq!(r.status, ReservationStatus::Released);
        assert!(r.outstanding.is_empty());
    }

    #[test]
    fn releasing_every_item_explicitly_also_releases() {
        let mut r = reservation(&[item("A", 5)]);
        let released = r.release(&[item("A", 5)], test_time()).unwrap();
        assert_eq!(released, vec![item("A", 5)]);
        assert_eq!(r.status, ReservationStatus::Released);
    }

    #[test]
    fn partial_release_keeps_remainder_active() {
        let mut r = reservation(&[item("A", 5), item("B", 3)]);
        r.commit(test_time()).unwrap();

        let released = r.release(&[item("A", 2)], test_time()).unwrap();
        assert_eq!(released, vec![item("A", 2)]);
        assert_eq!(r.status, ReservationStatus::Committed);
        assert_eq!(r.outstanding, vec![item("A", 3), item("B", 3)]);
        assert_eq!(r.items, vec![item("A", 5), item("B", 3)]);
    }

    #[test]
    fn partial_release_caps_at_outstanding_and_ignores_unknown_products() {
        let mut r = reservation(&[item("A", 5), item("B", 3)]);
        let released = r.release(&[item("B", 10), item("Z", 1)], test_time()).unwrap();
        assert_eq!(released, vec![item("B", 3)]);
        assert_eq!(r.outstanding, vec![item("A", 5)]);
        assert!(r.is_active());
    }

    #[test]
    fn release_of_terminal_reservation_is_rejected() {
        let mut r = reservation(&[item("A", 5)]);
        r.expire(test_time()).unwrap();
        assert!(matches!(
            r.release(&[], test_time()),
            Err(DomainError::InvalidTransition(_))
        ));
    }

    #[test]
    fn expiry_respects_deadline() {
        let r = reservation(&[item("A", 5)]);
        assert!(!r.is_expired_at(test_time() + Duration::minutes(14)));
        assert!(r.is_expired_at(test_time() + Duration::minutes(15)));

        let no_hold = Reservation::begin(
            ReservationId::new(),
            OrderId::parse("O2").unwrap(),
            vec![item("A", 1)],
            test_time(),
            None,
        );
        assert!(!no_hold.is_expired_at(test_time() + Duration::days(365)));
    }

    #[test]
    fn expire_keeps_outstanding_items() {
        let mut r = reservation(&[item("A", 5)]);
        r.expire(test_time()).unwrap();
        assert_eq!(r.status, ReservationStatus::Expired);
        assert_eq!(r.outstanding, vec![item("A", 5)]);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ReservationStatus::Pending,
            ReservationStatus::Committed,
            ReservationStatus::Released,
            ReservationStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<ReservationStatus>().unwrap(), status);
        }
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_items() -> impl Strategy<Value = Vec<StockItem>> {
            prop::collection::vec(
                (prop::sample::select(vec!["A", "B", "C", "D"]), 1i64..50),
                1..6,
            )
            .prop_map(|v| v.into_iter().map(|(p, q)| item(p, q)).collect())
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                .. ProptestConfig::default()
            })]

            #[test]
            fn partial_releases_never_exceed_reserved(
                reserved in arb_items(),
                releases in prop::collection::vec(arb_items(), 0..6),
            ) {
                let mut r = reservation(&reserved);
                let total_reserved: i64 = r.items.iter().map(|i| i.quantity).sum();
                let mut total_released = 0;

                for req in releases {
                    match r.release(&req, test_time()) {
                        Ok(released) => {
                            total_released += released.iter().map(|i| i.quantity).sum::<i64>();
                        }
                        Err(_) => prop_assert!(!r.is_active()),
                    }
                    let outstanding: i64 = r.outstanding.iter().map(|i| i.quantity).sum();
                    prop_assert_eq!(outstanding + total_released, total_reserved);
                    prop_assert!(r.outstanding.iter().all(|i| i.quantity > 0));
                }
            }

            #[test]
            fn normalize_is_idempotent(items in arb_items()) {
                let once = normalize_items(&items).unwrap();
                let twice = normalize_items(&once).unwrap();
                prop_assert_eq!(once, twice);
            }
        }
    }
}
