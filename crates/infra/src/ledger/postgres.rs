//! Postgres-backed reservation ledger.
//!
//! A partial unique index on `order_id` (restricted to `pending` and
//! `committed` rows) enforces one active reservation per order at the
//! database level. Transitions lock the row with `SELECT ... FOR UPDATE` and
//! apply the lifecycle rules from `stockroom_inventory::Reservation`.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use stockroom_core::{OrderId, ReservationId};
use stockroom_inventory::{Reservation, ReservationStatus, StockItem};

use super::r#trait::{BeginOutcome, LedgerError, ReleasedStock, ReservationLedger};

const RESERVATION_COLUMNS: &str =
    "id, order_id, items, outstanding, status, created_at, updated_at, expires_at";

/// A concurrent release can free the order between a rejected insert and the
/// follow-up read; retry the insert a few times before giving up.
const BEGIN_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct PostgresReservationLedger {
    pool: PgPool,
}

impl PostgresReservationLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_active(&self, order_id: &OrderId) -> Result<Option<Reservation>, LedgerError> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE order_id = $1 AND status IN ('pending', 'committed')"
        );
        let row = sqlx::query(&sql)
            .bind(order_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_active", e))?;
        row.as_ref().map(decode).transpose()
    }

    async fn lock_for_update(
        tx: &mut Transaction<'_, Postgres>,
        id: ReservationId,
    ) -> Result<Reservation, LedgerError> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("lock_reservation", e))?
            .ok_or(LedgerError::NotFound(id))?;
        decode(&row)
    }

    async fn write_back(
        tx: &mut Transaction<'_, Postgres>,
        reservation: &Reservation,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            UPDATE reservations
            SET outstanding = $2, status = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(Json(&reservation.outstanding))
        .bind(reservation.status.as_str())
        .bind(reservation.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_reservation", e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ReservationLedger for PostgresReservationLedger {
    #[instrument(skip(self, reservation), fields(reservation_id = %reservation.id, order_id = %reservation.order_id), err)]
    async fn begin(&self, reservation: Reservation) -> Result<BeginOutcome, LedgerError> {
        let insert = format!(
            "INSERT INTO reservations ({RESERVATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT DO NOTHING \
             RETURNING {RESERVATION_COLUMNS}"
        );

        for _ in 0..BEGIN_ATTEMPTS {
            let inserted = sqlx::query(&insert)
                .bind(reservation.id.as_uuid())
                .bind(reservation.order_id.as_str())
                .bind(Json(&reservation.items))
                .bind(Json(&reservation.outstanding))
                .bind(reservation.status.as_str())
                .bind(reservation.created_at)
                .bind(reservation.updated_at)
                .bind(reservation.expires_at)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("begin", e))?;

            if let Some(row) = inserted {
                return Ok(BeginOutcome::Created(decode(&row)?));
            }

            // Either this id was recorded by an earlier attempt, or the order
            // already holds an active reservation.
            if let Some(own) = self.get_by_id(reservation.id).await? {
                return Ok(BeginOutcome::Created(own));
            }
            if let Some(active) = self.find_active(&reservation.order_id).await? {
                return if active.same_items(&reservation.items) {
                    Ok(BeginOutcome::Existing(active))
                } else {
                    Err(LedgerError::OrderConflict(reservation.order_id))
                };
            }
        }

        Err(LedgerError::Unavailable(format!(
            "could not record reservation for order {} after {BEGIN_ATTEMPTS} attempts",
            reservation.order_id
        )))
    }

    #[instrument(skip(self), fields(reservation_id = %id), err)]
    async fn commit(&self, id: ReservationId) -> Result<Reservation, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut reservation = Self::lock_for_update(&mut tx, id).await?;
        if reservation.status != ReservationStatus::Committed {
            reservation
                .commit(Utc::now())
                .map_err(|e| LedgerError::InvalidTransition(e.to_string()))?;
            Self::write_back(&mut tx, &reservation).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(reservation)
    }

    #[instrument(skip(self, items), fields(reservation_id = %id, items = items.len()), err)]
    async fn release(
        &self,
        id: ReservationId,
        items: &[StockItem],
    ) -> Result<ReleasedStock, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut reservation = Self::lock_for_update(&mut tx, id).await?;
        if !reservation.is_active() {
            return Err(LedgerError::AlreadyReleased {
                id,
                status: reservation.status,
            });
        }
        let released = reservation
            .release(items, Utc::now())
            .map_err(|e| LedgerError::InvalidTransition(e.to_string()))?;
        Self::write_back(&mut tx, &reservation).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(ReleasedStock {
            reservation,
            released,
        })
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn get(&self, order_id: &OrderId) -> Result<Option<Reservation>, LedgerError> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE order_id = $1 \
             ORDER BY (status IN ('pending', 'committed')) DESC, created_at DESC, id DESC \
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(order_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.as_ref().map(decode).transpose()
    }

    #[instrument(skip(self), fields(reservation_id = %id), err)]
    async fn get_by_id(&self, id: ReservationId) -> Result<Option<Reservation>, LedgerError> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_by_id", e))?;
        row.as_ref().map(decode).transpose()
    }

    #[instrument(skip(self), err)]
    async fn expire_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, LedgerError> {
        let sql = format!(
            "UPDATE reservations \
             SET status = 'expired', updated_at = NOW() \
             WHERE status IN ('pending', 'committed') \
               AND expires_at IS NOT NULL \
               AND expires_at <= $1 \
             RETURNING {RESERVATION_COLUMNS}"
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("expire_older_than", e))?;

        let mut expired = rows.iter().map(decode).collect::<Result<Vec<_>, _>>()?;
        expired.sort_by_key(|r| r.id);
        Ok(expired)
    }
}

/// Map SQLx errors to LedgerError. Inserts use `ON CONFLICT DO NOTHING`, so
/// constraint races never surface here; everything else is transient.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => LedgerError::Unavailable(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            LedgerError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            LedgerError::Unavailable(format!("connection pool timed out in {operation}"))
        }
        _ => LedgerError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

fn decode(row: &PgRow) -> Result<Reservation, LedgerError> {
    let row = ReservationRow::from_row(row)
        .map_err(|e| LedgerError::Unavailable(format!("failed to decode reservation row: {e}")))?;
    Reservation::try_from(row)
}

// SQLx row types

#[derive(Debug)]
struct ReservationRow {
    id: Uuid,
    order_id: String,
    items: Json<Vec<StockItem>>,
    outstanding: Json<Vec<StockItem>>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ReservationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            order_id: row.try_get("order_id")?,
            items: row.try_get("items")?,
            outstanding: row.try_get("outstanding")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = LedgerError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let corrupt = |e: stockroom_core::DomainError| {
            LedgerError::Unavailable(format!("corrupt reservation row {}: {e}", row.id))
        };
        Ok(Reservation {
            id: ReservationId::from_uuid(row.id),
            order_id: OrderId::parse(row.order_id.clone()).map_err(corrupt)?,
            items: row.items.0,
            outstanding: row.outstanding.0,
            status: row.status.parse().map_err(corrupt)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
        })
    }
}
