//! Database schema bootstrap.

use sqlx::PgPool;

/// DDL for the products and reservations tables. Idempotent.
pub const SCHEMA: &str = include_str!("../migrations/0001_inventory.sql");

/// Create tables and indexes if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    tracing::info!("database schema ensured");
    Ok(())
}
