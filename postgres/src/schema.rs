//! Table and index definitions.
//!
//! Every statement is idempotent so [`migrate`] can run on each worker start.

use crate::db_err;
use boxoffice_core::Result;
use sqlx::PgPool;

const STATEMENTS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS stock_ledger (
        item_id TEXT PRIMARY KEY,
        total_units BIGINT NOT NULL CHECK (total_units >= 0),
        locked_units BIGINT NOT NULL DEFAULT 0 CHECK (locked_units >= 0),
        sold_units BIGINT NOT NULL DEFAULT 0 CHECK (sold_units >= 0),
        version BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        CHECK (locked_units + sold_units <= total_units)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS seat_locks (
        id BIGSERIAL PRIMARY KEY,
        seat_id TEXT NOT NULL,
        session_id TEXT NOT NULL,
        venue_id TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        lock_kind SMALLINT NOT NULL,
        acquired_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        state TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    ",
    r"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_seat_locks_active
        ON seat_locks (seat_id, session_id)
        WHERE state IN ('locking', 'confirmed')
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_seat_locks_expiry
        ON seat_locks (expires_at)
        WHERE state = 'locking'
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_seat_locks_released
        ON seat_locks (updated_at)
        WHERE state = 'released'
    ",
    r"
    CREATE TABLE IF NOT EXISTS compensation_tasks (
        id UUID PRIMARY KEY,
        resource_key TEXT NOT NULL,
        action_kind TEXT NOT NULL,
        action JSONB NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        next_attempt_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_compensation_due
        ON compensation_tasks (next_attempt_at)
        WHERE status = 'pending'
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_compensation_status
        ON compensation_tasks (status, created_at)
    ",
];

/// Create the tables and indexes the stores need.
///
/// # Errors
///
/// Returns [`InventoryError::Database`](boxoffice_core::InventoryError::Database)
/// if a statement fails.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    let mut conn = pool.acquire().await.map_err(db_err)?;
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
    }

    tracing::info!(statements = STATEMENTS.len(), "Schema migrated");
    Ok(())
}
