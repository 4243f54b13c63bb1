//! Seat lock rows.
//!
//! A partial unique index on `(seat_id, session_id)` over the `locking` and
//! `confirmed` states keeps at most one active row per seat and session.
//! Released rows stay in the table as history.

use crate::db_err;
use async_trait::async_trait;
use boxoffice_core::providers::{LockWrite, SeatLockRepository};
use boxoffice_core::{
    InventoryError, LockKind, OwnerId, Result, SeatId, SeatLockRecord, SeatLockState, SessionId,
    VenueId,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const COLUMNS: &str =
    "seat_id, session_id, venue_id, owner_id, lock_kind, acquired_at, expires_at, state";

/// `PostgreSQL`-backed [`SeatLockRepository`].
#[derive(Debug, Clone)]
pub struct PostgresSeatLockRepository {
    pool: PgPool,
}

impl PostgresSeatLockRepository {
    /// Create a repository over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &PgRow) -> Result<SeatLockRecord> {
        let code: i16 = row.get("lock_kind");
        let state: String = row.get("state");
        let seat_id: String = row.get("seat_id");
        let session_id: String = row.get("session_id");
        let venue_id: String = row.get("venue_id");
        let owner_id: String = row.get("owner_id");

        Ok(SeatLockRecord {
            seat_id: SeatId::new(seat_id),
            session_id: SessionId::new(session_id),
            venue_id: VenueId::new(venue_id),
            owner_id: OwnerId::new(owner_id),
            lock_kind: LockKind::from_code(code)
                .ok_or_else(|| InventoryError::Database(format!("Invalid lock kind: {code}")))?,
            acquired_at: row.get("acquired_at"),
            expires_at: row.get("expires_at"),
            state: SeatLockState::parse(&state)
                .ok_or_else(|| InventoryError::Database(format!("Invalid seat lock state: {state}")))?,
        })
    }

    async fn insert_locking(&self, record: &SeatLockRecord) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO seat_locks (
                seat_id, session_id, venue_id, owner_id, lock_kind,
                acquired_at, expires_at, state
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'locking')
            ON CONFLICT (seat_id, session_id) WHERE state IN ('locking', 'confirmed')
            DO NOTHING
            ",
        )
        .bind(record.seat_id.as_str())
        .bind(record.session_id.as_str())
        .bind(record.venue_id.as_str())
        .bind(record.owner_id.as_str())
        .bind(record.lock_kind.code())
        .bind(record.acquired_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn refresh_own(&self, record: &SeatLockRecord) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE seat_locks
            SET expires_at = $4, lock_kind = $5, updated_at = NOW()
            WHERE seat_id = $1 AND session_id = $2 AND owner_id = $3
              AND state = 'locking'
            ",
        )
        .bind(record.seat_id.as_str())
        .bind(record.session_id.as_str())
        .bind(record.owner_id.as_str())
        .bind(record.expires_at)
        .bind(record.lock_kind.code())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl SeatLockRepository for PostgresSeatLockRepository {
    async fn acquire(&self, record: &SeatLockRecord) -> Result<LockWrite> {
        if self.insert_locking(record).await? {
            return Ok(LockWrite::Acquired);
        }
        if self.refresh_own(record).await? {
            return Ok(LockWrite::Refreshed);
        }
        if let Some(active) = self.find_active(&record.seat_id, &record.session_id).await? {
            return Ok(LockWrite::HeldByOther(active.owner_id));
        }

        // The blocking row was released between statements.
        if self.insert_locking(record).await? {
            return Ok(LockWrite::Acquired);
        }
        Err(InventoryError::Conflict(format!(
            "seat {} in session {} changed during acquire",
            record.seat_id, record.session_id
        )))
    }

    async fn find_active(
        &self,
        seat_id: &SeatId,
        session_id: &SessionId,
    ) -> Result<Option<SeatLockRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM seat_locks \
             WHERE seat_id = $1 AND session_id = $2 AND state IN ('locking', 'confirmed')"
        ))
        .bind(seat_id.as_str())
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn transition(
        &self,
        seat_id: &SeatId,
        session_id: &SessionId,
        owner_id: &OwnerId,
        from: SeatLockState,
        to: SeatLockState,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE seat_locks
            SET state = $5, updated_at = NOW()
            WHERE seat_id = $1 AND session_id = $2 AND owner_id = $3 AND state = $4
            ",
        )
        .bind(seat_id.as_str())
        .bind(session_id.as_str())
        .bind(owner_id.as_str())
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> Result<Vec<SeatLockRecord>> {
        let rows = sqlx::query(&format!(
            "UPDATE seat_locks SET state = 'released', updated_at = NOW() \
             WHERE state = 'locking' AND expires_at <= $1 \
             RETURNING {COLUMNS}"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn list_locking(&self) -> Result<Vec<SeatLockRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM seat_locks WHERE state = 'locking' ORDER BY acquired_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn list_released_since(&self, since: DateTime<Utc>) -> Result<Vec<SeatLockRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM seat_locks \
             WHERE state = 'released' AND updated_at >= $1 \
             ORDER BY updated_at ASC"
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn force_release(&self, seat_id: &SeatId, session_id: &SessionId) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE seat_locks
            SET state = 'released', updated_at = NOW()
            WHERE seat_id = $1 AND session_id = $2 AND state = 'locking'
            ",
        )
        .bind(seat_id.as_str())
        .bind(session_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() > 0 {
            tracing::warn!(%seat_id, %session_id, "Seat lock row force released");
        }
        Ok(result.rows_affected() > 0)
    }
}
