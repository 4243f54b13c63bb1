//! Compensation task queue.
//!
//! Undo actions that failed inline are parked here until the compensation
//! worker drains them. Tasks are never deleted: `resolved` and `terminal`
//! rows remain for investigation.

use crate::db_err;
use async_trait::async_trait;
use boxoffice_core::providers::CompensationStore;
use boxoffice_core::{
    CompensationAction, CompensationStatus, CompensationTask, InventoryError, Result,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

const COLUMNS: &str = "id, resource_key, action, attempts, last_error, status, \
                       created_at, updated_at, next_attempt_at";

/// `PostgreSQL`-backed [`CompensationStore`].
///
/// Claiming uses `FOR UPDATE SKIP LOCKED`, so several workers can drain the
/// queue without picking the same task.
#[derive(Debug, Clone)]
pub struct PostgresCompensationStore {
    pool: PgPool,
}

impl PostgresCompensationStore {
    /// Create a queue over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &PgRow) -> Result<CompensationTask> {
        let action: serde_json::Value = row.get("action");
        let action: CompensationAction = serde_json::from_value(action)
            .map_err(|e| InventoryError::Database(format!("Invalid compensation action: {e}")))?;
        let status: String = row.get("status");
        let attempts: i32 = row.get("attempts");

        Ok(CompensationTask {
            id: row.get("id"),
            resource_key: row.get("resource_key"),
            action,
            attempts: u32::try_from(attempts).unwrap_or_default(),
            last_error: row.get("last_error"),
            status: CompensationStatus::parse(&status).ok_or_else(|| {
                InventoryError::Database(format!("Invalid compensation status: {status}"))
            })?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            next_attempt_at: row.get("next_attempt_at"),
        })
    }
}

#[async_trait]
impl CompensationStore for PostgresCompensationStore {
    async fn insert(&self, task: &CompensationTask) -> Result<()> {
        let action = serde_json::to_value(&task.action)
            .map_err(|e| InventoryError::Database(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO compensation_tasks (
                id, resource_key, action_kind, action, attempts, last_error,
                status, created_at, updated_at, next_attempt_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(task.id)
        .bind(&task.resource_key)
        .bind(task.action.as_str())
        .bind(action)
        .bind(i32::try_from(task.attempts).unwrap_or(i32::MAX))
        .bind(task.last_error.as_deref())
        .bind(task.status.as_str())
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.next_attempt_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        tracing::warn!(
            task_id = %task.id,
            resource = %task.resource_key,
            action = task.action.as_str(),
            error = task.last_error.as_deref().unwrap_or_default(),
            "Compensation task queued"
        );
        Ok(())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<CompensationTask>> {
        let leased_until = now
            + chrono::Duration::from_std(lease)
                .map_err(|e| InventoryError::Configuration(e.to_string()))?;

        #[allow(clippy::cast_possible_wrap)] // Limit is reasonable size, i64 is safe
        let rows = sqlx::query(&format!(
            "UPDATE compensation_tasks SET next_attempt_at = $2 \
             WHERE id IN ( \
                 SELECT id FROM compensation_tasks \
                 WHERE status = 'pending' AND next_attempt_at <= $1 \
                 ORDER BY next_attempt_at ASC \
                 LIMIT $3 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        ))
        .bind(now)
        .bind(leased_until)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn update(&self, task: &CompensationTask) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE compensation_tasks
            SET attempts = $2,
                last_error = $3,
                status = $4,
                updated_at = $5,
                next_attempt_at = $6
            WHERE id = $1
            ",
        )
        .bind(task.id)
        .bind(i32::try_from(task.attempts).unwrap_or(i32::MAX))
        .bind(task.last_error.as_deref())
        .bind(task.status.as_str())
        .bind(task.updated_at)
        .bind(task.next_attempt_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(InventoryError::NotFound(format!(
                "compensation task {}",
                task.id
            )));
        }

        tracing::info!(
            task_id = %task.id,
            status = task.status.as_str(),
            attempts = task.attempts,
            "Compensation task updated"
        );
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<CompensationTask>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM compensation_tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn list_by_status(
        &self,
        status: CompensationStatus,
        limit: usize,
    ) -> Result<Vec<CompensationTask>> {
        #[allow(clippy::cast_possible_wrap)] // Limit is reasonable size, i64 is safe
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM compensation_tasks \
             WHERE status = $1 ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn count_by_status(&self, status: CompensationStatus) -> Result<u64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM compensation_tasks WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(u64::try_from(count.0).unwrap_or_default())
    }
}
