//! Stock ledger rows with version compare-and-swap.

use crate::{db_err, units};
use async_trait::async_trait;
use boxoffice_core::providers::StockStore;
use boxoffice_core::{ItemId, Result, StockMutation, StockRecord};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// `PostgreSQL`-backed [`StockStore`].
///
/// A write lands only when the row's `version` still matches what the caller
/// read, and only if `locked + sold <= total` still holds after it. The table
/// carries the same check as a constraint.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: PgPool,
}

impl PostgresStockStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &PgRow) -> Result<StockRecord> {
        let item_id: String = row.get("item_id");
        Ok(StockRecord {
            item_id: ItemId::new(item_id),
            total_units: units(row.get("total_units"), "total_units")?,
            locked_units: units(row.get("locked_units"), "locked_units")?,
            sold_units: units(row.get("sold_units"), "sold_units")?,
            version: row.get("version"),
        })
    }
}

#[async_trait]
impl StockStore for PostgresStockStore {
    async fn load(&self, item_id: &ItemId) -> Result<Option<StockRecord>> {
        let row = sqlx::query(
            r"
            SELECT item_id, total_units, locked_units, sold_units, version
            FROM stock_ledger
            WHERE item_id = $1
            ",
        )
        .bind(item_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn insert_if_absent(&self, record: &StockRecord) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO stock_ledger (item_id, total_units, locked_units, sold_units, version)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (item_id) DO NOTHING
            ",
        )
        .bind(record.item_id.as_str())
        .bind(i64::from(record.total_units))
        .bind(i64::from(record.locked_units))
        .bind(i64::from(record.sold_units))
        .bind(record.version)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: &StockRecord,
        mutation: StockMutation,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE stock_ledger
            SET locked_units = $2,
                sold_units = $3,
                version = version + 1,
                updated_at = NOW()
            WHERE item_id = $1
              AND version = $4
              AND $2 + $3 <= total_units
            ",
        )
        .bind(next.item_id.as_str())
        .bind(i64::from(next.locked_units))
        .bind(i64::from(next.sold_units))
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let swapped = result.rows_affected() == 1;
        if !swapped {
            tracing::debug!(
                item_id = %next.item_id,
                expected_version,
                operation = %mutation.operation(),
                "Stock ledger version moved"
            );
            metrics::counter!(
                "inventory_ledger_cas_conflicts_total",
                "operation" => mutation.operation().as_str()
            )
            .increment(1);
        }
        Ok(swapped)
    }

    async fn list(&self) -> Result<Vec<StockRecord>> {
        let rows = sqlx::query(
            r"
            SELECT item_id, total_units, locked_units, sold_units, version
            FROM stock_ledger
            ORDER BY item_id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_record).collect()
    }
}
