//! `PostgreSQL` stores for the boxoffice inventory core.
//!
//! This crate implements the durable provider traits from
//! `boxoffice_core::providers` on top of sqlx:
//!
//! - [`PostgresStockStore`]: stock ledger rows with version compare-and-swap
//! - [`PostgresSeatLockRepository`]: seat lock rows with one active row per seat and session
//! - [`PostgresCompensationStore`]: the compensation task queue
//!
//! # Example
//!
//! ```ignore
//! use boxoffice_postgres::{connect, migrate, PostgresStockStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = connect("postgres://localhost/boxoffice", 10).await?;
//!     migrate(&pool).await?;
//!     let stocks = PostgresStockStore::new(pool);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use boxoffice_core::{InventoryError, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Compensation task queue
pub mod compensation_store;

/// Table and index definitions
pub mod schema;

/// Seat lock rows
pub mod seat_lock_repository;

/// Stock ledger rows
pub mod stock_store;

pub use compensation_store::PostgresCompensationStore;
pub use schema::migrate;
pub use seat_lock_repository::PostgresSeatLockRepository;
pub use stock_store::PostgresStockStore;

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`InventoryError::Database`] if the database is unreachable.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(db_err)?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

pub(crate) fn db_err(e: sqlx::Error) -> InventoryError {
    InventoryError::Database(e.to_string())
}

/// Convert a stored unit count back to `u32`.
pub(crate) fn units(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| InventoryError::Database(format!("{column} out of range: {value}")))
}
