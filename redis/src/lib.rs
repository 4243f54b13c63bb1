//! `Redis` cache providers for the boxoffice inventory core.
//!
//! - [`RedisCounterCache`]: fast-path stock counters under `stock:ticket:{item}`
//! - [`RedisSeatLockCache`]: seat lock entries under `seat_lock:{seat}`
//! - [`RedisMutex`]: leased mutual exclusion with token-checked release
//!
//! Every conditional write is a Lua script, so each primitive is one atomic
//! round trip on the server.
//!
//! # Example
//!
//! ```no_run
//! use boxoffice_redis::{connect, RedisCounterCache};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = connect("redis://127.0.0.1:6379").await?;
//! let counters = RedisCounterCache::new(conn, Duration::from_secs(24 * 3600));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use boxoffice_core::{InventoryError, Result};
use redis::Client;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Fast-path stock counters
pub mod counter;

/// Leased mutex
pub mod mutex;

/// Seat lock entries
pub mod seat_lock_cache;

pub use counter::RedisCounterCache;
pub use mutex::RedisMutex;
pub use seat_lock_cache::RedisSeatLockCache;

/// Open a managed connection.
///
/// The returned manager reconnects on its own and is cheap to clone, so one
/// instance can back every provider in this crate.
///
/// # Errors
///
/// Returns [`InventoryError::Cache`] if the connection cannot be established.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    let client = Client::open(redis_url)
        .map_err(|e| InventoryError::Cache(format!("Failed to create Redis client: {e}")))?;

    let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
        InventoryError::Cache(format!("Failed to create Redis connection manager: {e}"))
    })?;

    tracing::info!("Connected to Redis");
    Ok(conn_manager)
}

pub(crate) fn cache_err(context: &str, e: &redis::RedisError) -> InventoryError {
    InventoryError::Cache(format!("{context}: {e}"))
}

/// Whole seconds for `EX`, at least one.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Milliseconds for `PX`, at least one.
#[allow(clippy::cast_possible_truncation)] // Safe: TTLs are far below u64::MAX milliseconds
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}
