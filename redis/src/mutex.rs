//! Leased mutex.

use crate::{cache_err, ttl_millis};
use async_trait::async_trait;
use boxoffice_core::Result;
use boxoffice_core::providers::MutexProvider;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Delete only if the stored token matches.
const RELEASE_SCRIPT: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
";

/// `Redis`-backed [`MutexProvider`] using `SET NX PX`.
///
/// A holder that outlives its lease loses the key; the token check keeps it
/// from deleting a successor's hold.
#[derive(Clone)]
pub struct RedisMutex {
    conn_manager: ConnectionManager,
    release: redis::Script,
}

impl RedisMutex {
    /// Create a mutex provider over a managed connection.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            release: redis::Script::new(RELEASE_SCRIPT),
        }
    }
}

#[async_trait]
impl MutexProvider for RedisMutex {
    async fn try_acquire(&self, key: &str, token: &str, lease: Duration) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(lease))
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_err("Failed to acquire mutex", &e))?;

        Ok(reply.is_some())
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| cache_err("Failed to release mutex", &e))?;

        if deleted == 0 {
            tracing::debug!(key, "Mutex lease already lost");
        }
        Ok(deleted == 1)
    }
}
