//! Fast-path stock counters.
//!
//! The counter is an admission gate in front of the stock ledger. It may run
//! ahead of or behind the ledger for a while; the auditor brings it back.

use crate::{cache_err, ttl_secs};
use async_trait::async_trait;
use boxoffice_core::providers::{CounterCache, PredeductOutcome, RollbackOutcome};
use boxoffice_core::{ItemId, Result};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Returns `{status, value}`: `1` admitted, `0` insufficient, `-1` missing.
const PREDEDUCT_SCRIPT: &str = r"
    local current = redis.call('GET', KEYS[1])
    if not current then
        return {-1, 0}
    end
    current = tonumber(current)
    local quantity = tonumber(ARGV[1])
    if current < quantity then
        return {0, current}
    end
    local remaining = redis.call('DECRBY', KEYS[1], quantity)
    redis.call('EXPIRE', KEYS[1], ARGV[2])
    return {1, remaining}
";

/// Returns `{status, value}`: `1` restored, `0` would pass the cap, `-1` missing.
const ROLLBACK_SCRIPT: &str = r"
    local current = redis.call('GET', KEYS[1])
    if not current then
        return {-1, 0}
    end
    current = tonumber(current)
    local restored = current + tonumber(ARGV[1])
    if restored > tonumber(ARGV[2]) then
        return {0, current}
    end
    redis.call('SET', KEYS[1], restored, 'EX', ARGV[3])
    return {1, restored}
";

/// `Redis`-backed [`CounterCache`].
#[derive(Clone)]
pub struct RedisCounterCache {
    conn_manager: ConnectionManager,
    ttl: Duration,
    prededuct: redis::Script,
    rollback: redis::Script,
}

impl RedisCounterCache {
    /// Create counters over a managed connection. Every write refreshes `ttl`.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager, ttl: Duration) -> Self {
        Self {
            conn_manager,
            ttl,
            prededuct: redis::Script::new(PREDEDUCT_SCRIPT),
            rollback: redis::Script::new(ROLLBACK_SCRIPT),
        }
    }

    /// Cache key for an item.
    #[must_use]
    pub fn counter_key(item_id: &ItemId) -> String {
        format!("stock:ticket:{item_id}")
    }
}

#[async_trait]
impl CounterCache for RedisCounterCache {
    async fn prededuct(&self, item_id: &ItemId, quantity: u32) -> Result<PredeductOutcome> {
        let mut conn = self.conn_manager.clone();
        let (status, value): (i64, i64) = self
            .prededuct
            .key(Self::counter_key(item_id))
            .arg(quantity)
            .arg(ttl_secs(self.ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| cache_err("Failed to pre-deduct stock counter", &e))?;

        Ok(match status {
            1 => PredeductOutcome::Admitted { remaining: value },
            0 => PredeductOutcome::Insufficient { available: value },
            _ => PredeductOutcome::NotInitialized,
        })
    }

    async fn rollback(
        &self,
        item_id: &ItemId,
        quantity: u32,
        max_units: u32,
    ) -> Result<RollbackOutcome> {
        let mut conn = self.conn_manager.clone();
        let (status, value): (i64, i64) = self
            .rollback
            .key(Self::counter_key(item_id))
            .arg(quantity)
            .arg(max_units)
            .arg(ttl_secs(self.ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| cache_err("Failed to roll back stock counter", &e))?;

        Ok(match status {
            1 => RollbackOutcome::Restored { current: value },
            0 => RollbackOutcome::WouldExceedMax { current: value },
            _ => RollbackOutcome::NotInitialized,
        })
    }

    async fn set(&self, item_id: &ItemId, value: u32) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .set_ex(Self::counter_key(item_id), value, ttl_secs(self.ttl))
            .await
            .map_err(|e| cache_err("Failed to set stock counter", &e))?;

        tracing::debug!(item_id = %item_id, value, "Stock counter set");
        Ok(())
    }

    async fn get(&self, item_id: &ItemId) -> Result<Option<i64>> {
        let mut conn = self.conn_manager.clone();
        conn.get(Self::counter_key(item_id))
            .await
            .map_err(|e| cache_err("Failed to read stock counter", &e))
    }

    async fn evict(&self, item_id: &ItemId) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .del(Self::counter_key(item_id))
            .await
            .map_err(|e| cache_err("Failed to evict stock counter", &e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect;

    // Note: These tests require a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7-alpine

    #[test]
    fn counter_key_format() {
        assert_eq!(
            RedisCounterCache::counter_key(&ItemId::new("T1")),
            "stock:ticket:T1"
        );
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_prededuct_and_rollback() {
        let conn = connect("redis://127.0.0.1:6379").await.unwrap();
        let cache = RedisCounterCache::new(conn, Duration::from_secs(60));
        let item = ItemId::new(format!("test-{}", uuid::Uuid::new_v4()));

        assert_eq!(
            cache.prededuct(&item, 1).await.unwrap(),
            PredeductOutcome::NotInitialized
        );

        cache.set(&item, 3).await.unwrap();
        assert_eq!(
            cache.prededuct(&item, 2).await.unwrap(),
            PredeductOutcome::Admitted { remaining: 1 }
        );
        assert_eq!(
            cache.prededuct(&item, 2).await.unwrap(),
            PredeductOutcome::Insufficient { available: 1 }
        );
        assert_eq!(
            cache.rollback(&item, 3, 3).await.unwrap(),
            RollbackOutcome::WouldExceedMax { current: 1 }
        );
        assert_eq!(
            cache.rollback(&item, 2, 3).await.unwrap(),
            RollbackOutcome::Restored { current: 3 }
        );

        cache.evict(&item).await.unwrap();
        assert_eq!(cache.get(&item).await.unwrap(), None);
    }
}
