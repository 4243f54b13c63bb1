//! Seat lock cache entries.
//!
//! Values are `owner:timestampMillis`. The scripts compare the owner part up
//! to the last `:`, so owner ids may themselves contain colons.

use crate::{cache_err, ttl_millis};
use async_trait::async_trait;
use boxoffice_core::providers::{CacheAcquire, CacheRelease, SeatLockCache};
use boxoffice_core::{OwnerId, Result, SeatId, SeatLockCacheEntry};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Set if absent or already held by the same owner.
/// Returns 1 acquired, 2 refreshed, 0 held by another owner.
const ACQUIRE_SCRIPT: &str = r"
    local current = redis.call('GET', KEYS[1])
    local status = 1
    if current then
        local holder = string.match(current, '^(.*):[^:]*$')
        if holder ~= ARGV[2] then
            return 0
        end
        status = 2
    end
    redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[3])
    return status
";

/// Delete if held by the owner. Returns 1 released, 0 not owner, -1 absent.
const RELEASE_SCRIPT: &str = r"
    local current = redis.call('GET', KEYS[1])
    if not current then
        return -1
    end
    local holder = string.match(current, '^(.*):[^:]*$')
    if holder ~= ARGV[1] then
        return 0
    end
    redis.call('DEL', KEYS[1])
    return 1
";

/// `Redis`-backed [`SeatLockCache`].
#[derive(Clone)]
pub struct RedisSeatLockCache {
    conn_manager: ConnectionManager,
    acquire: redis::Script,
    release: redis::Script,
}

impl RedisSeatLockCache {
    /// Create a seat lock cache over a managed connection.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            acquire: redis::Script::new(ACQUIRE_SCRIPT),
            release: redis::Script::new(RELEASE_SCRIPT),
        }
    }
}

#[async_trait]
impl SeatLockCache for RedisSeatLockCache {
    async fn try_acquire(
        &self,
        seat_id: &SeatId,
        entry: &SeatLockCacheEntry,
        ttl: Duration,
    ) -> Result<CacheAcquire> {
        let mut conn = self.conn_manager.clone();
        let status: i64 = self
            .acquire
            .key(SeatLockCacheEntry::key(seat_id))
            .arg(entry.encode())
            .arg(entry.owner_id.as_str())
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| cache_err("Failed to acquire seat lock entry", &e))?;

        Ok(match status {
            1 => CacheAcquire::Acquired,
            2 => CacheAcquire::Refreshed,
            _ => CacheAcquire::HeldByOther,
        })
    }

    async fn get(&self, seat_id: &SeatId) -> Result<Option<SeatLockCacheEntry>> {
        let mut conn = self.conn_manager.clone();
        let value: Option<String> = conn
            .get(SeatLockCacheEntry::key(seat_id))
            .await
            .map_err(|e| cache_err("Failed to read seat lock entry", &e))?;

        Ok(value.as_deref().and_then(|v| {
            let entry = SeatLockCacheEntry::decode(v);
            if entry.is_none() {
                tracing::warn!(seat_id = %seat_id, value = v, "Unparseable seat lock entry");
            }
            entry
        }))
    }

    async fn release(&self, seat_id: &SeatId, owner_id: &OwnerId) -> Result<CacheRelease> {
        let mut conn = self.conn_manager.clone();
        let status: i64 = self
            .release
            .key(SeatLockCacheEntry::key(seat_id))
            .arg(owner_id.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| cache_err("Failed to release seat lock entry", &e))?;

        Ok(match status {
            1 => CacheRelease::Released,
            0 => CacheRelease::NotOwner,
            _ => CacheRelease::Absent,
        })
    }

    async fn overwrite(
        &self,
        seat_id: &SeatId,
        entry: &SeatLockCacheEntry,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = redis::cmd("SET")
            .arg(SeatLockCacheEntry::key(seat_id))
            .arg(entry.encode())
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_err("Failed to overwrite seat lock entry", &e))?;
        Ok(())
    }

    async fn remove(&self, seat_id: &SeatId) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .del(SeatLockCacheEntry::key(seat_id))
            .await
            .map_err(|e| cache_err("Failed to remove seat lock entry", &e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect;
    use chrono::Utc;

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_exclusive_acquire_and_owner_release() {
        let conn = connect("redis://127.0.0.1:6379").await.unwrap();
        let cache = RedisSeatLockCache::new(conn);
        let seat = SeatId::new(format!("test-{}", uuid::Uuid::new_v4()));
        let ttl = Duration::from_secs(30);

        let alice = SeatLockCacheEntry::new(OwnerId::new("tenant:alice"), Utc::now());
        let bob = SeatLockCacheEntry::new(OwnerId::new("tenant:bob"), Utc::now());

        assert_eq!(
            cache.try_acquire(&seat, &alice, ttl).await.unwrap(),
            CacheAcquire::Acquired
        );
        assert_eq!(
            cache.try_acquire(&seat, &bob, ttl).await.unwrap(),
            CacheAcquire::HeldByOther
        );
        // Same owner refreshes
        assert_eq!(
            cache.try_acquire(&seat, &alice, ttl).await.unwrap(),
            CacheAcquire::Refreshed
        );

        assert_eq!(
            cache.release(&seat, &bob.owner_id).await.unwrap(),
            CacheRelease::NotOwner
        );
        assert_eq!(
            cache.get(&seat).await.unwrap().map(|e| e.owner_id),
            Some(alice.owner_id.clone())
        );
        assert_eq!(
            cache.release(&seat, &alice.owner_id).await.unwrap(),
            CacheRelease::Released
        );
        assert_eq!(
            cache.release(&seat, &alice.owner_id).await.unwrap(),
            CacheRelease::Absent
        );
    }
}
