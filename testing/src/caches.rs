//! In-memory cache providers.
//!
//! Each entry carries an expiry computed from an injected [`Clock`], so tests
//! can let TTLs lapse by advancing a [`FixedClock`](crate::FixedClock).

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap on poisoned locks
#![allow(clippy::missing_panics_doc)]

use crate::faults::FaultInjector;
use async_trait::async_trait;
use boxoffice_core::providers::{
    CacheAcquire, CacheRelease, CounterCache, MutexProvider, PredeductOutcome, RollbackOutcome, SeatLockCache,
};
use boxoffice_core::{
    Clock, InventoryError, ItemId, Operation, OwnerId, Result, SeatId, SeatLockCacheEntry,
    SystemClock,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn expiry(clock: &dyn Clock, ttl: Duration) -> Result<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl).map_err(|e| InventoryError::Cache(e.to_string()))?;
    Ok(clock.now() + ttl)
}

// ═══════════════════════════════════════════════════════════
// Fast-path counters
// ═══════════════════════════════════════════════════════════

/// In-memory fast-path counters.
#[derive(Clone)]
pub struct InMemoryCounterCache {
    counters: Arc<Mutex<HashMap<ItemId, (i64, DateTime<Utc>)>>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    faults: FaultInjector,
}

impl Default for InMemoryCounterCache {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock), Duration::from_secs(24 * 60 * 60))
    }
}

impl InMemoryCounterCache {
    /// Counters on the system clock with a 24h TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters expiring `ttl` after each write, on `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            counters: Arc::new(Mutex::new(HashMap::new())),
            clock,
            ttl,
            faults: FaultInjector::default(),
        }
    }

    /// Fault injector for this cache.
    #[must_use]
    pub const fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Current live value, bypassing faults.
    #[must_use]
    pub fn value(&self, item_id: &ItemId) -> Option<i64> {
        let now = self.clock.now();
        self.counters
            .lock()
            .unwrap()
            .get(item_id)
            .filter(|(_, exp)| *exp > now)
            .map(|(v, _)| *v)
    }

    /// Overwrite a counter directly, bypassing faults.
    pub fn put(&self, item_id: &ItemId, value: i64) {
        let exp = expiry(self.clock.as_ref(), self.ttl).unwrap();
        self.counters
            .lock()
            .unwrap()
            .insert(item_id.clone(), (value, exp));
    }
}

#[async_trait]
impl CounterCache for InMemoryCounterCache {
    async fn prededuct(&self, item_id: &ItemId, quantity: u32) -> Result<PredeductOutcome> {
        self.faults.check_cache(Operation::Prededuct)?;
        let exp = expiry(self.clock.as_ref(), self.ttl)?;
        let now = self.clock.now();
        let mut counters = self.counters.lock().unwrap();
        let Some(entry) = counters.get_mut(item_id).filter(|(_, e)| *e > now) else {
            return Ok(PredeductOutcome::NotInitialized);
        };
        let quantity = i64::from(quantity);
        if entry.0 < quantity {
            return Ok(PredeductOutcome::Insufficient { available: entry.0 });
        }
        entry.0 -= quantity;
        entry.1 = exp;
        Ok(PredeductOutcome::Admitted { remaining: entry.0 })
    }

    async fn rollback(
        &self,
        item_id: &ItemId,
        quantity: u32,
        max_units: u32,
    ) -> Result<RollbackOutcome> {
        self.faults.check_cache(Operation::Rollback)?;
        let exp = expiry(self.clock.as_ref(), self.ttl)?;
        let now = self.clock.now();
        let mut counters = self.counters.lock().unwrap();
        let Some(entry) = counters.get_mut(item_id).filter(|(_, e)| *e > now) else {
            return Ok(RollbackOutcome::NotInitialized);
        };
        let restored = entry.0 + i64::from(quantity);
        if restored > i64::from(max_units) {
            return Ok(RollbackOutcome::WouldExceedMax { current: entry.0 });
        }
        entry.0 = restored;
        entry.1 = exp;
        Ok(RollbackOutcome::Restored { current: restored })
    }

    async fn set(&self, item_id: &ItemId, value: u32) -> Result<()> {
        self.faults.check_cache(Operation::Resync)?;
        let exp = expiry(self.clock.as_ref(), self.ttl)?;
        self.counters
            .lock()
            .unwrap()
            .insert(item_id.clone(), (i64::from(value), exp));
        Ok(())
    }

    async fn get(&self, item_id: &ItemId) -> Result<Option<i64>> {
        Ok(self.value(item_id))
    }

    async fn evict(&self, item_id: &ItemId) -> Result<()> {
        self.counters.lock().unwrap().remove(item_id);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Seat lock entries
// ═══════════════════════════════════════════════════════════

/// In-memory seat lock cache entries.
#[derive(Clone)]
pub struct InMemorySeatLockCache {
    entries: Arc<Mutex<HashMap<SeatId, (SeatLockCacheEntry, DateTime<Utc>)>>>,
    clock: Arc<dyn Clock>,
    faults: FaultInjector,
}

impl Default for InMemorySeatLockCache {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl InMemorySeatLockCache {
    /// Entries on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries on `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
            faults: FaultInjector::default(),
        }
    }

    /// Fault injector for this cache.
    #[must_use]
    pub const fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Current live entry, bypassing faults.
    #[must_use]
    pub fn entry(&self, seat_id: &SeatId) -> Option<SeatLockCacheEntry> {
        let now = self.clock.now();
        self.entries
            .lock()
            .unwrap()
            .get(seat_id)
            .filter(|(_, exp)| *exp > now)
            .map(|(e, _)| e.clone())
    }

    /// Write an entry directly, bypassing faults.
    pub fn put(&self, seat_id: &SeatId, entry: SeatLockCacheEntry, ttl: Duration) {
        let exp = expiry(self.clock.as_ref(), ttl).unwrap();
        self.entries
            .lock()
            .unwrap()
            .insert(seat_id.clone(), (entry, exp));
    }
}

#[async_trait]
impl SeatLockCache for InMemorySeatLockCache {
    async fn try_acquire(
        &self,
        seat_id: &SeatId,
        entry: &SeatLockCacheEntry,
        ttl: Duration,
    ) -> Result<CacheAcquire> {
        self.faults.check_cache(Operation::LockSeat)?;
        let exp = expiry(self.clock.as_ref(), ttl)?;
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap();
        let outcome = match entries.get(seat_id) {
            Some((held, held_exp)) if *held_exp > now => {
                if held.owner_id != entry.owner_id {
                    return Ok(CacheAcquire::HeldByOther);
                }
                CacheAcquire::Refreshed
            }
            _ => CacheAcquire::Acquired,
        };
        entries.insert(seat_id.clone(), (entry.clone(), exp));
        Ok(outcome)
    }

    async fn get(&self, seat_id: &SeatId) -> Result<Option<SeatLockCacheEntry>> {
        self.faults.check_cache(Operation::AuditSeat)?;
        Ok(self.entry(seat_id))
    }

    async fn release(&self, seat_id: &SeatId, owner_id: &OwnerId) -> Result<CacheRelease> {
        self.faults.check_cache(Operation::UnlockSeat)?;
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap();
        match entries.get(seat_id) {
            Some((held, exp)) if *exp > now => {
                if &held.owner_id == owner_id {
                    entries.remove(seat_id);
                    Ok(CacheRelease::Released)
                } else {
                    Ok(CacheRelease::NotOwner)
                }
            }
            _ => {
                entries.remove(seat_id);
                Ok(CacheRelease::Absent)
            }
        }
    }

    async fn overwrite(
        &self,
        seat_id: &SeatId,
        entry: &SeatLockCacheEntry,
        ttl: Duration,
    ) -> Result<()> {
        let exp = expiry(self.clock.as_ref(), ttl)?;
        self.entries
            .lock()
            .unwrap()
            .insert(seat_id.clone(), (entry.clone(), exp));
        Ok(())
    }

    async fn remove(&self, seat_id: &SeatId) -> Result<()> {
        self.entries.lock().unwrap().remove(seat_id);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Mutex
// ═══════════════════════════════════════════════════════════

/// In-memory leased mutex.
#[derive(Clone)]
pub struct InMemoryMutex {
    held: Arc<Mutex<HashMap<String, (String, DateTime<Utc>)>>>,
    clock: Arc<dyn Clock>,
    faults: FaultInjector,
}

impl Default for InMemoryMutex {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl InMemoryMutex {
    /// Mutex on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutex on `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            held: Arc::new(Mutex::new(HashMap::new())),
            clock,
            faults: FaultInjector::default(),
        }
    }

    /// Fault injector for this mutex.
    #[must_use]
    pub const fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Whether `key` is currently held.
    #[must_use]
    pub fn is_held(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.held
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|(_, exp)| *exp > now)
    }
}

#[async_trait]
impl MutexProvider for InMemoryMutex {
    async fn try_acquire(&self, key: &str, token: &str, lease: Duration) -> Result<bool> {
        self.faults.check_cache(Operation::AcquireMutex)?;
        let exp = expiry(self.clock.as_ref(), lease)?;
        let now = self.clock.now();
        let mut held = self.held.lock().unwrap();
        if held.get(key).is_some_and(|(_, e)| *e > now) {
            return Ok(false);
        }
        held.insert(key.to_string(), (token.to_string(), exp));
        Ok(true)
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let mut held = self.held.lock().unwrap();
        if held.get(key).is_some_and(|(t, _)| t == token) {
            held.remove(key);
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_clock;

    #[tokio::test]
    async fn prededuct_never_goes_negative() {
        let cache = InMemoryCounterCache::new();
        let item = ItemId::new("T1");
        assert_eq!(
            cache.prededuct(&item, 1).await.unwrap(),
            PredeductOutcome::NotInitialized
        );

        cache.set(&item, 2).await.unwrap();
        assert_eq!(
            cache.prededuct(&item, 2).await.unwrap(),
            PredeductOutcome::Admitted { remaining: 0 }
        );
        assert_eq!(
            cache.prededuct(&item, 1).await.unwrap(),
            PredeductOutcome::Insufficient { available: 0 }
        );
    }

    #[tokio::test]
    async fn rollback_is_capped() {
        let cache = InMemoryCounterCache::new();
        let item = ItemId::new("T1");
        cache.set(&item, 4).await.unwrap();
        assert_eq!(
            cache.rollback(&item, 2, 5).await.unwrap(),
            RollbackOutcome::WouldExceedMax { current: 4 }
        );
        assert_eq!(
            cache.rollback(&item, 1, 5).await.unwrap(),
            RollbackOutcome::Restored { current: 5 }
        );
    }

    #[tokio::test]
    async fn counters_expire_with_the_clock() {
        let clock = test_clock();
        let cache = InMemoryCounterCache::with_clock(Arc::new(clock.clone()), Duration::from_secs(10));
        let item = ItemId::new("T1");
        cache.set(&item, 3).await.unwrap();
        clock.advance(chrono::Duration::seconds(11));
        assert_eq!(cache.get(&item).await.unwrap(), None);
    }

    #[tokio::test]
    async fn seat_entry_is_reentrant_for_same_owner_only() {
        let clock = test_clock();
        let cache = InMemorySeatLockCache::with_clock(Arc::new(clock.clone()));
        let seat = SeatId::new("S1");
        let u1 = SeatLockCacheEntry::new(OwnerId::new("U1"), clock.now());
        let u2 = SeatLockCacheEntry::new(OwnerId::new("U2"), clock.now());
        let ttl = Duration::from_secs(300);

        assert_eq!(cache.try_acquire(&seat, &u1, ttl).await.unwrap(), CacheAcquire::Acquired);
        assert_eq!(cache.try_acquire(&seat, &u1, ttl).await.unwrap(), CacheAcquire::Refreshed);
        assert_eq!(cache.try_acquire(&seat, &u2, ttl).await.unwrap(), CacheAcquire::HeldByOther);
        assert_eq!(
            cache.release(&seat, &OwnerId::new("U2")).await.unwrap(),
            CacheRelease::NotOwner
        );

        clock.advance(chrono::Duration::seconds(301));
        assert_eq!(cache.try_acquire(&seat, &u2, ttl).await.unwrap(), CacheAcquire::Acquired);
    }

    #[tokio::test]
    async fn mutex_release_requires_token() {
        let mutex = InMemoryMutex::new();
        let lease = Duration::from_secs(30);
        assert!(mutex.try_acquire("k", "a", lease).await.unwrap());
        assert!(!mutex.try_acquire("k", "b", lease).await.unwrap());
        assert!(!mutex.release("k", "b").await.unwrap());
        assert!(mutex.release("k", "a").await.unwrap());
        assert!(!mutex.is_held("k"));
    }
}
