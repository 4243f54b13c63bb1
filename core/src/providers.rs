//! Provider traits for external collaborators.
//!
//! The inventory services never talk to Postgres or Redis directly. They hold
//! `Arc<dyn Trait>` for each of the seams below:
//!
//! - [`StockStore`]: durable stock rows with compare-and-swap
//! - [`CounterCache`]: atomic fast-path counters
//! - [`SeatLockCache`]: seat lock cache entries
//! - [`SeatLockRepository`]: durable seat lock rows
//! - [`MutexProvider`]: distributed mutual exclusion with a lease
//! - [`CompensationStore`]: queued undo actions
//! - [`OrderSink`]: the order service that receives completed reservations
//!
//! # Implementations
//!
//! - `boxoffice-postgres`: durable stores
//! - `boxoffice-redis`: cache stores and the mutex
//! - `boxoffice-testing`: in-memory versions of all of them
//!
//! Every cache primitive must be a single atomic round trip. Callers never
//! read-modify-write a cache value themselves.

use crate::compensation::{CompensationStatus, CompensationTask};
use crate::error::Result;
use crate::ids::{ItemId, OwnerId, SeatId, SessionId};
use crate::reservation::Reservation;
use crate::seat::{SeatLockCacheEntry, SeatLockRecord, SeatLockState};
use crate::stock::{StockMutation, StockRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Durable stock ledger storage.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Read the current record.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    async fn load(&self, item_id: &ItemId) -> Result<Option<StockRecord>>;

    /// Insert `record` unless a row for the item already exists.
    ///
    /// Returns `true` if a row was created.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    async fn insert_if_absent(&self, record: &StockRecord) -> Result<bool>;

    /// Persist `next` only if the stored version still equals `expected_version`.
    ///
    /// Returns `false` on a version mismatch. `mutation` identifies which
    /// ledger operation the write belongs to.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: &StockRecord,
        mutation: StockMutation,
    ) -> Result<bool>;

    /// Every stock record.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    async fn list(&self) -> Result<Vec<StockRecord>>;
}

/// Result of a fast-path pre-deduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredeductOutcome {
    /// Counter decremented
    Admitted {
        /// Value after the decrement
        remaining: i64,
    },
    /// Counter below the requested quantity, untouched
    Insufficient {
        /// Current value
        available: i64,
    },
    /// No counter in the cache
    NotInitialized,
}

/// Result of a fast-path rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Counter incremented
    Restored {
        /// Value after the increment
        current: i64,
    },
    /// Increment would pass the cap, counter untouched
    WouldExceedMax {
        /// Current value
        current: i64,
    },
    /// No counter in the cache
    NotInitialized,
}

/// Cache-backed fast-path counters.
///
/// Every write refreshes the counter's TTL.
#[async_trait]
pub trait CounterCache: Send + Sync {
    /// Atomically decrement by `quantity` if the counter holds at least that much.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    async fn prededuct(&self, item_id: &ItemId, quantity: u32) -> Result<PredeductOutcome>;

    /// Atomically increment by `quantity` unless that would pass `max_units`.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    async fn rollback(
        &self,
        item_id: &ItemId,
        quantity: u32,
        max_units: u32,
    ) -> Result<RollbackOutcome>;

    /// Overwrite the counter.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    async fn set(&self, item_id: &ItemId, value: u32) -> Result<()>;

    /// Current counter value, if present.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    async fn get(&self, item_id: &ItemId) -> Result<Option<i64>>;

    /// Drop the counter.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    async fn evict(&self, item_id: &ItemId) -> Result<()>;
}

/// Result of releasing a seat cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheRelease {
    /// Entry removed
    Released,
    /// No entry existed
    Absent,
    /// Entry belongs to someone else, untouched
    NotOwner,
}

/// Result of taking a seat cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAcquire {
    /// No live entry existed; ours was written
    Acquired,
    /// The same owner already held it; entry and TTL replaced
    Refreshed,
    /// Another owner holds it, untouched
    HeldByOther,
}

/// Seat lock cache entries under `seat_lock:{seat}`.
#[async_trait]
pub trait SeatLockCache: Send + Sync {
    /// Set the entry if absent, or refresh it if already held by the same owner.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    async fn try_acquire(
        &self,
        seat_id: &SeatId,
        entry: &SeatLockCacheEntry,
        ttl: Duration,
    ) -> Result<CacheAcquire>;

    /// Current entry, if present and parseable.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    async fn get(&self, seat_id: &SeatId) -> Result<Option<SeatLockCacheEntry>>;

    /// Delete the entry if `owner_id` holds it.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    async fn release(&self, seat_id: &SeatId, owner_id: &OwnerId) -> Result<CacheRelease>;

    /// Unconditionally replace the entry.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    async fn overwrite(
        &self,
        seat_id: &SeatId,
        entry: &SeatLockCacheEntry,
        ttl: Duration,
    ) -> Result<()>;

    /// Unconditionally delete the entry.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    async fn remove(&self, seat_id: &SeatId) -> Result<()>;
}

/// Result of writing a durable `Locking` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockWrite {
    /// New row created
    Acquired,
    /// Same owner already held it; expiry extended
    Refreshed,
    /// Another owner holds an active row
    HeldByOther(OwnerId),
}

/// Durable seat lock rows.
///
/// At most one row per (seat, session) may be active (`Locking` or `Confirmed`).
#[async_trait]
pub trait SeatLockRepository: Send + Sync {
    /// Create a `Locking` row, or refresh the caller's own active `Locking` row.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    async fn acquire(&self, record: &SeatLockRecord) -> Result<LockWrite>;

    /// The active row for (seat, session), if any.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    async fn find_active(
        &self,
        seat_id: &SeatId,
        session_id: &SessionId,
    ) -> Result<Option<SeatLockRecord>>;

    /// Move the owner's row from `from` to `to`.
    ///
    /// Returns `false` if no row matched.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    async fn transition(
        &self,
        seat_id: &SeatId,
        session_id: &SessionId,
        owner_id: &OwnerId,
        from: SeatLockState,
        to: SeatLockState,
    ) -> Result<bool>;

    /// Release every `Locking` row whose expiry is at or before `now`.
    ///
    /// Returns the released rows.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    async fn release_expired(&self, now: DateTime<Utc>) -> Result<Vec<SeatLockRecord>>;

    /// Every row currently in `Locking`.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    async fn list_locking(&self) -> Result<Vec<SeatLockRecord>>;

    /// Rows moved to `Released` at or after `since`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    async fn list_released_since(&self, since: DateTime<Utc>) -> Result<Vec<SeatLockRecord>>;

    /// Release the `Locking` row for (seat, session) regardless of owner.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    async fn force_release(&self, seat_id: &SeatId, session_id: &SessionId) -> Result<bool>;
}

/// Distributed mutual exclusion with a lease.
#[async_trait]
pub trait MutexProvider: Send + Sync {
    /// Take `key` for `lease` if free. `token` identifies this holder.
    ///
    /// # Errors
    ///
    /// Returns error if the backing store is unreachable.
    async fn try_acquire(&self, key: &str, token: &str, lease: Duration) -> Result<bool>;

    /// Free `key` if still held under `token`.
    ///
    /// # Errors
    ///
    /// Returns error if the backing store is unreachable.
    async fn release(&self, key: &str, token: &str) -> Result<bool>;
}

/// Durable compensation task queue.
#[async_trait]
pub trait CompensationStore: Send + Sync {
    /// Queue a task.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    async fn insert(&self, task: &CompensationTask) -> Result<()>;

    /// Claim up to `limit` pending tasks due at `now`.
    ///
    /// Claimed tasks are pushed out to `now + lease` so that concurrent
    /// workers skip them.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<CompensationTask>>;

    /// Persist attempts, status, error and schedule of `task`.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable or the task is unknown.
    async fn update(&self, task: &CompensationTask) -> Result<()>;

    /// A task by id.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    async fn get(&self, id: Uuid) -> Result<Option<CompensationTask>>;

    /// Tasks in `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    async fn list_by_status(
        &self,
        status: CompensationStatus,
        limit: usize,
    ) -> Result<Vec<CompensationTask>>;

    /// Number of tasks in `status`.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    async fn count_by_status(&self, status: CompensationStatus) -> Result<u64>;
}

/// The order service that receives completed reservations.
#[async_trait]
pub trait OrderSink: Send + Sync {
    /// Durably record an order for `reservation` and return its reference.
    ///
    /// # Errors
    ///
    /// Returns error if the order could not be persisted.
    async fn persist(&self, reservation: &Reservation) -> Result<String>;
}
