//! In-memory durable providers.
//!
//! Fast, deterministic stand-ins for the Postgres stores. They follow the
//! same conditional-write rules as the SQL so services behave identically
//! against either.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap on poisoned locks
#![allow(clippy::missing_panics_doc)]

use crate::faults::FaultInjector;
use async_trait::async_trait;
use boxoffice_core::providers::{
    CompensationStore, LockWrite, OrderSink, SeatLockRepository, StockStore,
};
use boxoffice_core::{
    Clock, CompensationStatus, CompensationTask, InventoryError, ItemId, Operation, OwnerId,
    Reservation, Result, SeatId, SeatLockRecord, SeatLockState, SessionId, StockMutation,
    StockRecord, SystemClock,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════
// Stock rows
// ═══════════════════════════════════════════════════════════

/// In-memory stock ledger rows.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockStore {
    records: Arc<Mutex<HashMap<ItemId, StockRecord>>>,
    forced_conflicts: Arc<AtomicUsize>,
    faults: FaultInjector,
}

impl InMemoryStockStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault injector for this store.
    #[must_use]
    pub const fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Make the next `n` compare-and-swap calls lose their race.
    pub fn conflict_next(&self, n: usize) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    /// Snapshot of a record.
    #[must_use]
    pub fn record(&self, item_id: &ItemId) -> Option<StockRecord> {
        self.records.lock().unwrap().get(item_id).cloned()
    }

    /// Overwrite a record directly, bypassing the ledger rules.
    pub fn put(&self, record: StockRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.item_id.clone(), record);
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn load(&self, item_id: &ItemId) -> Result<Option<StockRecord>> {
        Ok(self.record(item_id))
    }

    async fn insert_if_absent(&self, record: &StockRecord) -> Result<bool> {
        self.faults.check_database(Operation::InitializeStock)?;
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.item_id) {
            return Ok(false);
        }
        records.insert(record.item_id.clone(), record.clone());
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: &StockRecord,
        mutation: StockMutation,
    ) -> Result<bool> {
        self.faults.check_database(mutation.operation())?;

        if self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(false);
        }

        let mut records = self.records.lock().unwrap();
        let Some(current) = records.get_mut(&next.item_id) else {
            return Ok(false);
        };
        if current.version != expected_version
            || u64::from(next.locked_units) + u64::from(next.sold_units)
                > u64::from(current.total_units)
        {
            return Ok(false);
        }

        current.locked_units = next.locked_units;
        current.sold_units = next.sold_units;
        current.version = expected_version + 1;
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<StockRecord>> {
        let mut all: Vec<_> = self.records.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        Ok(all)
    }
}

// ═══════════════════════════════════════════════════════════
// Seat lock rows
// ═══════════════════════════════════════════════════════════

/// In-memory seat lock rows. Released rows are kept as history.
#[derive(Clone)]
pub struct InMemorySeatLockRepository {
    rows: Arc<Mutex<Vec<SeatLockRecord>>>,
    /// Release time by row index
    released_at: Arc<Mutex<HashMap<usize, DateTime<Utc>>>>,
    clock: Arc<dyn Clock>,
    faults: FaultInjector,
}

impl Default for InMemorySeatLockRepository {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl InMemorySeatLockRepository {
    /// Create an empty repository on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty repository that stamps releases with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: Arc::new(Mutex::new(Vec::new())),
            released_at: Arc::new(Mutex::new(HashMap::new())),
            clock,
            faults: FaultInjector::default(),
        }
    }

    fn stamp_released(&self, index: usize) {
        self.released_at
            .lock()
            .unwrap()
            .insert(index, self.clock.now());
    }

    /// Fault injector for this repository.
    #[must_use]
    pub const fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Every row ever written for (seat, session), oldest first.
    #[must_use]
    pub fn history(&self, seat_id: &SeatId, session_id: &SessionId) -> Vec<SeatLockRecord> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| &r.seat_id == seat_id && &r.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Insert a row directly, bypassing exclusivity checks.
    pub fn put(&self, record: SeatLockRecord) {
        self.rows.lock().unwrap().push(record);
    }
}

#[async_trait]
impl SeatLockRepository for InMemorySeatLockRepository {
    async fn acquire(&self, record: &SeatLockRecord) -> Result<LockWrite> {
        self.faults.check_database(Operation::LockSeat)?;
        let mut rows = self.rows.lock().unwrap();
        let active = rows.iter_mut().find(|r| {
            r.seat_id == record.seat_id && r.session_id == record.session_id && r.state.is_active()
        });

        match active {
            Some(row) if row.owner_id == record.owner_id && row.state == SeatLockState::Locking => {
                row.expires_at = record.expires_at;
                row.lock_kind = record.lock_kind;
                Ok(LockWrite::Refreshed)
            }
            Some(row) => Ok(LockWrite::HeldByOther(row.owner_id.clone())),
            None => {
                rows.push(record.clone());
                Ok(LockWrite::Acquired)
            }
        }
    }

    async fn find_active(
        &self,
        seat_id: &SeatId,
        session_id: &SessionId,
    ) -> Result<Option<SeatLockRecord>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| &r.seat_id == seat_id && &r.session_id == session_id && r.state.is_active())
            .cloned())
    }

    async fn transition(
        &self,
        seat_id: &SeatId,
        session_id: &SessionId,
        owner_id: &OwnerId,
        from: SeatLockState,
        to: SeatLockState,
    ) -> Result<bool> {
        let op = match to {
            SeatLockState::Confirmed => Operation::ConfirmSeat,
            SeatLockState::Released | SeatLockState::Locking => Operation::UnlockSeat,
        };
        self.faults.check_database(op)?;

        let mut rows = self.rows.lock().unwrap();
        let Some(index) = rows.iter().position(|r| {
            &r.seat_id == seat_id
                && &r.session_id == session_id
                && &r.owner_id == owner_id
                && r.state == from
        }) else {
            return Ok(false);
        };
        rows[index].state = to;
        if to == SeatLockState::Released {
            self.stamp_released(index);
        }
        Ok(true)
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> Result<Vec<SeatLockRecord>> {
        self.faults.check_database(Operation::SweepExpired)?;
        let mut released = Vec::new();
        for (index, row) in self.rows.lock().unwrap().iter_mut().enumerate() {
            if row.is_expired(now) {
                row.state = SeatLockState::Released;
                self.stamp_released(index);
                released.push(row.clone());
            }
        }
        Ok(released)
    }

    async fn list_locking(&self) -> Result<Vec<SeatLockRecord>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.state == SeatLockState::Locking)
            .cloned()
            .collect())
    }

    async fn list_released_since(&self, since: DateTime<Utc>) -> Result<Vec<SeatLockRecord>> {
        self.faults.check_database(Operation::AuditSeat)?;
        let rows = self.rows.lock().unwrap();
        let mut released: Vec<_> = self
            .released_at
            .lock()
            .unwrap()
            .iter()
            .filter(|(index, at)| **at >= since && rows[**index].state == SeatLockState::Released)
            .map(|(index, at)| (*at, *index))
            .collect();
        released.sort_unstable();
        Ok(released.into_iter().map(|(_, index)| rows[index].clone()).collect())
    }

    async fn force_release(&self, seat_id: &SeatId, session_id: &SessionId) -> Result<bool> {
        self.faults.check_database(Operation::AuditSeat)?;
        let mut rows = self.rows.lock().unwrap();
        let Some(index) = rows.iter().position(|r| {
            &r.seat_id == seat_id && &r.session_id == session_id && r.state == SeatLockState::Locking
        }) else {
            return Ok(false);
        };
        rows[index].state = SeatLockState::Released;
        self.stamp_released(index);
        Ok(true)
    }
}

// ═══════════════════════════════════════════════════════════
// Compensation tasks
// ═══════════════════════════════════════════════════════════

/// In-memory compensation task queue.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCompensationStore {
    tasks: Arc<Mutex<Vec<CompensationTask>>>,
    faults: FaultInjector,
}

impl InMemoryCompensationStore {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault injector for this queue. Armed with [`Operation::Compensate`].
    #[must_use]
    pub const fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Snapshot of every task.
    #[must_use]
    pub fn all(&self) -> Vec<CompensationTask> {
        self.tasks.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompensationStore for InMemoryCompensationStore {
    async fn insert(&self, task: &CompensationTask) -> Result<()> {
        self.faults.check_database(Operation::Compensate)?;
        self.tasks.lock().unwrap().push(task.clone());
        Ok(())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<CompensationTask>> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| InventoryError::Database(e.to_string()))?;
        let mut tasks = self.tasks.lock().unwrap();
        let mut due: Vec<&mut CompensationTask> = tasks
            .iter_mut()
            .filter(|t| t.status == CompensationStatus::Pending && t.next_attempt_at <= now)
            .collect();
        due.sort_by_key(|t| t.next_attempt_at);

        Ok(due
            .into_iter()
            .take(limit)
            .map(|t| {
                t.next_attempt_at = now + lease;
                t.clone()
            })
            .collect())
    }

    async fn update(&self, task: &CompensationTask) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let stored = tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| InventoryError::NotFound(format!("compensation task {}", task.id)))?;
        *stored = task.clone();
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<CompensationTask>> {
        Ok(self.tasks.lock().unwrap().iter().find(|t| t.id == id).cloned())
    }

    async fn list_by_status(
        &self,
        status: CompensationStatus,
        limit: usize,
    ) -> Result<Vec<CompensationTask>> {
        let mut found: Vec<_> = self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.created_at);
        found.truncate(limit);
        Ok(found)
    }

    async fn count_by_status(&self, status: CompensationStatus) -> Result<u64> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.status == status)
            .count() as u64)
    }
}

// ═══════════════════════════════════════════════════════════
// Orders
// ═══════════════════════════════════════════════════════════

/// Order collaborator that records what it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingOrderSink {
    orders: Arc<Mutex<Vec<Reservation>>>,
    faults: FaultInjector,
}

impl RecordingOrderSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault injector for this sink. Armed with [`Operation::PersistOrder`].
    #[must_use]
    pub const fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Reservations persisted so far.
    #[must_use]
    pub fn orders(&self) -> Vec<Reservation> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderSink for RecordingOrderSink {
    async fn persist(&self, reservation: &Reservation) -> Result<String> {
        self.faults.check_database(Operation::PersistOrder)?;
        let mut orders = self.orders.lock().unwrap();
        orders.push(reservation.clone());
        Ok(format!("order-{}", orders.len()))
    }
}
