//! Consistency auditor.
//!
//! Caches drift: counters miss a rollback, seat entries expire early or
//! outlive their rows. The auditor compares each cache value against the
//! durable record and always repairs toward the durable side.
//!
//! Seat cases, as (cache entry, active row):
//!
//! | cache | row | repair |
//! |---|---|---|
//! | absent | absent or confirmed | none |
//! | absent | locking | release the row (cache expired first) |
//! | present | absent | remove the entry |
//! | owner A | owner A | none |
//! | owner A | owner B | rewrite the entry from the row |
//!
//! A full pass also revisits rows released within one cache TTL, which
//! catches an entry left behind when a cache release failed. Such an
//! entry is removed only if it still names the released row's owner.

use crate::fast_path::FastPathCounter;
use crate::ledger::StockLedger;
use boxoffice_core::environment::Clock;
use boxoffice_core::providers::{CompensationStore, SeatLockCache, SeatLockRepository};
use boxoffice_core::{
    CompensationStatus, ItemId, Operation, Result, SeatId, SeatLockRecord, SeatLockState,
    SessionId, StockLevel,
};
use boxoffice_runtime::metrics::{AuditMetrics, OperationMetrics};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of auditing one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ItemAudit {
    /// Counter matched the ledger
    Consistent,
    /// Counter was rewritten from the ledger
    Repaired {
        /// Counter value before the repair, `None` if it was missing
        previous: Option<i64>,
        /// Value written
        current: u32,
    },
}

/// Result of auditing one seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SeatAudit {
    /// Cache and row agree
    Consistent,
    /// Stray cache entry removed
    CacheReleased,
    /// Row with no cache entry released
    DbReleased,
    /// Cache entry rewritten to the row's owner
    CacheRewritten,
}

/// Items per stock level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StockLevelCounts {
    /// No units left
    pub sold_out: usize,
    /// Under 5% left
    pub critical: usize,
    /// Under 10% left
    pub low: usize,
    /// Under 20% left
    pub warning: usize,
    /// Everything else
    pub healthy: usize,
}

impl StockLevelCounts {
    fn add(&mut self, level: StockLevel) {
        match level {
            StockLevel::SoldOut => self.sold_out += 1,
            StockLevel::Critical => self.critical += 1,
            StockLevel::Low => self.low += 1,
            StockLevel::Warning => self.warning += 1,
            StockLevel::Healthy => self.healthy += 1,
        }
    }
}

/// Summary of a full audit pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    /// Ledger records examined
    pub items_checked: usize,
    /// Items whose counter matched
    pub items_consistent: usize,
    /// Items whose counter was resynced
    pub items_repaired: usize,
    /// Items that could not be audited
    pub items_failed: usize,
    /// Locking and recently released rows examined
    pub seats_checked: usize,
    /// Seats whose cache matched
    pub seats_consistent: usize,
    /// Seats repaired
    pub seats_repaired: usize,
    /// Seats that could not be audited
    pub seats_failed: usize,
    /// Compensations still being retried
    pub pending_compensations: u64,
    /// Compensations waiting for an operator
    pub terminal_compensations: u64,
    /// Items per stock level
    pub stock_levels: StockLevelCounts,
}

impl AuditReport {
    fn add_seat(&mut self, row: &SeatLockRecord, result: &Result<SeatAudit>) {
        self.seats_checked += 1;
        match result {
            Ok(SeatAudit::Consistent) => self.seats_consistent += 1,
            Ok(_) => self.seats_repaired += 1,
            Err(e) => {
                self.seats_failed += 1;
                tracing::warn!(seat_id = %row.seat_id, error = %e, "Seat audit failed");
            }
        }
    }

    /// Whether nothing needed repair or failed.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.items_repaired == 0
            && self.items_failed == 0
            && self.seats_repaired == 0
            && self.seats_failed == 0
            && self.terminal_compensations == 0
    }
}

/// Reconciles caches against the durable stores.
#[derive(Clone)]
pub struct ConsistencyAuditor {
    ledger: StockLedger,
    fast_path: FastPathCounter,
    seat_cache: Arc<dyn SeatLockCache>,
    seat_repo: Arc<dyn SeatLockRepository>,
    compensations: Arc<dyn CompensationStore>,
    clock: Arc<dyn Clock>,
    cache_ttl: Duration,
}

impl ConsistencyAuditor {
    /// Create an auditor. Rewritten seat entries live for at most `cache_ttl`.
    #[must_use]
    pub fn new(
        ledger: StockLedger,
        fast_path: FastPathCounter,
        seat_cache: Arc<dyn SeatLockCache>,
        seat_repo: Arc<dyn SeatLockRepository>,
        compensations: Arc<dyn CompensationStore>,
        clock: Arc<dyn Clock>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            ledger,
            fast_path,
            seat_cache,
            seat_repo,
            compensations,
            clock,
            cache_ttl,
        }
    }

    /// Compare one item's counter with the ledger and resync on mismatch.
    ///
    /// # Errors
    ///
    /// Returns error if the ledger or the cache is unreachable.
    pub async fn audit_item(&self, item_id: &ItemId) -> Result<ItemAudit> {
        let started = Instant::now();
        let result = self.audit_item_inner(item_id).await;
        OperationMetrics::record(Operation::AuditItem, &result, started.elapsed());
        result
    }

    async fn audit_item_inner(&self, item_id: &ItemId) -> Result<ItemAudit> {
        let available = self.ledger.load(item_id).await?.available_units();
        let previous = self.fast_path.current(item_id).await?;
        if previous == Some(i64::from(available)) {
            return Ok(ItemAudit::Consistent);
        }

        let current = self.fast_path.resync_from_ledger(item_id).await?;
        AuditMetrics::record_item_repair();
        tracing::warn!(
            item_id = %item_id,
            counter = ?previous,
            ledger = current,
            "Fast-path counter drifted from ledger; resynced"
        );
        Ok(ItemAudit::Repaired { previous, current })
    }

    /// Compare one seat's cache entry with its durable row and repair.
    ///
    /// # Errors
    ///
    /// Returns error if either store is unreachable.
    pub async fn audit_seat(&self, seat_id: &SeatId, session_id: &SessionId) -> Result<SeatAudit> {
        let started = Instant::now();
        let result = self.audit_seat_inner(seat_id, session_id).await;
        OperationMetrics::record(Operation::AuditSeat, &result, started.elapsed());

        Self::log_seat_repair(seat_id, session_id, &result);
        result
    }

    fn log_seat_repair(seat_id: &SeatId, session_id: &SessionId, result: &Result<SeatAudit>) {
        if let Ok(outcome) = result {
            if *outcome != SeatAudit::Consistent {
                AuditMetrics::record_seat_repair();
                tracing::warn!(
                    seat_id = %seat_id,
                    session_id = %session_id,
                    repair = ?outcome,
                    "Seat lock drift repaired"
                );
            }
        }
    }

    /// Remove a cache entry that outlived its released row.
    ///
    /// Nothing is touched if the seat has an active row again or the entry
    /// belongs to a different owner.
    ///
    /// # Errors
    ///
    /// Returns error if either store is unreachable.
    pub async fn audit_released_seat(&self, row: &SeatLockRecord) -> Result<SeatAudit> {
        let started = Instant::now();
        let result = self.audit_released_seat_inner(row).await;
        OperationMetrics::record(Operation::AuditSeat, &result, started.elapsed());
        Self::log_seat_repair(&row.seat_id, &row.session_id, &result);
        result
    }

    async fn audit_released_seat_inner(&self, row: &SeatLockRecord) -> Result<SeatAudit> {
        let Some(entry) = self.seat_cache.get(&row.seat_id).await? else {
            return Ok(SeatAudit::Consistent);
        };
        if entry.owner_id != row.owner_id {
            return Ok(SeatAudit::Consistent);
        }
        if self
            .seat_repo
            .find_active(&row.seat_id, &row.session_id)
            .await?
            .is_some()
        {
            return Ok(SeatAudit::Consistent);
        }

        // Owner-checked so a concurrent re-lock by someone else survives.
        self.seat_cache.release(&row.seat_id, &row.owner_id).await?;
        Ok(SeatAudit::CacheReleased)
    }

    async fn audit_seat_inner(&self, seat_id: &SeatId, session_id: &SessionId) -> Result<SeatAudit> {
        let entry = self.seat_cache.get(seat_id).await?;
        let row = self.seat_repo.find_active(seat_id, session_id).await?;

        match (entry, row) {
            (None, None) => Ok(SeatAudit::Consistent),
            (None, Some(row)) if row.state == SeatLockState::Confirmed => Ok(SeatAudit::Consistent),
            (None, Some(_)) => {
                self.seat_repo.force_release(seat_id, session_id).await?;
                Ok(SeatAudit::DbReleased)
            }
            (Some(_), None) => {
                self.seat_cache.remove(seat_id).await?;
                Ok(SeatAudit::CacheReleased)
            }
            (Some(entry), Some(row)) if entry.owner_id == row.owner_id => Ok(SeatAudit::Consistent),
            (Some(_), Some(row)) => {
                let remaining = (row.expires_at - self.clock.now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if remaining.is_zero() {
                    self.seat_cache.remove(seat_id).await?;
                    return Ok(SeatAudit::CacheReleased);
                }
                self.seat_cache
                    .overwrite(seat_id, &row.cache_entry(), remaining.min(self.cache_ttl))
                    .await?;
                Ok(SeatAudit::CacheRewritten)
            }
        }
    }

    /// Audit every item, every locking seat and every seat released within
    /// the cache TTL.
    ///
    /// Individual failures are counted in the report rather than aborting
    /// the pass.
    ///
    /// # Errors
    ///
    /// Returns error if the item or seat lists cannot be read.
    pub async fn audit_now(&self) -> Result<AuditReport> {
        let mut report = AuditReport::default();

        for record in self.ledger.list().await? {
            report.items_checked += 1;
            let available = record.available_units();
            AuditMetrics::record_stock_level(record.item_id.as_str(), available, record.total_units);
            report
                .stock_levels
                .add(StockLevel::classify(available, record.total_units));

            match self.audit_item(&record.item_id).await {
                Ok(ItemAudit::Consistent) => report.items_consistent += 1,
                Ok(ItemAudit::Repaired { .. }) => report.items_repaired += 1,
                Err(e) => {
                    report.items_failed += 1;
                    tracing::warn!(item_id = %record.item_id, error = %e, "Item audit failed");
                }
            }
        }

        let mut seen = HashSet::new();
        for row in self.seat_repo.list_locking().await? {
            seen.insert((row.seat_id.clone(), row.session_id.clone()));
            let result = self.audit_seat(&row.seat_id, &row.session_id).await;
            report.add_seat(&row, &result);
        }

        let window = chrono::Duration::from_std(self.cache_ttl).unwrap_or(chrono::Duration::zero());
        let since = self.clock.now() - window;
        for row in self.seat_repo.list_released_since(since).await? {
            if !seen.insert((row.seat_id.clone(), row.session_id.clone())) {
                continue;
            }
            let result = self.audit_released_seat(&row).await;
            report.add_seat(&row, &result);
        }

        report.pending_compensations = self
            .compensations
            .count_by_status(CompensationStatus::Pending)
            .await?;
        report.terminal_compensations = self
            .compensations
            .count_by_status(CompensationStatus::Terminal)
            .await?;

        if report.is_clean() {
            tracing::info!(
                items = report.items_checked,
                seats = report.seats_checked,
                "Audit clean"
            );
        } else {
            tracing::warn!(
                items_repaired = report.items_repaired,
                items_failed = report.items_failed,
                seats_repaired = report.seats_repaired,
                seats_failed = report.seats_failed,
                terminal_compensations = report.terminal_compensations,
                "Audit found drift"
            );
        }
        Ok(report)
    }

    /// Count items per stock level, without repairing anything.
    ///
    /// # Errors
    ///
    /// Returns error if the ledger is unreachable.
    pub async fn stock_levels(&self) -> Result<StockLevelCounts> {
        let mut counts = StockLevelCounts::default();
        for record in self.ledger.list().await? {
            counts.add(StockLevel::classify(
                record.available_units(),
                record.total_units,
            ));
        }
        Ok(counts)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use boxoffice_core::{LockKind, OwnerId, SeatLockCacheEntry, SeatLockRecord, VenueId};
    use boxoffice_runtime::RetryPolicy;
    use boxoffice_testing::{
        FixedClock, InMemoryCompensationStore, InMemoryCounterCache, InMemorySeatLockCache,
        InMemorySeatLockRepository, InMemoryStockStore, test_clock,
    };

    struct Fixture {
        auditor: ConsistencyAuditor,
        ledger: StockLedger,
        counters: Arc<InMemoryCounterCache>,
        seat_cache: Arc<InMemorySeatLockCache>,
        seat_repo: Arc<InMemorySeatLockRepository>,
        clock: FixedClock,
    }

    fn fixture() -> Fixture {
        let clock = test_clock();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let ledger = StockLedger::new(Arc::new(InMemoryStockStore::new()), RetryPolicy::default());
        let counters = Arc::new(InMemoryCounterCache::with_clock(
            Arc::clone(&shared),
            Duration::from_secs(3600),
        ));
        let fast_path = FastPathCounter::new(counters.clone(), ledger.clone());
        let seat_cache = Arc::new(InMemorySeatLockCache::with_clock(Arc::clone(&shared)));
        let seat_repo = Arc::new(InMemorySeatLockRepository::with_clock(Arc::clone(&shared)));
        let auditor = ConsistencyAuditor::new(
            ledger.clone(),
            fast_path,
            seat_cache.clone(),
            seat_repo.clone(),
            Arc::new(InMemoryCompensationStore::new()),
            shared,
            Duration::from_secs(300),
        );
        Fixture {
            auditor,
            ledger,
            counters,
            seat_cache,
            seat_repo,
            clock,
        }
    }

    fn row(f: &Fixture, seat: &str, owner: &str, state: SeatLockState) -> SeatLockRecord {
        let now = f.clock.now();
        SeatLockRecord {
            seat_id: SeatId::new(seat),
            session_id: SessionId::new("V1"),
            venue_id: VenueId::new("hall"),
            owner_id: OwnerId::new(owner),
            lock_kind: LockKind::Selection,
            acquired_at: now,
            expires_at: now + chrono::Duration::minutes(5),
            state,
        }
    }

    fn entry(f: &Fixture, owner: &str) -> SeatLockCacheEntry {
        SeatLockCacheEntry::new(OwnerId::new(owner), f.clock.now())
    }

    #[tokio::test]
    async fn drifted_counter_is_resynced() {
        let f = fixture();
        let item = ItemId::new("T1");
        f.ledger.initialize(&item, 10).await.unwrap();
        f.ledger.reserve(&item, 3).await.unwrap();
        f.counters.put(&item, 9);

        let outcome = f.auditor.audit_item(&item).await.unwrap();
        assert_eq!(
            outcome,
            ItemAudit::Repaired {
                previous: Some(9),
                current: 7
            }
        );
        assert_eq!(f.counters.value(&item), Some(7));
        assert_eq!(f.auditor.audit_item(&item).await.unwrap(), ItemAudit::Consistent);
    }

    #[tokio::test]
    async fn missing_counter_is_rebuilt() {
        let f = fixture();
        let item = ItemId::new("T1");
        f.ledger.initialize(&item, 4).await.unwrap();

        let outcome = f.auditor.audit_item(&item).await.unwrap();
        assert!(matches!(outcome, ItemAudit::Repaired { previous: None, current: 4 }));
    }

    #[tokio::test]
    async fn stray_cache_entry_is_removed() {
        let f = fixture();
        let seat = SeatId::new("S1");
        f.seat_cache.put(&seat, entry(&f, "U1"), Duration::from_secs(60));

        let outcome = f.auditor.audit_seat(&seat, &SessionId::new("V1")).await.unwrap();
        assert_eq!(outcome, SeatAudit::CacheReleased);
        assert!(f.seat_cache.entry(&seat).is_none());
    }

    #[tokio::test]
    async fn locking_row_without_cache_is_released() {
        let f = fixture();
        f.seat_repo.put(row(&f, "S1", "U1", SeatLockState::Locking));

        let outcome = f
            .auditor
            .audit_seat(&SeatId::new("S1"), &SessionId::new("V1"))
            .await
            .unwrap();
        assert_eq!(outcome, SeatAudit::DbReleased);
        assert!(f
            .seat_repo
            .find_active(&SeatId::new("S1"), &SessionId::new("V1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn confirmed_row_without_cache_is_consistent() {
        let f = fixture();
        f.seat_repo.put(row(&f, "S1", "U1", SeatLockState::Confirmed));

        let outcome = f
            .auditor
            .audit_seat(&SeatId::new("S1"), &SessionId::new("V1"))
            .await
            .unwrap();
        assert_eq!(outcome, SeatAudit::Consistent);
    }

    #[tokio::test]
    async fn owner_mismatch_trusts_durable_row() {
        let f = fixture();
        let seat = SeatId::new("S1");
        f.seat_repo.put(row(&f, "S1", "U1", SeatLockState::Locking));
        f.seat_cache.put(&seat, entry(&f, "U2"), Duration::from_secs(60));

        let outcome = f.auditor.audit_seat(&seat, &SessionId::new("V1")).await.unwrap();
        assert_eq!(outcome, SeatAudit::CacheRewritten);
        assert_eq!(f.seat_cache.entry(&seat).unwrap().owner_id, OwnerId::new("U1"));
    }

    #[tokio::test]
    async fn audit_now_removes_entry_left_by_released_row() {
        let f = fixture();
        let session = SessionId::new("V1");
        let owner = OwnerId::new("U1");
        for seat in ["S1", "S2"] {
            f.seat_repo
                .acquire(&row(&f, seat, "U1", SeatLockState::Locking))
                .await
                .unwrap();
            f.seat_repo
                .transition(
                    &SeatId::new(seat),
                    &session,
                    &owner,
                    SeatLockState::Locking,
                    SeatLockState::Released,
                )
                .await
                .unwrap();
        }
        f.seat_cache
            .put(&SeatId::new("S1"), entry(&f, "U1"), Duration::from_secs(60));
        f.seat_cache
            .put(&SeatId::new("S2"), entry(&f, "U2"), Duration::from_secs(60));

        let report = f.auditor.audit_now().await.unwrap();
        assert_eq!(report.seats_checked, 2);
        assert_eq!(report.seats_repaired, 1);
        assert_eq!(report.seats_consistent, 1);
        assert!(f.seat_cache.entry(&SeatId::new("S1")).is_none());
        assert_eq!(
            f.seat_cache.entry(&SeatId::new("S2")).unwrap().owner_id,
            OwnerId::new("U2")
        );
    }

    #[tokio::test]
    async fn released_seat_with_new_active_row_is_left_alone() {
        let f = fixture();
        let seat = SeatId::new("S1");
        let released = row(&f, "S1", "U1", SeatLockState::Released);
        f.seat_repo.put(row(&f, "S1", "U1", SeatLockState::Locking));
        f.seat_cache.put(&seat, entry(&f, "U1"), Duration::from_secs(60));

        let outcome = f.auditor.audit_released_seat(&released).await.unwrap();
        assert_eq!(outcome, SeatAudit::Consistent);
        assert!(f.seat_cache.entry(&seat).is_some());
    }

    #[tokio::test]
    async fn audit_now_reports_levels_and_repairs() {
        let f = fixture();
        let healthy = ItemId::new("T1");
        let sold_out = ItemId::new("T2");
        f.ledger.initialize(&healthy, 100).await.unwrap();
        f.ledger.initialize(&sold_out, 2).await.unwrap();
        f.ledger.reserve(&sold_out, 2).await.unwrap();
        f.counters.put(&healthy, 100);
        f.counters.put(&sold_out, 1);

        let report = f.auditor.audit_now().await.unwrap();
        assert_eq!(report.items_checked, 2);
        assert_eq!(report.items_consistent, 1);
        assert_eq!(report.items_repaired, 1);
        assert_eq!(report.stock_levels.healthy, 1);
        assert_eq!(report.stock_levels.sold_out, 1);
        assert!(!report.is_clean());

        let again = f.auditor.audit_now().await.unwrap();
        assert!(again.is_clean());
    }
}
