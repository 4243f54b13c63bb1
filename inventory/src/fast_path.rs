//! Fast-path counter service.
//!
//! An admission gate in front of the ledger. The counter mirrors each item's
//! `available_units` and may be stale or missing at any time. A missing
//! counter is rebuilt from the ledger, never treated as sold out.

use crate::ledger::StockLedger;
use boxoffice_core::providers::{CounterCache, PredeductOutcome, RollbackOutcome};
use boxoffice_core::{ItemId, Operation, Result};
use boxoffice_runtime::metrics::OperationMetrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Result of seeding counters at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmUpReport {
    /// Counters written
    pub seeded: usize,
    /// Items whose counter could not be written
    pub failed: usize,
}

/// Cache-backed stock counter per item.
#[derive(Clone)]
pub struct FastPathCounter {
    cache: Arc<dyn CounterCache>,
    ledger: StockLedger,
}

impl FastPathCounter {
    /// Create a counter service that resyncs from `ledger`.
    #[must_use]
    pub fn new(cache: Arc<dyn CounterCache>, ledger: StockLedger) -> Self {
        Self { cache, ledger }
    }

    /// Take `quantity` units from the counter.
    ///
    /// A missing counter is resynced from the ledger and the deduction tried
    /// once more. A second `NotInitialized` is returned as is.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable, or if a resync was needed
    /// and the ledger could not be read.
    pub async fn prededuct(&self, item_id: &ItemId, quantity: u32) -> Result<PredeductOutcome> {
        let started = Instant::now();
        let result = self.prededuct_inner(item_id, quantity).await;
        OperationMetrics::record(Operation::Prededuct, &result, started.elapsed());
        result
    }

    async fn prededuct_inner(&self, item_id: &ItemId, quantity: u32) -> Result<PredeductOutcome> {
        match self.cache.prededuct(item_id, quantity).await? {
            PredeductOutcome::NotInitialized => {
                tracing::info!(item_id = %item_id, "Fast-path counter missing, resyncing");
                self.resync_from_ledger(item_id).await?;
                self.cache.prededuct(item_id, quantity).await
            }
            outcome => Ok(outcome),
        }
    }

    /// Give `quantity` units back, never passing `max_units`.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    pub async fn rollback(
        &self,
        item_id: &ItemId,
        quantity: u32,
        max_units: u32,
    ) -> Result<RollbackOutcome> {
        let started = Instant::now();
        let result = self.cache.rollback(item_id, quantity, max_units).await;

        if let Ok(RollbackOutcome::WouldExceedMax { current }) = &result {
            tracing::warn!(
                item_id = %item_id,
                quantity,
                max_units,
                current,
                "Fast-path rollback would pass total units; skipped"
            );
        }

        OperationMetrics::record(Operation::Rollback, &result, started.elapsed());
        result
    }

    /// Like [`rollback`](Self::rollback), reading the cap from the ledger
    /// when it is not known.
    ///
    /// # Errors
    ///
    /// Returns error if the ledger or the cache is unreachable.
    pub async fn restore(
        &self,
        item_id: &ItemId,
        quantity: u32,
        max_units: Option<u32>,
    ) -> Result<RollbackOutcome> {
        let max_units = match max_units {
            Some(max) => max,
            None => self.ledger.load(item_id).await?.total_units,
        };
        self.rollback(item_id, quantity, max_units).await
    }

    /// Overwrite the counter with the ledger's available units.
    ///
    /// # Errors
    ///
    /// Returns error if the ledger or the cache is unreachable.
    pub async fn resync_from_ledger(&self, item_id: &ItemId) -> Result<u32> {
        let started = Instant::now();
        let result = async {
            let available = self.ledger.load(item_id).await?.available_units();
            self.cache.set(item_id, available).await?;
            Ok(available)
        }
        .await;

        if let Ok(available) = &result {
            tracing::debug!(item_id = %item_id, available, "Fast-path counter resynced");
        }
        OperationMetrics::record(Operation::Resync, &result, started.elapsed());
        result
    }

    /// Seed the counter of every ledger item.
    ///
    /// Individual failures are counted and logged; the next audit repairs them.
    ///
    /// # Errors
    ///
    /// Returns error only if the ledger cannot be listed.
    pub async fn warm_up(&self) -> Result<WarmUpReport> {
        let started = Instant::now();
        let result = self.warm_up_inner().await;
        OperationMetrics::record(Operation::WarmUp, &result, started.elapsed());
        result
    }

    async fn warm_up_inner(&self) -> Result<WarmUpReport> {
        let mut report = WarmUpReport::default();
        for record in self.ledger.list().await? {
            match self.cache.set(&record.item_id, record.available_units()).await {
                Ok(()) => report.seeded += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(item_id = %record.item_id, error = %e, "Failed to seed counter");
                }
            }
        }

        tracing::info!(seeded = report.seeded, failed = report.failed, "Fast-path counters warmed up");
        Ok(report)
    }

    /// Current counter value, if present.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    pub async fn current(&self, item_id: &ItemId) -> Result<Option<i64>> {
        self.cache.get(item_id).await
    }

    /// Drop the counter. The next deduction resyncs it.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    pub async fn evict(&self, item_id: &ItemId) -> Result<()> {
        self.cache.evict(item_id).await
    }
}
