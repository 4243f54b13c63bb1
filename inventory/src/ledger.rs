//! Stock ledger service.
//!
//! The only writer of `locked_units` and `sold_units`. Every mutation is
//! read, validated with [`StockRecord::apply`], then written with the
//! store's compare-and-swap. A lost race re-reads and revalidates, so a retry
//! can still end in `InsufficientStock`.

use boxoffice_core::providers::StockStore;
use boxoffice_core::{InventoryError, ItemId, Operation, Result, StockMutation, StockRecord};
use boxoffice_runtime::metrics::OperationMetrics;
use boxoffice_runtime::{RetryPolicy, retry_with_predicate};
use std::sync::Arc;
use std::time::Instant;

/// Durable stock ledger with optimistic concurrency.
#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn StockStore>,
    policy: RetryPolicy,
}

impl StockLedger {
    /// Create a ledger that retries CAS conflicts according to `policy`.
    #[must_use]
    pub fn new(store: Arc<dyn StockStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Create the record for `item_id` unless it already exists.
    ///
    /// Returns the stored record, which is the pre-existing one on a repeat call.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    pub async fn initialize(&self, item_id: &ItemId, total_units: u32) -> Result<StockRecord> {
        let started = Instant::now();
        let result = self.initialize_inner(item_id, total_units).await;
        OperationMetrics::record(Operation::InitializeStock, &result, started.elapsed());
        result
    }

    async fn initialize_inner(&self, item_id: &ItemId, total_units: u32) -> Result<StockRecord> {
        let record = StockRecord::new(item_id.clone(), total_units);
        if self.store.insert_if_absent(&record).await? {
            tracing::info!(item_id = %item_id, total_units, "Stock initialized");
            return Ok(record);
        }

        let existing = self.load(item_id).await?;
        if existing.total_units != total_units {
            tracing::warn!(
                item_id = %item_id,
                requested = total_units,
                existing = existing.total_units,
                "Stock already initialized with a different total; keeping existing"
            );
        }
        Ok(existing)
    }

    /// Current record for `item_id`.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::NotFound`] if the item was never initialized.
    pub async fn load(&self, item_id: &ItemId) -> Result<StockRecord> {
        self.store
            .load(item_id)
            .await?
            .ok_or_else(|| InventoryError::NotFound(format!("stock record {item_id}")))
    }

    /// Every record.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    pub async fn list(&self) -> Result<Vec<StockRecord>> {
        self.store.list().await
    }

    /// Lock `quantity` available units.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::InsufficientStock`] if fewer units are available
    /// - [`InventoryError::Conflict`] if every CAS attempt lost a race
    pub async fn reserve(&self, item_id: &ItemId, quantity: u32) -> Result<StockRecord> {
        self.mutate(item_id, StockMutation::Reserve(quantity)).await
    }

    /// Give back `quantity` locked units.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::InvalidState`] if fewer units are locked
    /// - [`InventoryError::Conflict`] if every CAS attempt lost a race
    pub async fn release(&self, item_id: &ItemId, quantity: u32) -> Result<StockRecord> {
        self.mutate(item_id, StockMutation::Release(quantity)).await
    }

    /// Move `quantity` locked units to sold.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::InvalidState`] if fewer units are locked
    /// - [`InventoryError::Conflict`] if every CAS attempt lost a race
    pub async fn commit(&self, item_id: &ItemId, quantity: u32) -> Result<StockRecord> {
        self.mutate(item_id, StockMutation::Commit(quantity)).await
    }

    async fn mutate(&self, item_id: &ItemId, mutation: StockMutation) -> Result<StockRecord> {
        let op = mutation.operation();
        let started = Instant::now();

        let result = retry_with_predicate(
            &self.policy,
            op,
            || self.try_mutate(item_id, mutation),
            InventoryError::is_transient,
        )
        .await;

        match &result {
            Ok(record) => tracing::debug!(
                item_id = %item_id,
                operation = %op,
                quantity = mutation.quantity(),
                available = record.available_units(),
                version = record.version,
                "Stock ledger updated"
            ),
            Err(e) if e.is_business() => tracing::debug!(
                item_id = %item_id,
                operation = %op,
                error = %e,
                "Stock ledger rejected mutation"
            ),
            Err(e) => tracing::warn!(
                item_id = %item_id,
                operation = %op,
                error = %e,
                "Stock ledger mutation failed"
            ),
        }

        OperationMetrics::record(op, &result, started.elapsed());
        result
    }

    async fn try_mutate(&self, item_id: &ItemId, mutation: StockMutation) -> Result<StockRecord> {
        let current = self.load(item_id).await?;
        let next = current.apply(mutation)?;

        if self
            .store
            .compare_and_swap(current.version, &next, mutation)
            .await?
        {
            Ok(next)
        } else {
            Err(InventoryError::Conflict(format!(
                "stock record {item_id} changed since version {}",
                current.version
            )))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use boxoffice_testing::InMemoryStockStore;
    use std::time::Duration;

    fn ledger() -> (StockLedger, InMemoryStockStore) {
        let store = InMemoryStockStore::new();
        let policy = RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .linear()
            .build();
        (StockLedger::new(Arc::new(store.clone()), policy), store)
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let (ledger, _) = ledger();
        let item = ItemId::new("T1");
        ledger.initialize(&item, 5).await.unwrap();
        ledger.reserve(&item, 2).await.unwrap();

        let again = ledger.initialize(&item, 10).await.unwrap();
        assert_eq!(again.total_units, 5);
        assert_eq!(again.locked_units, 2);
    }

    #[tokio::test]
    async fn reserve_commit_release_move_units() {
        let (ledger, _) = ledger();
        let item = ItemId::new("T1");
        ledger.initialize(&item, 5).await.unwrap();

        ledger.reserve(&item, 3).await.unwrap();
        ledger.commit(&item, 2).await.unwrap();
        let record = ledger.release(&item, 1).await.unwrap();

        assert_eq!(record.locked_units, 0);
        assert_eq!(record.sold_units, 2);
        assert_eq!(record.available_units(), 3);
        assert_eq!(record.version, 3);
    }

    #[tokio::test]
    async fn insufficient_stock_is_not_retried() {
        let (ledger, store) = ledger();
        let item = ItemId::new("T1");
        ledger.initialize(&item, 1).await.unwrap();

        let err = ledger.reserve(&item, 2).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientStock { requested: 2, available: 1, .. }
        ));
        assert_eq!(store.record(&item).unwrap().version, 0);
    }

    #[tokio::test]
    async fn cas_conflicts_are_retried_then_surface() {
        let (ledger, store) = ledger();
        let item = ItemId::new("T1");
        ledger.initialize(&item, 5).await.unwrap();

        store.conflict_next(2);
        assert!(ledger.reserve(&item, 1).await.is_ok());

        store.conflict_next(3);
        let err = ledger.reserve(&item, 1).await.unwrap_err();
        assert!(matches!(err, InventoryError::Conflict(_)));
        assert_eq!(store.record(&item).unwrap().locked_units, 1);
    }

    #[tokio::test]
    async fn release_more_than_locked_is_invalid() {
        let (ledger, _) = ledger();
        let item = ItemId::new("T1");
        ledger.initialize(&item, 5).await.unwrap();
        ledger.reserve(&item, 1).await.unwrap();

        let err = ledger.release(&item, 2).await.unwrap_err();
        assert!(matches!(err, InventoryError::InvalidState(_)));
        let err = ledger.commit(&item, 2).await.unwrap_err();
        assert!(matches!(err, InventoryError::InvalidState(_)));
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let (ledger, _) = ledger();
        let err = ledger.reserve(&ItemId::new("missing"), 1).await.unwrap_err();
        assert!(matches!(err, InventoryError::NotFound(_)));
    }
}
