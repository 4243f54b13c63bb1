//! Compensation ledger.
//!
//! Undo actions that fail inline are queued as [`CompensationTask`]s instead
//! of being dropped. [`CompensationLedger::run_once`] drains due tasks:
//!
//! - success, or an undo that turns out to be already applied: `resolved`
//! - business error (the undo can never succeed): `terminal` immediately
//! - transient error: retried with exponential backoff, `terminal` once the
//!   attempt budget is spent
//!
//! Terminal tasks stay queryable for operators, the same way a dead letter
//! queue keeps failed events.

use crate::fast_path::FastPathCounter;
use crate::ledger::StockLedger;
use crate::seat_lock::SeatLockCoordinator;
use boxoffice_core::environment::Clock;
use boxoffice_core::providers::CompensationStore;
use boxoffice_core::{
    CompensationAction, CompensationStatus, CompensationTask, InventoryError, Operation, Result,
};
use boxoffice_runtime::RetryPolicy;
use boxoffice_runtime::metrics::{CompensationMetrics, OperationMetrics};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Write side of the compensation ledger, shared by every service that
/// runs undo actions.
#[derive(Clone)]
pub struct CompensationQueue {
    store: Arc<dyn CompensationStore>,
    clock: Arc<dyn Clock>,
}

impl CompensationQueue {
    /// Create a queue over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CompensationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Queue `action` after it failed with `error`.
    ///
    /// # Errors
    ///
    /// Returns error if the task could not be stored.
    pub async fn schedule(
        &self,
        action: CompensationAction,
        error: &InventoryError,
    ) -> Result<CompensationTask> {
        let task = CompensationTask::new(action, error.to_string(), self.clock.now());
        self.store.insert(&task).await?;

        CompensationMetrics::record(&task.action, CompensationStatus::Pending);
        tracing::warn!(
            task_id = %task.id,
            action = task.action.as_str(),
            resource = %task.resource_key,
            error = %error,
            "Undo failed; compensation scheduled"
        );
        Ok(task)
    }

    /// Run an undo step, queueing it if it fails.
    ///
    /// Returns `true` if the undo applied inline.
    pub(crate) async fn undo_or_schedule<F, Fut, T>(&self, action: CompensationAction, undo: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let Err(error) = undo().await else {
            return true;
        };

        if let Err(store_error) = self.schedule(action.clone(), &error).await {
            tracing::error!(
                action = ?action,
                error = %error,
                store_error = %store_error,
                "Undo failed and could not be queued; the auditor must repair this"
            );
        }
        false
    }
}

/// Outcome counts of one worker pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompensationRun {
    /// Tasks claimed
    pub claimed: usize,
    /// Tasks now resolved
    pub resolved: usize,
    /// Tasks rescheduled for another attempt
    pub retrying: usize,
    /// Tasks now terminal
    pub terminal: usize,
}

/// The compensation worker and its operator queries.
#[derive(Clone)]
pub struct CompensationLedger {
    queue: CompensationQueue,
    store: Arc<dyn CompensationStore>,
    ledger: StockLedger,
    fast_path: FastPathCounter,
    seats: SeatLockCoordinator,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    lease: Duration,
    batch_size: usize,
}

impl CompensationLedger {
    /// Create the worker.
    ///
    /// `policy.max_attempts()` bounds worker attempts per task, and
    /// `policy.delay_for_attempt` spaces them.
    #[must_use]
    #[allow(clippy::too_many_arguments)] // Wires every service the undo actions touch
    pub fn new(
        store: Arc<dyn CompensationStore>,
        ledger: StockLedger,
        fast_path: FastPathCounter,
        seats: SeatLockCoordinator,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        lease: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            queue: CompensationQueue::new(Arc::clone(&store), Arc::clone(&clock)),
            store,
            ledger,
            fast_path,
            seats,
            clock,
            policy,
            lease,
            batch_size,
        }
    }

    /// The write side, for services that run undo actions.
    #[must_use]
    pub const fn queue(&self) -> &CompensationQueue {
        &self.queue
    }

    /// Queue `action` after it failed with `error`.
    ///
    /// # Errors
    ///
    /// Returns error if the task could not be stored.
    pub async fn schedule(
        &self,
        action: CompensationAction,
        error: &InventoryError,
    ) -> Result<CompensationTask> {
        self.queue.schedule(action, error).await
    }

    /// Claim due tasks and attempt each once.
    ///
    /// # Errors
    ///
    /// Returns error if tasks cannot be claimed. Failures of individual
    /// tasks are recorded on the tasks themselves.
    pub async fn run_once(&self) -> Result<CompensationRun> {
        let now = self.clock.now();
        let tasks = self
            .store
            .claim_due(now, self.lease, self.batch_size)
            .await?;

        let mut run = CompensationRun {
            claimed: tasks.len(),
            ..CompensationRun::default()
        };

        for task in tasks {
            let task = self.attempt(task).await;
            match task.status {
                CompensationStatus::Resolved => run.resolved += 1,
                CompensationStatus::Pending => run.retrying += 1,
                CompensationStatus::Terminal => run.terminal += 1,
            }
            if let Err(e) = self.store.update(&task).await {
                tracing::error!(task_id = %task.id, error = %e, "Failed to record compensation attempt");
            }
        }

        if run.claimed > 0 {
            tracing::info!(
                claimed = run.claimed,
                resolved = run.resolved,
                retrying = run.retrying,
                terminal = run.terminal,
                "Compensation pass finished"
            );
        }
        Ok(run)
    }

    async fn attempt(&self, mut task: CompensationTask) -> CompensationTask {
        let started = Instant::now();
        let result = self.execute(&task.action).await;
        OperationMetrics::record(Operation::Compensate, &result, started.elapsed());

        let now = self.clock.now();
        task.attempts += 1;
        task.updated_at = now;

        match result {
            Ok(()) => {
                task.status = CompensationStatus::Resolved;
                tracing::info!(task_id = %task.id, attempts = task.attempts, "Compensation applied");
            }
            Err(e) => {
                let attempts = usize::try_from(task.attempts).unwrap_or(usize::MAX);
                task.last_error = Some(e.to_string());

                if e.is_business() || attempts >= self.policy.max_attempts() {
                    task.status = CompensationStatus::Terminal;
                    let exhausted = InventoryError::CompensationExhausted {
                        task_id: task.id,
                        attempts: task.attempts,
                        last_error: e.to_string(),
                    };
                    tracing::error!(
                        task_id = %task.id,
                        action = task.action.as_str(),
                        resource = %task.resource_key,
                        error = %exhausted,
                        "Compensation is terminal; operator action required"
                    );
                } else {
                    let delay = self.policy.delay_for_attempt(attempts - 1);
                    task.next_attempt_at = chrono::Duration::from_std(delay)
                        .ok()
                        .and_then(|d| now.checked_add_signed(d))
                        .unwrap_or(now);
                    tracing::warn!(
                        task_id = %task.id,
                        attempts = task.attempts,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Compensation failed, will retry"
                    );
                }
            }
        }

        CompensationMetrics::record(&task.action, task.status);
        task
    }

    async fn execute(&self, action: &CompensationAction) -> Result<()> {
        match action {
            CompensationAction::RollbackFastPath {
                item_id,
                quantity,
                max_units,
            } => {
                // WouldExceedMax means the units are already back; NotInitialized
                // means the next resync rebuilds the counter from the ledger.
                self.fast_path.restore(item_id, *quantity, *max_units).await?;
                Ok(())
            }
            CompensationAction::ReleaseReservation { item_id, quantity } => {
                self.ledger.release(item_id, *quantity).await?;
                Ok(())
            }
            CompensationAction::UnlockSeat {
                seat_id,
                session_id,
                owner_id,
            } => {
                self.seats
                    .unlock_seats(std::slice::from_ref(seat_id), session_id, owner_id)
                    .await
            }
        }
    }

    /// Tasks in `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    pub async fn list_by_status(
        &self,
        status: CompensationStatus,
        limit: usize,
    ) -> Result<Vec<CompensationTask>> {
        self.store.list_by_status(status, limit).await
    }

    /// A task by id.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::NotFound`] if there is no such task.
    pub async fn get(&self, id: Uuid) -> Result<CompensationTask> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| InventoryError::NotFound(format!("compensation task {id}")))
    }

    /// Number of tasks in `status`.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    pub async fn count_by_status(&self, status: CompensationStatus) -> Result<u64> {
        self.store.count_by_status(status).await
    }

    /// Close a task by hand after an operator fixed the resource.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::NotFound`] if there is no such task.
    pub async fn mark_resolved(&self, id: Uuid, resolved_by: &str) -> Result<CompensationTask> {
        let mut task = self.get(id).await?;
        task.status = CompensationStatus::Resolved;
        task.updated_at = self.clock.now();
        self.store.update(&task).await?;

        CompensationMetrics::record(&task.action, task.status);
        tracing::info!(task_id = %id, resolved_by, "Compensation task resolved by operator");
        Ok(task)
    }
}
