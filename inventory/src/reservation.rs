//! Order-creation saga.
//!
//! ```text
//! mutex ─► prededuct ─► ledger reserve ─► lock seats ─► persist order
//!             │               │                │              │
//!             ▼               ▼                ▼              ▼
//!          (none)      restore counter   release ledger   unlock seats
//!                                        restore counter  release ledger
//!                                                         restore counter
//! ```
//!
//! Each step that fails runs the undo actions of the steps before it, newest
//! first. An undo that fails is queued on the compensation ledger. The
//! caller sees success only after the order is persisted.

use crate::compensation::CompensationQueue;
use crate::config::MutexConfig;
use crate::fast_path::FastPathCounter;
use crate::ledger::StockLedger;
use crate::seat_lock::{LockRequest, LockedSeats, SeatLockCoordinator};
use boxoffice_core::environment::Clock;
use boxoffice_core::providers::{MutexProvider, OrderSink, PredeductOutcome};
use boxoffice_core::{
    CompensationAction, InventoryError, ItemId, LockKind, Operation, OwnerId, ReleaseReason,
    Reservation, Result, SeatId, SessionId, VenueId,
};
use boxoffice_runtime::metrics::{OperationMetrics, ReservationMetrics};
use boxoffice_runtime::retry_with_predicate;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Seats to hold alongside a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatSelection {
    /// Session the seats belong to
    pub session_id: SessionId,
    /// Venue the session runs in
    pub venue_id: VenueId,
    /// Seats to lock
    pub seat_ids: Vec<SeatId>,
    /// Lock lifetime; the configured default when `None`
    pub ttl: Option<Duration>,
}

/// Input to [`ReservationCoordinator::reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    /// Requesting user
    pub owner_id: OwnerId,
    /// Item to reserve
    pub item_id: ItemId,
    /// Units to reserve
    pub quantity: u32,
    /// Optional seats
    pub seats: Option<SeatSelection>,
}

impl ReservationRequest {
    /// Reserve `quantity` units of `item_id` without seats.
    #[must_use]
    pub const fn new(owner_id: OwnerId, item_id: ItemId, quantity: u32) -> Self {
        Self {
            owner_id,
            item_id,
            quantity,
            seats: None,
        }
    }

    /// Also lock `seats`.
    #[must_use]
    pub fn with_seats(mut self, seats: SeatSelection) -> Self {
        self.seats = Some(seats);
        self
    }
}

/// Runs the reservation saga and its confirm/cancel counterparts.
#[derive(Clone)]
pub struct ReservationCoordinator {
    mutex: Arc<dyn MutexProvider>,
    fast_path: FastPathCounter,
    ledger: StockLedger,
    seats: SeatLockCoordinator,
    orders: Arc<dyn OrderSink>,
    compensation: CompensationQueue,
    clock: Arc<dyn Clock>,
    config: MutexConfig,
}

impl ReservationCoordinator {
    /// Create a coordinator.
    #[must_use]
    #[allow(clippy::too_many_arguments)] // One argument per saga participant
    pub fn new(
        mutex: Arc<dyn MutexProvider>,
        fast_path: FastPathCounter,
        ledger: StockLedger,
        seats: SeatLockCoordinator,
        orders: Arc<dyn OrderSink>,
        compensation: CompensationQueue,
        clock: Arc<dyn Clock>,
        config: MutexConfig,
    ) -> Self {
        Self {
            mutex,
            fast_path,
            ledger,
            seats,
            orders,
            compensation,
            clock,
            config,
        }
    }

    /// Reserve stock (and optionally seats) and persist the order.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::Busy`]: another request from the same owner holds the mutex
    /// - [`InventoryError::OutOfStock`]: not enough units
    /// - [`InventoryError::Conflict`]: the ledger stayed contended, or the counter
    ///   could not be initialized
    /// - [`InventoryError::LockFailed`]: a seat is held by someone else
    /// - any error from the order sink
    pub async fn reserve(&self, request: &ReservationRequest) -> Result<Reservation> {
        let started = Instant::now();
        let result = self.reserve_inner(request).await;
        OperationMetrics::record(Operation::CreateReservation, &result, started.elapsed());
        result
    }

    async fn reserve_inner(&self, request: &ReservationRequest) -> Result<Reservation> {
        if request.quantity == 0 {
            return Err(InventoryError::InvalidState(
                "reservation of zero units".into(),
            ));
        }

        let key = self
            .config
            .granularity
            .key(&request.owner_id, &request.item_id);
        let token = Uuid::new_v4().to_string();
        self.acquire_mutex(&key, &token).await?;

        let result = self.run_saga(request).await;

        self.release_mutex(&key, &token).await;
        result
    }

    async fn acquire_mutex(&self, key: &str, token: &str) -> Result<()> {
        let started = Instant::now();
        let lease = self.config.lease;
        let attempt = move || async move {
            if self.mutex.try_acquire(key, token, lease).await? {
                Ok(())
            } else {
                Err(InventoryError::Busy(key.to_string()))
            }
        };
        let retryable =
            |e: &InventoryError| matches!(e, InventoryError::Busy(_)) || e.is_transient();

        let acquired = tokio::time::timeout(
            self.config.wait,
            retry_with_predicate(
                &self.config.acquire_policy(),
                Operation::AcquireMutex,
                attempt,
                retryable,
            ),
        )
        .await;

        let result = match acquired {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::debug!(key, error = %e, "Mutex not acquired");
                Err(InventoryError::Busy(key.to_string()))
            }
            Err(_) => {
                tracing::debug!(key, wait_ms = self.config.wait.as_millis(), "Mutex wait timed out");
                // An attempt cut off by the timeout may still have landed.
                self.release_mutex(key, token).await;
                Err(InventoryError::Busy(key.to_string()))
            }
        };
        OperationMetrics::record(Operation::AcquireMutex, &result, started.elapsed());
        result
    }

    async fn release_mutex(&self, key: &str, token: &str) {
        match self.mutex.release(key, token).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(key, "Mutex was no longer held at release"),
            Err(e) => tracing::warn!(key, error = %e, "Mutex release failed; lease will expire"),
        }
    }

    async fn run_saga(&self, request: &ReservationRequest) -> Result<Reservation> {
        let item_id = &request.item_id;
        let quantity = request.quantity;

        match self.fast_path.prededuct(item_id, quantity).await? {
            PredeductOutcome::Admitted { .. } => {}
            PredeductOutcome::Insufficient { available } => {
                tracing::debug!(item_id = %item_id, quantity, available, "Rejected by fast path");
                return Err(InventoryError::OutOfStock(item_id.clone()));
            }
            PredeductOutcome::NotInitialized => {
                return Err(InventoryError::Conflict(format!(
                    "fast-path counter for {item_id} could not be initialized"
                )));
            }
        }

        if let Err(e) = self.ledger.reserve(item_id, quantity).await {
            self.undo_fast_path(item_id, quantity).await;
            return Err(match e {
                InventoryError::InsufficientStock { .. } => {
                    InventoryError::OutOfStock(item_id.clone())
                }
                other => other,
            });
        }

        let locked = match &request.seats {
            Some(selection) => {
                let lock = LockRequest {
                    seats: selection.seat_ids.clone(),
                    session_id: selection.session_id.clone(),
                    venue_id: selection.venue_id.clone(),
                    owner_id: request.owner_id.clone(),
                    lock_kind: LockKind::Order,
                    ttl: selection.ttl,
                };
                match self.seats.lock_seats_tracked(&lock).await {
                    Ok(locked) => locked,
                    Err(e) => {
                        self.undo_ledger(item_id, quantity).await;
                        self.undo_fast_path(item_id, quantity).await;
                        return Err(e);
                    }
                }
            }
            None => LockedSeats::default(),
        };

        let mut reservation = Reservation {
            id: Uuid::new_v4(),
            owner_id: request.owner_id.clone(),
            item_id: item_id.clone(),
            quantity,
            seats: locked.seats,
            session_id: request.seats.as_ref().map(|s| s.session_id.clone()),
            venue_id: request.seats.as_ref().map(|s| s.venue_id.clone()),
            order_ref: None,
            created_at: self.clock.now(),
        };

        let started = Instant::now();
        let persisted = self.orders.persist(&reservation).await;
        OperationMetrics::record(Operation::PersistOrder, &persisted, started.elapsed());

        match persisted {
            Ok(order_ref) => reservation.order_ref = Some(order_ref),
            Err(e) => {
                self.undo_seats(&reservation, &locked.acquired).await;
                self.undo_ledger(item_id, quantity).await;
                self.undo_fast_path(item_id, quantity).await;
                return Err(e);
            }
        }

        tracing::info!(
            reservation_id = %reservation.id,
            owner_id = %reservation.owner_id,
            item_id = %item_id,
            quantity,
            seats = reservation.seats.len(),
            "Reservation created"
        );
        Ok(reservation)
    }

    async fn undo_fast_path(&self, item_id: &ItemId, quantity: u32) {
        let action = CompensationAction::RollbackFastPath {
            item_id: item_id.clone(),
            quantity,
            max_units: None,
        };
        self.compensation
            .undo_or_schedule(action, || self.fast_path.restore(item_id, quantity, None))
            .await;
    }

    async fn undo_ledger(&self, item_id: &ItemId, quantity: u32) {
        let action = CompensationAction::ReleaseReservation {
            item_id: item_id.clone(),
            quantity,
        };
        self.compensation
            .undo_or_schedule(action, || self.ledger.release(item_id, quantity))
            .await;
    }

    /// Unlock the seats the saga took. Seats the owner held before the
    /// request are left locked.
    async fn undo_seats(&self, reservation: &Reservation, acquired: &[SeatId]) {
        let Some(session_id) = &reservation.session_id else {
            return;
        };
        for seat_id in acquired {
            let action = CompensationAction::UnlockSeat {
                seat_id: seat_id.clone(),
                session_id: session_id.clone(),
                owner_id: reservation.owner_id.clone(),
            };
            self.compensation
                .undo_or_schedule(action, || {
                    self.seats.unlock_seats(
                        std::slice::from_ref(seat_id),
                        session_id,
                        &reservation.owner_id,
                    )
                })
                .await;
        }
    }

    /// Confirm a paid reservation: seats become `Confirmed`, units become sold.
    ///
    /// Safe to repeat after a failure; seats already confirmed by the owner
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidState`] if the seats are no longer
    /// held by the owner or the units are no longer locked.
    pub async fn confirm(&self, reservation: &Reservation) -> Result<()> {
        let started = Instant::now();
        let result = self.confirm_inner(reservation).await;
        OperationMetrics::record(Operation::ConfirmReservation, &result, started.elapsed());
        result
    }

    async fn confirm_inner(&self, reservation: &Reservation) -> Result<()> {
        if !reservation.seats.is_empty() {
            let session_id = reservation.session_id.as_ref().ok_or_else(|| {
                InventoryError::InvalidState(format!(
                    "reservation {} has seats but no session",
                    reservation.id
                ))
            })?;
            self.seats
                .confirm_seats(&reservation.seats, session_id, &reservation.owner_id)
                .await?;
        }
        self.ledger
            .commit(&reservation.item_id, reservation.quantity)
            .await?;

        tracing::info!(reservation_id = %reservation.id, "Reservation confirmed");
        Ok(())
    }

    /// Give a reservation back: ledger release, counter restore, seat unlock.
    ///
    /// Transient failures of any step are queued on the compensation ledger
    /// and the call still succeeds. The seats are unlocked either way.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidState`] if the units are no longer
    /// locked on the ledger, or the ledger error if its release could not be
    /// queued.
    pub async fn cancel(&self, reservation: &Reservation, reason: ReleaseReason) -> Result<()> {
        let started = Instant::now();
        let result = self.cancel_inner(reservation, reason).await;
        OperationMetrics::record(Operation::CancelReservation, &result, started.elapsed());
        result
    }

    async fn cancel_inner(&self, reservation: &Reservation, reason: ReleaseReason) -> Result<()> {
        self.give_back(&reservation.item_id, reservation.quantity)
            .await?;

        if let Some(session_id) = &reservation.session_id {
            for seat_id in &reservation.seats {
                self.cancel_seat(seat_id, session_id, &reservation.owner_id)
                    .await;
            }
        }

        ReservationMetrics::record_release(reason);
        tracing::info!(
            reservation_id = %reservation.id,
            reason = reason.as_str(),
            "Reservation released"
        );
        Ok(())
    }

    async fn cancel_seat(&self, seat_id: &SeatId, session_id: &SessionId, owner_id: &OwnerId) {
        let seats = std::slice::from_ref(seat_id);
        match self.seats.unlock_seats(seats, session_id, owner_id).await {
            Ok(()) => {}
            Err(e) if e.is_business() => {
                tracing::warn!(
                    seat_id = %seat_id,
                    owner_id = %owner_id,
                    error = %e,
                    "Seat no longer held by the reservation owner"
                );
            }
            Err(e) => {
                let action = CompensationAction::UnlockSeat {
                    seat_id: seat_id.clone(),
                    session_id: session_id.clone(),
                    owner_id: owner_id.clone(),
                };
                if let Err(store_error) = self.compensation.schedule(action, &e).await {
                    tracing::error!(seat_id = %seat_id, error = %store_error, "Could not queue seat unlock");
                }
            }
        }
    }

    /// Return `quantity` locked units of `item_id` to sale.
    ///
    /// A transient ledger failure queues both the ledger release and the
    /// counter restore, and the call succeeds. A failed counter restore
    /// alone is queued too.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidState`] if fewer units are locked,
    /// or the ledger error if it was not transient or could not be queued.
    pub async fn give_back(&self, item_id: &ItemId, quantity: u32) -> Result<()> {
        match self.ledger.release(item_id, quantity).await {
            Ok(_) => {
                self.undo_fast_path(item_id, quantity).await;
                Ok(())
            }
            Err(e) if e.is_transient() => self.queue_give_back(item_id, quantity, &e).await,
            Err(e) => Err(e),
        }
    }

    async fn queue_give_back(
        &self,
        item_id: &ItemId,
        quantity: u32,
        error: &InventoryError,
    ) -> Result<()> {
        let release = CompensationAction::ReleaseReservation {
            item_id: item_id.clone(),
            quantity,
        };
        if let Err(store_error) = self.compensation.schedule(release, error).await {
            tracing::error!(
                item_id = %item_id,
                quantity,
                error = %error,
                store_error = %store_error,
                "Ledger release failed and could not be queued"
            );
            return Err(error.clone());
        }

        let restore = CompensationAction::RollbackFastPath {
            item_id: item_id.clone(),
            quantity,
            max_units: None,
        };
        if let Err(store_error) = self.compensation.schedule(restore, error).await {
            tracing::error!(
                item_id = %item_id,
                quantity,
                store_error = %store_error,
                "Counter restore could not be queued; the auditor must repair it"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::service::{InventoryServices, Providers};
    use boxoffice_core::{CompensationStatus, SeatLockState};
    use boxoffice_core::providers::SeatLockRepository;
    use boxoffice_testing::{
        InMemoryCompensationStore, InMemoryCounterCache, InMemoryMutex, InMemorySeatLockCache,
        InMemorySeatLockRepository, InMemoryStockStore, RecordingOrderSink, test_clock,
    };

    struct Fixture {
        coordinator: ReservationCoordinator,
        services: InventoryServices,
        stocks: Arc<InMemoryStockStore>,
        counters: Arc<InMemoryCounterCache>,
        seat_repo: Arc<InMemorySeatLockRepository>,
        tasks: Arc<InMemoryCompensationStore>,
        mutex: Arc<InMemoryMutex>,
        orders: Arc<RecordingOrderSink>,
    }

    async fn fixture(total: u32) -> Fixture {
        let mut config = Config::default();
        config.ledger.cas_backoff = Duration::from_millis(1);
        config.mutex.backoff = Duration::from_millis(1);
        config.mutex.wait = Duration::from_millis(50);

        let clock: Arc<dyn Clock> = Arc::new(test_clock());
        let stocks = Arc::new(InMemoryStockStore::new());
        let counters = Arc::new(InMemoryCounterCache::with_clock(
            Arc::clone(&clock),
            config.fast_path.ttl,
        ));
        let seat_repo = Arc::new(InMemorySeatLockRepository::new());
        let tasks = Arc::new(InMemoryCompensationStore::new());
        let providers = Providers {
            stocks: stocks.clone(),
            counters: counters.clone(),
            seat_cache: Arc::new(InMemorySeatLockCache::with_clock(Arc::clone(&clock))),
            seat_locks: seat_repo.clone(),
            compensations: tasks.clone(),
            clock: Arc::clone(&clock),
        };
        let services = InventoryServices::new(&providers, &config);
        services.ledger.initialize(&ItemId::new("T1"), total).await.unwrap();

        let mutex = Arc::new(InMemoryMutex::with_clock(Arc::clone(&clock)));
        let orders = Arc::new(RecordingOrderSink::new());
        let coordinator = ReservationCoordinator::new(
            mutex.clone(),
            services.fast_path.clone(),
            services.ledger.clone(),
            services.seats.clone(),
            orders.clone(),
            services.compensation.queue().clone(),
            clock,
            config.mutex.clone(),
        );
        Fixture {
            coordinator,
            services,
            stocks,
            counters,
            seat_repo,
            tasks,
            mutex,
            orders,
        }
    }

    fn request(quantity: u32) -> ReservationRequest {
        ReservationRequest::new(OwnerId::new("U1"), ItemId::new("T1"), quantity)
    }

    fn with_seats(request: ReservationRequest, seats: &[&str]) -> ReservationRequest {
        request.with_seats(SeatSelection {
            session_id: SessionId::new("V1"),
            venue_id: VenueId::new("hall"),
            seat_ids: seats.iter().map(|s| SeatId::new(*s)).collect(),
            ttl: None,
        })
    }

    fn item() -> ItemId {
        ItemId::new("T1")
    }

    #[tokio::test]
    async fn reserve_moves_counter_ledger_and_seats() {
        let f = fixture(5).await;

        let reservation = f
            .coordinator
            .reserve(&with_seats(request(2), &["S1", "S2"]))
            .await
            .unwrap();

        assert_eq!(reservation.order_ref.as_deref(), Some("order-1"));
        assert_eq!(reservation.seats.len(), 2);
        assert_eq!(f.counters.value(&item()), Some(3));
        assert_eq!(f.stocks.record(&item()).unwrap().locked_units, 2);
        assert_eq!(f.orders.orders().len(), 1);
        assert!(!f.mutex.is_held("order:lock:create:U1:T1"));
    }

    #[tokio::test]
    async fn insufficient_counter_is_out_of_stock() {
        let f = fixture(1).await;
        let err = f.coordinator.reserve(&request(2)).await.unwrap_err();
        assert_eq!(err, InventoryError::OutOfStock(item()));
        assert_eq!(f.stocks.record(&item()).unwrap().locked_units, 0);
    }

    #[tokio::test]
    async fn ledger_shortfall_restores_counter() {
        let f = fixture(5).await;
        f.services.ledger.reserve(&item(), 4).await.unwrap();
        f.counters.put(&item(), 5);

        let err = f.coordinator.reserve(&request(3)).await.unwrap_err();
        assert_eq!(err, InventoryError::OutOfStock(item()));
        assert_eq!(f.counters.value(&item()), Some(5));
    }

    #[tokio::test]
    async fn held_mutex_fails_fast_with_busy() {
        let f = fixture(5).await;
        f.mutex
            .try_acquire("order:lock:create:U1:T1", "other", Duration::from_secs(30))
            .await
            .unwrap();

        let err = f.coordinator.reserve(&request(1)).await.unwrap_err();
        assert!(matches!(err, InventoryError::Busy(_)));
        assert_eq!(f.counters.value(&item()), None);
    }

    #[tokio::test]
    async fn seat_failure_undoes_ledger_and_counter() {
        let f = fixture(5).await;
        f.services
            .seats
            .lock_seats(&LockRequest::new(
                vec![SeatId::new("S2")],
                SessionId::new("V1"),
                VenueId::new("hall"),
                OwnerId::new("U9"),
            ))
            .await
            .unwrap();

        let err = f
            .coordinator
            .reserve(&with_seats(request(2), &["S1", "S2"]))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::LockFailed { .. }));

        assert_eq!(f.stocks.record(&item()).unwrap().locked_units, 0);
        assert_eq!(f.counters.value(&item()), Some(5));
        assert!(f.tasks.all().is_empty());
    }

    #[tokio::test]
    async fn order_failure_undoes_every_step() {
        let f = fixture(5).await;
        f.orders.faults().fail_next(Operation::PersistOrder, 1);

        let err = f
            .coordinator
            .reserve(&with_seats(request(1), &["S1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::Database(_)));

        assert_eq!(f.stocks.record(&item()).unwrap().locked_units, 0);
        assert_eq!(f.counters.value(&item()), Some(5));
        let history = f.seat_repo.history(&SeatId::new("S1"), &SessionId::new("V1"));
        assert_eq!(history[0].state, SeatLockState::Released);
    }

    #[tokio::test]
    async fn order_failure_keeps_seats_held_before_the_request() {
        let f = fixture(5).await;
        f.services
            .seats
            .lock_seats(&LockRequest::new(
                vec![SeatId::new("S1")],
                SessionId::new("V1"),
                VenueId::new("hall"),
                OwnerId::new("U1"),
            ))
            .await
            .unwrap();
        f.orders.faults().fail_next(Operation::PersistOrder, 1);

        f.coordinator
            .reserve(&with_seats(request(1), &["S1", "S2"]))
            .await
            .unwrap_err();

        let held = f
            .seat_repo
            .find_active(&SeatId::new("S1"), &SessionId::new("V1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(held.owner_id, OwnerId::new("U1"));
        assert!(f
            .seat_repo
            .find_active(&SeatId::new("S2"), &SessionId::new("V1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn cancel_queues_transient_ledger_failure_and_unlocks_seats() {
        let f = fixture(5).await;
        let reservation = f
            .coordinator
            .reserve(&with_seats(request(2), &["S1"]))
            .await
            .unwrap();
        f.stocks.faults().fail_always(Operation::Release);

        f.coordinator
            .cancel(&reservation, ReleaseReason::Timeout)
            .await
            .unwrap();

        let actions: Vec<_> = f.tasks.all().into_iter().map(|t| t.action).collect();
        assert_eq!(
            actions,
            vec![
                CompensationAction::ReleaseReservation {
                    item_id: item(),
                    quantity: 2
                },
                CompensationAction::RollbackFastPath {
                    item_id: item(),
                    quantity: 2,
                    max_units: None
                },
            ]
        );
        assert!(f
            .seat_repo
            .find_active(&SeatId::new("S1"), &SessionId::new("V1"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(f.counters.value(&item()), Some(3));

        f.stocks.faults().clear(Operation::Release);
        let run = f.services.compensation.run_once().await.unwrap();
        assert_eq!(run.resolved, 2);
        assert_eq!(f.stocks.record(&item()).unwrap().locked_units, 0);
        assert_eq!(f.counters.value(&item()), Some(5));
    }

    #[tokio::test]
    async fn cancel_of_released_units_is_invalid() {
        let f = fixture(5).await;
        let reservation = f.coordinator.reserve(&request(1)).await.unwrap();
        f.coordinator
            .cancel(&reservation, ReleaseReason::Cancelled)
            .await
            .unwrap();

        let err = f
            .coordinator
            .cancel(&reservation, ReleaseReason::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::InvalidState(_)));
        assert!(f.tasks.all().is_empty());
    }

    #[tokio::test]
    async fn failed_ledger_undo_is_queued() {
        let f = fixture(5).await;
        f.orders.faults().fail_next(Operation::PersistOrder, 1);
        f.stocks.faults().fail_always(Operation::Release);

        f.coordinator.reserve(&request(1)).await.unwrap_err();

        let tasks = f.tasks.all();
        assert_eq!(tasks.len(), 1);
        assert_eq!(
            tasks[0].action,
            CompensationAction::ReleaseReservation {
                item_id: item(),
                quantity: 1
            }
        );
        assert_eq!(tasks[0].status, CompensationStatus::Pending);
    }

    #[tokio::test]
    async fn confirm_commits_and_cancel_releases() {
        let f = fixture(5).await;
        let kept = f
            .coordinator
            .reserve(&with_seats(request(2), &["S1", "S2"]))
            .await
            .unwrap();
        let dropped = f
            .coordinator
            .reserve(&with_seats(request(1), &["S3"]))
            .await
            .unwrap();

        f.coordinator.confirm(&kept).await.unwrap();
        f.coordinator
            .cancel(&dropped, ReleaseReason::PaymentFailed)
            .await
            .unwrap();

        let record = f.stocks.record(&item()).unwrap();
        assert_eq!(record.sold_units, 2);
        assert_eq!(record.locked_units, 0);
        assert_eq!(f.counters.value(&item()), Some(3));

        let confirmed = f
            .seat_repo
            .find_active(&SeatId::new("S1"), &SessionId::new("V1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(confirmed.state, SeatLockState::Confirmed);
        assert!(f
            .seat_repo
            .find_active(&SeatId::new("S3"), &SessionId::new("V1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected() {
        let f = fixture(5).await;
        let err = f.coordinator.reserve(&request(0)).await.unwrap_err();
        assert!(matches!(err, InventoryError::InvalidState(_)));
    }
}
