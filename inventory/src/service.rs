//! Service wiring and the public facade.

use crate::auditor::{AuditReport, ConsistencyAuditor};
use crate::compensation::{CompensationLedger, CompensationQueue};
use crate::config::Config;
use crate::fast_path::FastPathCounter;
use crate::ledger::StockLedger;
use crate::reservation::{ReservationCoordinator, ReservationRequest};
use crate::seat_lock::{LockRequest, SeatLockCoordinator};
use boxoffice_core::environment::Clock;
use boxoffice_core::providers::{
    CompensationStore, CounterCache, MutexProvider, OrderSink, SeatLockCache, SeatLockRepository,
    StockStore,
};
use boxoffice_core::{
    ItemId, OwnerId, ReleaseReason, Reservation, Result, SeatId, SessionId, StockRecord,
};
use std::sync::Arc;

/// External collaborators the background services need.
#[derive(Clone)]
pub struct Providers {
    /// Durable stock rows
    pub stocks: Arc<dyn StockStore>,
    /// Fast-path counters
    pub counters: Arc<dyn CounterCache>,
    /// Seat lock cache entries
    pub seat_cache: Arc<dyn SeatLockCache>,
    /// Durable seat lock rows
    pub seat_locks: Arc<dyn SeatLockRepository>,
    /// Compensation task queue
    pub compensations: Arc<dyn CompensationStore>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// The inventory services, built once per process.
#[derive(Clone)]
pub struct InventoryServices {
    /// Stock ledger
    pub ledger: StockLedger,
    /// Fast-path counter
    pub fast_path: FastPathCounter,
    /// Seat lock coordinator
    pub seats: SeatLockCoordinator,
    /// Consistency auditor
    pub auditor: ConsistencyAuditor,
    /// Compensation ledger
    pub compensation: CompensationLedger,
}

impl InventoryServices {
    /// Wire the services over `providers`.
    #[must_use]
    pub fn new(providers: &Providers, config: &Config) -> Self {
        let ledger = StockLedger::new(Arc::clone(&providers.stocks), config.ledger.cas_policy());
        let fast_path = FastPathCounter::new(Arc::clone(&providers.counters), ledger.clone());
        let queue = CompensationQueue::new(
            Arc::clone(&providers.compensations),
            Arc::clone(&providers.clock),
        );
        let seats = SeatLockCoordinator::new(
            Arc::clone(&providers.seat_cache),
            Arc::clone(&providers.seat_locks),
            Arc::clone(&providers.clock),
            queue,
            config.seat_locks.lock_ttl,
            config.seat_locks.cache_ttl,
        );
        let auditor = ConsistencyAuditor::new(
            ledger.clone(),
            fast_path.clone(),
            Arc::clone(&providers.seat_cache),
            Arc::clone(&providers.seat_locks),
            Arc::clone(&providers.compensations),
            Arc::clone(&providers.clock),
            config.seat_locks.cache_ttl,
        );
        let compensation = CompensationLedger::new(
            Arc::clone(&providers.compensations),
            ledger.clone(),
            fast_path.clone(),
            seats.clone(),
            Arc::clone(&providers.clock),
            config.compensation.retry_policy(),
            config.compensation.lease,
            config.compensation.batch_size,
        );

        Self {
            ledger,
            fast_path,
            seats,
            auditor,
            compensation,
        }
    }
}

/// Entry point for the order and ticket services.
#[derive(Clone)]
pub struct InventoryCore {
    services: InventoryServices,
    reservations: ReservationCoordinator,
}

impl InventoryCore {
    /// Build the facade. `mutex` and `orders` are only needed on the
    /// request path, so the background worker does without them.
    #[must_use]
    pub fn new(
        services: InventoryServices,
        mutex: Arc<dyn MutexProvider>,
        orders: Arc<dyn OrderSink>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let reservations = ReservationCoordinator::new(
            mutex,
            services.fast_path.clone(),
            services.ledger.clone(),
            services.seats.clone(),
            orders,
            services.compensation.queue().clone(),
            clock,
            config.mutex.clone(),
        );
        Self {
            services,
            reservations,
        }
    }

    /// The underlying services.
    #[must_use]
    pub const fn services(&self) -> &InventoryServices {
        &self.services
    }

    /// Create the stock record for `item_id` and seed its counter.
    ///
    /// Repeat calls leave the existing record untouched.
    ///
    /// # Errors
    ///
    /// Returns error if the ledger is unreachable. A counter that cannot be
    /// seeded is logged; the first reservation rebuilds it.
    pub async fn initialize_stock(&self, item_id: &ItemId, total_units: u32) -> Result<StockRecord> {
        let record = self.services.ledger.initialize(item_id, total_units).await?;
        if let Err(e) = self.services.fast_path.resync_from_ledger(item_id).await {
            tracing::warn!(item_id = %item_id, error = %e, "Counter not seeded after initialization");
        }
        Ok(record)
    }

    /// Run the reservation saga.
    ///
    /// # Errors
    ///
    /// See [`ReservationCoordinator::reserve`].
    pub async fn reserve(&self, request: &ReservationRequest) -> Result<Reservation> {
        self.reservations.reserve(request).await
    }

    /// Move `quantity` locked units of `item_id` to sold.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidState`](boxoffice_core::InventoryError::InvalidState)
    /// if fewer units are locked.
    pub async fn commit(&self, item_id: &ItemId, quantity: u32) -> Result<()> {
        self.services.ledger.commit(item_id, quantity).await?;
        Ok(())
    }

    /// Return `quantity` locked units of `item_id` to sale.
    ///
    /// Transient ledger failures are queued on the compensation ledger.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidState`](boxoffice_core::InventoryError::InvalidState)
    /// if fewer units are locked.
    pub async fn release(&self, item_id: &ItemId, quantity: u32) -> Result<()> {
        self.reservations.give_back(item_id, quantity).await
    }

    /// Lock seats, all or nothing.
    ///
    /// # Errors
    ///
    /// See [`SeatLockCoordinator::lock_seats`].
    pub async fn lock_seats(&self, request: &LockRequest) -> Result<Vec<SeatId>> {
        self.services.seats.lock_seats(request).await
    }

    /// Release seats held by `owner_id`.
    ///
    /// # Errors
    ///
    /// See [`SeatLockCoordinator::unlock_seats`].
    pub async fn unlock_seats(
        &self,
        seats: &[SeatId],
        session_id: &SessionId,
        owner_id: &OwnerId,
    ) -> Result<()> {
        self.services
            .seats
            .unlock_seats(seats, session_id, owner_id)
            .await
    }

    /// Confirm seats held by `owner_id`.
    ///
    /// # Errors
    ///
    /// See [`SeatLockCoordinator::confirm_seats`].
    pub async fn confirm_seats(
        &self,
        seats: &[SeatId],
        session_id: &SessionId,
        owner_id: &OwnerId,
    ) -> Result<()> {
        self.services
            .seats
            .confirm_seats(seats, session_id, owner_id)
            .await
    }

    /// Run a full audit now.
    ///
    /// # Errors
    ///
    /// See [`ConsistencyAuditor::audit_now`].
    pub async fn audit_now(&self) -> Result<AuditReport> {
        self.services.auditor.audit_now().await
    }

    /// Confirm a paid reservation.
    ///
    /// # Errors
    ///
    /// See [`ReservationCoordinator::confirm`].
    pub async fn confirm_reservation(&self, reservation: &Reservation) -> Result<()> {
        self.reservations.confirm(reservation).await
    }

    /// Give a reservation back.
    ///
    /// # Errors
    ///
    /// See [`ReservationCoordinator::cancel`].
    pub async fn cancel_reservation(
        &self,
        reservation: &Reservation,
        reason: ReleaseReason,
    ) -> Result<()> {
        self.reservations.cancel(reservation, reason).await
    }
}
