//! Seat lock coordinator.
//!
//! Per (seat, session): `Unlocked -> Locking -> {Confirmed | Released}`, and
//! `Released -> Locking` is the only way back in.
//!
//! Locking takes the cache entry first as the admission check, then writes
//! the durable row. The durable row is the source of truth; the cache entry
//! is rebuilt from it by the auditor whenever the two disagree.

use crate::compensation::CompensationQueue;
use boxoffice_core::environment::Clock;
use boxoffice_core::providers::{
    CacheAcquire, CacheRelease, LockWrite, SeatLockCache, SeatLockRepository,
};
use boxoffice_core::{
    CompensationAction, InventoryError, LockKind, Operation, OwnerId, Result, SeatId,
    SeatLockCacheEntry, SeatLockRecord, SeatLockState, SessionId, VenueId,
};
use boxoffice_runtime::metrics::{OperationMetrics, SeatLockMetrics};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A request to lock one or more seats of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    /// Seats to lock, in order
    pub seats: Vec<SeatId>,
    /// Session (performance) the seats belong to
    pub session_id: SessionId,
    /// Venue the session runs in
    pub venue_id: VenueId,
    /// Requesting owner
    pub owner_id: OwnerId,
    /// Why the seats are held
    pub lock_kind: LockKind,
    /// Lock lifetime; the configured default when `None`
    pub ttl: Option<Duration>,
}

impl LockRequest {
    /// A selection lock with the default TTL.
    #[must_use]
    pub fn new(
        seats: Vec<SeatId>,
        session_id: SessionId,
        venue_id: VenueId,
        owner_id: OwnerId,
    ) -> Self {
        Self {
            seats,
            session_id,
            venue_id,
            owner_id,
            lock_kind: LockKind::Selection,
            ttl: None,
        }
    }

    /// Set the lock kind.
    #[must_use]
    pub const fn with_kind(mut self, lock_kind: LockKind) -> Self {
        self.lock_kind = lock_kind;
        self
    }

    /// Set the lock lifetime.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Seats held after a successful [`SeatLockCoordinator::lock_seats_tracked`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockedSeats {
    /// Every requested seat, deduplicated, in request order
    pub seats: Vec<SeatId>,
    /// Seats this call took; the rest were already held by the owner
    pub acquired: Vec<SeatId>,
}

/// Result of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired rows moved to `Released`
    pub released: usize,
    /// `Locking` rows with no cache entry, to be reconciled
    pub drifted: Vec<(SeatId, SessionId)>,
}

/// Dual-written seat locks.
#[derive(Clone)]
pub struct SeatLockCoordinator {
    cache: Arc<dyn SeatLockCache>,
    repo: Arc<dyn SeatLockRepository>,
    clock: Arc<dyn Clock>,
    compensation: CompensationQueue,
    lock_ttl: Duration,
    cache_ttl: Duration,
}

impl SeatLockCoordinator {
    /// Create a coordinator.
    ///
    /// `lock_ttl` is the default durable lock lifetime. Cache entries live
    /// for at most `cache_ttl`.
    #[must_use]
    pub fn new(
        cache: Arc<dyn SeatLockCache>,
        repo: Arc<dyn SeatLockRepository>,
        clock: Arc<dyn Clock>,
        compensation: CompensationQueue,
        lock_ttl: Duration,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            repo,
            clock,
            compensation,
            lock_ttl,
            cache_ttl,
        }
    }

    /// Lock every seat in `request`, or none of them.
    ///
    /// Seats are locked in order. If one fails, the seats newly taken by
    /// this call are released before returning. Seats the owner already
    /// held keep their lock.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::LockFailed`] naming the first seat that
    /// could not be locked, or [`InventoryError::InvalidState`] for an empty
    /// request.
    pub async fn lock_seats(&self, request: &LockRequest) -> Result<Vec<SeatId>> {
        self.lock_seats_tracked(request)
            .await
            .map(|locked| locked.seats)
    }

    /// Like [`lock_seats`](Self::lock_seats), also reporting which seats
    /// were newly taken.
    ///
    /// # Errors
    ///
    /// See [`lock_seats`](Self::lock_seats).
    pub async fn lock_seats_tracked(&self, request: &LockRequest) -> Result<LockedSeats> {
        let started = Instant::now();
        let result = self.lock_seats_inner(request).await;
        OperationMetrics::record(Operation::LockSeat, &result, started.elapsed());
        result
    }

    async fn lock_seats_inner(&self, request: &LockRequest) -> Result<LockedSeats> {
        if request.seats.is_empty() {
            return Err(InventoryError::InvalidState("no seats requested".into()));
        }
        let ttl = request.ttl.unwrap_or(self.lock_ttl);
        let expires_in = chrono::Duration::from_std(ttl)
            .map_err(|e| InventoryError::InvalidState(format!("lock ttl out of range: {e}")))?;

        let mut locked = LockedSeats::default();
        for seat_id in &request.seats {
            if locked.seats.contains(seat_id) {
                continue;
            }
            match self.lock_one(seat_id, request, ttl, expires_in).await {
                Ok(true) => locked.acquired.push(seat_id.clone()),
                Ok(false) => {}
                Err(e) => {
                    tracing::info!(
                        seat_id = %seat_id,
                        session_id = %request.session_id,
                        owner_id = %request.owner_id,
                        rollback = locked.acquired.len(),
                        error = %e,
                        "Seat lock failed, releasing batch"
                    );
                    for seat in &locked.acquired {
                        self.undo_lock(seat, &request.session_id, &request.owner_id)
                            .await;
                    }
                    return Err(e);
                }
            }
            locked.seats.push(seat_id.clone());
        }

        tracing::debug!(
            seats = locked.seats.len(),
            acquired = locked.acquired.len(),
            session_id = %request.session_id,
            owner_id = %request.owner_id,
            ttl_secs = ttl.as_secs(),
            "Seats locked"
        );
        Ok(locked)
    }

    /// Returns `true` if the durable row was created by this call, `false`
    /// if the owner already held it and it was only refreshed.
    async fn lock_one(
        &self,
        seat_id: &SeatId,
        request: &LockRequest,
        ttl: Duration,
        expires_in: chrono::Duration,
    ) -> Result<bool> {
        let now = self.clock.now();
        let failed = |reason: String| InventoryError::LockFailed {
            seat_id: seat_id.clone(),
            reason,
        };

        let entry = SeatLockCacheEntry::new(request.owner_id.clone(), now);
        let cached = match self
            .cache
            .try_acquire(seat_id, &entry, ttl.min(self.cache_ttl))
            .await
        {
            Ok(CacheAcquire::HeldByOther) => return Err(failed("held by another owner".into())),
            Ok(cached) => cached,
            Err(e) => return Err(failed(e.to_string())),
        };

        let record = SeatLockRecord {
            seat_id: seat_id.clone(),
            session_id: request.session_id.clone(),
            venue_id: request.venue_id.clone(),
            owner_id: request.owner_id.clone(),
            lock_kind: request.lock_kind,
            acquired_at: now,
            expires_at: now + expires_in,
            state: SeatLockState::Locking,
        };

        let reason = match self.repo.acquire(&record).await {
            Ok(LockWrite::Acquired) => return Ok(true),
            Ok(LockWrite::Refreshed) => return Ok(false),
            Ok(LockWrite::HeldByOther(_)) => "held by another owner".to_string(),
            Err(e) => e.to_string(),
        };

        // A refreshed entry belonged to the owner before this call.
        if cached == CacheAcquire::Refreshed {
            return Err(failed(reason));
        }

        // The cache admitted us but the durable row did not.
        let action = CompensationAction::UnlockSeat {
            seat_id: seat_id.clone(),
            session_id: request.session_id.clone(),
            owner_id: request.owner_id.clone(),
        };
        self.compensation
            .undo_or_schedule(action, || self.cache.release(seat_id, &request.owner_id))
            .await;
        Err(failed(reason))
    }

    async fn undo_lock(&self, seat_id: &SeatId, session_id: &SessionId, owner_id: &OwnerId) {
        let action = CompensationAction::UnlockSeat {
            seat_id: seat_id.clone(),
            session_id: session_id.clone(),
            owner_id: owner_id.clone(),
        };
        self.compensation
            .undo_or_schedule(action, || self.unlock_one(seat_id, session_id, owner_id))
            .await;
    }

    /// Release `seats` held by `owner_id`.
    ///
    /// Seats with no lock at all count as released, so repeating the call
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::NotOwner`] if another owner holds any of the
    /// seats (nothing is released in that case), or
    /// [`InventoryError::InvalidState`] for a confirmed seat.
    pub async fn unlock_seats(
        &self,
        seats: &[SeatId],
        session_id: &SessionId,
        owner_id: &OwnerId,
    ) -> Result<()> {
        let started = Instant::now();
        let result = self.unlock_seats_inner(seats, session_id, owner_id).await;
        OperationMetrics::record(Operation::UnlockSeat, &result, started.elapsed());
        result
    }

    async fn unlock_seats_inner(
        &self,
        seats: &[SeatId],
        session_id: &SessionId,
        owner_id: &OwnerId,
    ) -> Result<()> {
        for seat_id in seats {
            if let Some(row) = self.repo.find_active(seat_id, session_id).await? {
                check_unlockable(&row, owner_id)?;
            }
        }
        for seat_id in seats {
            self.unlock_one(seat_id, session_id, owner_id).await?;
        }
        Ok(())
    }

    async fn unlock_one(
        &self,
        seat_id: &SeatId,
        session_id: &SessionId,
        owner_id: &OwnerId,
    ) -> Result<()> {
        let row = self.repo.find_active(seat_id, session_id).await?;
        if let Some(row) = &row {
            check_unlockable(row, owner_id)?;
            self.repo
                .transition(
                    seat_id,
                    session_id,
                    owner_id,
                    SeatLockState::Locking,
                    SeatLockState::Released,
                )
                .await?;
        }

        match self.cache.release(seat_id, owner_id).await? {
            CacheRelease::NotOwner if row.is_none() => Err(InventoryError::NotOwner {
                resource: SeatLockCacheEntry::key(seat_id),
            }),
            CacheRelease::NotOwner => {
                tracing::warn!(
                    seat_id = %seat_id,
                    owner_id = %owner_id,
                    "Seat cache entry held by another owner than the durable row"
                );
                Ok(())
            }
            CacheRelease::Released | CacheRelease::Absent => Ok(()),
        }
    }

    /// Move `seats` from `Locking` to `Confirmed`.
    ///
    /// Seats already confirmed by `owner_id` are left as they are.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidState`] if any seat is not currently
    /// locked by `owner_id`. Nothing is confirmed in that case.
    pub async fn confirm_seats(
        &self,
        seats: &[SeatId],
        session_id: &SessionId,
        owner_id: &OwnerId,
    ) -> Result<()> {
        let started = Instant::now();
        let result = self.confirm_seats_inner(seats, session_id, owner_id).await;
        OperationMetrics::record(Operation::ConfirmSeat, &result, started.elapsed());
        result
    }

    async fn confirm_seats_inner(
        &self,
        seats: &[SeatId],
        session_id: &SessionId,
        owner_id: &OwnerId,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut pending = Vec::with_capacity(seats.len());

        for seat_id in seats {
            let row = self.repo.find_active(seat_id, session_id).await?;
            match row {
                Some(row) if !row.is_held_by(owner_id) => {
                    return Err(not_confirmable(seat_id, "locked by another owner"));
                }
                Some(row) if row.state == SeatLockState::Confirmed => {}
                Some(row) if row.is_expired(now) => {
                    return Err(not_confirmable(seat_id, "lock expired"));
                }
                Some(_) => pending.push(seat_id),
                None => return Err(not_confirmable(seat_id, "not locked")),
            }
        }

        for seat_id in pending {
            let moved = self
                .repo
                .transition(
                    seat_id,
                    session_id,
                    owner_id,
                    SeatLockState::Locking,
                    SeatLockState::Confirmed,
                )
                .await?;
            if !moved {
                return Err(not_confirmable(seat_id, "lock changed during confirmation"));
            }
        }

        tracing::debug!(seats = seats.len(), session_id = %session_id, owner_id = %owner_id, "Seats confirmed");
        Ok(())
    }

    /// Release every expired `Locking` row and look for drift.
    ///
    /// Drift is a `Locking` row whose cache entry is gone. Drifted seats are
    /// returned for the auditor to reconcile.
    ///
    /// # Errors
    ///
    /// Returns error if the durable store is unreachable.
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        let started = Instant::now();
        let result = self.sweep_inner(self.clock.now()).await;
        OperationMetrics::record(Operation::SweepExpired, &result, started.elapsed());
        result
    }

    async fn sweep_inner(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let released = self.repo.release_expired(now).await?;
        for row in &released {
            if let Err(e) = self.cache.release(&row.seat_id, &row.owner_id).await {
                tracing::warn!(seat_id = %row.seat_id, error = %e, "Cache release after sweep failed");
            }
        }
        if !released.is_empty() {
            tracing::warn!(count = released.len(), "Released expired seat locks");
        }
        SeatLockMetrics::record_swept(released.len());

        let mut drifted = Vec::new();
        for row in self.repo.list_locking().await? {
            match self.cache.get(&row.seat_id).await {
                Ok(None) => drifted.push((row.seat_id, row.session_id)),
                Ok(Some(_)) => {}
                Err(e) => {
                    tracing::warn!(seat_id = %row.seat_id, error = %e, "Drift check skipped");
                }
            }
        }
        if !drifted.is_empty() {
            tracing::warn!(count = drifted.len(), "Seat locks without cache entries");
        }

        Ok(SweepReport {
            released: released.len(),
            drifted,
        })
    }

    /// Number of durable rows in `Locking`.
    ///
    /// # Errors
    ///
    /// Returns error if the durable store is unreachable.
    pub async fn active_lock_count(&self) -> Result<usize> {
        Ok(self.repo.list_locking().await?.len())
    }
}

fn check_unlockable(row: &SeatLockRecord, owner_id: &OwnerId) -> Result<()> {
    if !row.is_held_by(owner_id) {
        return Err(InventoryError::NotOwner {
            resource: SeatLockCacheEntry::key(&row.seat_id),
        });
    }
    if row.state == SeatLockState::Confirmed {
        return Err(InventoryError::InvalidState(format!(
            "seat {} is confirmed",
            row.seat_id
        )));
    }
    Ok(())
}

fn not_confirmable(seat_id: &SeatId, reason: &str) -> InventoryError {
    InventoryError::InvalidState(format!("cannot confirm seat {seat_id}: {reason}"))
}
