//! Seat lock integration tests.
//!
//! Run with: `cargo test -p boxoffice-inventory --test seat_lock_test`

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

mod common;

use boxoffice_core::providers::SeatLockRepository;
use boxoffice_core::{InventoryError, OwnerId, SeatId, SeatLockState};
use common::{Harness, lock, seats, session};
use std::time::Duration;

/// U1 holds S1 for five minutes. U2 is refused until the lock expires and
/// the sweep reclaims it.
#[tokio::test]
async fn test_expired_lock_is_reclaimed_by_sweep() {
    let h = Harness::new();
    h.core
        .lock_seats(&lock("U1", &["S1"]).with_ttl(Duration::from_secs(300)))
        .await
        .unwrap();

    let err = h.core.lock_seats(&lock("U2", &["S1"])).await.unwrap_err();
    assert!(matches!(err, InventoryError::LockFailed { .. }));

    h.clock.advance(chrono::Duration::seconds(301));
    let report = h.services().seats.sweep_expired().await.unwrap();
    assert_eq!(report.released, 1);

    let locked = h.core.lock_seats(&lock("U2", &["S1"])).await.unwrap();
    assert_eq!(locked, seats(&["S1"]));

    let history = h.seat_repo.history(&SeatId::new("S1"), &session());
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].state, SeatLockState::Released);
    assert_eq!(history[1].owner_id, OwnerId::new("U2"));
}

/// Eight owners race for one seat; exactly one wins and exactly one active
/// row exists afterwards.
#[tokio::test]
async fn test_concurrent_lock_has_one_winner() {
    let h = Harness::new();
    let requests: Vec<_> = (0..8).map(|i| lock(&format!("U{i}"), &["S1"])).collect();

    let results =
        futures::future::join_all(requests.iter().map(|r| h.core.lock_seats(r))).await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

    let history = h.seat_repo.history(&SeatId::new("S1"), &session());
    let active = history.iter().filter(|r| r.state.is_active()).count();
    assert_eq!(active, 1);
}

/// Unlocking twice succeeds both times.
#[tokio::test]
async fn test_unlock_twice() {
    let h = Harness::new();
    let owner = OwnerId::new("U1");
    h.core.lock_seats(&lock("U1", &["S1", "S2"])).await.unwrap();

    h.core
        .unlock_seats(&seats(&["S1", "S2"]), &session(), &owner)
        .await
        .unwrap();
    h.core
        .unlock_seats(&seats(&["S1", "S2"]), &session(), &owner)
        .await
        .unwrap();

    assert!(h.seat_cache.entry(&SeatId::new("S1")).is_none());
}

/// Unlocking a never-locked seat is a no-op success.
#[tokio::test]
async fn test_unlock_unknown_seat() {
    let h = Harness::new();
    h.core
        .unlock_seats(&seats(&["S9"]), &session(), &OwnerId::new("U1"))
        .await
        .unwrap();
}

/// Another owner cannot release or confirm a lock, and a partial batch of
/// foreign seats releases nothing.
#[tokio::test]
async fn test_foreign_owner_is_rejected() {
    let h = Harness::new();
    h.core.lock_seats(&lock("U1", &["S1"])).await.unwrap();
    h.core.lock_seats(&lock("U2", &["S2"])).await.unwrap();

    let err = h
        .core
        .unlock_seats(&seats(&["S2", "S1"]), &session(), &OwnerId::new("U2"))
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::NotOwner { .. }));
    assert!(h
        .seat_repo
        .find_active(&SeatId::new("S2"), &session())
        .await
        .unwrap()
        .is_some());

    let err = h
        .core
        .confirm_seats(&seats(&["S1"]), &session(), &OwnerId::new("U2"))
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::InvalidState(_)));
}

/// A confirmed seat survives the sweep and cannot be locked again.
#[tokio::test]
async fn test_confirmed_seat_is_final() {
    let h = Harness::new();
    let owner = OwnerId::new("U1");
    h.core.lock_seats(&lock("U1", &["S1"])).await.unwrap();
    h.core
        .confirm_seats(&seats(&["S1"]), &session(), &owner)
        .await
        .unwrap();

    h.clock.advance(chrono::Duration::minutes(10));
    let report = h.services().seats.sweep_expired().await.unwrap();
    assert_eq!(report.released, 0);

    let err = h.core.lock_seats(&lock("U2", &["S1"])).await.unwrap_err();
    assert!(matches!(err, InventoryError::LockFailed { .. }));
}

/// A lock whose cache entry outlived a shorter cache TTL is reported as
/// drift, and the audit releases the durable row.
#[tokio::test]
async fn test_cache_expiry_drift_is_reconciled() {
    let mut config = common::fast_config();
    config.seat_locks.cache_ttl = Duration::from_secs(60);
    let h = Harness::with_config(&config);
    h.core.lock_seats(&lock("U1", &["S1"])).await.unwrap();

    h.clock.advance(chrono::Duration::seconds(90));
    let report = h.services().seats.sweep_expired().await.unwrap();
    assert_eq!(report.released, 0);
    assert_eq!(report.drifted, vec![(SeatId::new("S1"), session())]);

    let audit = h.core.audit_now().await.unwrap();
    assert_eq!(audit.seats_repaired, 1);
    assert_eq!(h.services().seats.active_lock_count().await.unwrap(), 0);
}
