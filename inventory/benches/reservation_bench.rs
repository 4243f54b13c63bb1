//! Reservation path benchmarks over in-memory providers.
//!
//! Measures the overhead the services add on top of their stores:
//! - ledger CAS round trip
//! - fast-path admission
//! - full saga (reserve then cancel)
//! - seat lock then unlock
//!
//! Run with: `cargo bench -p boxoffice-inventory`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use boxoffice_core::environment::Clock;
use boxoffice_core::{ItemId, OwnerId, ReleaseReason, SeatId, SessionId, SystemClock, VenueId};
use boxoffice_inventory::{
    Config, InventoryCore, InventoryServices, LockRequest, Providers, ReservationRequest,
};
use boxoffice_testing::{
    InMemoryCompensationStore, InMemoryCounterCache, InMemoryMutex, InMemorySeatLockCache,
    InMemorySeatLockRepository, InMemoryStockStore, RecordingOrderSink,
};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;

fn build_core() -> InventoryCore {
    let config = Config::default();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let providers = Providers {
        stocks: Arc::new(InMemoryStockStore::new()),
        counters: Arc::new(InMemoryCounterCache::with_clock(
            Arc::clone(&clock),
            config.fast_path.ttl,
        )),
        seat_cache: Arc::new(InMemorySeatLockCache::with_clock(Arc::clone(&clock))),
        seat_locks: Arc::new(InMemorySeatLockRepository::new()),
        compensations: Arc::new(InMemoryCompensationStore::new()),
        clock: Arc::clone(&clock),
    };
    let services = InventoryServices::new(&providers, &config);
    InventoryCore::new(
        services,
        Arc::new(InMemoryMutex::with_clock(Arc::clone(&clock))),
        Arc::new(RecordingOrderSink::new()),
        clock,
        &config,
    )
}

fn benchmark_stock_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("stock");
    group.throughput(Throughput::Elements(1));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");
    let item = ItemId::new("T1");

    group.bench_function("ledger_reserve_release", |b| {
        let core = build_core();
        runtime
            .block_on(core.initialize_stock(&item, 1_000_000))
            .expect("init");
        let ledger = core.services().ledger.clone();

        b.to_async(&runtime).iter(|| async {
            ledger.reserve(black_box(&item), 1).await.expect("reserve");
            ledger.release(black_box(&item), 1).await.expect("release");
        });
    });

    group.bench_function("fast_path_prededuct", |b| {
        let core = build_core();
        runtime
            .block_on(core.initialize_stock(&item, u32::MAX))
            .expect("init");
        let fast_path = core.services().fast_path.clone();

        b.to_async(&runtime).iter(|| async {
            let _ = fast_path.prededuct(black_box(&item), 1).await;
        });
    });

    group.bench_function("saga_reserve_cancel", |b| {
        let core = build_core();
        runtime
            .block_on(core.initialize_stock(&item, 1_000_000))
            .expect("init");
        let request = ReservationRequest::new(OwnerId::new("U1"), item.clone(), 1);

        b.to_async(&runtime).iter(|| async {
            let reservation = core.reserve(black_box(&request)).await.expect("reserve");
            core.cancel_reservation(&reservation, ReleaseReason::Cancelled)
                .await
                .expect("cancel");
        });
    });

    group.finish();
}

fn benchmark_seat_locks(c: &mut Criterion) {
    let mut group = c.benchmark_group("seat_locks");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    for size in [1usize, 4, 10] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("lock_unlock_{size}"), |b| {
            let core = build_core();
            let seats: Vec<SeatId> = (0..size).map(|i| SeatId::new(format!("S{i}"))).collect();
            let request = LockRequest::new(
                seats.clone(),
                SessionId::new("V1"),
                VenueId::new("hall"),
                OwnerId::new("U1"),
            );

            b.to_async(&runtime).iter(|| async {
                core.lock_seats(black_box(&request)).await.expect("lock");
                core.unlock_seats(&seats, &request.session_id, &request.owner_id)
                    .await
                    .expect("unlock");
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_stock_paths, benchmark_seat_locks);
criterion_main!(benches);
