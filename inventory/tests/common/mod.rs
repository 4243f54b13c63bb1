//! Shared wiring for the inventory integration tests.

#![allow(dead_code)] // Each test binary uses a different subset

use boxoffice_core::environment::Clock;
use boxoffice_core::{ItemId, OwnerId, SeatId, SessionId, VenueId};
use boxoffice_inventory::{
    Config, InventoryCore, InventoryServices, LockRequest, Providers, ReservationRequest,
};
use boxoffice_testing::{
    FixedClock, InMemoryCompensationStore, InMemoryCounterCache, InMemoryMutex,
    InMemorySeatLockCache, InMemorySeatLockRepository, InMemoryStockStore, RecordingOrderSink,
    test_clock,
};
use std::sync::Arc;
use std::time::Duration;

/// In-memory inventory with handles on every provider.
pub struct Harness {
    pub core: InventoryCore,
    pub stocks: Arc<InMemoryStockStore>,
    pub counters: Arc<InMemoryCounterCache>,
    pub seat_cache: Arc<InMemorySeatLockCache>,
    pub seat_repo: Arc<InMemorySeatLockRepository>,
    pub tasks: Arc<InMemoryCompensationStore>,
    pub mutex: Arc<InMemoryMutex>,
    pub orders: Arc<RecordingOrderSink>,
    pub clock: FixedClock,
}

/// Defaults with millisecond backoffs so failing paths stay fast.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.ledger.cas_backoff = Duration::from_millis(1);
    config.mutex.backoff = Duration::from_millis(1);
    config.mutex.wait = Duration::from_millis(100);
    config
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(&fast_config())
    }

    pub fn with_config(config: &Config) -> Self {
        let clock = test_clock();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());

        let stocks = Arc::new(InMemoryStockStore::new());
        let counters = Arc::new(InMemoryCounterCache::with_clock(
            Arc::clone(&shared),
            config.fast_path.ttl,
        ));
        let seat_cache = Arc::new(InMemorySeatLockCache::with_clock(Arc::clone(&shared)));
        let seat_repo = Arc::new(InMemorySeatLockRepository::new());
        let tasks = Arc::new(InMemoryCompensationStore::new());
        let mutex = Arc::new(InMemoryMutex::with_clock(Arc::clone(&shared)));
        let orders = Arc::new(RecordingOrderSink::new());

        let providers = Providers {
            stocks: stocks.clone(),
            counters: counters.clone(),
            seat_cache: seat_cache.clone(),
            seat_locks: seat_repo.clone(),
            compensations: tasks.clone(),
            clock: Arc::clone(&shared),
        };
        let services = InventoryServices::new(&providers, config);
        let core = InventoryCore::new(services, mutex.clone(), orders.clone(), shared, config);

        Self {
            core,
            stocks,
            counters,
            seat_cache,
            seat_repo,
            tasks,
            mutex,
            orders,
            clock,
        }
    }

    pub fn services(&self) -> &InventoryServices {
        self.core.services()
    }
}

pub fn item(id: &str) -> ItemId {
    ItemId::new(id)
}

pub fn reserve(owner: &str, item_id: &str, quantity: u32) -> ReservationRequest {
    ReservationRequest::new(OwnerId::new(owner), ItemId::new(item_id), quantity)
}

pub fn session() -> SessionId {
    SessionId::new("V1")
}

pub fn seats(ids: &[&str]) -> Vec<SeatId> {
    ids.iter().map(|s| SeatId::new(*s)).collect()
}

pub fn lock(owner: &str, ids: &[&str]) -> LockRequest {
    LockRequest::new(seats(ids), session(), VenueId::new("hall"), OwnerId::new(owner))
}
