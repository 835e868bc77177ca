#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use cursus::api::DriverAPI;
use cursus::clock::ManualClock;
use cursus::config::Config;
use cursus::db::{MemoryStore, Store};
use cursus::engine::{Dependencies, Engine};
use cursus::entities::{
    ActionStatus, Availability, CancellationRecord, Coordinates, Driver, DriverRegistration,
    Escalation, Location, MatchingAttemptLog, Quote, Ride, RideRequest, Status, SurgeZone, Tier,
    Vehicle, VehicleType, WorkflowAction,
};
use cursus::error::Error;
use cursus::external::{Notification, Notifier, PaymentService, RecordingNotifier};
use cursus::locator::{Candidate, DriverLocator, GridLocator, SearchFilter};

/// Takes one unit off `counter` if any are left.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

/// Hands out references, failing the first `failures` calls.
#[derive(Default)]
pub struct ScriptedPayments {
    failures: AtomicU32,
    calls: AtomicU32,
}

impl ScriptedPayments {
    pub fn fail_next(&self, failures: u32) {
        self.failures.store(failures, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentService for ScriptedPayments {
    async fn create_ride_payment(&self, ride: &Ride) -> Result<String, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.failures) {
            return Err(Error::upstream_error("payment provider unavailable"));
        }

        Ok(format!("txn-{}-{}", ride.id.simple(), ride.payment.attempts))
    }
}

/// Records delivered notifications, failing the first `failures` sends.
#[derive(Default)]
pub struct ScriptedNotifier {
    delivered: RecordingNotifier,
    failures: AtomicU32,
}

impl ScriptedNotifier {
    pub fn fail_next(&self, failures: u32) {
        self.failures.store(failures, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.delivered.sent()
    }
}

#[async_trait]
impl Notifier for ScriptedNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), Error> {
        if take_one(&self.failures) {
            return Err(Error::upstream_error("notification service unavailable"));
        }

        self.delivered.notify(notification).await
    }
}

/// Memory store whose next `conflicts` ride writes lose to a concurrent writer.
pub struct ConflictingStore {
    inner: Arc<MemoryStore>,
    conflicts: AtomicU32,
}

impl ConflictingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            conflicts: AtomicU32::new(0),
        }
    }

    pub fn conflict_next(&self, conflicts: u32) {
        self.conflicts.store(conflicts, Ordering::SeqCst);
    }

    pub fn conflicts_left(&self) -> u32 {
        self.conflicts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for ConflictingStore {
    async fn insert_ride(&self, ride: &Ride) -> Result<(), Error> {
        self.inner.insert_ride(ride).await
    }

    async fn find_ride(&self, id: Uuid) -> Result<Option<Ride>, Error> {
        self.inner.find_ride(id).await
    }

    async fn update_ride(&self, ride: &Ride, expected_version: u64) -> Result<(), Error> {
        if take_one(&self.conflicts) {
            return Err(Error::concurrency_conflict_error(
                format!("ride {}", ride.id),
                expected_version,
            ));
        }

        self.inner.update_ride(ride, expected_version).await
    }

    async fn rides_with_status(&self, statuses: &[Status]) -> Result<Vec<Ride>, Error> {
        self.inner.rides_with_status(statuses).await
    }

    async fn rides_with_expired_offers(&self, now: DateTime<Utc>) -> Result<Vec<Ride>, Error> {
        self.inner.rides_with_expired_offers(now).await
    }

    async fn append_matching_log(&self, log: &MatchingAttemptLog) -> Result<(), Error> {
        self.inner.append_matching_log(log).await
    }

    async fn matching_logs(&self, ride_id: Uuid) -> Result<Vec<MatchingAttemptLog>, Error> {
        self.inner.matching_logs(ride_id).await
    }

    async fn insert_cancellation(&self, record: &CancellationRecord) -> Result<(), Error> {
        self.inner.insert_cancellation(record).await
    }

    async fn cancellations(&self, ride_id: Uuid) -> Result<Vec<CancellationRecord>, Error> {
        self.inner.cancellations(ride_id).await
    }

    async fn count_rider_cancellations(
        &self,
        rider_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u32, Error> {
        self.inner.count_rider_cancellations(rider_id, since).await
    }

    async fn insert_action(&self, action: &WorkflowAction) -> Result<bool, Error> {
        self.inner.insert_action(action).await
    }

    async fn find_action(&self, id: Uuid) -> Result<Option<WorkflowAction>, Error> {
        self.inner.find_action(id).await
    }

    async fn claim_action(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkflowAction>, Error> {
        self.inner.claim_action(id, now).await
    }

    async fn update_action(&self, action: &WorkflowAction) -> Result<(), Error> {
        self.inner.update_action(action).await
    }

    async fn due_actions(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowAction>, Error> {
        self.inner.due_actions(now).await
    }

    async fn actions_with_status(
        &self,
        status: ActionStatus,
    ) -> Result<Vec<WorkflowAction>, Error> {
        self.inner.actions_with_status(status).await
    }

    async fn actions_for_ride(&self, ride_id: Uuid) -> Result<Vec<WorkflowAction>, Error> {
        self.inner.actions_for_ride(ride_id).await
    }

    async fn release_stale_actions(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        self.inner.release_stale_actions(before).await
    }

    async fn insert_quote(&self, quote: &Quote) -> Result<(), Error> {
        self.inner.insert_quote(quote).await
    }

    async fn find_quote(&self, token: Uuid) -> Result<Option<Quote>, Error> {
        self.inner.find_quote(token).await
    }

    async fn upsert_zone(&self, zone: &SurgeZone) -> Result<(), Error> {
        self.inner.upsert_zone(zone).await
    }

    async fn zones(&self) -> Result<Vec<SurgeZone>, Error> {
        self.inner.zones().await
    }

    async fn upsert_escalation(&self, escalation: &Escalation) -> Result<(), Error> {
        self.inner.upsert_escalation(escalation).await
    }

    async fn escalations(&self) -> Result<Vec<Escalation>, Error> {
        self.inner.escalations().await
    }
}

/// Grid locator that parks the first `from -> to` swap until `open` is called.
/// With `after_swap` the swap has already landed while parked, otherwise it
/// runs once the gate opens.
pub struct GatedLocator {
    inner: GridLocator,
    from: Availability,
    to: Availability,
    after_swap: bool,
    armed: AtomicBool,
    parked: Notify,
    gate: Notify,
}

impl GatedLocator {
    pub fn new(from: Availability, to: Availability, after_swap: bool) -> Self {
        Self {
            inner: GridLocator::default(),
            from,
            to,
            after_swap,
            armed: AtomicBool::new(true),
            parked: Notify::new(),
            gate: Notify::new(),
        }
    }

    pub async fn wait_until_parked(&self) {
        self.parked.notified().await;
    }

    pub fn open(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl DriverLocator for GatedLocator {
    async fn register(&self, driver: Driver) -> Result<Driver, Error> {
        self.inner.register(driver).await
    }

    async fn find(&self, id: Uuid) -> Result<Option<Driver>, Error> {
        self.inner.find(id).await
    }

    async fn report(
        &self,
        id: Uuid,
        location: Option<Coordinates>,
        availability: Option<Availability>,
        now: DateTime<Utc>,
    ) -> Result<Driver, Error> {
        self.inner.report(id, location, availability, now).await
    }

    async fn nearest_within(
        &self,
        point: Coordinates,
        radius_km: f64,
        filter: &SearchFilter,
    ) -> Result<Vec<Candidate>, Error> {
        self.inner.nearest_within(point, radius_km, filter).await
    }

    async fn count_available_within(
        &self,
        point: Coordinates,
        radius_km: f64,
        fresh_since: DateTime<Utc>,
    ) -> Result<u32, Error> {
        self.inner
            .count_available_within(point, radius_km, fresh_since)
            .await
    }

    async fn compare_and_swap(
        &self,
        id: Uuid,
        expected: Availability,
        new: Availability,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let gated = expected == self.from && new == self.to && self.armed.swap(false, Ordering::SeqCst);

        if !gated {
            return self.inner.compare_and_swap(id, expected, new, now).await;
        }

        if self.after_swap {
            let swapped = self.inner.compare_and_swap(id, expected, new, now).await;
            self.parked.notify_one();
            self.gate.notified().await;
            swapped
        } else {
            self.parked.notify_one();
            self.gate.notified().await;
            self.inner.compare_and_swap(id, expected, new, now).await
        }
    }
}

pub struct Harness {
    pub engine: Arc<Engine>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<ScriptedNotifier>,
    pub payments: Arc<ScriptedPayments>,
    pub store: Arc<MemoryStore>,
}

pub fn harness() -> Harness {
    harness_with(Config::default())
}

pub fn harness_with(config: Config) -> Harness {
    let store = Arc::new(MemoryStore::new());
    harness_over(config, store.clone(), store, Arc::new(GridLocator::default()))
}

/// Harness whose engine writes through `engine_store` and locates drivers with
/// `locator`; `store` is the memory store underneath, kept for inspection.
pub fn harness_over(
    config: Config,
    store: Arc<MemoryStore>,
    engine_store: Arc<dyn Store>,
    locator: Arc<dyn DriverLocator>,
) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
    let notifier = Arc::new(ScriptedNotifier::default());
    let payments = Arc::new(ScriptedPayments::default());

    let engine = Arc::new(Engine::new(
        config,
        Dependencies {
            store: engine_store,
            locator,
            notifier: notifier.clone(),
            payments: payments.clone(),
            clock: clock.clone(),
        },
    ));

    Harness {
        engine,
        clock,
        notifier,
        payments,
        store,
    }
}

/// Pickup point shared by every scenario.
pub fn origin() -> Coordinates {
    Coordinates::new(40.7484, -73.9857)
}

pub fn request(rider_id: Uuid, tier: Tier, vehicle_type: VehicleType) -> RideRequest {
    RideRequest {
        rider_id,
        pickup: Location::new(origin(), "350 5th Ave".into()),
        destination: Location::new(origin().offset_north_km(8.0), "W 110th St".into()),
        tier,
        vehicle_type,
        amenities: vec![],
    }
}

pub struct DriverProfile {
    pub km_north: f64,
    pub rating: f64,
    pub vehicle_type: VehicleType,
    pub tiers: Vec<Tier>,
    pub trusted: bool,
}

impl DriverProfile {
    pub fn vip(km_north: f64) -> Self {
        Self {
            km_north,
            rating: 4.8,
            vehicle_type: VehicleType::Luxury,
            tiers: vec![Tier::Vip],
            trusted: true,
        }
    }

    pub fn normal(km_north: f64) -> Self {
        Self {
            km_north,
            rating: 4.6,
            vehicle_type: VehicleType::Economy,
            tiers: vec![Tier::Normal],
            trusted: false,
        }
    }
}

/// Registers a driver and puts them on the map as available.
pub async fn online_driver(harness: &Harness, profile: DriverProfile) -> Driver {
    let driver = harness
        .engine
        .register_driver(DriverRegistration {
            id: None,
            rating: profile.rating,
            vehicle: Vehicle {
                vehicle_type: profile.vehicle_type,
                plate: format!("NY-{}", &Uuid::new_v4().simple().to_string()[..6]),
                tiers: profile.tiers,
                amenities: vec![],
            },
            trusted: profile.trusted,
        })
        .await
        .unwrap();

    harness
        .engine
        .update_driver_status(
            driver.id,
            Some(origin().offset_north_km(profile.km_north)),
            Some(Availability::Available),
        )
        .await
        .unwrap()
}

pub async fn availability(harness: &Harness, driver_id: Uuid) -> Availability {
    harness
        .engine
        .find_driver(driver_id)
        .await
        .unwrap()
        .availability
}
