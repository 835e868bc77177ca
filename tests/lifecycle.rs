mod common;

use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use common::{
    availability, harness, harness_over, online_driver, request, ConflictingStore, DriverProfile,
};
use cursus::api::{DriverAPI, RideAPI};
use cursus::config::Config;
use cursus::db::MemoryStore;
use cursus::locator::GridLocator;
use cursus::entities::{ActionKind, Availability, Status, Tier, VehicleType};
use cursus::external::{Event, Recipient};

#[tokio::test]
async fn ride_runs_from_request_to_settled_payment() {
    let h = harness();
    let driver = online_driver(&h, DriverProfile::normal(1.5)).await;
    let rider_id = Uuid::new_v4();

    let ride = h
        .engine
        .request_ride(request(rider_id, Tier::Normal, VehicleType::Economy))
        .await
        .unwrap();
    let id = ride.id;

    let ride = h.engine.accept_ride(id, driver.id).await.unwrap();
    assert_eq!(ride.status, Status::DriverAccepted);
    assert_eq!(availability(&h, driver.id).await, Availability::OnTrip);

    h.engine.driver_en_route(id, driver.id).await.unwrap();
    h.engine.driver_arrived(id, driver.id).await.unwrap();
    h.engine.start_trip(id, driver.id).await.unwrap();

    h.clock.advance(Duration::minutes(20));
    let ride = h.engine.complete_trip(id, driver.id).await.unwrap();

    assert_eq!(ride.status, Status::PaymentPending);
    assert_eq!(ride.payment.attempts, 1);
    let fare = ride.fare.clone().unwrap();
    assert!((fare.distance_km - 8.0).abs() < 1e-6);
    assert_eq!(fare.duration_minutes, 20.0);
    assert_eq!(fare.total, 17.1);
    assert!((fare.platform_commission + fare.driver_earnings - fare.total).abs() < 1e-9);
    assert_eq!(fare.platform_commission, 3.42);
    assert_eq!(availability(&h, driver.id).await, Availability::Available);

    h.engine.run_due_actions().await.unwrap();
    let ride = h.engine.find_ride(id).await.unwrap();
    let transaction_ref = ride.payment.transaction_ref.clone().unwrap();
    assert_eq!(h.payments.calls(), 1);

    let ride = h
        .engine
        .record_payment_result(id, transaction_ref, true)
        .await
        .unwrap();
    assert_eq!(ride.status, Status::PaymentCompleted);

    // every observed step is a legal edge of the transition table
    for pair in ride.history.windows(2) {
        assert!(
            pair[0].status.can_transition_to(pair[1].status),
            "{:?} -> {:?}",
            pair[0].status,
            pair[1].status
        );
        assert!(pair[1].version > pair[0].version);
    }

    let statuses: Vec<Status> = ride.history.iter().map(|change| change.status).collect();
    assert_eq!(
        statuses,
        vec![
            Status::Requested,
            Status::DriverSearch,
            Status::DriverFound,
            Status::DriverAccepted,
            Status::DriverEnRoute,
            Status::DriverArrived,
            Status::InProgress,
            Status::Completed,
            Status::PaymentPending,
            Status::PaymentCompleted,
        ]
    );
}

#[tokio::test]
async fn transitions_notify_rider_and_driver() {
    let h = harness();
    let driver = online_driver(&h, DriverProfile::normal(1.0)).await;
    let rider_id = Uuid::new_v4();

    let ride = h
        .engine
        .request_ride(request(rider_id, Tier::Normal, VehicleType::Economy))
        .await
        .unwrap();
    h.engine.accept_ride(ride.id, driver.id).await.unwrap();

    h.engine.run_due_actions().await.unwrap();
    let sent = h.notifier.sent();

    assert!(sent.iter().any(|notification| {
        notification.recipient == Recipient::Driver { id: driver.id }
            && matches!(notification.event, Event::RideOffered { .. })
    }));
    assert!(sent.iter().any(|notification| {
        notification.recipient == Recipient::Rider { id: rider_id }
            && notification.event
                == Event::RideStatusChanged {
                    status: Status::DriverAccepted,
                    version: 3,
                }
    }));

    let actions = h.engine.workflow().for_ride(ride.id).await.unwrap();
    assert!(actions.iter().all(|action| action.kind == ActionKind::SendNotification));
}

#[tokio::test]
async fn stale_version_is_rejected_as_a_conflict() {
    let h = harness();
    let driver = online_driver(&h, DriverProfile::normal(1.0)).await;

    let ride = h
        .engine
        .request_ride(request(Uuid::new_v4(), Tier::Normal, VehicleType::Economy))
        .await
        .unwrap();
    let ride = h.engine.accept_ride(ride.id, driver.id).await.unwrap();

    let err = h
        .engine
        .transition_ride(ride.id, ride.version - 1, Status::DriverEnRoute)
        .await
        .unwrap_err();
    assert!(err.is_concurrency_conflict_error());

    let moved = h
        .engine
        .transition_ride(ride.id, ride.version, Status::DriverEnRoute)
        .await
        .unwrap();
    assert_eq!(moved.status, Status::DriverEnRoute);
    assert_eq!(moved.version, ride.version + 1);

    // the version the caller read is now stale too
    let err = h
        .engine
        .transition_ride(ride.id, ride.version, Status::DriverArrived)
        .await
        .unwrap_err();
    assert!(err.is_concurrency_conflict_error());
}

#[tokio::test]
async fn concurrent_writers_are_absorbed_by_bounded_retries() {
    let store = Arc::new(MemoryStore::new());
    let conflicting = Arc::new(ConflictingStore::new(store.clone()));
    let h = harness_over(
        Config::default(),
        store,
        conflicting.clone(),
        Arc::new(GridLocator::default()),
    );
    let driver = online_driver(&h, DriverProfile::normal(1.0)).await;

    let ride = h
        .engine
        .request_ride(request(Uuid::new_v4(), Tier::Normal, VehicleType::Economy))
        .await
        .unwrap();
    let ride = h.engine.accept_ride(ride.id, driver.id).await.unwrap();

    // two lost writes fit inside the three retries
    conflicting.conflict_next(2);
    let moved = h.engine.driver_en_route(ride.id, driver.id).await.unwrap();
    assert_eq!(moved.status, Status::DriverEnRoute);
    assert_eq!(moved.version, ride.version + 1);
    assert_eq!(conflicting.conflicts_left(), 0);

    // the first attempt plus every retry loses
    conflicting.conflict_next(4);
    let err = h
        .engine
        .driver_arrived(ride.id, driver.id)
        .await
        .unwrap_err();
    assert!(err.is_concurrency_conflict_error());
    assert_eq!(conflicting.conflicts_left(), 0);

    let stored = h.engine.find_ride(ride.id).await.unwrap();
    assert_eq!(stored.status, Status::DriverEnRoute);
    assert_eq!(stored.version, moved.version);
}

#[tokio::test]
async fn illegal_jumps_are_rejected() {
    let h = harness();
    let driver = online_driver(&h, DriverProfile::normal(1.0)).await;

    let ride = h
        .engine
        .request_ride(request(Uuid::new_v4(), Tier::Normal, VehicleType::Economy))
        .await
        .unwrap();
    let ride = h.engine.accept_ride(ride.id, driver.id).await.unwrap();

    let err = h
        .engine
        .transition_ride(ride.id, ride.version, Status::InProgress)
        .await
        .unwrap_err();
    assert!(err.is_illegal_transition_error());

    let err = h.engine.start_trip(ride.id, driver.id).await.unwrap_err();
    assert!(err.is_illegal_transition_error());

    let err = h
        .engine
        .transition_ride(ride.id, ride.version, Status::Completed)
        .await
        .unwrap_err();
    assert!(err.is_validation_error());

    assert_eq!(h.engine.find_ride(ride.id).await.unwrap().version, ride.version);
}

#[tokio::test]
async fn only_the_assigned_driver_reports_progress() {
    let h = harness();
    let driver = online_driver(&h, DriverProfile::normal(1.0)).await;

    let ride = h
        .engine
        .request_ride(request(Uuid::new_v4(), Tier::Normal, VehicleType::Economy))
        .await
        .unwrap();
    h.engine.accept_ride(ride.id, driver.id).await.unwrap();

    let err = h
        .engine
        .driver_en_route(ride.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(err.is_validation_error());
}

#[tokio::test]
async fn a_settled_ride_can_be_disputed_once() {
    let h = harness();
    let driver = online_driver(&h, DriverProfile::normal(1.0)).await;

    let ride = h
        .engine
        .request_ride(request(Uuid::new_v4(), Tier::Normal, VehicleType::Economy))
        .await
        .unwrap();
    let id = ride.id;
    h.engine.accept_ride(id, driver.id).await.unwrap();
    h.engine.driver_en_route(id, driver.id).await.unwrap();
    h.engine.driver_arrived(id, driver.id).await.unwrap();
    h.engine.start_trip(id, driver.id).await.unwrap();
    h.engine.complete_trip(id, driver.id).await.unwrap();
    h.engine.run_due_actions().await.unwrap();

    let transaction_ref = h
        .engine
        .find_ride(id)
        .await
        .unwrap()
        .payment
        .transaction_ref
        .unwrap();
    h.engine
        .record_payment_result(id, transaction_ref, true)
        .await
        .unwrap();

    let err = h.engine.open_dispute(id, "  ".into()).await.unwrap_err();
    assert!(err.is_validation_error());

    let ride = h.engine.open_dispute(id, "charged twice".into()).await.unwrap();
    assert_eq!(ride.status, Status::Disputed);
    assert_eq!(ride.dispute_reason.as_deref(), Some("charged twice"));
    assert_eq!(
        h.engine.find_ride(id).await.unwrap().dispute_reason.as_deref(),
        Some("charged twice")
    );

    let ride = h.engine.resolve_dispute(id, false).await.unwrap();
    assert_eq!(ride.status, Status::PaymentCompleted);
    assert_eq!(ride.dispute_reason.as_deref(), Some("charged twice"));

    let err = h.engine.open_dispute(id, "again".into()).await.unwrap_err();
    assert!(err.is_illegal_transition_error());
}

#[tokio::test]
async fn payment_outcomes_cannot_be_forced_through_a_plain_transition() {
    let h = harness();
    let driver = online_driver(&h, DriverProfile::normal(1.0)).await;

    let ride = h
        .engine
        .request_ride(request(Uuid::new_v4(), Tier::Normal, VehicleType::Economy))
        .await
        .unwrap();
    let id = ride.id;
    h.engine.accept_ride(id, driver.id).await.unwrap();
    h.engine.driver_en_route(id, driver.id).await.unwrap();
    h.engine.driver_arrived(id, driver.id).await.unwrap();
    h.engine.start_trip(id, driver.id).await.unwrap();
    let ride = h.engine.complete_trip(id, driver.id).await.unwrap();
    assert_eq!(ride.status, Status::PaymentPending);

    for status in [
        Status::PaymentCompleted,
        Status::PaymentFailed,
        Status::Disputed,
        Status::Refunded,
    ] {
        let err = h
            .engine
            .transition_ride(id, ride.version, status)
            .await
            .unwrap_err();
        assert!(err.is_validation_error());
    }

    let unchanged = h.engine.find_ride(id).await.unwrap();
    assert_eq!(unchanged.status, Status::PaymentPending);
    assert_eq!(unchanged.version, ride.version);
}

#[tokio::test]
async fn unknown_ride_is_not_found() {
    let h = harness();

    let err = h.engine.find_ride(Uuid::new_v4()).await.unwrap_err();
    assert!(err.is_not_found_error());
}
