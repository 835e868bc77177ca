mod common;

use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use common::{harness, online_driver, origin, request, DriverProfile, Harness};
use cursus::api::{DriverAPI, EmergencyAPI, QuoteAPI, RideAPI, SurgeAPI};
use cursus::clock::Clock;
use cursus::config::Config;
use cursus::db::Store;
use cursus::engine::{Dependencies, Engine};
use cursus::entities::{
    ActionKind, EscalationStatus, QuoteRequest, Ride, StageKind, StageOutcome, Status, Tier,
    VehicleType, ZoneDefinition,
};
use cursus::external::{Event, Recipient};
use cursus::locator::GridLocator;

/// A second engine over the same store, as after a process restart.
fn restarted(h: &Harness) -> Engine {
    Engine::new(
        Config::default(),
        Dependencies {
            store: h.store.clone(),
            locator: Arc::new(GridLocator::default()),
            notifier: h.notifier.clone(),
            payments: h.payments.clone(),
            clock: h.clock.clone(),
        },
    )
}

#[tokio::test]
async fn recovery_does_not_duplicate_payment_initiation() {
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

    h.engine.recover().await.unwrap();
    restarted(&h).recover().await.unwrap();

    let payments: Vec<_> = h
        .engine
        .workflow()
        .for_ride(id)
        .await
        .unwrap()
        .into_iter()
        .filter(|action| action.kind == ActionKind::InitiatePayment)
        .collect();
    assert_eq!(payments.len(), 1);

    h.engine.run_due_actions().await.unwrap();
    assert_eq!(h.payments.calls(), 1);
}

#[tokio::test]
async fn rides_stranded_before_matching_are_dispatched_on_recovery() {
    let h = harness();
    let driver = online_driver(&h, DriverProfile::normal(1.0)).await;

    // persisted, then the process died before matching ran
    let ride = Ride::new(
        request(Uuid::new_v4(), Tier::Normal, VehicleType::Economy),
        1.0,
        h.clock.now(),
    );
    h.store.insert_ride(&ride).await.unwrap();

    h.engine.recover().await.unwrap();

    let ride = h.engine.find_ride(ride.id).await.unwrap();
    assert_eq!(ride.status, Status::DriverFound);
    assert_eq!(ride.driver_id, Some(driver.id));
}

#[tokio::test]
async fn surge_zones_survive_a_restart() {
    let h = harness();

    let zone = h
        .engine
        .create_zone(ZoneDefinition {
            name: "midtown".into(),
            center: origin(),
            radius_km: 2.0,
        })
        .await
        .unwrap();

    let engine = restarted(&h);
    assert!(engine.find_zone(zone.id).await.unwrap_err().is_not_found_error());

    engine.recover().await.unwrap();
    assert_eq!(engine.find_zone(zone.id).await.unwrap().name, "midtown");
}

#[tokio::test]
async fn active_escalations_resume_after_a_restart() {
    let h = harness();
    online_driver(&h, DriverProfile::vip(1.0)).await;
    let ride = h
        .engine
        .request_ride(request(Uuid::new_v4(), Tier::Vip, VehicleType::Luxury))
        .await
        .unwrap();

    h.engine.trigger_sos(ride.id).await.unwrap();
    h.clock.advance(Duration::seconds(5));
    assert_eq!(h.engine.tick_escalations().await.unwrap(), 1);

    let engine = restarted(&h);
    assert!(engine.find_escalation(ride.id).await.unwrap_err().is_not_found_error());

    engine.recover().await.unwrap();
    let escalation = engine.find_escalation(ride.id).await.unwrap();
    assert_eq!(escalation.status, EscalationStatus::Escalating);
    assert!(matches!(escalation.stages[0].outcome, StageOutcome::Delivered { .. }));
    assert_eq!(escalation.stages[1].outcome, StageOutcome::Scheduled);

    // the restarted engine fires what is still pending, and only that
    h.clock.advance(Duration::seconds(25));
    assert_eq!(engine.tick_escalations().await.unwrap(), 1);

    let contacted = h
        .notifier
        .sent()
        .into_iter()
        .filter(|notification| {
            notification.recipient == Recipient::EmergencyContact { rider_id: ride.rider_id }
        })
        .map(|notification| notification.event)
        .collect::<Vec<_>>();
    assert_eq!(
        contacted,
        vec![Event::EscalationStage {
            stage: StageKind::EmergencyContact
        }]
    );
}

#[tokio::test]
async fn quotes_and_rides_pick_up_the_zone_multiplier() {
    let h = harness();
    // one available driver against a burst of demand
    online_driver(&h, DriverProfile::normal(0.5)).await;

    h.engine
        .create_zone(ZoneDefinition {
            name: "midtown".into(),
            center: origin(),
            radius_km: 2.0,
        })
        .await
        .unwrap();

    let calm = h
        .engine
        .create_quote(QuoteRequest {
            pickup: request(Uuid::new_v4(), Tier::Normal, VehicleType::Economy).pickup,
            destination: request(Uuid::new_v4(), Tier::Normal, VehicleType::Economy).destination,
            tier: Tier::Normal,
            vehicle_type: VehicleType::Economy,
        })
        .await
        .unwrap();
    assert_eq!(calm.surge_multiplier, 1.0);

    for _ in 0..3 {
        let _ = h
            .engine
            .request_ride(request(Uuid::new_v4(), Tier::Normal, VehicleType::Economy))
            .await;
    }
    h.clock.advance(Duration::seconds(1));
    assert_eq!(h.engine.recompute_surge().await.unwrap(), 1);

    let surged = h
        .engine
        .create_quote(QuoteRequest {
            pickup: calm.pickup.clone(),
            destination: calm.destination.clone(),
            tier: Tier::Normal,
            vehicle_type: VehicleType::Economy,
        })
        .await
        .unwrap();

    assert!(surged.surge_multiplier > 1.0);
    assert!(surged.estimate.total > calm.estimate.total);
    assert_eq!(h.engine.multiplier_at(origin()).await.unwrap(), surged.surge_multiplier);
    assert_eq!(h.engine.find_quote(surged.token).await.unwrap(), surged);

    // outside every zone nothing changes
    let far = origin().offset_north_km(20.0);
    assert_eq!(h.engine.multiplier_at(far).await.unwrap(), 1.0);
}
