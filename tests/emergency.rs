mod common;

use chrono::Duration;
use uuid::Uuid;

use common::{harness, online_driver, request, DriverProfile, Harness};
use cursus::api::{EmergencyAPI, RideAPI, StatsAPI};
use cursus::clock::Clock;
use cursus::db::Store;
use cursus::entities::{EscalationStatus, Ride, StageKind, StageOutcome, Tier, VehicleType};
use cursus::external::{Event, Recipient};

async fn vip_ride(h: &Harness) -> Ride {
    online_driver(h, DriverProfile::vip(1.0)).await;

    h.engine
        .request_ride(request(Uuid::new_v4(), Tier::Vip, VehicleType::Luxury))
        .await
        .unwrap()
}

fn events_for(h: &Harness, recipient: Recipient) -> Vec<Event> {
    h.notifier
        .sent()
        .into_iter()
        .filter(|notification| notification.recipient == recipient)
        .map(|notification| notification.event)
        .collect()
}

#[tokio::test]
async fn sos_is_reserved_for_eligible_tiers() {
    let h = harness();
    online_driver(&h, DriverProfile::normal(1.0)).await;

    let ride = h
        .engine
        .request_ride(request(Uuid::new_v4(), Tier::Normal, VehicleType::Economy))
        .await
        .unwrap();

    let err = h.engine.trigger_sos(ride.id).await.unwrap_err();
    assert!(err.is_policy_violation_error());
    assert!(h.engine.find_escalation(ride.id).await.unwrap_err().is_not_found_error());
}

#[tokio::test]
async fn escalation_stages_fire_on_schedule_then_monitoring_begins() {
    let h = harness();
    let ride = vip_ride(&h).await;
    let triggered_at = h.clock.now();

    let escalation = h.engine.trigger_sos(ride.id).await.unwrap();
    assert_eq!(escalation.status, EscalationStatus::Escalating);
    assert!(escalation.stream_elevated);

    let offsets: Vec<(StageKind, i64)> = escalation
        .stages
        .iter()
        .map(|stage| (stage.kind, (stage.due_at - triggered_at).num_seconds()))
        .collect();
    assert_eq!(
        offsets,
        vec![
            (StageKind::ControlCenterAlert, 5),
            (StageKind::EmergencyContact, 30),
            (StageKind::EmergencyServices, 60),
        ]
    );
    assert_eq!(
        events_for(&h, Recipient::ControlCenter),
        vec![Event::LocationStreamElevated]
    );

    h.clock.advance(Duration::seconds(4));
    assert_eq!(h.engine.tick_escalations().await.unwrap(), 0);

    h.clock.advance(Duration::seconds(1));
    assert_eq!(h.engine.tick_escalations().await.unwrap(), 1);

    h.clock.advance(Duration::seconds(25));
    assert_eq!(h.engine.tick_escalations().await.unwrap(), 1);
    assert_eq!(
        events_for(&h, Recipient::EmergencyContact { rider_id: ride.rider_id }),
        vec![Event::EscalationStage {
            stage: StageKind::EmergencyContact
        }]
    );

    h.clock.advance(Duration::seconds(30));
    assert_eq!(h.engine.tick_escalations().await.unwrap(), 1);

    let escalation = h.engine.find_escalation(ride.id).await.unwrap();
    assert_eq!(escalation.status, EscalationStatus::Monitoring);
    assert!(escalation
        .stages
        .iter()
        .all(|stage| matches!(stage.outcome, StageOutcome::Delivered { .. })));

    // heartbeats every 30 seconds once monitoring
    h.clock.advance(Duration::seconds(29));
    assert_eq!(h.engine.tick_escalations().await.unwrap(), 0);
    h.clock.advance(Duration::seconds(1));
    assert_eq!(h.engine.tick_escalations().await.unwrap(), 1);
    assert_eq!(
        events_for(&h, Recipient::ControlCenter).last(),
        Some(&Event::MonitoringHeartbeat)
    );

    assert_eq!(h.engine.matching_stats().await.unwrap().sos_triggered, 1);
}

#[tokio::test]
async fn clearing_stops_pending_stages() {
    let h = harness();
    let ride = vip_ride(&h).await;

    h.engine.trigger_sos(ride.id).await.unwrap();
    h.clock.advance(Duration::seconds(10));
    assert_eq!(h.engine.tick_escalations().await.unwrap(), 1);

    let escalation = h.engine.clear_sos(ride.id).await.unwrap();
    assert_eq!(escalation.status, EscalationStatus::Cleared);
    assert!(!escalation.stream_elevated);
    assert_eq!(escalation.cleared_at, Some(h.clock.now()));

    h.clock.advance(Duration::minutes(5));
    assert_eq!(h.engine.tick_escalations().await.unwrap(), 0);

    let escalation = h.engine.find_escalation(ride.id).await.unwrap();
    assert_eq!(escalation.stages[1].outcome, StageOutcome::Scheduled);
    assert!(events_for(&h, Recipient::EmergencyServices).is_empty());
}

#[tokio::test]
async fn repeated_trigger_returns_the_active_escalation() {
    let h = harness();
    let ride = vip_ride(&h).await;

    let first = h.engine.trigger_sos(ride.id).await.unwrap();
    h.clock.advance(Duration::seconds(3));
    let second = h.engine.trigger_sos(ride.id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.engine.matching_stats().await.unwrap().sos_triggered, 1);
    assert_eq!(events_for(&h, Recipient::ControlCenter).len(), 1);
}

#[tokio::test]
async fn a_failed_stage_is_retried_until_delivered() {
    let h = harness();
    let ride = vip_ride(&h).await;

    h.engine.trigger_sos(ride.id).await.unwrap();
    h.notifier.fail_next(1);

    h.clock.advance(Duration::seconds(5));
    assert_eq!(h.engine.tick_escalations().await.unwrap(), 1);

    let escalation = h.engine.find_escalation(ride.id).await.unwrap();
    assert!(matches!(escalation.stages[0].outcome, StageOutcome::Failed { .. }));
    assert_eq!(escalation.stages[0].attempts, 1);

    h.clock.advance(Duration::seconds(9));
    assert_eq!(h.engine.tick_escalations().await.unwrap(), 0);

    h.clock.advance(Duration::seconds(1));
    assert_eq!(h.engine.tick_escalations().await.unwrap(), 1);

    let escalation = h.engine.find_escalation(ride.id).await.unwrap();
    assert_eq!(
        escalation.stages[0].outcome,
        StageOutcome::Delivered { at: h.clock.now() }
    );
    assert_eq!(escalation.stages[0].attempts, 2);
    assert_eq!(
        events_for(&h, Recipient::ControlCenter),
        vec![
            Event::LocationStreamElevated,
            Event::EscalationStage {
                stage: StageKind::ControlCenterAlert
            },
        ]
    );
}

#[tokio::test]
async fn failed_stages_keep_retrying_after_monitoring_begins() {
    let h = harness();
    let ride = vip_ride(&h).await;
    h.engine.trigger_sos(ride.id).await.unwrap();

    h.clock.advance(Duration::seconds(5));
    h.engine.tick_escalations().await.unwrap();
    h.clock.advance(Duration::seconds(25));
    h.engine.tick_escalations().await.unwrap();

    // emergency services cannot be reached on the first try
    h.notifier.fail_next(1);
    h.clock.advance(Duration::seconds(30));
    assert_eq!(h.engine.tick_escalations().await.unwrap(), 1);

    let escalation = h.engine.find_escalation(ride.id).await.unwrap();
    assert_eq!(escalation.status, EscalationStatus::Monitoring);
    assert!(matches!(escalation.stages[2].outcome, StageOutcome::Failed { .. }));

    h.clock.advance(Duration::seconds(10));
    assert_eq!(h.engine.tick_escalations().await.unwrap(), 1);

    let escalation = h.engine.find_escalation(ride.id).await.unwrap();
    assert!(matches!(escalation.stages[2].outcome, StageOutcome::Delivered { .. }));
    assert_eq!(
        events_for(&h, Recipient::EmergencyServices),
        vec![Event::EscalationStage {
            stage: StageKind::EmergencyServices
        }]
    );
}

#[tokio::test]
async fn escalations_are_written_through_to_the_store() {
    let h = harness();
    let ride = vip_ride(&h).await;

    h.engine.trigger_sos(ride.id).await.unwrap();
    h.clock.advance(Duration::seconds(5));
    h.engine.tick_escalations().await.unwrap();

    let stored = h.store.escalations().await.unwrap();
    assert_eq!(stored, vec![h.engine.find_escalation(ride.id).await.unwrap()]);

    h.engine.clear_sos(ride.id).await.unwrap();
    let stored = h.store.escalations().await.unwrap();
    assert_eq!(stored[0].status, EscalationStatus::Cleared);
}
