use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{
    Actor, Availability, CancellationRecord, Coordinates, Driver, DriverRegistration, Escalation,
    MatchingAttemptLog, Quote, QuoteRequest, Ride, RideRequest, Status, SurgeZone,
    WorkflowAction, ZoneDefinition,
};
use crate::error::Error;

#[async_trait]
pub trait RideAPI {
    async fn request_ride(&self, request: RideRequest) -> Result<Ride, Error>;

    async fn find_ride(&self, id: Uuid) -> Result<Ride, Error>;

    async fn cancel_ride(&self, id: Uuid, actor: Actor, reason: String) -> Result<Ride, Error>;

    async fn cancellations(&self, id: Uuid) -> Result<Vec<CancellationRecord>, Error>;

    /// Operator override guarded by the caller's view of the ride version.
    async fn transition_ride(
        &self,
        id: Uuid,
        expected_version: u64,
        status: Status,
    ) -> Result<Ride, Error>;

    async fn matching_logs(&self, id: Uuid) -> Result<Vec<MatchingAttemptLog>, Error>;

    async fn record_payment_result(
        &self,
        id: Uuid,
        transaction_ref: String,
        succeeded: bool,
    ) -> Result<Ride, Error>;

    async fn retry_payment(&self, id: Uuid) -> Result<Ride, Error>;

    async fn open_dispute(&self, id: Uuid, reason: String) -> Result<Ride, Error>;

    async fn resolve_dispute(&self, id: Uuid, refund: bool) -> Result<Ride, Error>;
}

#[async_trait]
pub trait DriverAPI {
    async fn register_driver(&self, registration: DriverRegistration) -> Result<Driver, Error>;

    async fn find_driver(&self, id: Uuid) -> Result<Driver, Error>;

    async fn update_driver_status(
        &self,
        id: Uuid,
        location: Option<Coordinates>,
        availability: Option<Availability>,
    ) -> Result<Driver, Error>;

    async fn accept_ride(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error>;

    async fn decline_ride(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error>;

    async fn driver_en_route(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error>;

    async fn driver_arrived(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error>;

    async fn start_trip(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error>;

    async fn complete_trip(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error>;
}

#[async_trait]
pub trait QuoteAPI {
    async fn create_quote(&self, request: QuoteRequest) -> Result<Quote, Error>;

    async fn find_quote(&self, token: Uuid) -> Result<Quote, Error>;
}

#[async_trait]
pub trait SurgeAPI {
    async fn create_zone(&self, definition: ZoneDefinition) -> Result<SurgeZone, Error>;

    async fn list_zones(&self) -> Result<Vec<SurgeZone>, Error>;

    async fn find_zone(&self, id: Uuid) -> Result<SurgeZone, Error>;

    async fn multiplier_at(&self, point: Coordinates) -> Result<f64, Error>;
}

#[async_trait]
pub trait EmergencyAPI {
    async fn trigger_sos(&self, ride_id: Uuid) -> Result<Escalation, Error>;

    async fn find_escalation(&self, ride_id: Uuid) -> Result<Escalation, Error>;

    async fn clear_sos(&self, ride_id: Uuid) -> Result<Escalation, Error>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingStats {
    pub rides_requested: u64,
    pub offers_made: u64,
    pub offers_accepted: u64,
    pub offers_declined: u64,
    pub offers_expired: u64,
    pub claims_lost: u64,
    pub radius_expansions: u64,
    pub no_driver_available: u64,
    pub cancellations: u64,
    pub sos_triggered: u64,
    pub actions_failed: u64,
}

#[async_trait]
pub trait StatsAPI {
    async fn matching_stats(&self) -> Result<MatchingStats, Error>;

    async fn failed_actions(&self) -> Result<Vec<WorkflowAction>, Error>;
}

pub trait API: RideAPI + DriverAPI + QuoteAPI + SurgeAPI + EmergencyAPI + StatsAPI {}
