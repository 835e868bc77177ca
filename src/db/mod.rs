mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entities::{
    ActionStatus, CancellationRecord, Escalation, MatchingAttemptLog, Quote, Ride, Status,
    SurgeZone, WorkflowAction,
};
use crate::error::Error;

/// Persistence for every record the dispatch core owns.
///
/// Ride writes are version guarded: `update_ride` only succeeds when the stored
/// version still equals `expected_version`, otherwise it fails with a
/// concurrency conflict and nothing is written.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_ride(&self, ride: &Ride) -> Result<(), Error>;
    async fn find_ride(&self, id: Uuid) -> Result<Option<Ride>, Error>;
    async fn update_ride(&self, ride: &Ride, expected_version: u64) -> Result<(), Error>;
    async fn rides_with_status(&self, statuses: &[Status]) -> Result<Vec<Ride>, Error>;
    /// Rides in DRIVER_FOUND whose offer deadline has passed.
    async fn rides_with_expired_offers(&self, now: DateTime<Utc>) -> Result<Vec<Ride>, Error>;

    async fn append_matching_log(&self, log: &MatchingAttemptLog) -> Result<(), Error>;
    async fn matching_logs(&self, ride_id: Uuid) -> Result<Vec<MatchingAttemptLog>, Error>;

    async fn insert_cancellation(&self, record: &CancellationRecord) -> Result<(), Error>;
    async fn cancellations(&self, ride_id: Uuid) -> Result<Vec<CancellationRecord>, Error>;
    async fn count_rider_cancellations(
        &self,
        rider_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u32, Error>;

    /// Returns `false` when an action with the same dedup key already exists.
    async fn insert_action(&self, action: &WorkflowAction) -> Result<bool, Error>;
    async fn find_action(&self, id: Uuid) -> Result<Option<WorkflowAction>, Error>;
    /// Moves a due `pending` action to `processing`; `None` if someone else got it.
    async fn claim_action(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkflowAction>, Error>;
    async fn update_action(&self, action: &WorkflowAction) -> Result<(), Error>;
    async fn due_actions(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowAction>, Error>;
    async fn actions_with_status(&self, status: ActionStatus)
        -> Result<Vec<WorkflowAction>, Error>;
    async fn actions_for_ride(&self, ride_id: Uuid) -> Result<Vec<WorkflowAction>, Error>;
    /// Returns `processing` actions untouched since `before` to `pending`.
    async fn release_stale_actions(&self, before: DateTime<Utc>) -> Result<u64, Error>;

    async fn insert_quote(&self, quote: &Quote) -> Result<(), Error>;
    async fn find_quote(&self, token: Uuid) -> Result<Option<Quote>, Error>;

    async fn upsert_zone(&self, zone: &SurgeZone) -> Result<(), Error>;
    async fn zones(&self) -> Result<Vec<SurgeZone>, Error>;

    /// One escalation per ride; a later write replaces the earlier one.
    async fn upsert_escalation(&self, escalation: &Escalation) -> Result<(), Error>;
    async fn escalations(&self) -> Result<Vec<Escalation>, Error>;
}
