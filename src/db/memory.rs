use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Store;
use crate::entities::{
    ActionStatus, Actor, CancellationRecord, Escalation, MatchingAttemptLog, Quote, Ride, Status,
    SurgeZone, WorkflowAction,
};
use crate::error::Error;

#[derive(Default)]
struct Actions {
    by_id: HashMap<Uuid, WorkflowAction>,
    by_dedup_key: HashMap<String, Uuid>,
}

/// Process-local store used when no database is configured, and by the tests.
#[derive(Default)]
pub struct MemoryStore {
    rides: RwLock<HashMap<Uuid, Ride>>,
    matching_logs: RwLock<Vec<MatchingAttemptLog>>,
    cancellations: RwLock<Vec<CancellationRecord>>,
    actions: RwLock<Actions>,
    quotes: RwLock<HashMap<Uuid, Quote>>,
    zones: RwLock<HashMap<Uuid, SurgeZone>>,
    escalations: RwLock<HashMap<Uuid, Escalation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by_schedule(mut actions: Vec<WorkflowAction>) -> Vec<WorkflowAction> {
    actions.sort_by_key(|action| (action.scheduled_at, action.created_at));
    actions
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_ride(&self, ride: &Ride) -> Result<(), Error> {
        let mut rides = self.rides.write().await;

        if rides.contains_key(&ride.id) {
            return Err(Error::validation_error(format!("ride {} already exists", ride.id)));
        }

        rides.insert(ride.id, ride.clone());
        Ok(())
    }

    async fn find_ride(&self, id: Uuid) -> Result<Option<Ride>, Error> {
        Ok(self.rides.read().await.get(&id).cloned())
    }

    async fn update_ride(&self, ride: &Ride, expected_version: u64) -> Result<(), Error> {
        let mut rides = self.rides.write().await;

        let stored = rides
            .get_mut(&ride.id)
            .ok_or_else(|| Error::not_found_error(format!("ride {}", ride.id)))?;

        if stored.version != expected_version {
            return Err(Error::concurrency_conflict_error(
                format!("ride {}", ride.id),
                expected_version,
            ));
        }

        *stored = ride.clone();
        Ok(())
    }

    async fn rides_with_status(&self, statuses: &[Status]) -> Result<Vec<Ride>, Error> {
        Ok(self
            .rides
            .read()
            .await
            .values()
            .filter(|ride| statuses.contains(&ride.status))
            .cloned()
            .collect())
    }

    async fn rides_with_expired_offers(&self, now: DateTime<Utc>) -> Result<Vec<Ride>, Error> {
        Ok(self
            .rides
            .read()
            .await
            .values()
            .filter(|ride| {
                ride.status == Status::DriverFound
                    && ride.offer.as_ref().map_or(false, |offer| offer.is_expired(now))
            })
            .cloned()
            .collect())
    }

    async fn append_matching_log(&self, log: &MatchingAttemptLog) -> Result<(), Error> {
        self.matching_logs.write().await.push(log.clone());
        Ok(())
    }

    async fn matching_logs(&self, ride_id: Uuid) -> Result<Vec<MatchingAttemptLog>, Error> {
        Ok(self
            .matching_logs
            .read()
            .await
            .iter()
            .filter(|log| log.ride_id == ride_id)
            .cloned()
            .collect())
    }

    async fn insert_cancellation(&self, record: &CancellationRecord) -> Result<(), Error> {
        self.cancellations.write().await.push(record.clone());
        Ok(())
    }

    async fn cancellations(&self, ride_id: Uuid) -> Result<Vec<CancellationRecord>, Error> {
        Ok(self
            .cancellations
            .read()
            .await
            .iter()
            .filter(|record| record.ride_id == ride_id)
            .cloned()
            .collect())
    }

    async fn count_rider_cancellations(
        &self,
        rider_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u32, Error> {
        let count = self
            .cancellations
            .read()
            .await
            .iter()
            .filter(|record| {
                record.actor == Actor::Rider { id: rider_id } && record.created_at >= since
            })
            .count();

        Ok(count as u32)
    }

    async fn insert_action(&self, action: &WorkflowAction) -> Result<bool, Error> {
        let mut actions = self.actions.write().await;

        if actions.by_dedup_key.contains_key(&action.dedup_key) {
            return Ok(false);
        }

        actions
            .by_dedup_key
            .insert(action.dedup_key.clone(), action.id);
        actions.by_id.insert(action.id, action.clone());

        Ok(true)
    }

    async fn find_action(&self, id: Uuid) -> Result<Option<WorkflowAction>, Error> {
        Ok(self.actions.read().await.by_id.get(&id).cloned())
    }

    async fn claim_action(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkflowAction>, Error> {
        let mut actions = self.actions.write().await;

        match actions.by_id.get_mut(&id) {
            Some(action) if action.is_due(now) => {
                action.status = ActionStatus::Processing;
                action.updated_at = now;
                Ok(Some(action.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update_action(&self, action: &WorkflowAction) -> Result<(), Error> {
        let mut actions = self.actions.write().await;

        let stored = actions
            .by_id
            .get_mut(&action.id)
            .ok_or_else(|| Error::not_found_error(format!("workflow action {}", action.id)))?;
        *stored = action.clone();

        Ok(())
    }

    async fn due_actions(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowAction>, Error> {
        let due = self
            .actions
            .read()
            .await
            .by_id
            .values()
            .filter(|action| action.is_due(now))
            .cloned()
            .collect();

        Ok(sorted_by_schedule(due))
    }

    async fn actions_with_status(
        &self,
        status: ActionStatus,
    ) -> Result<Vec<WorkflowAction>, Error> {
        let matching = self
            .actions
            .read()
            .await
            .by_id
            .values()
            .filter(|action| action.status == status)
            .cloned()
            .collect();

        Ok(sorted_by_schedule(matching))
    }

    async fn actions_for_ride(&self, ride_id: Uuid) -> Result<Vec<WorkflowAction>, Error> {
        let matching = self
            .actions
            .read()
            .await
            .by_id
            .values()
            .filter(|action| action.ride_id == ride_id)
            .cloned()
            .collect();

        Ok(sorted_by_schedule(matching))
    }

    async fn release_stale_actions(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let mut actions = self.actions.write().await;
        let mut released = 0;

        for action in actions.by_id.values_mut() {
            if action.status == ActionStatus::Processing && action.updated_at < before {
                action.status = ActionStatus::Pending;
                released += 1;
            }
        }

        Ok(released)
    }

    async fn insert_quote(&self, quote: &Quote) -> Result<(), Error> {
        self.quotes.write().await.insert(quote.token, quote.clone());
        Ok(())
    }

    async fn find_quote(&self, token: Uuid) -> Result<Option<Quote>, Error> {
        Ok(self.quotes.read().await.get(&token).cloned())
    }

    async fn upsert_zone(&self, zone: &SurgeZone) -> Result<(), Error> {
        self.zones.write().await.insert(zone.id, zone.clone());
        Ok(())
    }

    async fn zones(&self) -> Result<Vec<SurgeZone>, Error> {
        Ok(self.zones.read().await.values().cloned().collect())
    }

    async fn upsert_escalation(&self, escalation: &Escalation) -> Result<(), Error> {
        self.escalations
            .write()
            .await
            .insert(escalation.ride_id, escalation.clone());
        Ok(())
    }

    async fn escalations(&self) -> Result<Vec<Escalation>, Error> {
        Ok(self.escalations.read().await.values().cloned().collect())
    }
}
