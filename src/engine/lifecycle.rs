use super::stats::Counter;
use super::Engine;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::{
    entities::{dedup_key, ActionKind, Ride, Status, WorkflowAction},
    error::Error,
    external::{Event, Notification, Recipient},
    workflow::ActionExecutor,
};

/// Side effect decided while committing a ride write; enqueued once the write lands.
struct PlannedAction {
    kind: ActionKind,
    dedup_key: String,
    payload: serde_json::Value,
}

pub(crate) fn payment_payload(ride: &Ride) -> serde_json::Value {
    json!({ "attempt": ride.payment.attempts })
}

impl Engine {
    /// Read-modify-write on a ride under optimistic concurrency.
    ///
    /// `change` runs against a fresh copy each attempt; a version conflict
    /// re-reads and re-applies it up to `max_conflict_retries` times before the
    /// conflict is surfaced.
    pub(crate) async fn with_ride<F>(&self, id: Uuid, mut change: F) -> Result<Ride, Error>
    where
        F: FnMut(&mut Ride, DateTime<Utc>) -> Result<(), Error> + Send,
    {
        let mut conflicts = 0;

        loop {
            let before = self.load_ride(id).await?;
            let now = self.clock.now();

            let mut ride = before.clone();
            change(&mut ride, now)?;

            match self.commit(&before, ride, now).await {
                Err(err)
                    if err.is_concurrency_conflict_error()
                        && conflicts < self.config.max_conflict_retries =>
                {
                    conflicts += 1;
                    tracing::warn!(ride_id = %id, conflicts, "ride changed underneath us, retrying");
                }
                result => return result,
            }
        }
    }

    /// Writes `ride` if the store still holds `before.version`, then enqueues
    /// the side effects of every status it passed through.
    pub(crate) async fn commit(
        &self,
        before: &Ride,
        mut ride: Ride,
        now: DateTime<Utc>,
    ) -> Result<Ride, Error> {
        while let Some(next) = ride.status.automatic_successor() {
            ride.transition(next, now)?;
        }

        if &ride == before {
            return Ok(ride);
        }

        if before.status.is_terminal() && ride.status == before.status {
            return Err(Error::validation_error(format!(
                "ride {} is closed ({})",
                ride.id,
                ride.status.name()
            )));
        }

        if ride.version == before.version {
            ride.version += 1;
        }

        let planned = self.plan_side_effects(before, &mut ride, now)?;

        self.store.update_ride(&ride, before.version).await?;

        for action in planned {
            let enqueued = self
                .workflow
                .enqueue(ride.id, action.kind, action.dedup_key, action.payload)
                .await;

            // the transition stands; recovery re-plans payment initiation
            if let Err(err) = enqueued {
                tracing::error!(ride_id = %ride.id, "failed to enqueue {}: {}", action.kind.name(), err);
            }
        }

        if before.status != ride.status {
            tracing::info!(
                ride_id = %ride.id,
                from = %before.status.name(),
                to = %ride.status.name(),
                version = ride.version,
                "ride transitioned"
            );
        }

        Ok(ride)
    }

    fn plan_side_effects(
        &self,
        before: &Ride,
        ride: &mut Ride,
        now: DateTime<Utc>,
    ) -> Result<Vec<PlannedAction>, Error> {
        let mut planned = vec![];
        let changes = ride.history[before.history.len()..].to_vec();

        for change in changes {
            let rider = Recipient::Rider { id: ride.rider_id };
            planned.push(notification(ride.id, rider, change.status, change.version, now)?);

            if change.status == Status::DriverFound {
                if let Some(offer) = &ride.offer {
                    let recipient = Recipient::Driver { id: offer.driver_id };
                    let payload = Notification {
                        ride_id: ride.id,
                        recipient,
                        event: Event::RideOffered {
                            expires_at: offer.expires_at,
                        },
                        at: now,
                    };

                    planned.push(PlannedAction {
                        kind: ActionKind::SendNotification,
                        dedup_key: dedup_key(
                            ride.id,
                            ActionKind::SendNotification,
                            change.version,
                            &format!("{}-offer", recipient.name()),
                        ),
                        payload: serde_json::to_value(payload)?,
                    });
                }
            } else if let Some(driver_id) = ride.driver_id {
                let driver = Recipient::Driver { id: driver_id };
                planned.push(notification(ride.id, driver, change.status, change.version, now)?);
            }

            if change.status == Status::PaymentPending {
                ride.payment.attempts += 1;
                ride.payment.transaction_ref = None;

                planned.push(PlannedAction {
                    kind: ActionKind::InitiatePayment,
                    dedup_key: dedup_key(ride.id, ActionKind::InitiatePayment, change.version, "ride"),
                    payload: payment_payload(ride),
                });
            }
        }

        if let Some(last) = planned.last() {
            ride.workflow_step = Some(last.kind);
        }

        Ok(planned)
    }
}

fn notification(
    ride_id: Uuid,
    recipient: Recipient,
    status: Status,
    version: u64,
    now: DateTime<Utc>,
) -> Result<PlannedAction, Error> {
    let payload = Notification {
        ride_id,
        recipient,
        event: Event::RideStatusChanged { status, version },
        at: now,
    };

    Ok(PlannedAction {
        kind: ActionKind::SendNotification,
        dedup_key: dedup_key(ride_id, ActionKind::SendNotification, version, &recipient.name()),
        payload: serde_json::to_value(payload)?,
    })
}

#[async_trait]
impl ActionExecutor for Engine {
    #[tracing::instrument(skip(self, action), fields(ride_id = %action.ride_id, kind = %action.kind.name()))]
    async fn execute(&self, action: &WorkflowAction) -> Result<(), Error> {
        match action.kind {
            ActionKind::SendNotification => {
                let notification: Notification = serde_json::from_value(action.payload.clone())?;
                self.notifier.notify(&notification).await
            }
            ActionKind::InitiatePayment => self.initiate_payment(action.ride_id).await,
        }
    }

    async fn on_exhausted(&self, action: &WorkflowAction) -> Result<(), Error> {
        self.stats.record(Counter::ActionFailed);

        if action.kind != ActionKind::InitiatePayment {
            return Ok(());
        }

        self.with_ride(action.ride_id, |ride, now| {
            if ride.status == Status::PaymentPending {
                ride.transition(Status::PaymentFailed, now)?;
                ride.payment.needs_reconciliation = true;
            }
            Ok(())
        })
        .await?;

        tracing::error!(ride_id = %action.ride_id, "payment initiation exhausted, ride flagged for reconciliation");

        Ok(())
    }
}
