use super::stats::Counter;
use super::Engine;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    entities::{Actor, Availability, CancellationRecord, Ride, Status, TierPolicy},
    error::Error,
};

#[derive(Clone, Debug, PartialEq)]
pub struct CancellationDecision {
    pub within_free_window: bool,
    pub fee: f64,
}

/// Decides whether `actor` may cancel `ride` now and what it costs.
///
/// `prior_rider_cancellations` is the rider's count over the last 24 hours,
/// not including this one. Only riders pay fees or hit the daily cap.
pub fn evaluate_cancellation(
    policy: &TierPolicy,
    arrived_fee_multiplier: f64,
    ride: &Ride,
    actor: &Actor,
    prior_rider_cancellations: u32,
    now: DateTime<Utc>,
) -> Result<CancellationDecision, Error> {
    if ride.status == Status::InProgress {
        return Err(Error::policy_violation_error(format!(
            "ride {} is in progress and can no longer be cancelled",
            ride.id
        )));
    }

    if !ride.status.is_pre_trip() {
        return Err(Error::illegal_transition_error(
            ride.status,
            actor.cancelled_status(),
        ));
    }

    let within_free_window = now - ride.timestamps.created_at <= policy.free_cancellation_window();

    match actor {
        Actor::Rider { id } => {
            if id != &ride.rider_id {
                return Err(Error::validation_error(format!(
                    "rider {} does not own ride {}",
                    id, ride.id
                )));
            }

            if prior_rider_cancellations >= policy.daily_cancellation_cap {
                return Err(Error::policy_violation_error(format!(
                    "rider {} reached the daily limit of {} cancellations",
                    id, policy.daily_cancellation_cap
                )));
            }

            let fee = if within_free_window {
                0.0
            } else if ride.status == Status::DriverArrived {
                policy.cancellation_fee * arrived_fee_multiplier
            } else {
                policy.cancellation_fee
            };

            Ok(CancellationDecision {
                within_free_window,
                fee: (fee * 100.0).round() / 100.0,
            })
        }
        Actor::Driver { id } => {
            if ride.driver_id != Some(*id) {
                return Err(Error::validation_error(format!(
                    "driver {} is not assigned to ride {}",
                    id, ride.id
                )));
            }

            Ok(CancellationDecision {
                within_free_window,
                fee: 0.0,
            })
        }
        Actor::System => Ok(CancellationDecision {
            within_free_window,
            fee: 0.0,
        }),
    }
}

impl Engine {
    #[tracing::instrument(skip(self))]
    pub(crate) async fn cancel(&self, id: Uuid, actor: Actor, reason: String) -> Result<Ride, Error> {
        let now = self.clock.now();

        let prior = match actor {
            Actor::Rider { id: rider_id } => {
                self.store
                    .count_rider_cancellations(rider_id, now - Duration::hours(24))
                    .await?
            }
            _ => 0,
        };

        let mut decision = None;
        let mut previous = None;

        let ride = self
            .with_ride(id, |ride, now| {
                let policy = self.config.tiers.get(ride.tier);
                let evaluated = evaluate_cancellation(
                    policy,
                    self.config.arrived_fee_multiplier,
                    ride,
                    &actor,
                    prior,
                    now,
                )?;

                previous = Some(ride.status);
                ride.transition(actor.cancelled_status(), now)?;
                ride.offer = None;

                decision = Some(evaluated);
                Ok(())
            })
            .await?;

        let decision = decision.ok_or_else(|| Error::unexpected_error("cancellation was not evaluated"))?;

        let record = CancellationRecord {
            id: Uuid::new_v4(),
            ride_id: ride.id,
            rider_id: ride.rider_id,
            actor,
            reason,
            created_at: now,
            within_free_window: decision.within_free_window,
            fee: decision.fee,
        };
        self.store.insert_cancellation(&record).await?;

        if let Some(driver_id) = ride.driver_id {
            let held = match previous {
                Some(Status::DriverFound) => Availability::Offered,
                _ => Availability::OnTrip,
            };
            self.release_driver(driver_id, held).await;
        }

        self.stats.record(Counter::Cancellation);

        tracing::info!(
            actor = %actor.name(),
            fee = decision.fee,
            within_free_window = decision.within_free_window,
            "ride cancelled"
        );

        Ok(ride)
    }
}
