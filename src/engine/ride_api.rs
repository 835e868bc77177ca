use super::stats::Counter;
use super::Engine;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    api::RideAPI,
    entities::{Actor, CancellationRecord, MatchingAttemptLog, Ride, RideRequest, Status},
    error::Error,
};

#[async_trait]
impl RideAPI for Engine {
    #[tracing::instrument(skip(self, request), fields(rider_id = %request.rider_id, tier = %request.tier.name()))]
    async fn request_ride(&self, request: RideRequest) -> Result<Ride, Error> {
        request.validate()?;

        let pickup = request.pickup.coordinates;
        self.surge.record_demand(&pickup).await;
        let surge_multiplier = self.surge.multiplier_at(&pickup).await;

        let ride = Ride::new(request, surge_multiplier, self.clock.now());
        self.store.insert_ride(&ride).await?;
        self.stats.record(Counter::RideRequested);

        tracing::info!(ride_id = %ride.id, surge_multiplier, "ride requested");

        // REQUESTED is left immediately for DRIVER_SEARCH
        self.with_ride(ride.id, |_, _| Ok(())).await?;

        self.dispatch(ride.id).await
    }

    #[tracing::instrument(skip(self))]
    async fn find_ride(&self, id: Uuid) -> Result<Ride, Error> {
        self.load_ride(id).await
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_ride(&self, id: Uuid, actor: Actor, reason: String) -> Result<Ride, Error> {
        self.cancel(id, actor, reason).await
    }

    async fn cancellations(&self, id: Uuid) -> Result<Vec<CancellationRecord>, Error> {
        self.load_ride(id).await?;
        self.store.cancellations(id).await
    }

    /// Statuses with their own bookkeeping (offers, driver release, fares,
    /// payment attempts and settlement, disputes, cancellation records) are
    /// only reachable through their dedicated operations.
    #[tracing::instrument(skip(self))]
    async fn transition_ride(
        &self,
        id: Uuid,
        expected_version: u64,
        status: Status,
    ) -> Result<Ride, Error> {
        if matches!(
            status,
            Status::DriverFound
                | Status::DriverAccepted
                | Status::DriverRejected
                | Status::Completed
                | Status::PaymentPending
                | Status::PaymentCompleted
                | Status::PaymentFailed
                | Status::Disputed
                | Status::Refunded
        ) || status.is_cancelled()
        {
            return Err(Error::validation_error(format!(
                "{} can only be reached through its dedicated operation",
                status.name()
            )));
        }

        let before = self.load_ride(id).await?;

        if before.version != expected_version {
            return Err(Error::concurrency_conflict_error(
                format!("ride {}", id),
                expected_version,
            ));
        }

        let now = self.clock.now();
        let mut ride = before.clone();
        ride.transition(status, now)?;

        self.commit(&before, ride, now).await
    }

    async fn matching_logs(&self, id: Uuid) -> Result<Vec<MatchingAttemptLog>, Error> {
        self.load_ride(id).await?;
        self.store.matching_logs(id).await
    }

    #[tracing::instrument(skip(self))]
    async fn record_payment_result(
        &self,
        id: Uuid,
        transaction_ref: String,
        succeeded: bool,
    ) -> Result<Ride, Error> {
        self.settle_payment(id, transaction_ref, succeeded).await
    }

    #[tracing::instrument(skip(self))]
    async fn retry_payment(&self, id: Uuid) -> Result<Ride, Error> {
        self.retry_failed_payment(id).await
    }

    #[tracing::instrument(skip(self))]
    async fn open_dispute(&self, id: Uuid, reason: String) -> Result<Ride, Error> {
        if reason.trim().is_empty() {
            return Err(Error::validation_error("a dispute needs a reason"));
        }

        let ride = self
            .with_ride(id, |ride, now| {
                ride.transition(Status::Disputed, now)?;
                ride.dispute_reason = Some(reason.clone());
                Ok(())
            })
            .await?;

        tracing::info!(%reason, "dispute opened");

        Ok(ride)
    }

    #[tracing::instrument(skip(self))]
    async fn resolve_dispute(&self, id: Uuid, refund: bool) -> Result<Ride, Error> {
        let next = if refund {
            Status::Refunded
        } else {
            Status::PaymentCompleted
        };

        self.with_ride(id, |ride, now| ride.transition(next, now))
            .await
    }
}
