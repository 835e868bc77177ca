use super::stats::Counter;
use super::Engine;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    api::DriverAPI,
    entities::{
        AttemptOutcome, Availability, Coordinates, Driver, DriverRegistration, Fare, Ride, Status,
    },
    error::Error,
};

fn ensure_offer_open(ride: &Ride, driver_id: Uuid, now: DateTime<Utc>) -> Result<(), Error> {
    if ride.status != Status::DriverFound {
        return Err(Error::illegal_transition_error(
            ride.status,
            Status::DriverAccepted,
        ));
    }

    let offer = ride
        .offer
        .as_ref()
        .filter(|offer| offer.driver_id == driver_id)
        .ok_or_else(|| {
            Error::validation_error(format!(
                "driver {} holds no offer for ride {}",
                driver_id, ride.id
            ))
        })?;

    if offer.is_expired(now) {
        return Err(Error::validation_error(format!(
            "offer for ride {} expired at {}",
            ride.id, offer.expires_at
        )));
    }

    Ok(())
}

fn ensure_assigned(ride: &Ride, driver_id: Uuid) -> Result<(), Error> {
    if ride.driver_id != Some(driver_id) {
        return Err(Error::validation_error(format!(
            "driver {} is not assigned to ride {}",
            driver_id, ride.id
        )));
    }

    Ok(())
}

impl Engine {
    /// Undoes an accept's claim when the ride write did not land. The driver
    /// goes back to `offered` while the ride still holds their offer and to
    /// `available` otherwise.
    async fn return_claim(&self, ride_id: Uuid, driver_id: Uuid) {
        let still_offered = match self.load_ride(ride_id).await {
            Ok(ride) => {
                ride.status == Status::DriverFound
                    && ride
                        .offer
                        .as_ref()
                        .map_or(false, |offer| offer.driver_id == driver_id)
            }
            Err(err) => {
                tracing::warn!(%ride_id, "could not reload ride to return claim: {}", err);
                false
            }
        };

        let back_to = if still_offered {
            Availability::Offered
        } else {
            Availability::Available
        };

        let returned = self
            .locator
            .compare_and_swap(driver_id, Availability::OnTrip, back_to, self.clock.now())
            .await;

        match returned {
            Ok(true) => tracing::info!(%driver_id, to = %back_to.name(), "claim returned"),
            Ok(false) => tracing::warn!(%driver_id, "claimed driver moved before the claim was returned"),
            Err(err) => tracing::error!(%driver_id, "failed to return claim: {}", err),
        }
    }

    async fn progress(&self, ride_id: Uuid, driver_id: Uuid, next: Status) -> Result<Ride, Error> {
        self.with_ride(ride_id, |ride, now| {
            ensure_assigned(ride, driver_id)?;
            ride.transition(next, now)
        })
        .await
    }
}

#[async_trait]
impl DriverAPI for Engine {
    #[tracing::instrument(skip(self, registration))]
    async fn register_driver(&self, registration: DriverRegistration) -> Result<Driver, Error> {
        registration.validate()?;

        let driver = self.locator.register(Driver::new(registration)).await?;
        tracing::info!(driver_id = %driver.id, "driver registered");

        Ok(driver)
    }

    #[tracing::instrument(skip(self))]
    async fn find_driver(&self, id: Uuid) -> Result<Driver, Error> {
        self.locator
            .find(id)
            .await?
            .ok_or_else(|| Error::not_found_error(format!("driver {}", id)))
    }

    #[tracing::instrument(skip(self))]
    async fn update_driver_status(
        &self,
        id: Uuid,
        location: Option<Coordinates>,
        availability: Option<Availability>,
    ) -> Result<Driver, Error> {
        if location.is_none() && availability.is_none() {
            return Err(Error::validation_error(
                "a location or an availability is required",
            ));
        }

        self.locator
            .report(id, location, availability, self.clock.now())
            .await
    }

    /// The driver is claimed `offered -> on_trip` before the ride moves to
    /// DRIVER_ACCEPTED, so a ride is never accepted while its driver is still
    /// `offered`. A cancel or timeout that wins the race leaves the claim to
    /// be returned here.
    #[tracing::instrument(skip(self))]
    async fn accept_ride(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error> {
        let current = self.load_ride(ride_id).await?;
        ensure_offer_open(&current, driver_id, self.clock.now())?;

        let claimed = self
            .locator
            .compare_and_swap(
                driver_id,
                Availability::Offered,
                Availability::OnTrip,
                self.clock.now(),
            )
            .await?;

        if !claimed {
            return Err(Error::validation_error(format!(
                "driver {} no longer holds the offer for ride {}",
                driver_id, ride_id
            )));
        }

        let accepted = self
            .with_ride(ride_id, |ride, now| {
                ensure_offer_open(ride, driver_id, now)?;
                ride.transition(Status::DriverAccepted, now)?;
                ride.offer = None;
                Ok(())
            })
            .await;

        let ride = match accepted {
            Ok(ride) => ride,
            Err(err) => {
                self.return_claim(ride_id, driver_id).await;
                return Err(err);
            }
        };

        self.stats.record(Counter::OfferAccepted);
        tracing::info!(%driver_id, "offer accepted");

        Ok(ride)
    }

    #[tracing::instrument(skip(self))]
    async fn decline_ride(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error> {
        self.release_offer(ride_id, driver_id, AttemptOutcome::Declined)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn driver_en_route(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error> {
        self.progress(ride_id, driver_id, Status::DriverEnRoute).await
    }

    #[tracing::instrument(skip(self))]
    async fn driver_arrived(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error> {
        self.progress(ride_id, driver_id, Status::DriverArrived).await
    }

    #[tracing::instrument(skip(self))]
    async fn start_trip(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error> {
        self.progress(ride_id, driver_id, Status::InProgress).await
    }

    #[tracing::instrument(skip(self))]
    async fn complete_trip(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error> {
        let ride = self
            .with_ride(ride_id, |ride, now| {
                ensure_assigned(ride, driver_id)?;

                let started_at = ride.timestamps.started_at.unwrap_or(now);
                let minutes = (now - started_at).num_seconds().max(0) as f64 / 60.0;

                ride.transition(Status::Completed, now)?;
                ride.fare = Some(Fare::calculate(
                    self.config.tiers.get(ride.tier),
                    ride.trip_distance_km(),
                    minutes,
                    ride.surge_multiplier,
                    self.config.commission_rate,
                ));

                Ok(())
            })
            .await?;

        self.release_driver(driver_id, Availability::OnTrip).await;

        if let Some(fare) = &ride.fare {
            tracing::info!(total = fare.total, driver_earnings = fare.driver_earnings, "trip completed");
        }

        Ok(ride)
    }
}
