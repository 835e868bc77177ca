use super::stats::Counter;
use super::Engine;

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use uuid::Uuid;

use crate::{
    config::MatchingConfig,
    entities::{
        Actor, AttemptOutcome, Availability, Driver, MatchingAttemptLog, Offer, Ride, Status, Tier,
    },
    error::Error,
    locator::{Candidate, SearchFilter},
};

const SCORE_EPSILON: f64 = 1e-9;

#[derive(Clone, Debug, PartialEq)]
pub struct ScoredCandidate {
    pub driver: Driver,
    pub distance_km: f64,
    pub score: f64,
}

/// Weighted score in [0, 1], or `None` when the vehicle cannot serve the ride.
pub fn score_candidate(
    config: &MatchingConfig,
    ride: &Ride,
    radius_km: f64,
    candidate: &Candidate,
    now: DateTime<Utc>,
) -> Option<f64> {
    let driver = &candidate.driver;
    let compatibility = driver.compatibility(ride.vehicle_type, &ride.amenities)?;

    let proximity = if radius_km > 0.0 {
        (1.0 - candidate.distance_km / radius_km).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let rating = (driver.rating / 5.0).clamp(0.0, 1.0);
    let idle = match driver.idle_since {
        Some(since) if config.idle_saturation_secs > 0 => {
            let idle_secs = (now - since).num_seconds().max(0) as f64;
            (idle_secs / config.idle_saturation_secs as f64).min(1.0)
        }
        _ => 0.0,
    };
    let tier_affinity = match (ride.tier, driver.trusted) {
        (Tier::Normal, _) | (_, true) => 1.0,
        (_, false) => 0.5,
    };

    let weights = &config.weights;
    let total = weights.total();
    if total <= 0.0 {
        return Some(0.0);
    }

    Some(
        (weights.distance * proximity
            + weights.rating * rating
            + weights.compatibility * compatibility
            + weights.idle_time * idle
            + weights.tier_affinity * tier_affinity)
            / total,
    )
}

/// Best first: score, then nearer, then better rated, then longest idle.
pub fn rank_candidates(mut candidates: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
    candidates.sort_by(|a, b| {
        if (a.score - b.score).abs() > SCORE_EPSILON {
            return b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal);
        }

        a.distance_km
            .partial_cmp(&b.distance_km)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.driver
                    .rating
                    .partial_cmp(&a.driver.rating)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| match (a.driver.idle_since, b.driver.idle_since) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
    });

    candidates
}

fn search_round(ride: &Ride) -> u32 {
    ride.history
        .iter()
        .filter(|change| change.status == Status::DriverSearch)
        .count() as u32
}

impl Engine {
    fn search_radius_km(&self, ride: &Ride) -> f64 {
        let base = self.config.tiers.get(ride.tier).search_radius_km;
        base * self
            .config
            .matching
            .radius_expansion_factor
            .powi(ride.radius_expansions as i32)
    }

    /// Runs matching rounds until the ride holds an offer or the pool is exhausted.
    ///
    /// A lost CAS moves straight on to the next-ranked candidate. An empty
    /// round widens the radius while expansions remain, after which the ride is
    /// cancelled by the system and `NoDriverAvailable` is returned.
    #[tracing::instrument(skip(self))]
    pub(crate) async fn dispatch(&self, id: Uuid) -> Result<Ride, Error> {
        loop {
            let ride = self.load_ride(id).await?;

            if ride.status != Status::DriverSearch {
                tracing::debug!(status = %ride.status.name(), "ride is not searching, stopping");
                return Ok(ride);
            }

            let now = self.clock.now();
            let radius_km = self.search_radius_km(&ride);
            let filter = SearchFilter {
                tier: ride.tier,
                vehicle_type: ride.vehicle_type,
                excluded: ride.excluded_drivers(now),
                fresh_since: self.location_fresh_since(),
            };

            let candidates = self
                .locator
                .nearest_within(ride.pickup.coordinates, radius_km, &filter)
                .await?;

            let ranked = rank_candidates(
                candidates
                    .into_iter()
                    .filter_map(|candidate| {
                        let score =
                            score_candidate(&self.config.matching, &ride, radius_km, &candidate, now)?;
                        Some(ScoredCandidate {
                            driver: candidate.driver,
                            distance_km: candidate.distance_km,
                            score,
                        })
                    })
                    .collect(),
            );

            tracing::info!(radius_km, candidates = ranked.len(), "matching round");

            let mut log = MatchingAttemptLog::new(id, search_round(&ride), radius_km, now);

            for candidate in ranked.iter() {
                let driver_id = candidate.driver.id;

                let claimed = self
                    .locator
                    .compare_and_swap(
                        driver_id,
                        Availability::Available,
                        Availability::Offered,
                        self.clock.now(),
                    )
                    .await?;

                if !claimed {
                    tracing::info!(%driver_id, "driver claimed by another ride, trying next");
                    log.record(driver_id, candidate.score, candidate.distance_km, AttemptOutcome::ClaimLost);
                    self.stats.record(Counter::ClaimLost);
                    continue;
                }

                match self.offer(id, candidate).await {
                    Ok(ride) => {
                        log.record(driver_id, candidate.score, candidate.distance_km, AttemptOutcome::Offered);
                        self.store.append_matching_log(&log).await?;
                        self.stats.record(Counter::OfferMade);

                        tracing::info!(%driver_id, score = candidate.score, "offer made");
                        return Ok(ride);
                    }
                    Err(err) => {
                        self.release_driver(driver_id, Availability::Offered).await;
                        log.record(driver_id, candidate.score, candidate.distance_km, AttemptOutcome::Superseded);
                        self.store.append_matching_log(&log).await?;

                        if err.is_illegal_transition_error() {
                            tracing::info!("ride moved on while claiming a driver");
                            return self.load_ride(id).await;
                        }

                        return Err(err);
                    }
                }
            }

            self.store.append_matching_log(&log).await?;

            if ride.radius_expansions < self.config.matching.max_radius_expansions {
                tracing::info!(radius_km, "no driver found, widening search");

                self.with_ride(id, |ride, _| {
                    if ride.status == Status::DriverSearch {
                        ride.radius_expansions += 1;
                    }
                    Ok(())
                })
                .await?;

                self.stats.record(Counter::RadiusExpanded);
                continue;
            }

            tracing::warn!(radius_km, "candidate pool exhausted");
            self.stats.record(Counter::NoDriverAvailable);

            match self
                .cancel(id, Actor::System, "no driver available".into())
                .await
            {
                Ok(_) => {}
                Err(err) if err.is_illegal_transition_error() => return self.load_ride(id).await,
                Err(err) => return Err(err),
            }

            return Err(Error::no_driver_available_error(id));
        }
    }

    async fn offer(&self, id: Uuid, candidate: &ScoredCandidate) -> Result<Ride, Error> {
        let driver_id = candidate.driver.id;

        self.with_ride(id, |ride, now| {
            let timeout = self.config.tiers.get(ride.tier).offer_timeout();

            ride.transition(Status::DriverFound, now)?;
            ride.driver_id = Some(driver_id);
            ride.offer = Some(Offer {
                driver_id,
                score: candidate.score,
                distance_km: candidate.distance_km,
                offered_at: now,
                expires_at: now + timeout,
            });

            Ok(())
        })
        .await
    }

    /// Returns an engine-held driver to `available`.
    pub(crate) async fn release_driver(&self, driver_id: Uuid, from: Availability) {
        let released = self
            .locator
            .compare_and_swap(driver_id, from, Availability::Available, self.clock.now())
            .await;

        match released {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(%driver_id, from = %from.name(), "driver was not in the expected state on release")
            }
            Err(err) => tracing::error!(%driver_id, "failed to release driver: {}", err),
        }
    }

    /// Ends the current offer after a decline or timeout, excludes the driver
    /// and searches again.
    #[tracing::instrument(skip(self))]
    pub(crate) async fn release_offer(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
        outcome: AttemptOutcome,
    ) -> Result<Ride, Error> {
        let timed_out = outcome == AttemptOutcome::TimedOut;
        let mut released: Option<Offer> = None;

        let ride = self
            .with_ride(ride_id, |ride, now| {
                let offer = ride
                    .offer
                    .clone()
                    .filter(|offer| offer.driver_id == driver_id && ride.status == Status::DriverFound)
                    .ok_or_else(|| {
                        Error::validation_error(format!(
                            "driver {} holds no offer for ride {}",
                            driver_id, ride.id
                        ))
                    })?;

                if timed_out && !offer.is_expired(now) {
                    return Err(Error::validation_error(format!(
                        "offer for ride {} has not expired",
                        ride.id
                    )));
                }

                ride.transition(Status::DriverRejected, now)?;
                ride.exclude(driver_id, self.config.exclusion_until(now));
                ride.offer = None;
                ride.driver_id = None;

                released = Some(offer);
                Ok(())
            })
            .await?;

        self.release_driver(driver_id, Availability::Offered).await;

        if let Some(offer) = released {
            let round = search_round(&ride).saturating_sub(1);
            let mut log = MatchingAttemptLog::new(ride_id, round, self.search_radius_km(&ride), self.clock.now());
            log.record(driver_id, offer.score, offer.distance_km, outcome);
            self.store.append_matching_log(&log).await?;
        }

        if timed_out {
            tracing::info!(%driver_id, "offer expired");
            self.stats.record(Counter::OfferExpired);
        } else {
            tracing::info!(%driver_id, "offer declined");
            self.stats.record(Counter::OfferDeclined);
        }

        match self.dispatch(ride_id).await {
            Err(err) if err.is_no_driver_available_error() => self.load_ride(ride_id).await,
            result => result,
        }
    }

    /// Times out every offer whose deadline has passed. Returns how many were released.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired_offers(&self) -> Result<usize, Error> {
        let expired = self
            .store
            .rides_with_expired_offers(self.clock.now())
            .await?;

        let releases = expired.iter().filter_map(|ride| {
            let offer = ride.offer.as_ref()?;
            Some(self.release_offer(ride.id, offer.driver_id, AttemptOutcome::TimedOut))
        });

        let mut released = 0;

        for result in join_all(releases).await {
            match result {
                Ok(_) => released += 1,
                // accepted or declined between the scan and the release
                Err(err) if err.is_validation_error() || err.is_illegal_transition_error() => {
                    tracing::debug!("offer already settled: {}", err)
                }
                Err(err) => tracing::error!("failed to expire offer: {}", err),
            }
        }

        Ok(released)
    }
}
