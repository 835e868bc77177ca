mod grid;
mod postgis;

pub use grid::GridLocator;
pub use postgis::PgLocator;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entities::{Availability, Coordinates, Driver, Tier, VehicleType};
use crate::error::Error;

/// What a candidate search must satisfy besides distance.
#[derive(Clone, Debug)]
pub struct SearchFilter {
    pub tier: Tier,
    pub vehicle_type: VehicleType,
    pub excluded: Vec<Uuid>,
    /// Positions reported before this instant are ignored.
    pub fresh_since: DateTime<Utc>,
}

impl SearchFilter {
    pub fn admits(&self, driver: &Driver) -> bool {
        driver.is_available()
            && driver.vehicle.vehicle_type == self.vehicle_type
            && driver.is_eligible_for(self.tier)
            && !self.excluded.contains(&driver.id)
            && driver
                .location_updated_at
                .map_or(false, |updated_at| updated_at >= self.fresh_since)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub driver: Driver,
    pub distance_km: f64,
}

/// Live driver positions and the availability flag that dispatch contends on.
///
/// `compare_and_swap` is the only way the engine moves a driver between
/// `available`, `offered` and `on_trip`; a `false` return means another ride got
/// there first.
#[async_trait]
pub trait DriverLocator: Send + Sync {
    async fn register(&self, driver: Driver) -> Result<Driver, Error>;

    async fn find(&self, id: Uuid) -> Result<Option<Driver>, Error>;

    /// Driver-reported location and offline/available toggle.
    async fn report(
        &self,
        id: Uuid,
        location: Option<Coordinates>,
        availability: Option<Availability>,
        now: DateTime<Utc>,
    ) -> Result<Driver, Error>;

    /// Candidates within `radius_km` of `point`, nearest first. An empty result is not an error.
    async fn nearest_within(
        &self,
        point: Coordinates,
        radius_km: f64,
        filter: &SearchFilter,
    ) -> Result<Vec<Candidate>, Error>;

    async fn count_available_within(
        &self,
        point: Coordinates,
        radius_km: f64,
        fresh_since: DateTime<Utc>,
    ) -> Result<u32, Error>;

    async fn compare_and_swap(
        &self,
        id: Uuid,
        expected: Availability,
        new: Availability,
        now: DateTime<Utc>,
    ) -> Result<bool, Error>;
}

/// Idle bookkeeping that accompanies an availability swap.
pub(crate) fn idle_since_after_swap(
    current: Option<DateTime<Utc>>,
    expected: Availability,
    new: Availability,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match (expected, new) {
        // a declined or expired offer keeps the driver's place in the idle queue
        (Availability::Offered, Availability::Available) => current.or(Some(now)),
        (_, Availability::Available) => Some(now),
        (_, Availability::Offered) => current,
        _ => None,
    }
}
