use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::Coordinates;
use crate::error::Error;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurgeZone {
    pub id: Uuid,
    pub name: String,
    pub center: Coordinates,
    pub radius_km: f64,
    pub multiplier: f64,
    pub demand: f64,
    pub supply: u32,
    pub last_recomputed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZoneDefinition {
    pub name: String,
    pub center: Coordinates,
    pub radius_km: f64,
}

impl ZoneDefinition {
    pub fn validate(&self) -> Result<(), Error> {
        self.center.validate()?;

        if self.name.trim().is_empty() {
            return Err(Error::validation_error("zone name is required"));
        }

        if !self.radius_km.is_finite() || self.radius_km <= 0.0 {
            return Err(Error::validation_error(format!(
                "zone radius must be positive: {}",
                self.radius_km
            )));
        }

        Ok(())
    }
}

impl SurgeZone {
    pub fn new(definition: ZoneDefinition, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: definition.name,
            center: definition.center,
            radius_km: definition.radius_km,
            multiplier: 1.0,
            demand: 0.0,
            supply: 0,
            last_recomputed_at: now,
        }
    }

    pub fn contains(&self, point: &Coordinates) -> bool {
        self.center.distance_km(point) <= self.radius_km
    }
}
