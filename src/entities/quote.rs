use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Fare, Location, Tier, VehicleType};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub token: Uuid,
    pub pickup: Location,
    pub destination: Location,
    pub tier: Tier,
    pub vehicle_type: VehicleType,
    pub surge_multiplier: f64,
    pub estimate: Fare,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub pickup: Location,
    pub destination: Location,
    pub tier: Tier,
    pub vehicle_type: VehicleType,
}
