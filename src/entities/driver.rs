use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Coordinates, Tier};
use crate::error::Error;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub location: Option<Coordinates>,
    pub location_updated_at: Option<DateTime<Utc>>,
    pub availability: Availability,
    pub rating: f64,
    pub vehicle: Vehicle,
    pub trusted: bool,
    pub idle_since: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Offline,
    Available,
    Offered,
    OnTrip,
}

impl Availability {
    pub fn name(&self) -> String {
        match self {
            Self::Offline => "offline".into(),
            Self::Available => "available".into(),
            Self::Offered => "offered".into(),
            Self::OnTrip => "on_trip".into(),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Offline => 0,
            Self::Available => 1,
            Self::Offered => 2,
            Self::OnTrip => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Offline),
            1 => Some(Self::Available),
            2 => Some(Self::Offered),
            3 => Some(Self::OnTrip),
            _ => None,
        }
    }

    /// Drivers may only toggle between offline and available themselves;
    /// offered and on_trip belong to the dispatch engine.
    pub fn is_driver_reportable(&self) -> bool {
        matches!(self, Self::Offline | Self::Available)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Economy,
    Comfort,
    Suv,
    Luxury,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Amenity {
    ChildSeat,
    WheelchairAccess,
    PetFriendly,
    Wifi,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub vehicle_type: VehicleType,
    pub plate: String,
    pub tiers: Vec<Tier>,
    pub amenities: Vec<Amenity>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverRegistration {
    pub id: Option<Uuid>,
    pub rating: f64,
    pub vehicle: Vehicle,
    pub trusted: bool,
}

impl DriverRegistration {
    pub fn validate(&self) -> Result<(), Error> {
        if !(0.0..=5.0).contains(&self.rating) {
            return Err(Error::validation_error(format!(
                "rating out of range: {}",
                self.rating
            )));
        }

        if self.vehicle.plate.trim().is_empty() {
            return Err(Error::validation_error("vehicle plate is required"));
        }

        if self.vehicle.tiers.is_empty() {
            return Err(Error::validation_error(
                "vehicle must be eligible for at least one tier",
            ));
        }

        Ok(())
    }
}

impl Driver {
    pub fn new(registration: DriverRegistration) -> Self {
        Self {
            id: registration.id.unwrap_or_else(Uuid::new_v4),
            location: None,
            location_updated_at: None,
            availability: Availability::Offline,
            rating: registration.rating,
            vehicle: registration.vehicle,
            trusted: registration.trusted,
            idle_since: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.availability == Availability::Available
    }

    pub fn is_eligible_for(&self, tier: Tier) -> bool {
        if tier.requires_trusted_driver() && !self.trusted {
            return false;
        }

        self.vehicle.tiers.contains(&tier)
    }

    /// Binary gate on vehicle type, then partial credit for requested amenities.
    /// `None` means the vehicle cannot serve the request at all.
    pub fn compatibility(&self, vehicle_type: VehicleType, amenities: &[Amenity]) -> Option<f64> {
        if self.vehicle.vehicle_type != vehicle_type {
            return None;
        }

        if amenities.is_empty() {
            return Some(1.0);
        }

        let satisfied = amenities
            .iter()
            .filter(|amenity| self.vehicle.amenities.contains(amenity))
            .count();

        Some(0.8 + 0.2 * satisfied as f64 / amenities.len() as f64)
    }

    #[tracing::instrument(skip(self), fields(driver_id = %self.id))]
    pub fn report(
        &mut self,
        location: Option<Coordinates>,
        availability: Option<Availability>,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        if let Some(location) = location {
            location.validate()?;
            self.location = Some(location);
            self.location_updated_at = Some(now);
        }

        if let Some(availability) = availability {
            if !availability.is_driver_reportable() {
                return Err(Error::validation_error(format!(
                    "drivers cannot report themselves as {}",
                    availability.name()
                )));
            }

            match (self.availability, availability) {
                (Availability::Offline, Availability::Available) => {
                    if self.location.is_none() {
                        return Err(Error::validation_error(
                            "a location is required before going available",
                        ));
                    }
                    self.availability = Availability::Available;
                    self.idle_since = Some(now);
                }
                (Availability::Available, Availability::Offline) => {
                    self.availability = Availability::Offline;
                    self.idle_since = None;
                }
                (current, requested) if current == requested => {}
                (current, requested) => {
                    return Err(Error::illegal_transition_error(current, requested));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(vehicle_type: VehicleType, amenities: Vec<Amenity>, trusted: bool) -> Driver {
        Driver::new(DriverRegistration {
            id: None,
            rating: 4.8,
            vehicle: Vehicle {
                vehicle_type,
                plate: "B-CU 100".into(),
                tiers: vec![Tier::Normal, Tier::Vip],
                amenities,
            },
            trusted,
        })
    }

    #[test]
    fn compatibility_gates_on_vehicle_type() {
        let driver = driver(VehicleType::Comfort, vec![], true);

        assert_eq!(driver.compatibility(VehicleType::Suv, &[]), None);
        assert_eq!(driver.compatibility(VehicleType::Comfort, &[]), Some(1.0));
    }

    #[test]
    fn compatibility_gives_partial_credit_for_amenities() {
        let driver = driver(VehicleType::Suv, vec![Amenity::ChildSeat], true);

        let score = driver
            .compatibility(VehicleType::Suv, &[Amenity::ChildSeat, Amenity::Wifi])
            .unwrap();
        assert!((score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn vip_requires_trusted_flag() {
        assert!(!driver(VehicleType::Luxury, vec![], false).is_eligible_for(Tier::Vip));
        assert!(driver(VehicleType::Luxury, vec![], true).is_eligible_for(Tier::Vip));
        assert!(!driver(VehicleType::Luxury, vec![], true).is_eligible_for(Tier::Premium));
    }

    #[test]
    fn drivers_cannot_claim_engine_owned_states() {
        let mut driver = driver(VehicleType::Economy, vec![], false);
        let now = Utc::now();

        assert!(driver
            .report(None, Some(Availability::Available), now)
            .unwrap_err()
            .is_validation_error());

        driver
            .report(Some(Coordinates::new(1.0, 1.0)), Some(Availability::Available), now)
            .unwrap();
        assert_eq!(driver.idle_since, Some(now));

        assert!(driver
            .report(None, Some(Availability::OnTrip), now)
            .unwrap_err()
            .is_validation_error());
    }
}
