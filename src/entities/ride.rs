use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{ActionKind, Amenity, Location, Tier, TierPolicy, VehicleType};
use crate::error::Error;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub pickup: Location,
    pub destination: Location,
    pub tier: Tier,
    pub vehicle_type: VehicleType,
    pub amenities: Vec<Amenity>,
    pub status: Status,
    pub timestamps: Timestamps,
    pub fare: Option<Fare>,
    pub surge_multiplier: f64,
    pub version: u64,
    pub workflow_step: Option<ActionKind>,
    pub offer: Option<Offer>,
    pub exclusions: Vec<Exclusion>,
    pub radius_expansions: u32,
    pub payment: PaymentState,
    pub history: Vec<StatusChange>,
    /// Rider's stated reason, kept from the moment a dispute is opened.
    #[serde(default)]
    pub dispute_reason: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Requested,
    DriverSearch,
    DriverFound,
    DriverAccepted,
    DriverRejected,
    DriverEnRoute,
    DriverArrived,
    InProgress,
    Completed,
    PaymentPending,
    PaymentCompleted,
    PaymentFailed,
    CancelledByRider,
    CancelledByDriver,
    CancelledBySystem,
    Disputed,
    Refunded,
}

impl Status {
    pub fn name(&self) -> String {
        match self {
            Self::Requested => "REQUESTED".into(),
            Self::DriverSearch => "DRIVER_SEARCH".into(),
            Self::DriverFound => "DRIVER_FOUND".into(),
            Self::DriverAccepted => "DRIVER_ACCEPTED".into(),
            Self::DriverRejected => "DRIVER_REJECTED".into(),
            Self::DriverEnRoute => "DRIVER_EN_ROUTE".into(),
            Self::DriverArrived => "DRIVER_ARRIVED".into(),
            Self::InProgress => "IN_PROGRESS".into(),
            Self::Completed => "COMPLETED".into(),
            Self::PaymentPending => "PAYMENT_PENDING".into(),
            Self::PaymentCompleted => "PAYMENT_COMPLETED".into(),
            Self::PaymentFailed => "PAYMENT_FAILED".into(),
            Self::CancelledByRider => "CANCELLED_BY_RIDER".into(),
            Self::CancelledByDriver => "CANCELLED_BY_DRIVER".into(),
            Self::CancelledBySystem => "CANCELLED_BY_SYSTEM".into(),
            Self::Disputed => "DISPUTED".into(),
            Self::Refunded => "REFUNDED".into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PaymentCompleted | Self::Refunded) || self.is_cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::CancelledByRider | Self::CancelledByDriver | Self::CancelledBySystem
        )
    }

    /// States before the trip starts; these are the only ones that may be cancelled.
    pub fn is_pre_trip(&self) -> bool {
        matches!(
            self,
            Self::Requested
                | Self::DriverSearch
                | Self::DriverFound
                | Self::DriverAccepted
                | Self::DriverRejected
                | Self::DriverEnRoute
                | Self::DriverArrived
        )
    }

    /// The transition table.
    pub fn can_transition_to(&self, next: Status) -> bool {
        use Status::*;

        match (self, next) {
            (Requested, DriverSearch) => true,
            (DriverSearch, DriverFound) => true,
            (DriverFound, DriverAccepted) | (DriverFound, DriverRejected) => true,
            (DriverRejected, DriverSearch) => true,
            (DriverAccepted, DriverEnRoute) => true,
            (DriverEnRoute, DriverArrived) => true,
            (DriverArrived, InProgress) => true,
            (InProgress, Completed) => true,
            (Completed, PaymentPending) => true,
            (PaymentPending, PaymentCompleted) | (PaymentPending, PaymentFailed) => true,
            (PaymentFailed, PaymentPending) => true,

            (from, CancelledByRider | CancelledByDriver | CancelledBySystem) => from.is_pre_trip(),

            (PaymentCompleted, Disputed) => true,
            (from, Disputed) => from.is_cancelled(),
            (Disputed, Refunded) | (Disputed, PaymentCompleted) => true,

            _ => false,
        }
    }

    /// Statuses the system leaves immediately without outside input.
    pub fn automatic_successor(&self) -> Option<Status> {
        match self {
            Self::Requested => Some(Self::DriverSearch),
            Self::DriverRejected => Some(Self::DriverSearch),
            Self::Completed => Some(Self::PaymentPending),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Timestamps {
    pub created_at: DateTime<Utc>,
    pub search_started_at: Option<DateTime<Utc>>,
    pub found_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub en_route_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub payment_completed_at: Option<DateTime<Utc>>,
    pub disputed_at: Option<DateTime<Utc>>,
}

impl Timestamps {
    fn stamp(&mut self, status: Status, now: DateTime<Utc>) {
        let slot = match status {
            Status::DriverSearch => &mut self.search_started_at,
            Status::DriverFound => &mut self.found_at,
            Status::DriverAccepted => &mut self.accepted_at,
            Status::DriverEnRoute => &mut self.en_route_at,
            Status::DriverArrived => &mut self.arrived_at,
            Status::InProgress => &mut self.started_at,
            Status::Completed => &mut self.completed_at,
            Status::PaymentCompleted => &mut self.payment_completed_at,
            Status::Disputed => &mut self.disputed_at,
            status if status.is_cancelled() => &mut self.cancelled_at,
            _ => return,
        };

        *slot = Some(now);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: Status,
    pub version: u64,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub driver_id: Uuid,
    pub score: f64,
    pub distance_km: f64,
    pub offered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Offer {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub driver_id: Uuid,
    /// `None` excludes the driver for the rest of the ride.
    pub until: Option<DateTime<Utc>>,
}

impl Exclusion {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.until {
            Some(until) => now < until,
            None => true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentState {
    pub attempts: u32,
    pub transaction_ref: Option<String>,
    pub needs_reconciliation: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fare {
    pub distance_km: f64,
    pub duration_minutes: f64,
    pub base: f64,
    pub distance: f64,
    pub time: f64,
    pub surge: f64,
    pub total: f64,
    pub platform_commission: f64,
    pub driver_earnings: f64,
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

impl Fare {
    pub fn calculate(
        policy: &TierPolicy,
        distance_km: f64,
        duration_minutes: f64,
        surge_multiplier: f64,
        commission_rate: f64,
    ) -> Self {
        let base = round_cents(policy.base_fare);
        let distance = round_cents(distance_km * policy.per_km);
        let time = round_cents(duration_minutes.max(0.0) * policy.per_minute);
        let subtotal = base + distance + time;
        let surge = round_cents(subtotal * (surge_multiplier.max(1.0) - 1.0));
        let total = round_cents(subtotal + surge);
        let platform_commission = round_cents(total * commission_rate);

        Self {
            distance_km,
            duration_minutes,
            base,
            distance,
            time,
            surge,
            total,
            platform_commission,
            driver_earnings: round_cents(total - platform_commission),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RideRequest {
    pub rider_id: Uuid,
    pub pickup: Location,
    pub destination: Location,
    pub tier: Tier,
    pub vehicle_type: VehicleType,
    #[serde(default)]
    pub amenities: Vec<Amenity>,
}

impl RideRequest {
    pub fn validate(&self) -> Result<(), Error> {
        if self.rider_id.is_nil() {
            return Err(Error::validation_error("rider id is required"));
        }

        self.pickup.coordinates.validate()?;
        self.destination.coordinates.validate()?;

        if self.pickup.coordinates == self.destination.coordinates {
            return Err(Error::validation_error(
                "pickup and destination must differ",
            ));
        }

        Ok(())
    }
}

impl Ride {
    pub fn new(request: RideRequest, surge_multiplier: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            rider_id: request.rider_id,
            driver_id: None,
            pickup: request.pickup,
            destination: request.destination,
            tier: request.tier,
            vehicle_type: request.vehicle_type,
            amenities: request.amenities,
            status: Status::Requested,
            timestamps: Timestamps {
                created_at: now,
                ..Default::default()
            },
            fare: None,
            surge_multiplier,
            version: 0,
            workflow_step: None,
            offer: None,
            exclusions: vec![],
            radius_expansions: 0,
            payment: PaymentState::default(),
            history: vec![StatusChange {
                status: Status::Requested,
                version: 0,
                at: now,
            }],
            dispute_reason: None,
        }
    }

    /// Applies a guarded status change and bumps the version.
    #[tracing::instrument(skip(self), fields(ride_id = %self.id, from = ?self.status))]
    pub fn transition(&mut self, next: Status, now: DateTime<Utc>) -> Result<(), Error> {
        if !self.status.can_transition_to(next) {
            return Err(Error::illegal_transition_error(self.status, next));
        }

        if next == Status::Disputed && self.timestamps.disputed_at.is_some() {
            return Err(Error::illegal_transition_error(self.status, next));
        }

        self.status = next;
        self.timestamps.stamp(next, now);
        self.version += 1;
        self.history.push(StatusChange {
            status: next,
            version: self.version,
            at: now,
        });

        Ok(())
    }

    pub fn is_excluded(&self, driver_id: &Uuid, now: DateTime<Utc>) -> bool {
        self.exclusions
            .iter()
            .any(|exclusion| &exclusion.driver_id == driver_id && exclusion.is_active(now))
    }

    pub fn excluded_drivers(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.exclusions
            .iter()
            .filter(|exclusion| exclusion.is_active(now))
            .map(|exclusion| exclusion.driver_id)
            .collect()
    }

    pub fn exclude(&mut self, driver_id: Uuid, until: Option<DateTime<Utc>>) {
        self.exclusions
            .retain(|exclusion| exclusion.driver_id != driver_id);
        self.exclusions.push(Exclusion { driver_id, until });
    }

    pub fn trip_distance_km(&self) -> f64 {
        self.pickup
            .coordinates
            .distance_km(&self.destination.coordinates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Coordinates, TierTable};

    const ALL: [Status; 17] = [
        Status::Requested,
        Status::DriverSearch,
        Status::DriverFound,
        Status::DriverAccepted,
        Status::DriverRejected,
        Status::DriverEnRoute,
        Status::DriverArrived,
        Status::InProgress,
        Status::Completed,
        Status::PaymentPending,
        Status::PaymentCompleted,
        Status::PaymentFailed,
        Status::CancelledByRider,
        Status::CancelledByDriver,
        Status::CancelledBySystem,
        Status::Disputed,
        Status::Refunded,
    ];

    fn ride() -> Ride {
        let pickup = Coordinates::new(40.7128, -74.006);
        Ride::new(
            RideRequest {
                rider_id: Uuid::new_v4(),
                pickup: Location::new(pickup, "Broadway 1".into()),
                destination: Location::new(pickup.offset_north_km(4.0), "Broadway 400".into()),
                tier: Tier::Vip,
                vehicle_type: VehicleType::Luxury,
                amenities: vec![],
            },
            1.0,
            Utc::now(),
        )
    }

    #[test]
    fn in_progress_cannot_be_cancelled() {
        for cancelled in [
            Status::CancelledByRider,
            Status::CancelledByDriver,
            Status::CancelledBySystem,
        ] {
            assert!(!Status::InProgress.can_transition_to(cancelled));
            assert!(Status::DriverArrived.can_transition_to(cancelled));
            assert!(Status::Requested.can_transition_to(cancelled));
        }
    }

    #[test]
    fn refunded_is_a_dead_end() {
        for next in ALL {
            assert!(!Status::Refunded.can_transition_to(next), "{:?}", next);
        }
    }

    #[test]
    fn terminal_states_only_allow_disputes() {
        for terminal in ALL.iter().filter(|status| status.is_terminal()) {
            for next in ALL {
                if terminal.can_transition_to(next) {
                    assert_eq!(next, Status::Disputed, "{:?} -> {:?}", terminal, next);
                }
            }
        }
    }

    #[test]
    fn transition_bumps_version_and_stamps_time() {
        let mut ride = ride();
        let now = Utc::now();

        ride.transition(Status::DriverSearch, now).unwrap();

        assert_eq!(ride.version, 1);
        assert_eq!(ride.timestamps.search_started_at, Some(now));
        assert_eq!(ride.history.last().unwrap().status, Status::DriverSearch);
    }

    #[test]
    fn illegal_transition_leaves_ride_untouched() {
        let mut ride = ride();
        let before = ride.clone();

        let err = ride.transition(Status::Completed, Utc::now()).unwrap_err();

        assert!(err.is_illegal_transition_error());
        assert_eq!(ride, before);
    }

    #[test]
    fn a_ride_is_disputed_at_most_once() {
        let mut ride = ride();
        let now = Utc::now();

        ride.transition(Status::CancelledBySystem, now).unwrap();
        ride.transition(Status::Disputed, now).unwrap();
        ride.transition(Status::Refunded, now).unwrap();
        assert!(ride.transition(Status::Disputed, now).is_err());
    }

    #[test]
    fn wire_round_trip_reproduces_the_ride() {
        let mut ride = ride();
        ride.transition(Status::DriverSearch, Utc::now()).unwrap();
        ride.exclude(Uuid::new_v4(), None);
        ride.fare = Some(Fare::calculate(&TierTable::default().vip, 4.0, 12.0, 1.5, 0.2));

        let wire = serde_json::to_string(&ride).unwrap();
        let decoded: Ride = serde_json::from_str(&wire).unwrap();

        assert_eq!(decoded, ride);
        assert!(wire.contains("\"DRIVER_SEARCH\""));
    }

    #[test]
    fn fare_splits_commission_from_earnings() {
        let policy = TierTable::default().normal;
        let fare = Fare::calculate(&policy, 10.0, 20.0, 2.0, 0.2);

        assert_eq!(fare.base, 2.5);
        assert_eq!(fare.distance, 12.0);
        assert_eq!(fare.time, 5.0);
        assert_eq!(fare.surge, 19.5);
        assert_eq!(fare.total, 39.0);
        assert_eq!(fare.platform_commission, 7.8);
        assert_eq!(fare.driver_earnings, 31.2);
    }
}
