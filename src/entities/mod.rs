mod cancellation;
mod driver;
mod escalation;
mod location;
mod matching_log;
mod quote;
mod ride;
mod surge;
mod tier;
mod workflow;

pub use cancellation::{Actor, CancellationRecord};
pub use driver::{Amenity, Availability, Driver, DriverRegistration, Vehicle, VehicleType};
pub use escalation::{Escalation, EscalationStatus, Stage, StageKind, StageOutcome};
pub use location::{Coordinates, Location};
pub use matching_log::{AttemptOutcome, MatchingAttempt, MatchingAttemptLog};
pub use quote::{Quote, QuoteRequest};
pub use ride::{
    Exclusion, Fare, Offer, PaymentState, Ride, RideRequest, Status, StatusChange, Timestamps,
};
pub use surge::{SurgeZone, ZoneDefinition};
pub use tier::{Tier, TierPolicy, TierTable};
pub use workflow::{dedup_key, ActionKind, ActionStatus, WorkflowAction};
