use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One matching round for a ride. Written once, never updated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchingAttemptLog {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub round: u32,
    pub radius_km: f64,
    pub attempts: Vec<MatchingAttempt>,
    pub selected: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchingAttempt {
    pub driver_id: Uuid,
    pub score: f64,
    pub distance_km: f64,
    pub outcome: AttemptOutcome,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Offered,
    /// Another ride claimed the driver first.
    ClaimLost,
    /// The driver was claimed but the ride had already moved on.
    Superseded,
    Declined,
    TimedOut,
}

impl MatchingAttemptLog {
    pub fn new(ride_id: Uuid, round: u32, radius_km: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ride_id,
            round,
            radius_km,
            attempts: vec![],
            selected: None,
            created_at: now,
        }
    }

    pub fn record(&mut self, driver_id: Uuid, score: f64, distance_km: f64, outcome: AttemptOutcome) {
        self.attempts.push(MatchingAttempt {
            driver_id,
            score,
            distance_km,
            outcome,
        });

        if outcome == AttemptOutcome::Offered {
            self.selected = Some(driver_id);
        }
    }
}
