use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::Status;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Actor {
    Rider { id: Uuid },
    Driver { id: Uuid },
    System,
}

impl Actor {
    pub fn name(&self) -> String {
        match self {
            Self::Rider { id: _ } => "rider".into(),
            Self::Driver { id: _ } => "driver".into(),
            Self::System => "system".into(),
        }
    }

    pub fn cancelled_status(&self) -> Status {
        match self {
            Self::Rider { id: _ } => Status::CancelledByRider,
            Self::Driver { id: _ } => Status::CancelledByDriver,
            Self::System => Status::CancelledBySystem,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CancellationRecord {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub rider_id: Uuid,
    pub actor: Actor,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub within_free_window: bool,
    pub fee: f64,
}
