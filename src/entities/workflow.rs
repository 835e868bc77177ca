use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    InitiatePayment,
    SendNotification,
}

impl ActionKind {
    pub fn name(&self) -> String {
        match self {
            Self::InitiatePayment => "initiate_payment".into(),
            Self::SendNotification => "send_notification".into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn name(&self) -> String {
        match self {
            Self::Pending => "pending".into(),
            Self::Processing => "processing".into(),
            Self::Completed => "completed".into(),
            Self::Failed => "failed".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowAction {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub kind: ActionKind,
    pub status: ActionStatus,
    /// Unique per ride transition and recipient; a second enqueue with the same key is dropped.
    pub dedup_key: String,
    pub retry_count: u32,
    pub scheduled_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowAction {
    pub fn new(
        ride_id: Uuid,
        kind: ActionKind,
        dedup_key: String,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ride_id,
            kind,
            status: ActionStatus::Pending,
            dedup_key,
            retry_count: 0,
            scheduled_at: now,
            payload,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ActionStatus::Pending && self.scheduled_at <= now
    }
}

pub fn dedup_key(ride_id: Uuid, kind: ActionKind, version: u64, recipient: &str) -> String {
    format!("{}:{}:{}:{}", ride_id, kind.name(), version, recipient)
}
