use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub ride_id: Uuid,
    pub rider_id: Uuid,
    pub triggered_at: DateTime<Utc>,
    pub status: EscalationStatus,
    /// Set on trigger: the ride's location feed is switched to the encrypted high-priority channel.
    pub stream_elevated: bool,
    pub stages: Vec<Stage>,
    pub last_monitored_at: Option<DateTime<Utc>>,
    pub cleared_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Escalating,
    Monitoring,
    Cleared,
}

impl EscalationStatus {
    pub fn name(&self) -> String {
        match self {
            Self::Escalating => "escalating".into(),
            Self::Monitoring => "monitoring".into(),
            Self::Cleared => "cleared".into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    ControlCenterAlert,
    EmergencyContact,
    EmergencyServices,
}

impl StageKind {
    pub fn name(&self) -> String {
        match self {
            Self::ControlCenterAlert => "control_center_alert".into(),
            Self::EmergencyContact => "emergency_contact".into(),
            Self::EmergencyServices => "emergency_services".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum StageOutcome {
    Scheduled,
    Delivered { at: DateTime<Utc> },
    Failed { at: DateTime<Utc>, error: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub kind: StageKind,
    pub due_at: DateTime<Utc>,
    pub outcome: StageOutcome,
    #[serde(default)]
    pub attempts: u32,
}

impl Stage {
    /// A scheduled stage is due at its deadline; a failed one again once
    /// `retry_after` has passed since the last attempt.
    pub fn is_due(&self, now: DateTime<Utc>, retry_after: Duration) -> bool {
        match &self.outcome {
            StageOutcome::Scheduled => now >= self.due_at,
            StageOutcome::Failed { at, .. } => now - *at >= retry_after,
            StageOutcome::Delivered { .. } => false,
        }
    }
}

impl Escalation {
    pub fn new(
        ride_id: Uuid,
        rider_id: Uuid,
        triggered_at: DateTime<Utc>,
        offsets: &[(StageKind, Duration)],
    ) -> Self {
        let stages = offsets
            .iter()
            .map(|(kind, offset)| Stage {
                kind: *kind,
                due_at: triggered_at + *offset,
                outcome: StageOutcome::Scheduled,
                attempts: 0,
            })
            .collect();

        Self {
            ride_id,
            rider_id,
            triggered_at,
            status: EscalationStatus::Escalating,
            stream_elevated: true,
            stages,
            last_monitored_at: None,
            cleared_at: None,
        }
    }

    /// Every stage was attempted at least once; failed ones keep retrying.
    pub fn all_stages_fired(&self) -> bool {
        self.stages
            .iter()
            .all(|stage| stage.outcome != StageOutcome::Scheduled)
    }
}
