use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{StageKind, Status};
use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Recipient {
    Rider { id: Uuid },
    Driver { id: Uuid },
    ControlCenter,
    EmergencyContact { rider_id: Uuid },
    EmergencyServices,
}

impl Recipient {
    pub fn name(&self) -> String {
        match self {
            Self::Rider { id } => format!("rider-{}", id),
            Self::Driver { id } => format!("driver-{}", id),
            Self::ControlCenter => "control_center".into(),
            Self::EmergencyContact { rider_id } => format!("emergency_contact-{}", rider_id),
            Self::EmergencyServices => "emergency_services".into(),
        }
    }

    pub fn for_stage(kind: StageKind, rider_id: Uuid) -> Self {
        match kind {
            StageKind::ControlCenterAlert => Self::ControlCenter,
            StageKind::EmergencyContact => Self::EmergencyContact { rider_id },
            StageKind::EmergencyServices => Self::EmergencyServices,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Event {
    RideStatusChanged { status: Status, version: u64 },
    RideOffered { expires_at: DateTime<Utc> },
    LocationStreamElevated,
    EscalationStage { stage: StageKind },
    MonitoringHeartbeat,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub ride_id: Uuid,
    pub recipient: Recipient,
    pub event: Event,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), Error>;
}

pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    #[tracing::instrument(skip(self, notification), fields(ride_id = %notification.ride_id))]
    async fn notify(&self, notification: &Notification) -> Result<(), Error> {
        let res = self
            .client
            .post(format!("{}/events", self.endpoint))
            .json(notification)
            .send()
            .await?;

        let status_code = res.status().as_u16();

        if !(200..300).contains(&status_code) {
            return Err(Error::upstream_error(format!(
                "notification service responded with status {}",
                status_code
            )));
        }

        Ok(())
    }
}

/// Writes every notification to the log; the default without an endpoint.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), Error> {
        tracing::info!(
            ride_id = %notification.ride_id,
            recipient = %notification.recipient.name(),
            event = ?notification.event,
            "notification"
        );

        Ok(())
    }
}

/// Keeps every delivered notification in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), Error> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }

        Ok(())
    }
}
