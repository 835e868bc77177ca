use super::stats::Counter;
use super::Engine;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Duration;
use futures::future::join_all;
use uuid::Uuid;

use crate::{
    api::EmergencyAPI,
    entities::{Escalation, EscalationStatus, StageOutcome},
    error::Error,
    external::{Event, Notification, Recipient},
};

impl Engine {
    async fn notify_bounded(&self, notification: &Notification) -> Result<(), Error> {
        let timeout = std::time::Duration::from_millis(self.config.emergency.call_timeout_ms);

        match tokio::time::timeout(timeout, self.notifier.notify(notification)).await {
            Ok(result) => result,
            Err(_) => Err(Error::upstream_error(format!(
                "notifying {} timed out after {:?}",
                notification.recipient.name(),
                timeout
            ))),
        }
    }

    /// Fires every due escalation stage and monitoring heartbeat.
    ///
    /// Stages fire on their own deadline whether or not earlier stages were
    /// delivered, and a failed stage is attempted again every
    /// `stage_retry_secs` until the escalation is cleared. Notifications go out
    /// concurrently and outside the escalation lock; only one tick runs at a
    /// time. Every escalation the tick changes is written back to the store.
    #[tracing::instrument(skip(self))]
    pub async fn tick_escalations(&self) -> Result<usize, Error> {
        let _tick = self.escalation_tick.lock().await;
        let now = self.clock.now();
        let heartbeat_interval = Duration::seconds(self.config.emergency.monitoring_interval_secs);
        let retry_after = Duration::seconds(self.config.emergency.stage_retry_secs);

        let mut stages = vec![];
        let mut heartbeats = vec![];

        for escalation in self.escalations.read().await.values() {
            if escalation.status == EscalationStatus::Cleared {
                continue;
            }

            for (index, stage) in escalation.stages.iter().enumerate() {
                if stage.is_due(now, retry_after) {
                    let notification = Notification {
                        ride_id: escalation.ride_id,
                        recipient: Recipient::for_stage(stage.kind, escalation.rider_id),
                        event: Event::EscalationStage { stage: stage.kind },
                        at: now,
                    };
                    stages.push((escalation.ride_id, index, notification));
                }
            }

            if escalation.status == EscalationStatus::Monitoring {
                let last = escalation
                    .last_monitored_at
                    .unwrap_or(escalation.triggered_at);

                if now - last >= heartbeat_interval {
                    let notification = Notification {
                        ride_id: escalation.ride_id,
                        recipient: Recipient::ControlCenter,
                        event: Event::MonitoringHeartbeat,
                        at: now,
                    };
                    heartbeats.push((escalation.ride_id, notification));
                }
            }
        }

        if stages.is_empty() && heartbeats.is_empty() {
            return Ok(0);
        }

        let stage_results = join_all(
            stages
                .iter()
                .map(|(_, _, notification)| self.notify_bounded(notification)),
        )
        .await;
        let heartbeat_results = join_all(
            heartbeats
                .iter()
                .map(|(_, notification)| self.notify_bounded(notification)),
        )
        .await;

        let mut escalations = self.escalations.write().await;
        let mut changed = HashSet::new();

        for ((ride_id, index, _), result) in stages.iter().zip(stage_results) {
            let stage = match escalations
                .get_mut(ride_id)
                .filter(|escalation| escalation.status != EscalationStatus::Cleared)
                .and_then(|escalation| escalation.stages.get_mut(*index))
            {
                Some(stage) => stage,
                None => continue,
            };

            stage.attempts += 1;
            stage.outcome = match result {
                Ok(()) => {
                    tracing::warn!(%ride_id, stage = %stage.kind.name(), attempts = stage.attempts, "escalation stage fired");
                    StageOutcome::Delivered { at: now }
                }
                Err(err) => {
                    tracing::error!(%ride_id, stage = %stage.kind.name(), attempts = stage.attempts, "escalation stage failed: {}", err);
                    StageOutcome::Failed {
                        at: now,
                        error: err.to_string(),
                    }
                }
            };
            changed.insert(*ride_id);
        }

        for ((ride_id, _), result) in heartbeats.iter().zip(heartbeat_results) {
            if let Some(escalation) = escalations.get_mut(ride_id) {
                escalation.last_monitored_at = Some(now);
                changed.insert(*ride_id);
            }

            if let Err(err) = result {
                tracing::error!(%ride_id, "monitoring heartbeat failed: {}", err);
            }
        }

        for escalation in escalations.values_mut() {
            if escalation.status == EscalationStatus::Escalating && escalation.all_stages_fired() {
                escalation.status = EscalationStatus::Monitoring;
                escalation.last_monitored_at = Some(now);
                changed.insert(escalation.ride_id);
                tracing::info!(ride_id = %escalation.ride_id, "all escalation stages fired, monitoring");
            }
        }

        // persisted under the lock that clear_sos also writes under
        for ride_id in changed {
            if let Some(escalation) = escalations.get(&ride_id) {
                if let Err(err) = self.store.upsert_escalation(escalation).await {
                    tracing::error!(%ride_id, "failed to persist escalation: {}", err);
                }
            }
        }

        Ok(stages.len() + heartbeats.len())
    }

    /// Reloads persisted escalations; the ticker picks up due stages from there.
    pub(crate) async fn load_escalations(&self) -> Result<usize, Error> {
        let stored = self.store.escalations().await?;
        let mut escalations = self.escalations.write().await;
        let mut active = 0;

        for escalation in stored {
            if escalation.status != EscalationStatus::Cleared {
                active += 1;
                tracing::warn!(ride_id = %escalation.ride_id, status = %escalation.status.name(), "resuming escalation");
            }
            escalations.insert(escalation.ride_id, escalation);
        }

        Ok(active)
    }
}

#[async_trait]
impl EmergencyAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn trigger_sos(&self, ride_id: Uuid) -> Result<Escalation, Error> {
        let ride = self.load_ride(ride_id).await?;

        if !self.config.tiers.get(ride.tier).sos_eligible {
            return Err(Error::policy_violation_error(format!(
                "SOS is not available on the {} tier",
                ride.tier.name()
            )));
        }

        if ride.status.is_terminal() {
            return Err(Error::policy_violation_error(format!(
                "ride {} is closed ({})",
                ride.id,
                ride.status.name()
            )));
        }

        let now = self.clock.now();

        let escalation = {
            let mut escalations = self.escalations.write().await;

            if let Some(existing) = escalations
                .get(&ride_id)
                .filter(|existing| existing.status != EscalationStatus::Cleared)
            {
                return Ok(existing.clone());
            }

            let escalation = Escalation::new(
                ride_id,
                ride.rider_id,
                now,
                &self.config.emergency.stage_offsets(),
            );
            self.store.upsert_escalation(&escalation).await?;
            escalations.insert(ride_id, escalation.clone());
            escalation
        };

        self.stats.record(Counter::SosTriggered);
        tracing::warn!(rider_id = %ride.rider_id, "SOS triggered");

        let elevated = Notification {
            ride_id,
            recipient: Recipient::ControlCenter,
            event: Event::LocationStreamElevated,
            at: now,
        };

        if let Err(err) = self.notify_bounded(&elevated).await {
            tracing::error!("failed to elevate location stream: {}", err);
        }

        Ok(escalation)
    }

    async fn find_escalation(&self, ride_id: Uuid) -> Result<Escalation, Error> {
        self.escalations
            .read()
            .await
            .get(&ride_id)
            .cloned()
            .ok_or_else(|| Error::not_found_error(format!("escalation for ride {}", ride_id)))
    }

    #[tracing::instrument(skip(self))]
    async fn clear_sos(&self, ride_id: Uuid) -> Result<Escalation, Error> {
        let mut escalations = self.escalations.write().await;

        let escalation = escalations
            .get_mut(&ride_id)
            .ok_or_else(|| Error::not_found_error(format!("escalation for ride {}", ride_id)))?;

        if escalation.status != EscalationStatus::Cleared {
            let mut cleared = escalation.clone();
            cleared.status = EscalationStatus::Cleared;
            cleared.stream_elevated = false;
            cleared.cleared_at = Some(self.clock.now());

            self.store.upsert_escalation(&cleared).await?;
            *escalation = cleared;
            tracing::info!("SOS cleared");
        }

        Ok(escalation.clone())
    }
}
