use std::sync::Arc;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::WorkflowConfig;
use crate::db::Store;
use crate::entities::{ActionKind, ActionStatus, WorkflowAction};
use crate::error::Error;

/// Runs the side effect behind a workflow action.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &WorkflowAction) -> Result<(), Error>;

    /// Called once when an action has used up its retries.
    async fn on_exhausted(&self, _action: &WorkflowAction) -> Result<(), Error> {
        Ok(())
    }
}

/// Durable queue of ride side effects.
///
/// Actions are written to the store before their id is handed to the worker
/// channel, so the channel is only a wake-up signal: anything lost from it is
/// picked up again by `run_due` or `recover`.
pub struct WorkflowQueue {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: WorkflowConfig,
    sender: Sender<Uuid>,
    receiver: Receiver<Uuid>,
}

impl WorkflowQueue {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: WorkflowConfig) -> Self {
        let (sender, receiver) = async_channel::unbounded();

        Self {
            store,
            clock,
            config,
            sender,
            receiver,
        }
    }

    pub fn receiver(&self) -> Receiver<Uuid> {
        self.receiver.clone()
    }

    /// Returns `None` when an action with the same dedup key was already enqueued.
    #[tracing::instrument(skip(self, payload))]
    pub async fn enqueue(
        &self,
        ride_id: Uuid,
        kind: ActionKind,
        dedup_key: String,
        payload: serde_json::Value,
    ) -> Result<Option<WorkflowAction>, Error> {
        let action = WorkflowAction::new(ride_id, kind, dedup_key, payload, self.clock.now());

        if !self.store.insert_action(&action).await? {
            tracing::debug!("duplicate workflow action dropped");
            return Ok(None);
        }

        self.wake(action.id);

        Ok(Some(action))
    }

    fn wake(&self, id: Uuid) {
        if let Err(err) = self.sender.try_send(id) {
            tracing::warn!("workflow channel unavailable, action {} left for the poller: {}", id, err);
        }
    }

    /// Delay before retry number `retry_count` (1-based), with up to 25% jitter.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(20);
        let base = self.config.base_backoff_ms.saturating_mul(1 << exponent);
        let capped = base.min(self.config.max_backoff_ms);
        let jitter = if capped >= 4 {
            rand::thread_rng().gen_range(0..=capped / 4)
        } else {
            0
        };

        Duration::milliseconds((capped + jitter).min(self.config.max_backoff_ms))
    }

    /// Claims and executes one action. `None` means another worker owns it or it
    /// is not due.
    #[tracing::instrument(skip(self, executor))]
    pub async fn process(
        &self,
        id: Uuid,
        executor: &dyn ActionExecutor,
    ) -> Result<Option<ActionStatus>, Error> {
        let mut action = match self.store.claim_action(id, self.clock.now()).await? {
            Some(action) => action,
            None => return Ok(None),
        };

        let timeout = std::time::Duration::from_millis(self.config.call_timeout_ms);
        let outcome = match tokio::time::timeout(timeout, executor.execute(&action)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::upstream_error(format!(
                "{} timed out after {:?}",
                action.kind.name(),
                timeout
            ))),
        };

        let now = self.clock.now();
        action.updated_at = now;

        match outcome {
            Ok(()) => {
                action.status = ActionStatus::Completed;
                action.last_error = None;
                tracing::info!(kind = %action.kind.name(), ride_id = %action.ride_id, "workflow action completed");
            }
            Err(err) => {
                action.retry_count += 1;
                action.last_error = Some(err.to_string());

                if action.retry_count > self.config.max_retries {
                    action.status = ActionStatus::Failed;
                    tracing::error!(
                        kind = %action.kind.name(),
                        ride_id = %action.ride_id,
                        retries = action.retry_count - 1,
                        "workflow action failed permanently: {}",
                        err
                    );
                } else {
                    action.status = ActionStatus::Pending;
                    action.scheduled_at = now + self.backoff(action.retry_count);
                    tracing::warn!(
                        kind = %action.kind.name(),
                        ride_id = %action.ride_id,
                        retry = action.retry_count,
                        scheduled_at = %action.scheduled_at,
                        "workflow action failed, retrying: {}",
                        err
                    );
                }
            }
        }

        self.store.update_action(&action).await?;

        if action.status == ActionStatus::Failed {
            if let Err(err) = executor.on_exhausted(&action).await {
                tracing::error!("exhaustion handler for action {} failed: {}", action.id, err);
            }
        }

        Ok(Some(action.status))
    }

    /// Processes every action due now, in schedule order.
    pub async fn run_due(&self, executor: &dyn ActionExecutor) -> Result<usize, Error> {
        let due = self.store.due_actions(self.clock.now()).await?;
        let mut processed = 0;

        for action in due {
            if self.process(action.id, executor).await?.is_some() {
                processed += 1;
            }
        }

        Ok(processed)
    }

    /// Hands due actions to the worker channel instead of running them inline.
    pub async fn wake_due(&self) -> Result<usize, Error> {
        let due = self.store.due_actions(self.clock.now()).await?;

        for action in due.iter() {
            self.wake(action.id);
        }

        Ok(due.len())
    }

    /// Returns orphaned `processing` actions to `pending` after a restart.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<u64, Error> {
        let before = self.clock.now() - Duration::seconds(self.config.stale_processing_secs);
        let released = self.store.release_stale_actions(before).await?;

        if released > 0 {
            tracing::warn!("released {} orphaned workflow actions", released);
        }

        Ok(released)
    }

    pub async fn failed(&self) -> Result<Vec<WorkflowAction>, Error> {
        self.store.actions_with_status(ActionStatus::Failed).await
    }

    pub async fn for_ride(&self, ride_id: Uuid) -> Result<Vec<WorkflowAction>, Error> {
        self.store.actions_for_ride(ride_id).await
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::MemoryStore;
    use crate::entities::dedup_key;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures_left: AtomicU32,
        exhausted: AtomicU32,
    }

    #[async_trait]
    impl ActionExecutor for Flaky {
        async fn execute(&self, _action: &WorkflowAction) -> Result<(), Error> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(Error::upstream_error("provider unavailable"));
            }
            Ok(())
        }

        async fn on_exhausted(&self, _action: &WorkflowAction) -> Result<(), Error> {
            self.exhausted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn queue(clock: Arc<ManualClock>) -> WorkflowQueue {
        let config = WorkflowConfig {
            max_retries: 2,
            base_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
            ..Default::default()
        };

        WorkflowQueue::new(Arc::new(MemoryStore::new()), clock, config)
    }

    fn flaky(failures: u32) -> Flaky {
        Flaky {
            failures_left: AtomicU32::new(failures),
            exhausted: AtomicU32::new(0),
        }
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let queue = queue(Arc::new(ManualClock::default()));

        let first = queue.backoff(1).num_milliseconds();
        let third = queue.backoff(3).num_milliseconds();
        let tenth = queue.backoff(10).num_milliseconds();

        assert!((1_000..=1_250).contains(&first), "{}", first);
        assert!((4_000..=5_000).contains(&third), "{}", third);
        assert_eq!(tenth, 10_000);
    }

    #[test]
    fn failed_action_is_rescheduled_then_completes() {
        tokio_test::block_on(async {
            let clock = Arc::new(ManualClock::default());
            let queue = queue(clock.clone());
            let executor = flaky(1);
            let ride_id = Uuid::new_v4();

            let action = queue
                .enqueue(
                    ride_id,
                    ActionKind::InitiatePayment,
                    dedup_key(ride_id, ActionKind::InitiatePayment, 10, "ride"),
                    serde_json::Value::Null,
                )
                .await
                .unwrap()
                .unwrap();

            assert_eq!(
                queue.process(action.id, &executor).await.unwrap(),
                Some(ActionStatus::Pending)
            );
            // not due until the backoff elapses
            assert_eq!(queue.run_due(&executor).await.unwrap(), 0);

            clock.advance(Duration::seconds(2));
            assert_eq!(queue.run_due(&executor).await.unwrap(), 1);

            let stored = queue.for_ride(ride_id).await.unwrap();
            assert_eq!(stored[0].status, ActionStatus::Completed);
            assert_eq!(stored[0].retry_count, 1);
        });
    }

    #[test]
    fn exhausted_action_is_surfaced_not_dropped() {
        tokio_test::block_on(async {
            let clock = Arc::new(ManualClock::default());
            let queue = queue(clock.clone());
            let executor = flaky(u32::MAX);
            let ride_id = Uuid::new_v4();

            queue
                .enqueue(
                    ride_id,
                    ActionKind::SendNotification,
                    dedup_key(ride_id, ActionKind::SendNotification, 1, "rider"),
                    serde_json::Value::Null,
                )
                .await
                .unwrap();

            for _ in 0..3 {
                queue.run_due(&executor).await.unwrap();
                clock.advance(Duration::seconds(30));
            }

            let failed = queue.failed().await.unwrap();
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].retry_count, 3);
            assert!(failed[0].last_error.is_some());
            assert_eq!(executor.exhausted.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn duplicate_enqueue_is_deduplicated() {
        tokio_test::block_on(async {
            let queue = queue(Arc::new(ManualClock::default()));
            let ride_id = Uuid::new_v4();
            let key = dedup_key(ride_id, ActionKind::SendNotification, 3, "rider");

            let first = queue
                .enqueue(ride_id, ActionKind::SendNotification, key.clone(), serde_json::Value::Null)
                .await
                .unwrap();
            let second = queue
                .enqueue(ride_id, ActionKind::SendNotification, key, serde_json::Value::Null)
                .await
                .unwrap();

            assert!(first.is_some());
            assert!(second.is_none());
        });
    }
}
