mod cancellation;
mod driver_api;
mod emergency;
mod lifecycle;
mod matching;
mod payment;
mod quote_api;
mod ride_api;
mod stats;
mod surge_api;

pub use cancellation::{evaluate_cancellation, CancellationDecision};
pub use matching::{rank_candidates, score_candidate, ScoredCandidate};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::{
    api::API,
    clock::{Clock, SystemClock},
    config::Config,
    db::{MemoryStore, Store},
    entities::{dedup_key, ActionKind, Escalation, Ride, Status},
    error::Error,
    external::{LocalPaymentService, LogNotifier, Notifier, PaymentService},
    locator::{DriverLocator, GridLocator},
    surge::SurgeRegistry,
    workflow::WorkflowQueue,
};

use self::stats::Stats;

/// Backends the engine talks to. `in_memory` wires process-local ones.
pub struct Dependencies {
    pub store: Arc<dyn Store>,
    pub locator: Arc<dyn DriverLocator>,
    pub notifier: Arc<dyn Notifier>,
    pub payments: Arc<dyn PaymentService>,
    pub clock: Arc<dyn Clock>,
}

impl Dependencies {
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            locator: Arc::new(GridLocator::default()),
            notifier: Arc::new(LogNotifier),
            payments: Arc::new(LocalPaymentService::new()),
            clock: Arc::new(SystemClock),
        }
    }
}

pub struct Engine {
    config: Config,
    store: Arc<dyn Store>,
    locator: Arc<dyn DriverLocator>,
    notifier: Arc<dyn Notifier>,
    payments: Arc<dyn PaymentService>,
    clock: Arc<dyn Clock>,
    surge: SurgeRegistry,
    workflow: WorkflowQueue,
    stats: Stats,
    escalations: RwLock<HashMap<Uuid, Escalation>>,
    escalation_tick: Mutex<()>,
}

impl API for Engine {}

impl Engine {
    #[tracing::instrument(name = "Engine::new", skip_all)]
    pub fn new(config: Config, dependencies: Dependencies) -> Self {
        let Dependencies {
            store,
            locator,
            notifier,
            payments,
            clock,
        } = dependencies;

        let workflow = WorkflowQueue::new(store.clone(), clock.clone(), config.workflow.clone());
        let surge = SurgeRegistry::new(config.surge.clone());

        Self {
            config,
            store,
            locator,
            notifier,
            payments,
            clock,
            surge,
            workflow,
            stats: Stats::default(),
            escalations: RwLock::new(HashMap::new()),
            escalation_tick: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workflow(&self) -> &WorkflowQueue {
        &self.workflow
    }

    pub(crate) async fn load_ride(&self, id: Uuid) -> Result<Ride, Error> {
        self.store
            .find_ride(id)
            .await?
            .ok_or_else(|| Error::not_found_error(format!("ride {}", id)))
    }

    /// Executes every due workflow action inline.
    pub async fn run_due_actions(&self) -> Result<usize, Error> {
        self.workflow.run_due(self).await
    }

    /// Restores state after a restart: surge zones, active escalations,
    /// orphaned workflow actions, payment initiations that never reached the
    /// queue and rides stranded mid-search.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<(), Error> {
        self.surge.load(self.store.zones().await?).await;
        self.load_escalations().await?;
        self.workflow.recover().await?;

        for ride in self.store.rides_with_status(&[Status::PaymentPending]).await? {
            let entered = ride
                .history
                .iter()
                .rev()
                .find(|change| change.status == Status::PaymentPending);

            if let Some(change) = entered {
                self.workflow
                    .enqueue(
                        ride.id,
                        ActionKind::InitiatePayment,
                        dedup_key(ride.id, ActionKind::InitiatePayment, change.version, "ride"),
                        lifecycle::payment_payload(&ride),
                    )
                    .await?;
            }
        }

        for ride in self
            .store
            .rides_with_status(&[Status::Requested, Status::DriverSearch, Status::DriverRejected])
            .await?
        {
            tracing::info!(ride_id = %ride.id, status = %ride.status.name(), "resuming matching");

            if let Err(err) = self.with_ride(ride.id, |_, _| Ok(())).await {
                tracing::warn!(ride_id = %ride.id, "could not resume ride: {}", err);
                continue;
            }

            if let Err(err) = self.dispatch(ride.id).await {
                tracing::warn!(ride_id = %ride.id, "matching after restart failed: {}", err);
            }
        }

        self.workflow.wake_due().await?;

        Ok(())
    }

    /// Starts the workflow worker pool and the periodic loops: offer-timeout
    /// sweep, due-action poller, surge recompute and escalation ticker.
    pub fn spawn_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = vec![];

        for worker in 0..self.config.workflow.workers {
            let engine = self.clone();
            let receiver = self.workflow.receiver();

            handles.push(tokio::spawn(async move {
                while let Ok(id) = receiver.recv().await {
                    if let Err(err) = engine.workflow.process(id, engine.as_ref()).await {
                        tracing::error!(worker, "workflow action {} errored: {}", id, err);
                    }
                }
            }));
        }

        handles.push(every(
            self.clone(),
            "offer_sweep",
            std::time::Duration::from_millis(self.config.sweep_interval_ms),
            |engine| async move { engine.sweep_expired_offers().await.map(|_| ()) },
        ));

        handles.push(every(
            self.clone(),
            "workflow_poller",
            std::time::Duration::from_millis(self.config.workflow.poll_interval_ms),
            |engine| async move { engine.workflow.wake_due().await.map(|_| ()) },
        ));

        handles.push(every(
            self.clone(),
            "surge_recompute",
            std::time::Duration::from_secs(self.config.surge.recompute_interval_secs),
            |engine| async move { engine.recompute_surge().await.map(|_| ()) },
        ));

        handles.push(every(
            self.clone(),
            "escalation_ticker",
            std::time::Duration::from_millis(self.config.emergency.tick_interval_ms),
            |engine| async move { engine.tick_escalations().await.map(|_| ()) },
        ));

        handles
    }

    fn location_fresh_since(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now() - Duration::seconds(self.config.matching.location_staleness_secs)
    }
}

fn every<F, Fut>(
    engine: Arc<Engine>,
    name: &'static str,
    period: std::time::Duration,
    task: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<Engine>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if let Err(err) = task(engine.clone()).await {
                tracing::error!(task = name, "background task failed: {}", err);
            }
        }
    })
}
