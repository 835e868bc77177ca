use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::Engine;
use crate::api::{MatchingStats, StatsAPI};
use crate::entities::WorkflowAction;
use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Counter {
    RideRequested,
    OfferMade,
    OfferAccepted,
    OfferDeclined,
    OfferExpired,
    ClaimLost,
    RadiusExpanded,
    NoDriverAvailable,
    Cancellation,
    SosTriggered,
    ActionFailed,
}

/// Process-wide dispatch counters.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    rides_requested: AtomicU64,
    offers_made: AtomicU64,
    offers_accepted: AtomicU64,
    offers_declined: AtomicU64,
    offers_expired: AtomicU64,
    claims_lost: AtomicU64,
    radius_expansions: AtomicU64,
    no_driver_available: AtomicU64,
    cancellations: AtomicU64,
    sos_triggered: AtomicU64,
    actions_failed: AtomicU64,
}

impl Stats {
    pub(crate) fn record(&self, counter: Counter) {
        let slot = match counter {
            Counter::RideRequested => &self.rides_requested,
            Counter::OfferMade => &self.offers_made,
            Counter::OfferAccepted => &self.offers_accepted,
            Counter::OfferDeclined => &self.offers_declined,
            Counter::OfferExpired => &self.offers_expired,
            Counter::ClaimLost => &self.claims_lost,
            Counter::RadiusExpanded => &self.radius_expansions,
            Counter::NoDriverAvailable => &self.no_driver_available,
            Counter::Cancellation => &self.cancellations,
            Counter::SosTriggered => &self.sos_triggered,
            Counter::ActionFailed => &self.actions_failed,
        };

        slot.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MatchingStats {
        MatchingStats {
            rides_requested: self.rides_requested.load(Ordering::Relaxed),
            offers_made: self.offers_made.load(Ordering::Relaxed),
            offers_accepted: self.offers_accepted.load(Ordering::Relaxed),
            offers_declined: self.offers_declined.load(Ordering::Relaxed),
            offers_expired: self.offers_expired.load(Ordering::Relaxed),
            claims_lost: self.claims_lost.load(Ordering::Relaxed),
            radius_expansions: self.radius_expansions.load(Ordering::Relaxed),
            no_driver_available: self.no_driver_available.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            sos_triggered: self.sos_triggered.load(Ordering::Relaxed),
            actions_failed: self.actions_failed.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl StatsAPI for Engine {
    async fn matching_stats(&self) -> Result<MatchingStats, Error> {
        Ok(self.stats.snapshot())
    }

    #[tracing::instrument(skip(self))]
    async fn failed_actions(&self) -> Result<Vec<WorkflowAction>, Error> {
        self.workflow.failed().await
    }
}

#[test]
fn snapshot_reflects_recorded_counters() {
    let stats = Stats::default();

    stats.record(Counter::OfferMade);
    stats.record(Counter::OfferMade);
    stats.record(Counter::ClaimLost);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.offers_made, 2);
    assert_eq!(snapshot.claims_lost, 1);
    assert_eq!(snapshot.offers_accepted, 0);
}
