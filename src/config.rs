use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::entities::{StageKind, Tier, TierTable};
use crate::error::Error;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub tiers: TierTable,
    pub matching: MatchingConfig,
    pub workflow: WorkflowConfig,
    pub surge: SurgeConfig,
    pub emergency: EmergencyConfig,
    pub max_conflict_retries: u32,
    pub max_payment_retries: u32,
    pub commission_rate: f64,
    /// Applied to the cancellation fee once the driver has arrived.
    pub arrived_fee_multiplier: f64,
    pub sweep_interval_ms: u64,
    pub listen_addr: SocketAddr,
    pub database_url: Option<String>,
    pub payment_endpoint: Option<String>,
    pub notification_endpoint: Option<String>,
}

/// Business-chosen weights; normalised by their sum when scoring.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub distance: f64,
    pub rating: f64,
    pub compatibility: f64,
    pub idle_time: f64,
    pub tier_affinity: f64,
}

impl ScoringWeights {
    pub fn total(&self) -> f64 {
        self.distance + self.rating + self.compatibility + self.idle_time + self.tier_affinity
    }

    pub fn validate(&self) -> Result<(), Error> {
        let weights = [
            self.distance,
            self.rating,
            self.compatibility,
            self.idle_time,
            self.tier_affinity,
        ];

        if weights.iter().any(|weight| !weight.is_finite() || *weight < 0.0) {
            return Err(Error::validation_error(
                "scoring weights must be finite and non-negative",
            ));
        }

        if self.total() <= 0.0 {
            return Err(Error::validation_error(
                "at least one scoring weight must be positive",
            ));
        }

        Ok(())
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            distance: 0.30,
            rating: 0.25,
            compatibility: 0.20,
            idle_time: 0.15,
            tier_affinity: 0.10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ExclusionPolicy {
    /// A driver who declined or let an offer lapse is never offered the same ride again.
    Permanent,
    /// The driver becomes eligible for the ride again after the cooldown.
    Cooldown { secs: i64 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub weights: ScoringWeights,
    /// Idle time at which the availability score saturates at 1.0.
    pub idle_saturation_secs: i64,
    pub radius_expansion_factor: f64,
    pub max_radius_expansions: u32,
    pub exclusion: ExclusionPolicy,
    /// Positions older than this are ignored by candidate search.
    pub location_staleness_secs: i64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            idle_saturation_secs: 600,
            radius_expansion_factor: 1.5,
            max_radius_expansions: 1,
            exclusion: ExclusionPolicy::Permanent,
            location_staleness_secs: 300,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub workers: usize,
    pub max_retries: u32,
    pub base_backoff_ms: i64,
    pub max_backoff_ms: i64,
    pub poll_interval_ms: u64,
    /// A `processing` action older than this is assumed orphaned by a crash.
    pub stale_processing_secs: i64,
    pub call_timeout_ms: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_retries: 5,
            base_backoff_ms: 500,
            max_backoff_ms: 60_000,
            poll_interval_ms: 1_000,
            stale_processing_secs: 300,
            call_timeout_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SurgeConfig {
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    /// Fraction of the gap to 1.0 closed on each recompute once demand subsides.
    pub decay: f64,
    /// Fraction of the demand counter kept across recomputes.
    pub demand_retention: f64,
    pub recompute_interval_secs: u64,
}

impl Default for SurgeConfig {
    fn default() -> Self {
        Self {
            min_multiplier: 1.0,
            max_multiplier: 3.0,
            decay: 0.5,
            demand_retention: 0.5,
            recompute_interval_secs: 60,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmergencyConfig {
    pub control_center_secs: i64,
    pub emergency_contact_secs: i64,
    pub emergency_services_secs: i64,
    pub monitoring_interval_secs: i64,
    /// A stage whose notification failed is attempted again after this long.
    pub stage_retry_secs: i64,
    pub tick_interval_ms: u64,
    pub call_timeout_ms: u64,
}

impl EmergencyConfig {
    pub fn stage_offsets(&self) -> Vec<(StageKind, Duration)> {
        vec![
            (
                StageKind::ControlCenterAlert,
                Duration::seconds(self.control_center_secs),
            ),
            (
                StageKind::EmergencyContact,
                Duration::seconds(self.emergency_contact_secs),
            ),
            (
                StageKind::EmergencyServices,
                Duration::seconds(self.emergency_services_secs),
            ),
        ]
    }
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            control_center_secs: 5,
            emergency_contact_secs: 30,
            emergency_services_secs: 60,
            monitoring_interval_secs: 30,
            stage_retry_secs: 10,
            tick_interval_ms: 500,
            call_timeout_ms: 2_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tiers: TierTable::default(),
            matching: MatchingConfig::default(),
            workflow: WorkflowConfig::default(),
            surge: SurgeConfig::default(),
            emergency: EmergencyConfig::default(),
            max_conflict_retries: 3,
            max_payment_retries: 3,
            commission_rate: 0.2,
            arrived_fee_multiplier: 1.5,
            sweep_interval_ms: 1_000,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            database_url: None,
            payment_endpoint: None,
            notification_endpoint: None,
        }
    }
}

fn var<T: FromStr>(name: &str) -> Result<Option<T>, Error> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::validation_error(format!("invalid value for {}: {:?}", name, value))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn set<T: FromStr>(target: &mut T, name: &str) -> Result<(), Error> {
    if let Some(value) = var(name)? {
        *target = value;
    }

    Ok(())
}

fn ensure(holds: bool, name: &str, requirement: &str) -> Result<(), Error> {
    if holds {
        Ok(())
    } else {
        Err(Error::validation_error(format!("{} {}", name, requirement)))
    }
}

fn ensure_fraction(value: f64, name: &str) -> Result<(), Error> {
    ensure(
        value.is_finite() && (0.0..=1.0).contains(&value),
        name,
        "must be between 0 and 1",
    )
}

impl Config {
    /// Defaults, overridden by `.env` and `CURSUS_*` environment variables.
    #[tracing::instrument(name = "Config::from_env")]
    pub fn from_env() -> Result<Self, Error> {
        if let Err(err) = dotenv::dotenv() {
            tracing::debug!("no .env file loaded: {}", err);
        }

        let mut config = Self::default();

        for tier in [Tier::Normal, Tier::Premium, Tier::Vip] {
            let prefix = format!("CURSUS_{}", tier.name().to_uppercase());
            let policy = config.tiers.get_mut(tier);

            set(&mut policy.search_radius_km, &format!("{}_RADIUS_KM", prefix))?;
            set(&mut policy.offer_timeout_secs, &format!("{}_OFFER_TIMEOUT_SECS", prefix))?;
            set(
                &mut policy.free_cancellation_window_secs,
                &format!("{}_FREE_CANCEL_SECS", prefix),
            )?;
            set(
                &mut policy.daily_cancellation_cap,
                &format!("{}_DAILY_CANCEL_CAP", prefix),
            )?;
            set(&mut policy.cancellation_fee, &format!("{}_CANCEL_FEE", prefix))?;
            set(&mut policy.sos_eligible, &format!("{}_SOS", prefix))?;
        }

        let weights = &mut config.matching.weights;
        set(&mut weights.distance, "CURSUS_WEIGHT_DISTANCE")?;
        set(&mut weights.rating, "CURSUS_WEIGHT_RATING")?;
        set(&mut weights.compatibility, "CURSUS_WEIGHT_COMPATIBILITY")?;
        set(&mut weights.idle_time, "CURSUS_WEIGHT_IDLE_TIME")?;
        set(&mut weights.tier_affinity, "CURSUS_WEIGHT_TIER_AFFINITY")?;

        set(&mut config.matching.max_radius_expansions, "CURSUS_MAX_RADIUS_EXPANSIONS")?;
        set(&mut config.matching.radius_expansion_factor, "CURSUS_RADIUS_EXPANSION_FACTOR")?;
        if let Some(secs) = var::<i64>("CURSUS_EXCLUSION_COOLDOWN_SECS")? {
            config.matching.exclusion = ExclusionPolicy::Cooldown { secs };
        }

        set(&mut config.workflow.workers, "CURSUS_WORKFLOW_WORKERS")?;
        set(&mut config.workflow.max_retries, "CURSUS_WORKFLOW_MAX_RETRIES")?;
        set(&mut config.workflow.base_backoff_ms, "CURSUS_WORKFLOW_BASE_BACKOFF_MS")?;
        set(&mut config.workflow.max_backoff_ms, "CURSUS_WORKFLOW_MAX_BACKOFF_MS")?;
        set(&mut config.workflow.poll_interval_ms, "CURSUS_WORKFLOW_POLL_INTERVAL_MS")?;
        set(&mut config.workflow.call_timeout_ms, "CURSUS_WORKFLOW_CALL_TIMEOUT_MS")?;

        set(&mut config.surge.min_multiplier, "CURSUS_SURGE_MIN_MULTIPLIER")?;
        set(&mut config.surge.max_multiplier, "CURSUS_SURGE_MAX_MULTIPLIER")?;
        set(&mut config.surge.decay, "CURSUS_SURGE_DECAY")?;
        set(&mut config.surge.recompute_interval_secs, "CURSUS_SURGE_RECOMPUTE_SECS")?;

        set(&mut config.emergency.tick_interval_ms, "CURSUS_ESCALATION_TICK_MS")?;
        set(&mut config.emergency.stage_retry_secs, "CURSUS_ESCALATION_RETRY_SECS")?;

        set(&mut config.max_conflict_retries, "CURSUS_MAX_CONFLICT_RETRIES")?;
        set(&mut config.max_payment_retries, "CURSUS_MAX_PAYMENT_RETRIES")?;
        set(&mut config.commission_rate, "CURSUS_COMMISSION_RATE")?;
        set(&mut config.sweep_interval_ms, "CURSUS_SWEEP_INTERVAL_MS")?;
        set(&mut config.listen_addr, "CURSUS_LISTEN_ADDR")?;

        config.database_url = var("CURSUS_DATABASE_URL")?;
        config.payment_endpoint = var("CURSUS_PAYMENT_ENDPOINT")?;
        config.notification_endpoint = var("CURSUS_NOTIFICATION_ENDPOINT")?;

        config.validate()?;

        Ok(config)
    }

    /// Rejects values the engine cannot run with. Errors name the variable
    /// that sets the offending field.
    pub fn validate(&self) -> Result<(), Error> {
        self.matching.weights.validate()?;

        for tier in [Tier::Normal, Tier::Premium, Tier::Vip] {
            let prefix = format!("CURSUS_{}", tier.name().to_uppercase());
            let policy = self.tiers.get(tier);

            ensure(
                policy.search_radius_km.is_finite() && policy.search_radius_km > 0.0,
                &format!("{}_RADIUS_KM", prefix),
                "must be positive",
            )?;
            ensure(
                policy.offer_timeout_secs > 0,
                &format!("{}_OFFER_TIMEOUT_SECS", prefix),
                "must be positive",
            )?;
            ensure(
                policy.free_cancellation_window_secs >= 0,
                &format!("{}_FREE_CANCEL_SECS", prefix),
                "must not be negative",
            )?;
            ensure(
                policy.cancellation_fee.is_finite() && policy.cancellation_fee >= 0.0,
                &format!("{}_CANCEL_FEE", prefix),
                "must not be negative",
            )?;
        }

        let matching = &self.matching;
        ensure(
            matching.radius_expansion_factor.is_finite() && matching.radius_expansion_factor >= 1.0,
            "CURSUS_RADIUS_EXPANSION_FACTOR",
            "must be at least 1",
        )?;
        if let ExclusionPolicy::Cooldown { secs } = matching.exclusion {
            ensure(secs >= 0, "CURSUS_EXCLUSION_COOLDOWN_SECS", "must not be negative")?;
        }

        let workflow = &self.workflow;
        ensure(workflow.workers > 0, "CURSUS_WORKFLOW_WORKERS", "must be at least 1")?;
        ensure(
            workflow.base_backoff_ms >= 0,
            "CURSUS_WORKFLOW_BASE_BACKOFF_MS",
            "must not be negative",
        )?;
        ensure(
            workflow.max_backoff_ms >= workflow.base_backoff_ms,
            "CURSUS_WORKFLOW_MAX_BACKOFF_MS",
            "must not be below CURSUS_WORKFLOW_BASE_BACKOFF_MS",
        )?;
        ensure(
            workflow.poll_interval_ms > 0,
            "CURSUS_WORKFLOW_POLL_INTERVAL_MS",
            "must be positive",
        )?;
        ensure(
            workflow.call_timeout_ms > 0,
            "CURSUS_WORKFLOW_CALL_TIMEOUT_MS",
            "must be positive",
        )?;

        let surge = &self.surge;
        ensure(
            surge.min_multiplier.is_finite() && surge.min_multiplier >= 1.0,
            "CURSUS_SURGE_MIN_MULTIPLIER",
            "must be at least 1",
        )?;
        ensure(
            surge.max_multiplier.is_finite() && surge.max_multiplier >= surge.min_multiplier,
            "CURSUS_SURGE_MAX_MULTIPLIER",
            "must not be below CURSUS_SURGE_MIN_MULTIPLIER",
        )?;
        ensure_fraction(surge.decay, "CURSUS_SURGE_DECAY")?;
        ensure_fraction(surge.demand_retention, "surge demand retention")?;
        ensure(
            surge.recompute_interval_secs > 0,
            "CURSUS_SURGE_RECOMPUTE_SECS",
            "must be positive",
        )?;

        let emergency = &self.emergency;
        ensure(
            emergency.tick_interval_ms > 0,
            "CURSUS_ESCALATION_TICK_MS",
            "must be positive",
        )?;
        ensure(
            emergency.stage_retry_secs > 0,
            "CURSUS_ESCALATION_RETRY_SECS",
            "must be positive",
        )?;
        ensure(
            emergency.call_timeout_ms > 0 && emergency.monitoring_interval_secs > 0,
            "emergency call timeout and monitoring interval",
            "must be positive",
        )?;

        ensure_fraction(self.commission_rate, "CURSUS_COMMISSION_RATE")?;
        ensure(
            self.arrived_fee_multiplier.is_finite() && self.arrived_fee_multiplier >= 0.0,
            "arrived fee multiplier",
            "must not be negative",
        )?;
        ensure(
            self.sweep_interval_ms > 0,
            "CURSUS_SWEEP_INTERVAL_MS",
            "must be positive",
        )?;

        Ok(())
    }

    pub fn exclusion_until(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Option<chrono::DateTime<chrono::Utc>> {
        match self.matching.exclusion {
            ExclusionPolicy::Permanent => None,
            ExclusionPolicy::Cooldown { secs } => Some(now + Duration::seconds(secs)),
        }
    }
}
