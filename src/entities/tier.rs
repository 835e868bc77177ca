use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Normal,
    Premium,
    Vip,
}

impl Tier {
    pub fn name(&self) -> String {
        match self {
            Self::Normal => "normal".into(),
            Self::Premium => "premium".into(),
            Self::Vip => "vip".into(),
        }
    }

    pub fn requires_trusted_driver(&self) -> bool {
        matches!(self, Self::Vip)
    }
}

/// Everything that varies by service level: search radius, offer timeout,
/// cancellation terms, emergency eligibility and fare rates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub search_radius_km: f64,
    pub offer_timeout_secs: i64,
    pub free_cancellation_window_secs: i64,
    pub daily_cancellation_cap: u32,
    pub cancellation_fee: f64,
    pub sos_eligible: bool,
    pub base_fare: f64,
    pub per_km: f64,
    pub per_minute: f64,
}

impl TierPolicy {
    pub fn offer_timeout(&self) -> Duration {
        Duration::seconds(self.offer_timeout_secs)
    }

    pub fn free_cancellation_window(&self) -> Duration {
        Duration::seconds(self.free_cancellation_window_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    pub normal: TierPolicy,
    pub premium: TierPolicy,
    pub vip: TierPolicy,
}

impl TierTable {
    pub fn get(&self, tier: Tier) -> &TierPolicy {
        match tier {
            Tier::Normal => &self.normal,
            Tier::Premium => &self.premium,
            Tier::Vip => &self.vip,
        }
    }

    pub fn get_mut(&mut self, tier: Tier) -> &mut TierPolicy {
        match tier {
            Tier::Normal => &mut self.normal,
            Tier::Premium => &mut self.premium,
            Tier::Vip => &mut self.vip,
        }
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            normal: TierPolicy {
                search_radius_km: 5.0,
                offer_timeout_secs: 180,
                free_cancellation_window_secs: 300,
                daily_cancellation_cap: 3,
                cancellation_fee: 5.0,
                sos_eligible: false,
                base_fare: 2.5,
                per_km: 1.2,
                per_minute: 0.25,
            },
            premium: TierPolicy {
                search_radius_km: 10.0,
                offer_timeout_secs: 120,
                free_cancellation_window_secs: 600,
                daily_cancellation_cap: 5,
                cancellation_fee: 8.0,
                sos_eligible: false,
                base_fare: 5.0,
                per_km: 2.0,
                per_minute: 0.4,
            },
            vip: TierPolicy {
                search_radius_km: 15.0,
                offer_timeout_secs: 60,
                free_cancellation_window_secs: 900,
                daily_cancellation_cap: 10,
                cancellation_fee: 15.0,
                sos_eligible: true,
                base_fare: 10.0,
                per_km: 3.5,
                per_minute: 0.75,
            },
        }
    }
}
