use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::SurgeConfig;
use crate::entities::{Coordinates, SurgeZone, ZoneDefinition};
use crate::error::Error;

/// Multiplier a zone moves to given its current value and fresh counters.
///
/// Rises straight to the demand/supply ratio, but only falls part of the way
/// toward it per recompute so prices ease back down.
pub fn next_multiplier(config: &SurgeConfig, current: f64, demand: f64, supply: u32) -> f64 {
    let ratio = demand / f64::from(supply.max(1));
    let target = ratio.clamp(config.min_multiplier, config.max_multiplier);

    let next = if target >= current {
        target
    } else {
        current - (current - target) * config.decay
    };

    let next = (next * 100.0).round() / 100.0;
    next.clamp(config.min_multiplier, config.max_multiplier)
}

/// Geo-zones and their current price multipliers. Knows nothing about rides;
/// callers feed it demand points and supply counts.
pub struct SurgeRegistry {
    config: SurgeConfig,
    zones: RwLock<HashMap<Uuid, SurgeZone>>,
}

impl SurgeRegistry {
    pub fn new(config: SurgeConfig) -> Self {
        Self {
            config,
            zones: RwLock::new(HashMap::new()),
        }
    }

    pub async fn load(&self, zones: Vec<SurgeZone>) {
        let mut current = self.zones.write().await;

        for zone in zones {
            current.insert(zone.id, zone);
        }
    }

    pub async fn create_zone(
        &self,
        definition: ZoneDefinition,
        now: DateTime<Utc>,
    ) -> Result<SurgeZone, Error> {
        definition.validate()?;

        let zone = SurgeZone::new(definition, now);
        self.zones.write().await.insert(zone.id, zone.clone());

        Ok(zone)
    }

    pub async fn zones(&self) -> Vec<SurgeZone> {
        let mut zones: Vec<SurgeZone> = self.zones.read().await.values().cloned().collect();
        zones.sort_by(|a, b| a.name.cmp(&b.name));
        zones
    }

    pub async fn find(&self, id: Uuid) -> Option<SurgeZone> {
        self.zones.read().await.get(&id).cloned()
    }

    pub async fn record_demand(&self, point: &Coordinates) -> usize {
        let mut zones = self.zones.write().await;
        let mut touched = 0;

        for zone in zones.values_mut().filter(|zone| zone.contains(point)) {
            zone.demand += 1.0;
            touched += 1;
        }

        touched
    }

    /// Highest multiplier among zones covering `point`; 1.0 outside every zone.
    pub async fn multiplier_at(&self, point: &Coordinates) -> f64 {
        self.zones
            .read()
            .await
            .values()
            .filter(|zone| zone.contains(point))
            .map(|zone| zone.multiplier)
            .fold(self.config.min_multiplier, f64::max)
    }

    pub async fn recompute(&self, id: Uuid, supply: u32, now: DateTime<Utc>) -> Option<SurgeZone> {
        let mut zones = self.zones.write().await;
        let zone = zones.get_mut(&id)?;

        let previous = zone.multiplier;
        zone.multiplier = next_multiplier(&self.config, zone.multiplier, zone.demand, supply);
        zone.supply = supply;
        zone.demand *= self.config.demand_retention;
        zone.last_recomputed_at = now;

        if (zone.multiplier - previous).abs() > f64::EPSILON {
            tracing::info!(
                zone = %zone.name,
                previous,
                multiplier = zone.multiplier,
                supply,
                "surge multiplier changed"
            );
        }

        Some(zone.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(name: &str, center: Coordinates, radius_km: f64) -> ZoneDefinition {
        ZoneDefinition {
            name: name.into(),
            center,
            radius_km,
        }
    }

    #[test]
    fn multiplier_is_bounded() {
        let config = SurgeConfig::default();

        assert_eq!(next_multiplier(&config, 1.0, 40.0, 2), 3.0);
        assert_eq!(next_multiplier(&config, 1.0, 1.0, 10), 1.0);
        assert_eq!(next_multiplier(&config, 1.0, 3.0, 0), 3.0);
    }

    #[test]
    fn multiplier_decays_toward_one() {
        let config = SurgeConfig::default();

        let first = next_multiplier(&config, 3.0, 0.0, 5);
        let second = next_multiplier(&config, first, 0.0, 5);

        assert_eq!(first, 2.0);
        assert_eq!(second, 1.5);
    }

    #[test]
    fn overlapping_zones_use_the_highest_multiplier() {
        tokio_test::block_on(async {
            let registry = SurgeRegistry::new(SurgeConfig::default());
            let center = Coordinates::new(40.7580, -73.9855);
            let now = Utc::now();

            let wide = registry
                .create_zone(definition("midtown", center, 3.0), now)
                .await
                .unwrap();
            let narrow = registry
                .create_zone(definition("times square", center, 0.5), now)
                .await
                .unwrap();

            for _ in 0..4 {
                registry.record_demand(&center).await;
            }
            registry.recompute(wide.id, 4, now).await.unwrap();
            registry.recompute(narrow.id, 2, now).await.unwrap();

            assert_eq!(registry.multiplier_at(&center).await, 2.0);
            assert_eq!(
                registry.multiplier_at(&center.offset_north_km(2.0)).await,
                1.0
            );
            assert_eq!(registry.multiplier_at(&center.offset_north_km(10.0)).await, 1.0);
        });
    }

    #[test]
    fn zones_need_a_positive_radius() {
        tokio_test::block_on(async {
            let registry = SurgeRegistry::new(SurgeConfig::default());

            let err = registry
                .create_zone(definition("nowhere", Coordinates::new(0.0, 0.0), 0.0), Utc::now())
                .await
                .unwrap_err();

            assert!(err.is_validation_error());
        });
    }
}
