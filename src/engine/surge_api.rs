use super::Engine;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    api::SurgeAPI,
    entities::{Coordinates, SurgeZone, ZoneDefinition},
    error::Error,
};

#[async_trait]
impl SurgeAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn create_zone(&self, definition: ZoneDefinition) -> Result<SurgeZone, Error> {
        let zone = self.surge.create_zone(definition, self.clock.now()).await?;
        self.store.upsert_zone(&zone).await?;

        Ok(zone)
    }

    async fn list_zones(&self) -> Result<Vec<SurgeZone>, Error> {
        Ok(self.surge.zones().await)
    }

    async fn find_zone(&self, id: Uuid) -> Result<SurgeZone, Error> {
        self.surge
            .find(id)
            .await
            .ok_or_else(|| Error::not_found_error(format!("surge zone {}", id)))
    }

    async fn multiplier_at(&self, point: Coordinates) -> Result<f64, Error> {
        point.validate()?;
        Ok(self.surge.multiplier_at(&point).await)
    }
}

impl Engine {
    /// Samples available supply per zone and moves each multiplier one step.
    #[tracing::instrument(skip(self))]
    pub async fn recompute_surge(&self) -> Result<usize, Error> {
        let fresh_since = self.location_fresh_since();
        let mut updated = 0;

        for zone in self.surge.zones().await {
            let supply = self
                .locator
                .count_available_within(zone.center, zone.radius_km, fresh_since)
                .await?;

            if let Some(zone) = self.surge.recompute(zone.id, supply, self.clock.now()).await {
                self.store.upsert_zone(&zone).await?;
                updated += 1;
            }
        }

        Ok(updated)
    }
}
