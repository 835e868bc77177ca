use super::Engine;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    api::QuoteAPI,
    entities::{Fare, Quote, QuoteRequest},
    error::Error,
};

/// Used to estimate trip duration from straight-line distance.
const AVERAGE_SPEED_KMH: f64 = 30.0;

#[async_trait]
impl QuoteAPI for Engine {
    #[tracing::instrument(skip(self, request))]
    async fn create_quote(&self, request: QuoteRequest) -> Result<Quote, Error> {
        request.pickup.coordinates.validate()?;
        request.destination.coordinates.validate()?;

        if request.pickup.coordinates == request.destination.coordinates {
            return Err(Error::validation_error("pickup and destination must differ"));
        }

        let distance_km = request
            .pickup
            .coordinates
            .distance_km(&request.destination.coordinates);
        let duration_minutes = distance_km / AVERAGE_SPEED_KMH * 60.0;
        let surge_multiplier = self.surge.multiplier_at(&request.pickup.coordinates).await;

        let estimate = Fare::calculate(
            self.config.tiers.get(request.tier),
            distance_km,
            duration_minutes,
            surge_multiplier,
            self.config.commission_rate,
        );

        let quote = Quote {
            token: Uuid::new_v4(),
            pickup: request.pickup,
            destination: request.destination,
            tier: request.tier,
            vehicle_type: request.vehicle_type,
            surge_multiplier,
            estimate,
            created_at: self.clock.now(),
        };

        self.store.insert_quote(&quote).await?;

        Ok(quote)
    }

    #[tracing::instrument(skip(self))]
    async fn find_quote(&self, token: Uuid) -> Result<Quote, Error> {
        self.store
            .find_quote(token)
            .await?
            .ok_or_else(|| Error::not_found_error(format!("quote {}", token)))
    }
}
