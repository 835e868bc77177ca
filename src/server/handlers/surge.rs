use axum::extract::{Extension, Json, Path, Query};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::SurgeAPI;
use crate::entities::{Coordinates, SurgeZone, ZoneDefinition};
use crate::error::Error;
use crate::server::DynAPI;

#[derive(Serialize, Deserialize)]
pub struct MultiplierResponse {
    coordinates: Coordinates,
    multiplier: f64,
}

pub async fn create(
    Extension(api): Extension<DynAPI>,
    Json(definition): Json<ZoneDefinition>,
) -> Result<Json<SurgeZone>, Error> {
    let zone = api.create_zone(definition).await?;

    Ok(zone.into())
}

pub async fn list(Extension(api): Extension<DynAPI>) -> Result<Json<Vec<SurgeZone>>, Error> {
    let zones = api.list_zones().await?;

    Ok(zones.into())
}

pub async fn find(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<SurgeZone>, Error> {
    let zone = api.find_zone(id).await?;

    Ok(zone.into())
}

pub async fn multiplier(
    Extension(api): Extension<DynAPI>,
    Query(coordinates): Query<Coordinates>,
) -> Result<Json<MultiplierResponse>, Error> {
    let multiplier = api.multiplier_at(coordinates).await?;

    Ok(MultiplierResponse {
        coordinates,
        multiplier,
    }
    .into())
}
