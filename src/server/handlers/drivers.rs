use axum::extract::{Extension, Json, Path};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::DriverAPI;
use crate::entities::{Availability, Coordinates, Driver, DriverRegistration};
use crate::error::Error;
use crate::server::DynAPI;

#[derive(Serialize, Deserialize)]
pub struct UpdateStatusParams {
    location: Option<Coordinates>,
    availability: Option<Availability>,
}

pub async fn create(
    Extension(api): Extension<DynAPI>,
    Json(registration): Json<DriverRegistration>,
) -> Result<Json<Driver>, Error> {
    let driver = api.register_driver(registration).await?;

    Ok(driver.into())
}

pub async fn find(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, Error> {
    let driver = api.find_driver(id).await?;

    Ok(driver.into())
}

pub async fn update_status(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
    Json(params): Json<UpdateStatusParams>,
) -> Result<Json<Driver>, Error> {
    let driver = api
        .update_driver_status(id, params.location, params.availability)
        .await?;

    Ok(driver.into())
}
