use axum::extract::{Extension, Json, Path};
use uuid::Uuid;

use crate::api::EmergencyAPI;
use crate::entities::Escalation;
use crate::error::Error;
use crate::server::DynAPI;

pub async fn trigger(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<Escalation>, Error> {
    let escalation = api.trigger_sos(id).await?;

    Ok(escalation.into())
}

pub async fn find(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<Escalation>, Error> {
    let escalation = api.find_escalation(id).await?;

    Ok(escalation.into())
}

pub async fn clear(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<Escalation>, Error> {
    let escalation = api.clear_sos(id).await?;

    Ok(escalation.into())
}
