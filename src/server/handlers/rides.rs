use axum::extract::{Extension, Json, Path};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::RideAPI;
use crate::entities::{Actor, CancellationRecord, MatchingAttemptLog, Ride, RideRequest, Status};
use crate::error::Error;
use crate::server::DynAPI;

#[derive(Serialize, Deserialize)]
pub struct TransitionParams {
    expected_version: u64,
    status: Status,
}

#[derive(Serialize, Deserialize)]
pub struct CancelParams {
    actor: Actor,
    #[serde(default)]
    reason: String,
}

#[derive(Serialize, Deserialize)]
pub struct DriverParams {
    driver_id: Uuid,
}

#[derive(Serialize, Deserialize)]
pub struct PaymentResultParams {
    transaction_ref: String,
    succeeded: bool,
}

#[derive(Serialize, Deserialize)]
pub struct DisputeParams {
    #[serde(default)]
    reason: String,
}

#[derive(Serialize, Deserialize)]
pub struct ResolveDisputeParams {
    refund: bool,
}

pub async fn create(
    Extension(api): Extension<DynAPI>,
    Json(request): Json<RideRequest>,
) -> Result<Json<Ride>, Error> {
    let ride = api.request_ride(request).await?;

    Ok(ride.into())
}

pub async fn find(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, Error> {
    let ride = api.find_ride(id).await?;

    Ok(ride.into())
}

pub async fn transition(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
    Json(params): Json<TransitionParams>,
) -> Result<Json<Ride>, Error> {
    let ride = api
        .transition_ride(id, params.expected_version, params.status)
        .await?;

    Ok(ride.into())
}

pub async fn cancel(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
    Json(params): Json<CancelParams>,
) -> Result<Json<Ride>, Error> {
    let ride = api.cancel_ride(id, params.actor, params.reason).await?;

    Ok(ride.into())
}

pub async fn cancellations(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<CancellationRecord>>, Error> {
    let records = api.cancellations(id).await?;

    Ok(records.into())
}

pub async fn matching_logs(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<MatchingAttemptLog>>, Error> {
    let logs = api.matching_logs(id).await?;

    Ok(logs.into())
}

pub async fn accept(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
    Json(params): Json<DriverParams>,
) -> Result<Json<Ride>, Error> {
    let ride = api.accept_ride(id, params.driver_id).await?;

    Ok(ride.into())
}

pub async fn decline(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
    Json(params): Json<DriverParams>,
) -> Result<Json<Ride>, Error> {
    let ride = api.decline_ride(id, params.driver_id).await?;

    Ok(ride.into())
}

pub async fn en_route(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
    Json(params): Json<DriverParams>,
) -> Result<Json<Ride>, Error> {
    let ride = api.driver_en_route(id, params.driver_id).await?;

    Ok(ride.into())
}

pub async fn arrived(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
    Json(params): Json<DriverParams>,
) -> Result<Json<Ride>, Error> {
    let ride = api.driver_arrived(id, params.driver_id).await?;

    Ok(ride.into())
}

pub async fn start(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
    Json(params): Json<DriverParams>,
) -> Result<Json<Ride>, Error> {
    let ride = api.start_trip(id, params.driver_id).await?;

    Ok(ride.into())
}

pub async fn complete(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
    Json(params): Json<DriverParams>,
) -> Result<Json<Ride>, Error> {
    let ride = api.complete_trip(id, params.driver_id).await?;

    Ok(ride.into())
}

pub async fn record_payment(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
    Json(params): Json<PaymentResultParams>,
) -> Result<Json<Ride>, Error> {
    let ride = api
        .record_payment_result(id, params.transaction_ref, params.succeeded)
        .await?;

    Ok(ride.into())
}

pub async fn retry_payment(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, Error> {
    let ride = api.retry_payment(id).await?;

    Ok(ride.into())
}

pub async fn open_dispute(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
    Json(params): Json<DisputeParams>,
) -> Result<Json<Ride>, Error> {
    let ride = api.open_dispute(id, params.reason).await?;

    Ok(ride.into())
}

pub async fn resolve_dispute(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
    Json(params): Json<ResolveDisputeParams>,
) -> Result<Json<Ride>, Error> {
    let ride = api.resolve_dispute(id, params.refund).await?;

    Ok(ride.into())
}
