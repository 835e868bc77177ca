use axum::extract::{Extension, Json};

use crate::api::{MatchingStats, StatsAPI};
use crate::entities::WorkflowAction;
use crate::error::Error;
use crate::server::DynAPI;

pub async fn matching(Extension(api): Extension<DynAPI>) -> Result<Json<MatchingStats>, Error> {
    let stats = api.matching_stats().await?;

    Ok(stats.into())
}

pub async fn failed_actions(
    Extension(api): Extension<DynAPI>,
) -> Result<Json<Vec<WorkflowAction>>, Error> {
    let actions = api.failed_actions().await?;

    Ok(actions.into())
}
