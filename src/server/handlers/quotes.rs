use axum::extract::{Extension, Json, Path};
use uuid::Uuid;

use crate::api::QuoteAPI;
use crate::entities::{Quote, QuoteRequest};
use crate::error::Error;
use crate::server::DynAPI;

pub async fn create(
    Extension(api): Extension<DynAPI>,
    Json(request): Json<QuoteRequest>,
) -> Result<Json<Quote>, Error> {
    let quote = api.create_quote(request).await?;

    Ok(quote.into())
}

pub async fn find(
    Extension(api): Extension<DynAPI>,
    Path(token): Path<Uuid>,
) -> Result<Json<Quote>, Error> {
    let quote = api.find_quote(token).await?;

    Ok(quote.into())
}
