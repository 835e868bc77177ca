mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, patch, post},
    Router,
};

use crate::api::API;
use crate::error::Error;
use crate::server::handlers::{drivers, emergency, quotes, rides, stats, surge};

pub type DynAPI = Arc<dyn API + Send + Sync>;

pub fn router(api: DynAPI) -> Router {
    Router::new()
        .route("/quotes", post(quotes::create))
        .route("/quotes/:token", get(quotes::find))
        .route("/rides", post(rides::create))
        .route("/rides/:id", get(rides::find))
        .route("/rides/:id/status", patch(rides::transition))
        .route("/rides/:id/cancel", patch(rides::cancel))
        .route("/rides/:id/cancellations", get(rides::cancellations))
        .route("/rides/:id/matching_logs", get(rides::matching_logs))
        .route("/rides/:id/driver/accept", patch(rides::accept))
        .route("/rides/:id/driver/decline", patch(rides::decline))
        .route("/rides/:id/driver/en_route", patch(rides::en_route))
        .route("/rides/:id/driver/arrived", patch(rides::arrived))
        .route("/rides/:id/driver/start", patch(rides::start))
        .route("/rides/:id/driver/complete", patch(rides::complete))
        .route("/rides/:id/payment", patch(rides::record_payment))
        .route("/rides/:id/payment/retry", patch(rides::retry_payment))
        .route("/rides/:id/dispute", patch(rides::open_dispute))
        .route("/rides/:id/dispute/resolve", patch(rides::resolve_dispute))
        .route("/rides/:id/sos", post(emergency::trigger).get(emergency::find))
        .route("/rides/:id/sos/clear", patch(emergency::clear))
        .route("/drivers", post(drivers::create))
        .route("/drivers/:id", get(drivers::find))
        .route("/drivers/:id/status", patch(drivers::update_status))
        .route("/surge/zones", post(surge::create).get(surge::list))
        .route("/surge/zones/:id", get(surge::find))
        .route("/surge/multiplier", get(surge::multiplier))
        .route("/stats/matching", get(stats::matching))
        .route("/stats/failed_actions", get(stats::failed_actions))
        .layer(Extension(api))
}

pub async fn serve(api: DynAPI, addr: SocketAddr) -> Result<(), Error> {
    let app = router(api);

    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(|err| Error::unexpected_error(format!("server error: {}", err)))
}
