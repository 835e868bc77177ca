use std::sync::Arc;

use cursus::clock::SystemClock;
use cursus::config::Config;
use cursus::db::{MemoryStore, PgStore, Store};
use cursus::engine::{Dependencies, Engine};
use cursus::error::Error;
use cursus::external::{
    HttpNotifier, HttpPaymentService, LocalPaymentService, LogNotifier, Notifier, PaymentService,
};
use cursus::locator::{DriverLocator, GridLocator, PgLocator};
use cursus::server::{serve, DynAPI};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;

    let (store, locator): (Arc<dyn Store>, Arc<dyn DriverLocator>) = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, 5).await?;
            let locator = PgLocator::new(store.pool()).await?;
            (Arc::new(store), Arc::new(locator))
        }
        None => {
            tracing::warn!("CURSUS_DATABASE_URL not set, keeping state in memory");
            (Arc::new(MemoryStore::new()), Arc::new(GridLocator::default()))
        }
    };

    let payments: Arc<dyn PaymentService> = match &config.payment_endpoint {
        Some(endpoint) => Arc::new(HttpPaymentService::new(endpoint.as_str())),
        None => Arc::new(LocalPaymentService::new()),
    };

    let notifier: Arc<dyn Notifier> = match &config.notification_endpoint {
        Some(endpoint) => Arc::new(HttpNotifier::new(endpoint.as_str())),
        None => Arc::new(LogNotifier),
    };

    let addr = config.listen_addr;
    let engine = Arc::new(Engine::new(
        config,
        Dependencies {
            store,
            locator,
            notifier,
            payments,
            clock: Arc::new(SystemClock),
        },
    ));

    engine.recover().await?;
    let _background = engine.spawn_background();

    serve(engine as DynAPI, addr).await
}
