use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::Ride;
use crate::error::Error;

#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Starts capture for a completed ride and returns the provider's transaction reference.
    /// The outcome arrives later through `record_payment_result`.
    async fn create_ride_payment(&self, ride: &Ride) -> Result<String, Error>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RidePaymentRequest {
    ride_id: Uuid,
    rider_id: Uuid,
    driver_id: Option<Uuid>,
    attempt: u32,
    amount: f64,
    platform_commission: f64,
    driver_earnings: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RidePaymentResponse {
    transaction_ref: String,
}

pub struct HttpPaymentService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPaymentService {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl PaymentService for HttpPaymentService {
    #[tracing::instrument(skip(self, ride), fields(ride_id = %ride.id))]
    async fn create_ride_payment(&self, ride: &Ride) -> Result<String, Error> {
        let fare = ride
            .fare
            .as_ref()
            .ok_or_else(|| Error::validation_error(format!("ride {} has no fare", ride.id)))?;

        let request = RidePaymentRequest {
            ride_id: ride.id,
            rider_id: ride.rider_id,
            driver_id: ride.driver_id,
            attempt: ride.payment.attempts,
            amount: fare.total,
            platform_commission: fare.platform_commission,
            driver_earnings: fare.driver_earnings,
        };

        let res = self
            .client
            .post(format!("{}/ride-payments", self.endpoint))
            .json(&request)
            .send()
            .await?;

        let status_code = res.status().as_u16();

        if (400..500).contains(&status_code) {
            return Err(Error::payment_failure_error(format!(
                "payment service rejected ride {} with status {}",
                ride.id, status_code
            )));
        } else if status_code != 200 && status_code != 201 {
            return Err(Error::upstream_error(format!(
                "payment service responded with status {}",
                status_code
            )));
        }

        let data: RidePaymentResponse = res.json().await?;

        Ok(data.transaction_ref)
    }
}

/// Issues local references without calling out; the default when no payment
/// endpoint is configured.
#[derive(Default)]
pub struct LocalPaymentService {
    issued: Mutex<Vec<(Uuid, String)>>,
}

impl LocalPaymentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issued(&self) -> Vec<(Uuid, String)> {
        self.issued
            .lock()
            .map(|issued| issued.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PaymentService for LocalPaymentService {
    async fn create_ride_payment(&self, ride: &Ride) -> Result<String, Error> {
        let transaction_ref = format!("local-{}-{}", ride.id.simple(), ride.payment.attempts);

        if let Ok(mut issued) = self.issued.lock() {
            issued.push((ride.id, transaction_ref.clone()));
        }

        tracing::info!(ride_id = %ride.id, %transaction_ref, "issued local payment reference");

        Ok(transaction_ref)
    }
}
