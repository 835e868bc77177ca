use super::Engine;

use uuid::Uuid;

use crate::{
    entities::{Ride, Status},
    error::Error,
};

impl Engine {
    /// Body of the initiate-payment workflow action.
    ///
    /// Skips rides that already hold a reference for the current attempt, so a
    /// redelivered action does not open a second capture.
    #[tracing::instrument(skip(self))]
    pub(crate) async fn initiate_payment(&self, ride_id: Uuid) -> Result<(), Error> {
        let ride = self.load_ride(ride_id).await?;

        if ride.status != Status::PaymentPending || ride.payment.transaction_ref.is_some() {
            tracing::info!(status = %ride.status.name(), "payment already initiated or no longer pending");
            return Ok(());
        }

        let transaction_ref = self.payments.create_ride_payment(&ride).await?;
        let attempt = ride.payment.attempts;

        self.with_ride(ride_id, |ride, _| {
            if ride.status == Status::PaymentPending && ride.payment.attempts == attempt {
                ride.payment.transaction_ref = Some(transaction_ref.clone());
            }
            Ok(())
        })
        .await?;

        tracing::info!(%transaction_ref, attempt, "payment initiated");

        Ok(())
    }

    pub(crate) async fn settle_payment(
        &self,
        id: Uuid,
        transaction_ref: String,
        succeeded: bool,
    ) -> Result<Ride, Error> {
        let ride = self
            .with_ride(id, |ride, now| {
                if ride.status != Status::PaymentPending {
                    let next = if succeeded {
                        Status::PaymentCompleted
                    } else {
                        Status::PaymentFailed
                    };
                    return Err(Error::illegal_transition_error(ride.status, next));
                }

                match &ride.payment.transaction_ref {
                    Some(current) if current == &transaction_ref => {}
                    _ => {
                        return Err(Error::validation_error(format!(
                            "transaction {} does not belong to the current payment attempt of ride {}",
                            transaction_ref, ride.id
                        )))
                    }
                }

                if succeeded {
                    ride.transition(Status::PaymentCompleted, now)
                } else {
                    ride.transition(Status::PaymentFailed, now)
                }
            })
            .await?;

        if succeeded {
            tracing::info!(%transaction_ref, "payment completed");
        } else {
            tracing::warn!(%transaction_ref, attempts = ride.payment.attempts, "payment failed");
        }

        Ok(ride)
    }

    /// Moves a failed payment back to pending while retries remain; past the
    /// bound the ride is flagged for manual reconciliation instead.
    pub(crate) async fn retry_failed_payment(&self, id: Uuid) -> Result<Ride, Error> {
        let max_retries = self.config.max_payment_retries;
        let mut exhausted = false;

        let ride = self
            .with_ride(id, |ride, now| {
                if ride.status != Status::PaymentFailed {
                    return Err(Error::illegal_transition_error(ride.status, Status::PaymentPending));
                }

                exhausted = ride.payment.needs_reconciliation || ride.payment.attempts > max_retries;

                if exhausted {
                    ride.payment.needs_reconciliation = true;
                    return Ok(());
                }

                ride.transition(Status::PaymentPending, now)
            })
            .await?;

        if exhausted {
            tracing::error!(attempts = ride.payment.attempts, "payment retries exhausted, ride needs manual reconciliation");
            return Err(Error::payment_failure_error(format!(
                "ride {} exhausted {} payment retries and is flagged for manual reconciliation",
                ride.id, max_retries
            )));
        }

        Ok(ride)
    }
}
