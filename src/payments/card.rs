// src/payments/card.rs

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{
    mismatched_details, PaymentDetails, PaymentOutcome, PaymentProvider, PaymentReceipt,
    PaymentRequest, Simulation,
};
use crate::errors::AppError;
use crate::models::PaymentMethod;

/// Płatność kartą jest symulowana: opóźnienie, potem sukces.
#[derive(Debug)]
pub struct CardProvider {
    simulation: Simulation,
}

impl CardProvider {
    pub fn new(simulation: Simulation) -> Self {
        Self { simulation }
    }
}

#[async_trait]
impl PaymentProvider for CardProvider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Card
    }

    async fn initiate(
        &self,
        request: PaymentRequest,
        cancel: CancellationToken,
    ) -> Result<PaymentOutcome, AppError> {
        let PaymentDetails::Card(card) = &request.details else {
            return Err(mismatched_details(self.method(), &request.details));
        };
        tracing::info!("Autoryzacja karty {:?} na kwotę {}", card, request.amount);

        if !self.simulation.wait(&cancel).await {
            tracing::debug!("Płatność kartą przerwana przed zakończeniem");
            return Ok(PaymentOutcome::Aborted);
        }
        if !self.simulation.roll() {
            return Ok(PaymentOutcome::Declined(
                "Card payment was declined".to_string(),
            ));
        }

        Ok(PaymentOutcome::Succeeded(PaymentReceipt {
            method: PaymentMethod::Card,
            reference: format!("CARD-****{}", card.last4()),
            capture_id: None,
            amount: request.amount,
            currency: request.currency,
            payer: None,
            status: "COMPLETED".to_string(),
        }))
    }
}
