// src/payments/blik.rs

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{
    mismatched_details, random_base36, PaymentDetails, PaymentOutcome, PaymentProvider,
    PaymentReceipt, PaymentRequest, Simulation,
};
use crate::errors::AppError;
use crate::models::PaymentMethod;

pub const BLIK_CODE_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlikError {
    #[error("BLIK code must be 6 digits")]
    InvalidLength,
    #[error("BLIK code expired. Please generate a new one.")]
    Expired,
}

impl From<BlikError> for AppError {
    fn from(err: BlikError) -> Self {
        AppError::UnprocessableEntity(err.to_string())
    }
}

/// Stan okna BLIK: wpisany kod i licznik ważności.
#[derive(Debug, Clone)]
pub struct BlikCode {
    code: String,
    issued_at: Instant,
    ttl: Duration,
}

impl BlikCode {
    pub fn new(ttl: Duration, now: Instant) -> Self {
        Self {
            code: String::new(),
            issued_at: now,
            ttl,
        }
    }

    /// Zapisuje wpisany tekst: tylko cyfry, najwyżej 6 znaków.
    pub fn input(&mut self, raw: &str) -> &str {
        self.code = raw
            .chars()
            .filter(char::is_ascii_digit)
            .take(BLIK_CODE_LEN)
            .collect();
        &self.code
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Pozostałe pełne sekundy; licznik tyka co sekundę.
    pub fn seconds_left(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.issued_at).as_secs();
        self.ttl.as_secs().saturating_sub(elapsed)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.seconds_left(now) == 0
    }

    pub fn countdown(&self, now: Instant) -> String {
        format_countdown(self.seconds_left(now))
    }

    /// Nowy kod: licznik od początku, pole wyczyszczone.
    pub fn regenerate(&mut self, now: Instant) {
        self.code.clear();
        self.issued_at = now;
    }

    /// Kod gotowy do wysłania albo powód, dla którego nie można go wysłać.
    pub fn ready_code(&self, now: Instant) -> Result<&str, BlikError> {
        if self.is_expired(now) {
            return Err(BlikError::Expired);
        }
        if self.code.len() != BLIK_CODE_LEN {
            return Err(BlikError::InvalidLength);
        }
        Ok(&self.code)
    }
}

pub fn format_countdown(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[derive(Debug)]
pub struct BlikProvider {
    simulation: Simulation,
}

impl BlikProvider {
    pub fn new(simulation: Simulation) -> Self {
        Self { simulation }
    }
}

#[async_trait]
impl PaymentProvider for BlikProvider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Blik
    }

    async fn initiate(
        &self,
        request: PaymentRequest,
        cancel: CancellationToken,
    ) -> Result<PaymentOutcome, AppError> {
        let PaymentDetails::Blik { code } = &request.details else {
            return Err(mismatched_details(self.method(), &request.details));
        };
        if code.len() != BLIK_CODE_LEN || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(BlikError::InvalidLength.into());
        }

        tracing::info!("Wysyłanie kodu BLIK do banku, kwota {}", request.amount);
        if !self.simulation.wait(&cancel).await {
            tracing::debug!("Płatność BLIK przerwana");
            return Ok(PaymentOutcome::Aborted);
        }

        if !self.simulation.roll() {
            tracing::warn!("Bank odrzucił płatność BLIK");
            return Ok(PaymentOutcome::Declined(
                "Payment declined by bank".to_string(),
            ));
        }

        Ok(PaymentOutcome::Succeeded(PaymentReceipt {
            method: PaymentMethod::Blik,
            reference: format!("BLIK_{}", random_base36(12).to_uppercase()),
            capture_id: None,
            amount: request.amount,
            currency: request.currency,
            payer: None,
            status: "COMPLETED".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(120);

    fn blik_request(code: &str) -> PaymentRequest {
        PaymentRequest {
            amount: 6478,
            currency: "USD".into(),
            description: "Order".into(),
            email: "neo@metaverse.dev".into(),
            details: PaymentDetails::Blik { code: code.into() },
        }
    }

    #[test]
    fn test_input_keeps_six_digits_only() {
        let mut blik = BlikCode::new(TTL, Instant::now());
        assert_eq!(blik.input("12a3456bb"), "123456");
        assert_eq!(blik.input("abc"), "");
        assert_eq!(blik.input("9 8-7"), "987");
        assert_eq!(blik.input("0000000000000"), "000000");
    }

    #[test]
    fn test_countdown_and_expiry() {
        let start = Instant::now();
        let blik = BlikCode::new(TTL, start);
        assert_eq!(blik.countdown(start), "2:00");
        assert_eq!(blik.countdown(start + Duration::from_millis(1500)), "1:59");
        assert_eq!(blik.countdown(start + Duration::from_secs(111)), "0:09");
        assert!(!blik.is_expired(start + Duration::from_secs(119)));
        assert!(blik.is_expired(start + Duration::from_secs(120)));
        assert_eq!(blik.seconds_left(start + Duration::from_secs(500)), 0);
    }

    #[test]
    fn test_expired_code_needs_regeneration() {
        let start = Instant::now();
        let mut blik = BlikCode::new(TTL, start);
        blik.input("123456");
        let later = start + Duration::from_secs(121);
        assert_eq!(blik.ready_code(later), Err(BlikError::Expired));

        blik.regenerate(later);
        assert_eq!(blik.code(), "");
        assert_eq!(blik.ready_code(later), Err(BlikError::InvalidLength));
        blik.input("654321");
        assert_eq!(blik.ready_code(later), Ok("654321"));
    }

    #[test]
    fn test_short_code_is_rejected() {
        let now = Instant::now();
        let mut blik = BlikCode::new(TTL, now);
        blik.input("123");
        assert_eq!(
            blik.ready_code(now).unwrap_err().to_string(),
            "BLIK code must be 6 digits"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_success_and_decline() {
        let ok = BlikProvider::new(Simulation::new(Duration::from_secs(3), 1.0));
        let outcome = ok
            .initiate(blik_request("123456"), CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, PaymentOutcome::Succeeded(ref r) if r.amount == 6478));

        let declining = BlikProvider::new(Simulation::new(Duration::from_secs(3), 0.0));
        let outcome = declining
            .initiate(blik_request("123456"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PaymentOutcome::Declined("Payment declined by bank".into())
        );
    }

    #[tokio::test]
    async fn test_provider_rejects_malformed_code() {
        let provider = BlikProvider::new(Simulation::new(Duration::ZERO, 1.0));
        let result = provider
            .initiate(blik_request("12ab56"), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AppError::UnprocessableEntity(_))));
    }
}
