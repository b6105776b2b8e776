// src/payments/mod.rs

//! Wspólny interfejs operatorów płatności.
//!
//! Każda metoda płatności (karta, BLIK, Przelewy24, PayPal) jest strategią
//! implementującą [`PaymentProvider`]. Przebieg płatności niesie własny
//! `CancellationToken` - zamknięcie okna płatności unieważnia token, a wynik
//! spóźnionego wywołania jest ignorowany.

pub mod blik;
pub mod card;
pub mod p24;
pub mod paypal;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::models::PaymentMethod;

use self::blik::BlikProvider;
use self::card::CardProvider;
use self::p24::{P24Channel, P24Client, P24Provider};
use self::paypal::{PayPalApproval, PayPalClient, PayPalProvider};

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Losowy ciąg w systemie 36 (małe litery), jak w identyfikatorach sesji.
pub fn random_base36(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from(BASE36[rng.random_range(0..BASE36.len())]))
        .collect()
}

pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Kwota w jednostkach podstawowych jako tekst, np. 6478 -> "64.78".
pub fn minor_to_decimal(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Odwrotność `minor_to_decimal`: "64.78" -> 6478, "64.7" -> 6470, "64" -> 6400.
/// Więcej niż dwa miejsca po przecinku albo śmieci w tekście dają `None`.
pub fn decimal_to_minor(value: &str) -> Option<i64> {
    let value = value.trim();
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty()
        || fraction.len() > 2
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    let cents = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction.parse::<i64>().ok()?,
    };
    let amount = whole.parse::<i64>().ok()?.checked_mul(100)?.checked_add(cents)?;
    Some(if negative { -amount } else { amount })
}

#[derive(Clone)]
pub struct CardDetails {
    pub number: String,
    pub expiry_date: String,
    pub cvv: String,
    pub card_name: String,
}

impl CardDetails {
    pub fn last4(&self) -> String {
        let digits: Vec<char> = self.number.chars().filter(char::is_ascii_digit).collect();
        let start = digits.len().saturating_sub(4);
        digits.get(start..).map(|d| d.iter().collect()).unwrap_or_default()
    }
}

// Dane karty nigdy nie trafiają do logów w całości
impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardDetails")
            .field("number", &format!("****{}", self.last4()))
            .field("card_name", &self.card_name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PayerInfo {
    pub email_address: Option<String>,
    pub given_name: Option<String>,
    pub surname: Option<String>,
}

/// Potwierdzenie udanej płatności, z którego powstaje zamówienie.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentReceipt {
    pub method: PaymentMethod,
    /// Identyfikator po stronie operatora (sesja P24, zamówienie PayPal...)
    pub reference: String,
    pub capture_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub payer: Option<PayerInfo>,
    pub status: String,
}

#[derive(Debug, Clone)]
pub enum PaymentDetails {
    Card(CardDetails),
    Blik { code: String },
    P24 { channel: P24Channel },
    PayPal(PayPalApproval),
}

impl PaymentDetails {
    pub fn method(&self) -> PaymentMethod {
        match self {
            PaymentDetails::Card(_) => PaymentMethod::Card,
            PaymentDetails::Blik { .. } => PaymentMethod::Blik,
            PaymentDetails::P24 { .. } => PaymentMethod::P24,
            PaymentDetails::PayPal(_) => PaymentMethod::PayPal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    /// Kwota w jednostkach podstawowych (centy / grosze)
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub email: String,
    pub details: PaymentDetails,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    Succeeded(PaymentReceipt),
    /// Odmowa lub błąd - komunikat pokazujemy użytkownikowi.
    Declined(String),
    /// Użytkownik sam zamknął okno operatora. To nie jest błąd.
    Dismissed(String),
    /// Płatność czeka na przekierowanie i powiadomienie od operatora.
    Pending {
        reference: String,
        redirect_url: String,
    },
    /// Token anulowano w trakcie - wynik nie ma już adresata.
    Aborted,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn method(&self) -> PaymentMethod;

    async fn initiate(
        &self,
        request: PaymentRequest,
        cancel: CancellationToken,
    ) -> Result<PaymentOutcome, AppError>;
}

/// Sztuczne opóźnienie + losowy wynik, używane przez tryby demonstracyjne.
#[derive(Debug, Clone, Copy)]
pub struct Simulation {
    pub latency: Duration,
    pub success_rate: f64,
}

impl Simulation {
    pub fn new(latency: Duration, success_rate: f64) -> Self {
        Self {
            latency,
            success_rate: success_rate.clamp(0.0, 1.0),
        }
    }

    /// Czeka `latency`. Zwraca `false`, jeśli w międzyczasie anulowano token.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.latency) => !cancel.is_cancelled(),
        }
    }

    pub fn roll(&self) -> bool {
        rand::rng().random_bool(self.success_rate)
    }
}

fn mismatched_details(expected: PaymentMethod, details: &PaymentDetails) -> AppError {
    tracing::error!(
        "Operator {} otrzymał dane dla metody {}",
        expected,
        details.method()
    );
    AppError::BadRequest(format!("Invalid payment details for {}", expected))
}

/// Rejestr strategii płatności.
#[derive(Clone)]
pub struct PaymentProviders {
    card: Arc<dyn PaymentProvider>,
    blik: Arc<dyn PaymentProvider>,
    p24: Arc<dyn PaymentProvider>,
    paypal: Arc<dyn PaymentProvider>,
}

impl PaymentProviders {
    pub fn new(config: &AppConfig, p24: Arc<P24Client>, paypal: Arc<PayPalClient>) -> Self {
        let sim = &config.simulation;
        Self {
            card: Arc::new(CardProvider::new(Simulation::new(sim.card_delay, 1.0))),
            blik: Arc::new(BlikProvider::new(Simulation::new(
                sim.blik_delay,
                sim.blik_success_rate,
            ))),
            p24: Arc::new(P24Provider::new(
                p24,
                Simulation::new(sim.p24_redirect_delay, 1.0),
            )),
            paypal: Arc::new(PayPalProvider::new(
                paypal,
                Simulation::new(sim.paypal_delay, 1.0),
            )),
        }
    }

    pub fn get(&self, method: PaymentMethod) -> Arc<dyn PaymentProvider> {
        match method {
            PaymentMethod::Card => Arc::clone(&self.card),
            PaymentMethod::Blik => Arc::clone(&self.blik),
            PaymentMethod::P24 => Arc::clone(&self.p24),
            PaymentMethod::PayPal => Arc::clone(&self.paypal),
        }
    }
}

impl fmt::Debug for PaymentProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentProviders").finish_non_exhaustive()
    }
}
