// src/checkout.rs

//! Maszyna stanów zamówienia: formularz -> (okno płatności) -> przetwarzanie -> gotowe.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cart::Cart;
use crate::errors::AppError;
use crate::models::{CheckoutFormPayload, Order, PaymentMethod};
use crate::payments::blik::BlikCode;
use crate::payments::p24::P24Channel;
use crate::payments::{
    random_base36, CardDetails, PaymentDetails, PaymentOutcome, PaymentReceipt, PaymentRequest,
};

#[derive(Debug, Clone)]
pub enum CheckoutStage {
    FormEntry,
    Processing,
    Complete(Box<Order>),
}

impl CheckoutStage {
    pub fn name(&self) -> &'static str {
        match self {
            CheckoutStage::FormEntry => "form_entry",
            CheckoutStage::Processing => "processing",
            CheckoutStage::Complete(_) => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct P24Pending {
    pub session_id: String,
    pub redirect_url: String,
}

/// Stan okna konkretnej metody płatności.
#[derive(Debug, Clone)]
pub enum AttemptStep {
    Card,
    Blik(BlikCode),
    P24 {
        channel: P24Channel,
        pending: Option<P24Pending>,
    },
    PayPal,
}

#[derive(Debug)]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub method: PaymentMethod,
    token: CancellationToken,
    pub step: AttemptStep,
    pub in_flight: bool,
    pub error: Option<String>,
    pub notice: Option<String>,
}

impl PaymentAttempt {
    fn open(method: PaymentMethod, blik_ttl: Duration, now: Instant) -> Self {
        let step = match method {
            PaymentMethod::Card => AttemptStep::Card,
            PaymentMethod::Blik => AttemptStep::Blik(BlikCode::new(blik_ttl, now)),
            PaymentMethod::P24 => AttemptStep::P24 {
                channel: P24Channel::default(),
                pending: None,
            },
            PaymentMethod::PayPal => AttemptStep::PayPal,
        };
        Self {
            id: Uuid::new_v4(),
            method,
            token: CancellationToken::new(),
            step,
            in_flight: false,
            error: None,
            notice: None,
        }
    }

    /// Identyfikator i token potrzebne do rozliczenia tej próby.
    pub fn handle(&self) -> (Uuid, CancellationToken) {
        (self.id, self.token.clone())
    }

    pub fn blik_mut(&mut self) -> Result<&mut BlikCode, AppError> {
        match &mut self.step {
            AttemptStep::Blik(code) => Ok(code),
            _ => Err(AppError::Conflict("BLIK payment is not open".to_string())),
        }
    }
}

/// Przyjęty formularz. Dane karty wychodzą stąd raz i nie zostają w sesji.
#[derive(Debug)]
pub struct Submission {
    pub method: PaymentMethod,
    pub card: Option<CardDetails>,
}

/// Wynik rozliczenia próby płatności.
#[derive(Debug, Clone)]
pub enum Settled {
    /// Wywołanie spóźnione lub anulowane - stan bez zmian.
    Ignored,
    Completed(Box<Order>),
    Failed(String),
    Dismissed(String),
    Pending { redirect_url: String },
}

#[derive(Debug)]
pub struct CheckoutFlow {
    stage: CheckoutStage,
    form: Option<CheckoutFormPayload>,
    attempt: Option<PaymentAttempt>,
    form_error: Option<String>,
}

impl Default for CheckoutFlow {
    fn default() -> Self {
        Self::new()
    }
}

pub fn random_order_number() -> String {
    format!("MV{}", random_base36(9).to_uppercase())
}

/// Numer zamówienia. Dla P24 i PayPal bierzemy drugi segment identyfikatora
/// operatora (`MV_1700000000000_x` -> `MV1700000000000`).
pub fn order_number_for(receipt: &PaymentReceipt) -> String {
    match receipt.method {
        PaymentMethod::P24 | PaymentMethod::PayPal => receipt
            .reference
            .split('_')
            .nth(1)
            .filter(|segment| !segment.is_empty())
            .map(|segment| format!("MV{}", segment))
            .unwrap_or_else(random_order_number),
        PaymentMethod::Card | PaymentMethod::Blik => random_order_number(),
    }
}

pub fn order_description(cart: &Cart) -> String {
    let names: Vec<&str> = cart.items().iter().map(|i| i.name.as_str()).collect();
    format!("MetaVerse Hub Order - {}", names.join(", "))
}

impl CheckoutFlow {
    pub fn new() -> Self {
        Self {
            stage: CheckoutStage::FormEntry,
            form: None,
            attempt: None,
            form_error: None,
        }
    }

    pub fn stage(&self) -> &CheckoutStage {
        &self.stage
    }

    pub fn form(&self) -> Option<&CheckoutFormPayload> {
        self.form.as_ref()
    }

    pub fn attempt(&self) -> Option<&PaymentAttempt> {
        self.attempt.as_ref()
    }

    pub fn attempt_mut(&mut self) -> Result<&mut PaymentAttempt, AppError> {
        self.attempt
            .as_mut()
            .ok_or_else(|| AppError::Conflict("No payment in progress".to_string()))
    }

    pub fn form_error(&self) -> Option<&str> {
        self.form_error.as_deref()
    }

    pub fn order(&self) -> Option<&Order> {
        match &self.stage {
            CheckoutStage::Complete(order) => Some(&**order),
            _ => None,
        }
    }

    /// Wysłanie formularza. Karta przechodzi od razu do przetwarzania,
    /// pozostałe metody otwierają swoje okno płatności.
    pub fn submit(
        &mut self,
        form: CheckoutFormPayload,
        cart: &Cart,
        blik_ttl: Duration,
        now: Instant,
    ) -> Result<Submission, AppError> {
        if !matches!(self.stage, CheckoutStage::FormEntry) || self.attempt.is_some() {
            return Err(AppError::Conflict(
                "A payment is already in progress".to_string(),
            ));
        }
        if cart.is_empty() {
            return Err(AppError::UnprocessableEntity("Your cart is empty".to_string()));
        }
        if let Err(messages) = form.validate_all() {
            tracing::debug!("Formularz zamówienia odrzucony: {:?}", messages);
            return Err(AppError::UnprocessableEntity(messages.join("; ")));
        }

        let method = form.payment_method;
        let card = if method == PaymentMethod::Card {
            let card = form
                .card_details()
                .map_err(|messages| AppError::UnprocessableEntity(messages.join("; ")))?;
            Some(card)
        } else {
            None
        };

        self.form_error = None;
        self.form = Some(form.without_card());
        if method == PaymentMethod::Card {
            self.stage = CheckoutStage::Processing;
        }
        self.attempt = Some(PaymentAttempt::open(method, blik_ttl, now));
        tracing::info!("Zamówienie: otwarto płatność {}", method);
        Ok(Submission { method, card })
    }

    /// Oznacza próbę jako wysłaną. Drugie wysłanie tej samej próby jest odrzucane.
    pub fn begin_attempt(&mut self) -> Result<(Uuid, CancellationToken), AppError> {
        let attempt = self.attempt_mut()?;
        if attempt.in_flight {
            return Err(AppError::Conflict(
                "Payment is already being processed".to_string(),
            ));
        }
        attempt.in_flight = true;
        attempt.error = None;
        attempt.notice = None;
        Ok((attempt.id, attempt.token.clone()))
    }

    pub fn payment_request(
        &self,
        cart: &Cart,
        currency: &str,
        details: PaymentDetails,
    ) -> Result<PaymentRequest, AppError> {
        let form = self
            .form
            .as_ref()
            .ok_or_else(|| AppError::Conflict("Checkout form was not submitted".to_string()))?;
        Ok(PaymentRequest {
            amount: cart.summary().total,
            currency: currency.to_string(),
            description: order_description(cart),
            email: form.email.trim().to_string(),
            details,
        })
    }

    /// Próba P24 czekająca na powiadomienie dla danej sesji.
    pub fn pending_p24(&self, session_id: &str) -> Option<(Uuid, CancellationToken)> {
        let attempt = self.attempt.as_ref()?;
        (self.pending_p24_session()? == session_id).then(|| (attempt.id, attempt.token.clone()))
    }

    /// Sesja P24 oczekująca na powiadomienie bramki, jeśli jest.
    pub fn pending_p24_session(&self) -> Option<&str> {
        match &self.attempt.as_ref()?.step {
            AttemptStep::P24 {
                pending: Some(pending),
                ..
            } => Some(pending.session_id.as_str()),
            _ => None,
        }
    }

    /// Rozlicza wynik płatności. Wynik dla anulowanego tokenu albo
    /// nieaktualnej próby nie zmienia stanu.
    pub fn settle(
        &mut self,
        attempt_id: Uuid,
        token: &CancellationToken,
        outcome: PaymentOutcome,
        cart: &mut Cart,
    ) -> Settled {
        if token.is_cancelled() {
            tracing::debug!("Pominięto wynik anulowanej płatności {}", attempt_id);
            return Settled::Ignored;
        }
        let Some(attempt) = self.attempt.as_mut().filter(|a| a.id == attempt_id) else {
            tracing::debug!("Pominięto wynik nieaktualnej płatności {}", attempt_id);
            return Settled::Ignored;
        };

        match outcome {
            PaymentOutcome::Succeeded(receipt) => {
                let Some(form) = self.form.as_ref() else {
                    return Settled::Ignored;
                };
                let order = Order {
                    order_number: order_number_for(&receipt),
                    items: cart.items().to_vec(),
                    summary: cart.summary(),
                    contact: form.contact(),
                    payment: receipt,
                    placed_at: Utc::now(),
                };
                tracing::info!(
                    "Zamówienie {} opłacone ({}), suma {}",
                    order.order_number,
                    order.payment.method,
                    order.summary.total
                );
                cart.clear();
                self.attempt = None;
                self.stage = CheckoutStage::Complete(Box::new(order.clone()));
                Settled::Completed(Box::new(order))
            }
            PaymentOutcome::Declined(message) => {
                tracing::warn!("Płatność {} odrzucona: {}", attempt.method, message);
                if attempt.method == PaymentMethod::Card {
                    self.attempt = None;
                    self.stage = CheckoutStage::FormEntry;
                    self.form_error = Some(message.clone());
                } else {
                    attempt.in_flight = false;
                    attempt.error = Some(message.clone());
                }
                Settled::Failed(message)
            }
            PaymentOutcome::Dismissed(notice) => {
                tracing::info!("Użytkownik zamknął okno płatności {}", attempt.method);
                attempt.in_flight = false;
                attempt.notice = Some(notice.clone());
                Settled::Dismissed(notice)
            }
            PaymentOutcome::Pending {
                reference,
                redirect_url,
            } => {
                if let AttemptStep::P24 { pending, .. } = &mut attempt.step {
                    *pending = Some(P24Pending {
                        session_id: reference,
                        redirect_url: redirect_url.clone(),
                    });
                }
                Settled::Pending { redirect_url }
            }
            PaymentOutcome::Aborted => Settled::Ignored,
        }
    }

    /// Zamknięcie okna płatności: token anulowany, koszyk bez zmian.
    pub fn cancel(&mut self) -> bool {
        if matches!(self.stage, CheckoutStage::Complete(_)) {
            return false;
        }
        let Some(attempt) = self.attempt.take() else {
            return false;
        };
        attempt.token.cancel();
        self.stage = CheckoutStage::FormEntry;
        tracing::info!("Płatność {} anulowana", attempt.method);
        true
    }

    /// "Continue shopping": nowy, pusty formularz.
    pub fn reset(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.token.cancel();
        }
        self.stage = CheckoutStage::FormEntry;
        self.form = None;
        self.form_error = None;
    }

    pub fn snapshot(&self, now: Instant) -> CheckoutSnapshot {
        CheckoutSnapshot {
            stage: self.stage.name(),
            order: self.order().cloned(),
            error: self.form_error.clone(),
            attempt: self.attempt.as_ref().map(|a| AttemptSnapshot::of(a, now)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSnapshot {
    pub stage: &'static str,
    pub order: Option<Order>,
    pub error: Option<String>,
    pub attempt: Option<AttemptSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptSnapshot {
    pub id: Uuid,
    pub method: PaymentMethod,
    pub in_flight: bool,
    pub error: Option<String>,
    pub notice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blik_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blik_seconds_left: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p24_channel: Option<P24Channel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

impl AttemptSnapshot {
    fn of(attempt: &PaymentAttempt, now: Instant) -> Self {
        let mut snapshot = Self {
            id: attempt.id,
            method: attempt.method,
            in_flight: attempt.in_flight,
            error: attempt.error.clone(),
            notice: attempt.notice.clone(),
            blik_code: None,
            blik_seconds_left: None,
            p24_channel: None,
            redirect_url: None,
        };
        match &attempt.step {
            AttemptStep::Blik(code) => {
                snapshot.blik_code = Some(code.code().to_string());
                snapshot.blik_seconds_left = Some(code.seconds_left(now));
            }
            AttemptStep::P24 { channel, pending } => {
                snapshot.p24_channel = Some(*channel);
                snapshot.redirect_url = pending.as_ref().map(|p| p.redirect_url.clone());
            }
            AttemptStep::Card | AttemptStep::PayPal => {}
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::find_product;
    use crate::models::sample_form;

    const TTL: Duration = Duration::from_secs(120);

    fn cart_with_two_shirts() -> Cart {
        let mut cart = Cart::new();
        cart.add_item(find_product(1).unwrap(), "M", "Black", 2).unwrap();
        cart
    }

    fn receipt(method: PaymentMethod, reference: &str) -> PaymentReceipt {
        PaymentReceipt {
            method,
            reference: reference.into(),
            capture_id: None,
            amount: 6478,
            currency: "USD".into(),
            payer: None,
            status: "COMPLETED".into(),
        }
    }

    #[test]
    fn test_order_numbers() {
        let p24 = order_number_for(&receipt(PaymentMethod::P24, "MV_1700000000000_abc123xyz"));
        assert_eq!(p24, "MV1700000000000");
        let paypal = order_number_for(&receipt(PaymentMethod::PayPal, "DEMO_1700000000001"));
        assert_eq!(paypal, "MV1700000000001");

        let card = order_number_for(&receipt(PaymentMethod::Card, "CARD-****4242"));
        assert!(card.starts_with("MV"));
        assert_eq!(card.len(), 11);
        assert_eq!(card, card.to_uppercase());

        // Identyfikator bez segmentów -> numer losowy
        let fallback = order_number_for(&receipt(PaymentMethod::PayPal, "5O190127TN364715T"));
        assert_eq!(fallback.len(), 11);
    }

    #[test]
    fn test_card_submit_goes_to_processing_and_completes() {
        let mut cart = cart_with_two_shirts();
        let mut flow = CheckoutFlow::new();
        flow.submit(sample_form(PaymentMethod::Card), &cart, TTL, Instant::now())
            .unwrap();
        assert!(matches!(flow.stage(), CheckoutStage::Processing));

        let (id, token) = flow.begin_attempt().unwrap();
        let settled = flow.settle(
            id,
            &token,
            PaymentOutcome::Succeeded(receipt(PaymentMethod::Card, "CARD-****4242")),
            &mut cart,
        );
        let Settled::Completed(order) = settled else {
            panic!("oczekiwano zakończonego zamówienia");
        };
        assert_eq!(order.summary.total, 6478);
        assert_eq!(order.items.len(), 1);
        assert!(cart.is_empty());
        assert!(flow.order().is_some());
        assert!(flow.attempt().is_none());
    }

    #[test]
    fn test_card_data_is_not_kept_in_session() {
        let mut cart = cart_with_two_shirts();
        let mut flow = CheckoutFlow::new();
        let submission = flow
            .submit(sample_form(PaymentMethod::Card), &cart, TTL, Instant::now())
            .unwrap();
        assert_eq!(submission.card.unwrap().last4(), "4242");

        let stored = flow.form().unwrap();
        assert!(stored.card_number.is_none());
        assert!(stored.expiry_date.is_none());
        assert!(stored.cvv.is_none());
        assert!(stored.card_name.is_none());
        assert_eq!(stored.email, "neo@metaverse.dev");

        let (id, token) = flow.begin_attempt().unwrap();
        flow.settle(
            id,
            &token,
            PaymentOutcome::Succeeded(receipt(PaymentMethod::Card, "CARD-****4242")),
            &mut cart,
        );
        assert!(flow.form().unwrap().cvv.is_none());
        assert!(!format!("{:?}", flow).contains("4242424242424242"));
    }

    #[test]
    fn test_modal_methods_stay_in_form_entry() {
        let cart = cart_with_two_shirts();
        for method in [PaymentMethod::Blik, PaymentMethod::P24, PaymentMethod::PayPal] {
            let mut flow = CheckoutFlow::new();
            let submission = flow.submit(sample_form(method), &cart, TTL, Instant::now()).unwrap();
            assert_eq!(submission.method, method);
            assert!(submission.card.is_none());
            assert!(matches!(flow.stage(), CheckoutStage::FormEntry));
        }
    }

    #[test]
    fn test_submit_guards() {
        let cart = cart_with_two_shirts();
        let mut flow = CheckoutFlow::new();
        assert!(matches!(
            flow.submit(sample_form(PaymentMethod::Blik), &Cart::new(), TTL, Instant::now()),
            Err(AppError::UnprocessableEntity(_))
        ));

        let mut invalid = sample_form(PaymentMethod::Card);
        invalid.card_number = None;
        let err = flow.submit(invalid, &cart, TTL, Instant::now()).unwrap_err();
        assert!(err.to_string().contains("Card number is required"));

        flow.submit(sample_form(PaymentMethod::Blik), &cart, TTL, Instant::now())
            .unwrap();
        assert!(matches!(
            flow.submit(sample_form(PaymentMethod::Blik), &cart, TTL, Instant::now()),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn test_double_submit_is_rejected() {
        let cart = cart_with_two_shirts();
        let mut flow = CheckoutFlow::new();
        flow.submit(sample_form(PaymentMethod::Blik), &cart, TTL, Instant::now())
            .unwrap();
        flow.begin_attempt().unwrap();
        assert!(matches!(flow.begin_attempt(), Err(AppError::Conflict(_))));
    }

    #[test]
    fn test_cancel_returns_to_form_and_ignores_late_result() {
        let mut cart = cart_with_two_shirts();
        let mut flow = CheckoutFlow::new();
        flow.submit(sample_form(PaymentMethod::PayPal), &cart, TTL, Instant::now())
            .unwrap();
        let (id, token) = flow.begin_attempt().unwrap();

        assert!(flow.cancel());
        assert!(token.is_cancelled());
        assert!(matches!(flow.stage(), CheckoutStage::FormEntry));

        let late = flow.settle(
            id,
            &token,
            PaymentOutcome::Succeeded(receipt(PaymentMethod::PayPal, "DEMO_1")),
            &mut cart,
        );
        assert!(matches!(late, Settled::Ignored));
        assert_eq!(cart.items().len(), 1);
        assert!(flow.order().is_none());
    }

    #[test]
    fn test_stale_attempt_is_ignored() {
        let mut cart = cart_with_two_shirts();
        let mut flow = CheckoutFlow::new();
        flow.submit(sample_form(PaymentMethod::Blik), &cart, TTL, Instant::now())
            .unwrap();
        let (_, token) = flow.begin_attempt().unwrap();
        let settled = flow.settle(
            Uuid::new_v4(),
            &token,
            PaymentOutcome::Declined("x".into()),
            &mut cart,
        );
        assert!(matches!(settled, Settled::Ignored));
        assert!(flow.attempt().unwrap().in_flight);
    }

    #[test]
    fn test_decline_keeps_modal_open() {
        let mut cart = cart_with_two_shirts();
        let mut flow = CheckoutFlow::new();
        flow.submit(sample_form(PaymentMethod::Blik), &cart, TTL, Instant::now())
            .unwrap();
        let (id, token) = flow.begin_attempt().unwrap();
        flow.settle(
            id,
            &token,
            PaymentOutcome::Declined("Payment declined by bank".into()),
            &mut cart,
        );
        let attempt = flow.attempt().unwrap();
        assert_eq!(attempt.error.as_deref(), Some("Payment declined by bank"));
        assert!(!attempt.in_flight);
        // Można spróbować ponownie
        assert!(flow.begin_attempt().is_ok());
    }

    #[test]
    fn test_card_decline_returns_to_form_with_error() {
        let mut cart = cart_with_two_shirts();
        let mut flow = CheckoutFlow::new();
        flow.submit(sample_form(PaymentMethod::Card), &cart, TTL, Instant::now())
            .unwrap();
        let (id, token) = flow.begin_attempt().unwrap();
        flow.settle(id, &token, PaymentOutcome::Declined("nope".into()), &mut cart);
        assert!(matches!(flow.stage(), CheckoutStage::FormEntry));
        assert_eq!(flow.form_error(), Some("nope"));
        assert!(flow.attempt().is_none());
    }

    #[test]
    fn test_dismissal_is_a_notice_not_an_error() {
        let mut cart = cart_with_two_shirts();
        let mut flow = CheckoutFlow::new();
        flow.submit(sample_form(PaymentMethod::PayPal), &cart, TTL, Instant::now())
            .unwrap();
        let (id, token) = flow.begin_attempt().unwrap();
        flow.settle(
            id,
            &token,
            PaymentOutcome::Dismissed("closed".into()),
            &mut cart,
        );
        let attempt = flow.attempt().unwrap();
        assert!(attempt.error.is_none());
        assert_eq!(attempt.notice.as_deref(), Some("closed"));
    }

    #[test]
    fn test_pending_p24_is_found_by_session() {
        let mut cart = cart_with_two_shirts();
        let mut flow = CheckoutFlow::new();
        flow.submit(sample_form(PaymentMethod::P24), &cart, TTL, Instant::now())
            .unwrap();
        let (id, token) = flow.begin_attempt().unwrap();
        let settled = flow.settle(
            id,
            &token,
            PaymentOutcome::Pending {
                reference: "MV_1_abc".into(),
                redirect_url: "https://sandbox.przelewy24.pl/trnRequest/t".into(),
            },
            &mut cart,
        );
        assert!(matches!(settled, Settled::Pending { .. }));
        assert_eq!(flow.pending_p24("MV_1_abc").map(|(i, _)| i), Some(id));
        assert!(flow.pending_p24("MV_2_abc").is_none());
    }

    #[test]
    fn test_reset_after_complete() {
        let mut cart = cart_with_two_shirts();
        let mut flow = CheckoutFlow::new();
        flow.submit(sample_form(PaymentMethod::Card), &cart, TTL, Instant::now())
            .unwrap();
        let (id, token) = flow.begin_attempt().unwrap();
        flow.settle(
            id,
            &token,
            PaymentOutcome::Succeeded(receipt(PaymentMethod::Card, "CARD")),
            &mut cart,
        );
        assert!(!flow.cancel());
        flow.reset();
        assert!(matches!(flow.stage(), CheckoutStage::FormEntry));
        assert!(flow.form().is_none());
    }
}
