// src/payments/paypal.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::{header, Client};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use super::{
    decimal_to_minor, epoch_millis, minor_to_decimal, mismatched_details, random_base36, PayerInfo,
    PaymentDetails, PaymentOutcome, PaymentProvider, PaymentReceipt, PaymentRequest, Simulation,
};
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::models::PaymentMethod;

pub const WINDOW_CLOSED_NOTICE: &str = "Payment cancelled - PayPal window was closed";
pub const POPUP_BLOCKED_MESSAGE: &str = "Please allow popups for PayPal payments";
pub const GENERIC_FAILURE_MESSAGE: &str = "PayPal payment failed. Please try again.";
pub const INVALID_RESPONSE_MESSAGE: &str = "Invalid PayPal response structure";
pub const AMOUNT_MISMATCH_MESSAGE: &str = "PayPal payment amount does not match the order total";
/// Płatnik w odpowiedziach demonstracyjnych i gdy PayPal go nie podał.
pub const DEMO_PAYER_EMAIL: &str = "demo@paypal.com";

/// Skąd pochodzi płatność PayPal: przycisk symulacji albo zatwierdzone zamówienie.
#[derive(Debug, Clone, PartialEq)]
pub enum PayPalApproval {
    Simulated,
    Approved { order_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayPalAmount {
    pub currency_code: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayPalLink {
    pub href: String,
    pub rel: String,
    pub method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayPalCapture {
    pub id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<PayPalAmount>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PayPalPayments {
    #[serde(default)]
    pub captures: Vec<PayPalCapture>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PayPalPurchaseUnit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<PayPalAmount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payments: Option<PayPalPayments>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayPalPayerName {
    pub given_name: Option<String>,
    pub surname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayPalPayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<PayPalPayerName>,
}

impl From<&PayPalPayer> for PayerInfo {
    fn from(payer: &PayPalPayer) -> Self {
        PayerInfo {
            email_address: payer.email_address.clone(),
            given_name: payer.name.as_ref().and_then(|n| n.given_name.clone()),
            surname: payer.name.as_ref().and_then(|n| n.surname.clone()),
        }
    }
}

/// Zamówienie PayPal (v2/checkout/orders) - tylko pola, których używamy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayPalOrder {
    pub id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<PayPalLink>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub purchase_units: Vec<PayPalPurchaseUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<PayPalPayer>,
}

impl PayPalOrder {
    pub fn approve_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel == "approve")
            .map(|link| link.href.as_str())
    }

    pub fn first_capture_id(&self) -> Option<&str> {
        self.purchase_units
            .first()
            .and_then(|unit| unit.payments.as_ref())
            .and_then(|payments| payments.captures.first())
            .map(|capture| capture.id.as_str())
    }

    /// Kwota faktycznie przechwycona (pierwsze przechwycenie pierwszej jednostki).
    pub fn captured_amount(&self) -> Option<&PayPalAmount> {
        self.purchase_units
            .first()
            .and_then(|unit| unit.payments.as_ref())
            .and_then(|payments| payments.captures.first())
            .and_then(|capture| capture.amount.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrderPayload {
    #[validate(length(min = 1, message = "Amount is required"))]
    pub amount: String,
    #[validate(length(equal = 3, message = "Currency must be a 3-letter code"))]
    pub currency: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reference_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

/// Rodzaj błędu zgłoszonego przez okno PayPal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayPalFailure {
    WindowClosed,
    PopupBlocked,
    Other,
}

impl PayPalFailure {
    pub fn classify(message: &str) -> Self {
        if message.contains("Window closed") || message.contains("popup_closed") {
            PayPalFailure::WindowClosed
        } else if message.contains("popup_blocked") {
            PayPalFailure::PopupBlocked
        } else {
            PayPalFailure::Other
        }
    }

    /// Zamknięcie okna to decyzja użytkownika, nie błąd.
    pub fn outcome(self) -> PaymentOutcome {
        match self {
            PayPalFailure::WindowClosed => PaymentOutcome::Dismissed(WINDOW_CLOSED_NOTICE.to_string()),
            PayPalFailure::PopupBlocked => PaymentOutcome::Declined(POPUP_BLOCKED_MESSAGE.to_string()),
            PayPalFailure::Other => PaymentOutcome::Declined(GENERIC_FAILURE_MESSAGE.to_string()),
        }
    }
}

fn sandbox_order(id: String, web_url: &str) -> PayPalOrder {
    PayPalOrder {
        links: vec![PayPalLink {
            href: format!("{}/checkoutnow?token={}", web_url, id),
            rel: "approve".to_string(),
            method: "GET".to_string(),
        }],
        id,
        status: "CREATED".to_string(),
        purchase_units: Vec::new(),
        payer: None,
    }
}

#[derive(Debug)]
pub struct PayPalClient {
    config: Arc<AppConfig>,
    http: Client,
    // Kwoty zamówień utworzonych w trybie demo, do "przechwycenia"
    orders: Cache<String, PayPalAmount>,
}

impl PayPalClient {
    pub fn new(config: Arc<AppConfig>, http: Client) -> Self {
        let orders = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(3 * 60 * 60))
            .build();
        Self {
            config,
            http,
            orders,
        }
    }

    pub fn is_live(&self) -> bool {
        self.config.paypal.is_live()
    }

    async fn access_token(&self) -> Result<String, AppError> {
        let paypal = &self.config.paypal;
        let secret = paypal.client_secret.as_ref().ok_or_else(|| {
            AppError::InternalServerError("Brak sekretu klienta PayPal".to_string())
        })?;

        let resp = self
            .http
            .post(format!("{}/v1/oauth2/token", paypal.api_url))
            .basic_auth(&paypal.client_id, Some(secret.expose_secret()))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp
                .text()
                .await
                .unwrap_or_else(|_| "Brak treści błędu".to_string());
            tracing::error!("PayPal odrzucił token OAuth: Status={}, Treść={}", status, error_text);
            return Err(AppError::PaymentProvider(
                "PayPal authentication failed".to_string(),
            ));
        }

        let token = resp.json::<AccessTokenResponse>().await.map_err(|e| {
            tracing::error!("Błąd deserializacji tokenu PayPal: {}", e);
            AppError::PaymentProvider(INVALID_RESPONSE_MESSAGE.to_string())
        })?;
        Ok(token.access_token)
    }

    pub async fn create_order(&self, payload: &CreateOrderPayload) -> Result<PayPalOrder, AppError> {
        payload.validate()?;
        tracing::info!(
            "Tworzenie zamówienia PayPal: {} {}",
            payload.amount,
            payload.currency
        );

        let order = if self.is_live() {
            self.create_order_live(payload).await?
        } else {
            tracing::info!("PayPal: tryb demo (brak sekretu klienta)");
            let id = format!("SANDBOX_{}_{}", epoch_millis(), random_base36(9));
            sandbox_order(id, &self.config.paypal.web_url)
        };

        self.remember_amount(&order.id, payload).await;
        Ok(order)
    }

    /// Jak `create_order`, ale błąd API kończy się zamówieniem demonstracyjnym.
    pub async fn create_order_or_fallback(
        &self,
        payload: &CreateOrderPayload,
    ) -> Result<PayPalOrder, AppError> {
        match self.create_order(payload).await {
            Ok(order) => Ok(order),
            Err(AppError::ValidationError(errors)) => Err(AppError::ValidationError(errors)),
            Err(e) => {
                tracing::warn!("Tworzenie zamówienia PayPal nieudane ({}), przechodzę w tryb demo", e);
                let id = format!("DEMO_ORDER_{}_{}", epoch_millis(), random_base36(9));
                self.remember_amount(&id, payload).await;
                Ok(sandbox_order(id, &self.config.paypal.web_url))
            }
        }
    }

    async fn remember_amount(&self, order_id: &str, payload: &CreateOrderPayload) {
        self.orders
            .insert(
                order_id.to_string(),
                PayPalAmount {
                    currency_code: payload.currency.clone(),
                    value: payload.amount.clone(),
                },
            )
            .await;
    }

    async fn create_order_live(&self, payload: &CreateOrderPayload) -> Result<PayPalOrder, AppError> {
        let access_token = self.access_token().await?;
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": payload.reference_id,
                "amount": {
                    "currency_code": payload.currency,
                    "value": payload.amount,
                },
                "description": payload.description,
            }],
            "application_context": {
                "return_url": self.config.absolute_url("/shop/payment-success"),
                "cancel_url": self.config.absolute_url("/shop/payment-cancel"),
                "brand_name": "MetaVerse Hub",
                "user_action": "PAY_NOW",
            },
        });

        let resp = self
            .http
            .post(format!("{}/v2/checkout/orders", self.config.paypal.api_url))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;
        self.parse_order(resp, "utworzenia").await
    }

    /// Przechwytuje zatwierdzone zamówienie. W trybie demo zwraca gotową
    /// odpowiedź COMPLETED na kwotę zapamiętaną przy tworzeniu.
    pub async fn capture_order(
        &self,
        order_id: &str,
        expected: Option<PayPalAmount>,
    ) -> Result<PayPalOrder, AppError> {
        tracing::info!("Przechwytywanie płatności PayPal: {}", order_id);
        if self.is_live() {
            let access_token = self.access_token().await?;
            let resp = self
                .http
                .post(format!(
                    "{}/v2/checkout/orders/{}/capture",
                    self.config.paypal.api_url, order_id
                ))
                .bearer_auth(access_token)
                .header(header::CONTENT_TYPE, "application/json")
                .send()
                .await?;
            return self.parse_order(resp, "przechwycenia").await;
        }

        let amount = match self.orders.remove(order_id).await {
            Some(recorded) => recorded,
            None => expected.ok_or_else(|| {
                tracing::warn!("PayPal demo: nieznane zamówienie {}", order_id);
                AppError::NotFound
            })?,
        };
        tracing::info!("PayPal demo: przechwycenie {} na {} {}", order_id, amount.value, amount.currency_code);

        Ok(PayPalOrder {
            id: order_id.to_string(),
            status: "COMPLETED".to_string(),
            links: Vec::new(),
            purchase_units: vec![PayPalPurchaseUnit {
                payments: Some(PayPalPayments {
                    captures: vec![PayPalCapture {
                        id: format!("CAPTURE_{}", epoch_millis()),
                        status: "COMPLETED".to_string(),
                        amount: Some(amount),
                    }],
                }),
                ..Default::default()
            }],
            payer: Some(PayPalPayer {
                email_address: Some(DEMO_PAYER_EMAIL.to_string()),
                name: Some(PayPalPayerName {
                    given_name: Some("Demo".to_string()),
                    surname: Some("User".to_string()),
                }),
            }),
        })
    }

    async fn parse_order(
        &self,
        resp: reqwest::Response,
        operation: &str,
    ) -> Result<PayPalOrder, AppError> {
        let status = resp.status();
        if !status.is_success() {
            let error_text = resp
                .text()
                .await
                .unwrap_or_else(|_| "Brak treści błędu".to_string());
            tracing::error!(
                "Błąd {} zamówienia PayPal: Status={}, Treść={}",
                operation,
                status,
                error_text
            );
            return Err(AppError::PaymentProvider(format!(
                "PayPal request failed (status: {})",
                status
            )));
        }
        resp.json::<PayPalOrder>().await.map_err(|e| {
            tracing::error!("Błąd deserializacji zamówienia PayPal: {}", e);
            AppError::PaymentProvider(INVALID_RESPONSE_MESSAGE.to_string())
        })
    }
}

/// Zamienia odpowiedź z przechwycenia na potwierdzenie płatności.
/// Przechwycona kwota i waluta muszą zgadzać się z sumą zamówienia.
pub fn receipt_from_capture(
    order: &PayPalOrder,
    amount: i64,
    currency: &str,
) -> Result<PaymentReceipt, String> {
    let captured = order
        .captured_amount()
        .ok_or_else(|| INVALID_RESPONSE_MESSAGE.to_string())?;
    let captured_minor =
        decimal_to_minor(&captured.value).ok_or_else(|| INVALID_RESPONSE_MESSAGE.to_string())?;
    if captured_minor != amount || !captured.currency_code.eq_ignore_ascii_case(currency) {
        tracing::error!(
            "PayPal: zamówienie {} przechwycone na {} {}, oczekiwano {} {}",
            order.id,
            captured.value,
            captured.currency_code,
            minor_to_decimal(amount),
            currency
        );
        return Err(AMOUNT_MISMATCH_MESSAGE.to_string());
    }
    let payer = order.payer.as_ref().map(PayerInfo::from).unwrap_or(PayerInfo {
        email_address: Some(DEMO_PAYER_EMAIL.to_string()),
        ..Default::default()
    });
    Ok(PaymentReceipt {
        method: PaymentMethod::PayPal,
        reference: order.id.clone(),
        capture_id: Some(
            order
                .first_capture_id()
                .unwrap_or("SANDBOX_CAPTURE")
                .to_string(),
        ),
        amount: captured_minor,
        currency: captured.currency_code.clone(),
        payer: Some(payer),
        status: "COMPLETED".to_string(),
    })
}

#[derive(Debug)]
pub struct PayPalProvider {
    client: Arc<PayPalClient>,
    simulation: Simulation,
}

impl PayPalProvider {
    pub fn new(client: Arc<PayPalClient>, simulation: Simulation) -> Self {
        Self { client, simulation }
    }

    async fn simulate(&self, request: &PaymentRequest, cancel: &CancellationToken) -> PaymentOutcome {
        tracing::info!("PayPal: symulacja udanej płatności");
        if !self.simulation.wait(cancel).await {
            return PaymentOutcome::Aborted;
        }
        let stamp = epoch_millis();
        PaymentOutcome::Succeeded(PaymentReceipt {
            method: PaymentMethod::PayPal,
            reference: format!("DEMO_{}", stamp),
            capture_id: Some(format!("CAPTURE_{}", stamp)),
            amount: request.amount,
            currency: request.currency.clone(),
            payer: Some(PayerInfo {
                email_address: Some(DEMO_PAYER_EMAIL.to_string()),
                given_name: Some("Demo".to_string()),
                surname: Some("User".to_string()),
            }),
            status: "COMPLETED".to_string(),
        })
    }

    async fn capture(
        &self,
        order_id: &str,
        request: &PaymentRequest,
        cancel: &CancellationToken,
    ) -> PaymentOutcome {
        let expected = PayPalAmount {
            currency_code: request.currency.clone(),
            value: minor_to_decimal(request.amount),
        };
        let captured = tokio::select! {
            _ = cancel.cancelled() => return PaymentOutcome::Aborted,
            result = self.client.capture_order(order_id, Some(expected)) => result,
        };
        // Okno mogło zostać zamknięte w trakcie przechwytywania
        if cancel.is_cancelled() {
            tracing::debug!("Okno PayPal zamknięte, pomijam wynik dla {}", order_id);
            return PaymentOutcome::Aborted;
        }

        match captured {
            Ok(order) => match receipt_from_capture(&order, request.amount, &request.currency) {
                Ok(receipt) => {
                    tracing::info!("PayPal: płatność {} przechwycona", order_id);
                    PaymentOutcome::Succeeded(receipt)
                }
                Err(message) => {
                    tracing::error!("PayPal: odrzucono przechwycenie {}: {}", order_id, message);
                    PaymentOutcome::Declined(message)
                }
            },
            Err(e) => {
                tracing::error!("PayPal: przechwycenie {} nieudane: {}", order_id, e);
                PayPalFailure::classify(&e.to_string()).outcome()
            }
        }
    }
}

#[async_trait]
impl PaymentProvider for PayPalProvider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::PayPal
    }

    async fn initiate(
        &self,
        request: PaymentRequest,
        cancel: CancellationToken,
    ) -> Result<PaymentOutcome, AppError> {
        let PaymentDetails::PayPal(approval) = &request.details else {
            return Err(mismatched_details(self.method(), &request.details));
        };
        let outcome = match approval {
            PayPalApproval::Simulated => self.simulate(&request, &cancel).await,
            PayPalApproval::Approved { order_id } => {
                self.capture(order_id, &request, &cancel).await
            }
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    fn client() -> Arc<PayPalClient> {
        Arc::new(PayPalClient::new(Arc::new(test_config()), Client::new()))
    }

    fn payload(amount: &str) -> CreateOrderPayload {
        CreateOrderPayload {
            amount: amount.into(),
            currency: "USD".into(),
            description: "MetaVerse Hub order".into(),
            reference_id: None,
        }
    }

    fn request(approval: PayPalApproval) -> PaymentRequest {
        PaymentRequest {
            amount: 6478,
            currency: "USD".into(),
            description: "Order".into(),
            email: "neo@metaverse.dev".into(),
            details: PaymentDetails::PayPal(approval),
        }
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(
            PayPalFailure::classify("Error: Window closed for popup").outcome(),
            PaymentOutcome::Dismissed(WINDOW_CLOSED_NOTICE.into())
        );
        assert_eq!(
            PayPalFailure::classify("popup_closed"),
            PayPalFailure::WindowClosed
        );
        assert_eq!(
            PayPalFailure::classify("popup_blocked by browser").outcome(),
            PaymentOutcome::Declined(POPUP_BLOCKED_MESSAGE.into())
        );
        assert_eq!(
            PayPalFailure::classify("INSTRUMENT_DECLINED").outcome(),
            PaymentOutcome::Declined(GENERIC_FAILURE_MESSAGE.into())
        );
    }

    #[tokio::test]
    async fn test_demo_create_order_has_approve_link() {
        let client = client();
        let order = client.create_order(&payload("64.78")).await.unwrap();
        assert!(order.id.starts_with("SANDBOX_"));
        assert_eq!(order.status, "CREATED");
        assert_eq!(
            order.approve_link(),
            Some(format!("https://www.sandbox.paypal.com/checkoutnow?token={}", order.id).as_str())
        );
    }

    #[tokio::test]
    async fn test_demo_capture_uses_recorded_amount() {
        let client = client();
        let order = client.create_order(&payload("64.78")).await.unwrap();
        let captured = client.capture_order(&order.id, None).await.unwrap();
        assert_eq!(captured.status, "COMPLETED");
        let capture = &captured.purchase_units[0].payments.as_ref().unwrap().captures[0];
        assert!(capture.id.starts_with("CAPTURE_"));
        assert_eq!(capture.amount.as_ref().unwrap().value, "64.78");

        // Zamówienie jest jednorazowe
        assert!(matches!(
            client.capture_order(&order.id, None).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_create_order_rejects_bad_payload() {
        let client = client();
        let mut bad = payload("");
        bad.currency = "US".into();
        assert!(matches!(
            client.create_order_or_fallback(&bad).await,
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_receipt_requires_purchase_units() {
        let order = PayPalOrder {
            id: "ORDER1".into(),
            status: "COMPLETED".into(),
            links: Vec::new(),
            purchase_units: Vec::new(),
            payer: None,
        };
        assert_eq!(
            receipt_from_capture(&order, 6478, "USD"),
            Err(INVALID_RESPONSE_MESSAGE.to_string())
        );

        // Jednostka bez przechwycenia to też zła odpowiedź
        let order = PayPalOrder {
            purchase_units: vec![PayPalPurchaseUnit::default()],
            ..order
        };
        assert_eq!(
            receipt_from_capture(&order, 6478, "USD"),
            Err(INVALID_RESPONSE_MESSAGE.to_string())
        );
    }

    fn captured_order(value: &str, currency: &str) -> PayPalOrder {
        PayPalOrder {
            id: "ORDER1".into(),
            status: "COMPLETED".into(),
            links: Vec::new(),
            purchase_units: vec![PayPalPurchaseUnit {
                payments: Some(PayPalPayments {
                    captures: vec![PayPalCapture {
                        id: "CAP1".into(),
                        status: "COMPLETED".into(),
                        amount: Some(PayPalAmount {
                            currency_code: currency.into(),
                            value: value.into(),
                        }),
                    }],
                }),
                ..Default::default()
            }],
            payer: None,
        }
    }

    #[test]
    fn test_receipt_reports_captured_amount() {
        let receipt = receipt_from_capture(&captured_order("64.78", "USD"), 6478, "USD").unwrap();
        assert_eq!(receipt.amount, 6478);
        assert_eq!(receipt.currency, "USD");
        assert_eq!(receipt.capture_id.as_deref(), Some("CAP1"));
        assert_eq!(
            receipt.payer.unwrap().email_address.as_deref(),
            Some(DEMO_PAYER_EMAIL)
        );
    }

    #[test]
    fn test_receipt_rejects_amount_or_currency_mismatch() {
        assert_eq!(
            receipt_from_capture(&captured_order("0.01", "USD"), 6478, "USD"),
            Err(AMOUNT_MISMATCH_MESSAGE.to_string())
        );
        assert_eq!(
            receipt_from_capture(&captured_order("64.78", "EUR"), 6478, "USD"),
            Err(AMOUNT_MISMATCH_MESSAGE.to_string())
        );
        assert_eq!(
            receipt_from_capture(&captured_order("sixty", "USD"), 6478, "USD"),
            Err(INVALID_RESPONSE_MESSAGE.to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_payment() {
        let provider = PayPalProvider::new(client(), Simulation::new(Duration::from_secs(2), 1.0));
        let outcome = provider
            .initiate(request(PayPalApproval::Simulated), CancellationToken::new())
            .await
            .unwrap();
        let PaymentOutcome::Succeeded(receipt) = outcome else {
            panic!("oczekiwano sukcesu");
        };
        assert!(receipt.reference.starts_with("DEMO_"));
        assert!(receipt.capture_id.unwrap().starts_with("CAPTURE_"));
        assert_eq!(receipt.payer.unwrap().email_address.as_deref(), Some(DEMO_PAYER_EMAIL));
    }

    #[tokio::test]
    async fn test_approved_order_is_captured() {
        let client = client();
        let order = client.create_order(&payload("64.78")).await.unwrap();
        let provider = PayPalProvider::new(client, Simulation::new(Duration::ZERO, 1.0));
        let outcome = provider
            .initiate(
                request(PayPalApproval::Approved {
                    order_id: order.id.clone(),
                }),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let PaymentOutcome::Succeeded(receipt) = outcome else {
            panic!("oczekiwano sukcesu");
        };
        assert_eq!(receipt.reference, order.id);
        assert_eq!(receipt.amount, 6478);
    }

    #[tokio::test]
    async fn test_capture_after_window_closed_is_aborted() {
        let provider = PayPalProvider::new(client(), Simulation::new(Duration::ZERO, 1.0));
        let token = CancellationToken::new();
        token.cancel();
        let outcome = provider
            .initiate(
                request(PayPalApproval::Approved {
                    order_id: "SANDBOX_1".into(),
                }),
                token,
            )
            .await
            .unwrap();
        assert_eq!(outcome, PaymentOutcome::Aborted);
    }
}
