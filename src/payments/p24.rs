// src/payments/p24.rs

//! Przelewy24: rejestracja transakcji, podpisy SHA-384, weryfikacja.
//!
//! Bez prawdziwych kluczy (`P24_API_KEY` + `P24_CRC`) klient działa w trybie
//! demonstracyjnym: rejestracja jest symulowana, a po "przekierowaniu"
//! płatność od razu kończy się sukcesem.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha384};
use strum_macros::{Display, EnumIter};
use tokio_util::sync::CancellationToken;

use super::{
    epoch_millis, mismatched_details, random_base36, PaymentDetails, PaymentOutcome,
    PaymentProvider, PaymentReceipt, PaymentRequest, Simulation,
};
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::models::PaymentMethod;

pub const P24_CURRENCY: &str = "PLN";
pub const BLIK_CHANNEL: u32 = 64;
pub const BLIK_METHOD: u32 = 154;
pub const BLIK_TIME_LIMIT_MINUTES: u32 = 15;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "lowercase")]
pub enum P24Channel {
    #[default]
    #[strum(to_string = "BLIK")]
    Blik,
    #[strum(to_string = "Credit/Debit Card")]
    Card,
    #[strum(to_string = "Bank Transfer")]
    Transfer,
}

impl P24Channel {
    pub fn as_param(&self) -> &'static str {
        match self {
            P24Channel::Blik => "blik",
            P24Channel::Card => "card",
            P24Channel::Transfer => "transfer",
        }
    }
}

/// Deskryptor transakcji w formacie API P24 v1.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct P24Transaction {
    pub merchant_id: u32,
    pub pos_id: u32,
    pub session_id: String,
    /// Kwota w groszach
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub email: String,
    pub country: String,
    pub language: String,
    pub url_return: String,
    pub url_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_result: Option<bool>,
    pub sign: String,
}

/// Powiadomienie wysyłane przez P24 na `urlStatus`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct P24Notification {
    pub merchant_id: u32,
    pub pos_id: u32,
    pub session_id: String,
    pub amount: i64,
    pub origin_amount: i64,
    pub currency: String,
    pub order_id: u64,
    pub method_id: u32,
    pub statement: String,
    pub sign: String,
}

// --- Podpisy: SHA-384 z JSON-a o ustalonej kolejności pól ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterSignFields<'a> {
    session_id: &'a str,
    merchant_id: u32,
    amount: i64,
    currency: &'a str,
    crc: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifySignFields<'a> {
    session_id: &'a str,
    order_id: u64,
    amount: i64,
    currency: &'a str,
    crc: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationSignFields<'a> {
    merchant_id: u32,
    pos_id: u32,
    session_id: &'a str,
    amount: i64,
    origin_amount: i64,
    currency: &'a str,
    order_id: u64,
    method_id: u32,
    statement: &'a str,
    crc: &'a str,
}

fn sha384_json<T: Serialize>(fields: &T) -> Result<String, AppError> {
    let payload = serde_json::to_string(fields).map_err(|e| {
        AppError::InternalServerError(format!("Nie można zbudować podpisu P24: {}", e))
    })?;
    let mut hasher = Sha384::new();
    hasher.update(payload.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

pub fn register_sign(
    session_id: &str,
    merchant_id: u32,
    amount: i64,
    currency: &str,
    crc: &str,
) -> Result<String, AppError> {
    sha384_json(&RegisterSignFields {
        session_id,
        merchant_id,
        amount,
        currency,
        crc,
    })
}

pub fn verify_sign(
    session_id: &str,
    order_id: u64,
    amount: i64,
    currency: &str,
    crc: &str,
) -> Result<String, AppError> {
    sha384_json(&VerifySignFields {
        session_id,
        order_id,
        amount,
        currency,
        crc,
    })
}

pub fn notification_sign(notification: &P24Notification, crc: &str) -> Result<String, AppError> {
    sha384_json(&NotificationSignFields {
        merchant_id: notification.merchant_id,
        pos_id: notification.pos_id,
        session_id: &notification.session_id,
        amount: notification.amount,
        origin_amount: notification.origin_amount,
        currency: &notification.currency,
        order_id: notification.order_id,
        method_id: notification.method_id,
        statement: &notification.statement,
        crc,
    })
}

pub fn generate_session_id() -> String {
    format!("MV_{}_{}", epoch_millis(), random_base36(9))
}

/// Wynik rejestracji transakcji.
#[derive(Debug, Clone, PartialEq)]
pub enum P24Registration {
    Registered { token: String },
    Rejected(String),
    Aborted,
}

#[derive(Debug, Deserialize)]
struct P24TokenData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct P24RegisterResponse {
    data: Option<P24TokenData>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct P24VerifyData {
    status: String,
}

#[derive(Debug, Deserialize)]
struct P24VerifyResponse {
    data: Option<P24VerifyData>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct P24VerifyPayload<'a> {
    merchant_id: u32,
    pos_id: u32,
    session_id: &'a str,
    amount: i64,
    currency: &'a str,
    order_id: u64,
    sign: String,
}

#[derive(Debug)]
pub struct P24Client {
    config: Arc<AppConfig>,
    http: Client,
    register_simulation: Simulation,
}

impl P24Client {
    pub fn new(config: Arc<AppConfig>, http: Client) -> Self {
        let register_simulation = Simulation::new(
            config.simulation.p24_register_delay,
            config.simulation.p24_success_rate,
        );
        Self {
            config,
            http,
            register_simulation,
        }
    }

    pub fn is_live(&self) -> bool {
        self.config.p24.is_live()
    }

    pub fn build_transaction(
        &self,
        session_id: &str,
        amount: i64,
        currency: &str,
        description: &str,
        email: &str,
        channel: Option<P24Channel>,
    ) -> Result<P24Transaction, AppError> {
        let p24 = &self.config.p24;
        let sign = register_sign(session_id, p24.merchant_id, amount, currency, p24.crc_secret())?;
        let blik = channel == Some(P24Channel::Blik);

        Ok(P24Transaction {
            merchant_id: p24.merchant_id,
            pos_id: p24.pos_id,
            session_id: session_id.to_string(),
            amount,
            currency: currency.to_string(),
            description: description.to_string(),
            email: email.to_string(),
            country: "PL".to_string(),
            language: "pl".to_string(),
            url_return: self.config.absolute_url("/shop/payment-success"),
            url_status: self.config.absolute_url("/api/payment/status"),
            channel: blik.then_some(BLIK_CHANNEL),
            method: blik.then_some(BLIK_METHOD),
            time_limit: blik.then_some(BLIK_TIME_LIMIT_MINUTES),
            wait_for_result: blik.then_some(true),
            sign,
        })
    }

    pub fn payment_url(&self, token: &str, channel: Option<P24Channel>) -> String {
        let gateway = self.config.p24.gateway_url();
        match channel {
            Some(P24Channel::Blik) => format!(
                "{}/trnRequest/{}?channel={}&method={}",
                gateway, token, BLIK_CHANNEL, BLIK_METHOD
            ),
            _ => format!("{}/trnRequest/{}", gateway, token),
        }
    }

    pub async fn register(
        &self,
        transaction: &P24Transaction,
        cancel: &CancellationToken,
    ) -> Result<P24Registration, AppError> {
        tracing::info!(
            "Rejestracja transakcji P24: sesja={}, kwota={} {}",
            transaction.session_id,
            transaction.amount,
            transaction.currency
        );
        if self.is_live() {
            self.register_live(transaction).await
        } else {
            Ok(self.register_demo(cancel).await)
        }
    }

    async fn register_demo(&self, cancel: &CancellationToken) -> P24Registration {
        if !self.register_simulation.wait(cancel).await {
            return P24Registration::Aborted;
        }
        if self.register_simulation.roll() {
            let token = format!("demo_token_{}_{}", epoch_millis(), random_base36(9));
            tracing::info!("DEMO: symulacja sukcesu rejestracji P24, token: {}", token);
            P24Registration::Registered { token }
        } else {
            tracing::warn!("DEMO: symulacja błędu rejestracji P24");
            P24Registration::Rejected("Demo payment failed - try again".to_string())
        }
    }

    async fn register_live(&self, transaction: &P24Transaction) -> Result<P24Registration, AppError> {
        let p24 = &self.config.p24;
        let api_key = p24
            .api_key
            .as_ref()
            .ok_or_else(|| AppError::InternalServerError("Brak klucza API P24".to_string()))?;
        let url = format!("{}/transaction/register", p24.api_url());

        let resp = self
            .http
            .post(&url)
            .basic_auth(p24.pos_id.to_string(), Some(api_key.expose_secret()))
            .json(transaction)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.json::<P24RegisterResponse>().await.map_err(|e| {
            tracing::error!("Błąd deserializacji odpowiedzi rejestracji P24: {}", e);
            AppError::PaymentProvider("Invalid Przelewy24 response".to_string())
        })?;

        match (status.is_success(), body.data) {
            (true, Some(data)) if !data.token.is_empty() => {
                tracing::info!("P24 zarejestrowało transakcję {}", transaction.session_id);
                Ok(P24Registration::Registered { token: data.token })
            }
            _ => {
                let message = body
                    .error
                    .unwrap_or_else(|| "Payment registration failed".to_string());
                tracing::error!("P24 odrzuciło rejestrację (status {}): {}", status, message);
                Ok(P24Registration::Rejected(message))
            }
        }
    }

    /// Sprawdza podpis i sprzedawcę w powiadomieniu od P24.
    pub fn check_notification(&self, notification: &P24Notification) -> Result<(), AppError> {
        let p24 = &self.config.p24;
        if notification.merchant_id != p24.merchant_id || notification.pos_id != p24.pos_id {
            tracing::warn!(
                "Powiadomienie P24 dla obcego sprzedawcy: {}",
                notification.merchant_id
            );
            return Err(AppError::BadRequest("Unknown merchant".to_string()));
        }
        let expected = notification_sign(notification, p24.crc_secret())?;
        if expected != notification.sign {
            tracing::warn!(
                "Niepoprawny podpis powiadomienia P24 dla sesji {}",
                notification.session_id
            );
            return Err(AppError::BadRequest(
                "Invalid notification signature".to_string(),
            ));
        }
        Ok(())
    }

    /// Potwierdza transakcję w P24 (PUT /transaction/verify).
    pub async fn verify(&self, notification: &P24Notification) -> Result<(), AppError> {
        if !self.is_live() {
            tracing::debug!("DEMO: pomijam weryfikację P24 dla {}", notification.session_id);
            return Ok(());
        }
        let p24 = &self.config.p24;
        let api_key = p24
            .api_key
            .as_ref()
            .ok_or_else(|| AppError::InternalServerError("Brak klucza API P24".to_string()))?;

        let payload = P24VerifyPayload {
            merchant_id: p24.merchant_id,
            pos_id: p24.pos_id,
            session_id: &notification.session_id,
            amount: notification.amount,
            currency: &notification.currency,
            order_id: notification.order_id,
            sign: verify_sign(
                &notification.session_id,
                notification.order_id,
                notification.amount,
                &notification.currency,
                p24.crc_secret(),
            )?,
        };

        let resp = self
            .http
            .put(format!("{}/transaction/verify", p24.api_url()))
            .basic_auth(p24.pos_id.to_string(), Some(api_key.expose_secret()))
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.json::<P24VerifyResponse>().await.map_err(|e| {
            tracing::error!("Błąd deserializacji odpowiedzi weryfikacji P24: {}", e);
            AppError::PaymentProvider("Invalid Przelewy24 response".to_string())
        })?;

        match body.data {
            Some(data) if status.is_success() && data.status == "success" => {
                tracing::info!("P24 potwierdziło transakcję {}", notification.session_id);
                Ok(())
            }
            _ => {
                let message = body.error.unwrap_or_else(|| "Verification failed".to_string());
                tracing::error!("Weryfikacja P24 nieudana (status {}): {}", status, message);
                Err(AppError::PaymentProvider(message))
            }
        }
    }
}

#[derive(Debug)]
pub struct P24Provider {
    client: Arc<P24Client>,
    redirect: Simulation,
}

impl P24Provider {
    pub fn new(client: Arc<P24Client>, redirect: Simulation) -> Self {
        Self { client, redirect }
    }
}

#[async_trait]
impl PaymentProvider for P24Provider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::P24
    }

    async fn initiate(
        &self,
        request: PaymentRequest,
        cancel: CancellationToken,
    ) -> Result<PaymentOutcome, AppError> {
        let PaymentDetails::P24 { channel } = &request.details else {
            return Err(mismatched_details(self.method(), &request.details));
        };
        let channel = *channel;

        let session_id = generate_session_id();
        tracing::info!(
            "Płatność P24: sesja={}, kanał={}, kwota={} groszy",
            session_id,
            channel,
            request.amount
        );
        let transaction = self.client.build_transaction(
            &session_id,
            request.amount,
            P24_CURRENCY,
            &request.description,
            &request.email,
            Some(channel),
        )?;

        let token = match self.client.register(&transaction, &cancel).await? {
            P24Registration::Registered { token } => token,
            P24Registration::Rejected(message) => return Ok(PaymentOutcome::Declined(message)),
            P24Registration::Aborted => return Ok(PaymentOutcome::Aborted),
        };
        if cancel.is_cancelled() {
            return Ok(PaymentOutcome::Aborted);
        }

        if self.client.is_live() {
            return Ok(PaymentOutcome::Pending {
                reference: session_id,
                redirect_url: self.client.payment_url(&token, Some(channel)),
            });
        }

        // Tryb demo: udajemy przekierowanie do bramki i powrót
        tracing::debug!("DEMO: symulacja przekierowania do P24 (token {})", token);
        if !self.redirect.wait(&cancel).await {
            return Ok(PaymentOutcome::Aborted);
        }

        Ok(PaymentOutcome::Succeeded(PaymentReceipt {
            method: PaymentMethod::P24,
            reference: session_id,
            capture_id: None,
            amount: request.amount,
            currency: P24_CURRENCY.to_string(),
            payer: None,
            status: "COMPLETED".to_string(),
        }))
    }
}
