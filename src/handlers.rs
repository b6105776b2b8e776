// src/handlers.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::catalog::{all_products, find_product};
use crate::checkout::CheckoutSnapshot;
use crate::errors::AppError;
use crate::models::*;
use crate::payments::p24::{P24Notification, P24Registration, P24_CURRENCY};
use crate::payments::paypal::{CreateOrderPayload, PayPalOrder};
use crate::services;
use crate::session::GuestSession;
use crate::state::AppState;

// --- PRODUKTY ---

pub async fn list_products() -> Json<Vec<Product>> {
    tracing::info!("Obsłużono zapytanie GET /api/products");
    Json(all_products().to_vec())
}

pub async fn get_product_details(Path(product_id): Path<u32>) -> Result<Json<Product>, AppError> {
    find_product(product_id).cloned().map(Json).ok_or_else(|| {
        tracing::warn!("Nie znaleziono produktu o ID: {}", product_id);
        AppError::NotFound
    })
}

// --- KOSZYK ---

pub async fn get_cart_handler(guest: GuestSession) -> Json<CartDetailsResponse> {
    Json(services::cart_details(&guest).await)
}

pub async fn add_item_to_cart_handler(
    guest: GuestSession,
    Json(payload): Json<AddToCartPayload>,
) -> Result<(StatusCode, Json<CartDetailsResponse>), AppError> {
    let details = services::add_to_cart(&guest, payload).await?;
    Ok((StatusCode::CREATED, Json(details)))
}

pub async fn update_cart_item_handler(
    guest: GuestSession,
    Path(line_id): Path<String>,
    Json(payload): Json<UpdateQuantityPayload>,
) -> Result<Json<CartDetailsResponse>, AppError> {
    services::update_cart_item(&guest, &line_id, payload.quantity)
        .await
        .map(Json)
}

pub async fn remove_cart_item_handler(
    guest: GuestSession,
    Path(line_id): Path<String>,
) -> Result<Json<CartDetailsResponse>, AppError> {
    services::remove_cart_item(&guest, &line_id).await.map(Json)
}

// --- ZAMÓWIENIE I PŁATNOŚCI ---

pub async fn get_checkout_handler(guest: GuestSession) -> Json<CheckoutSnapshot> {
    Json(services::checkout_snapshot(&guest).await)
}

/// 202: płatność działa w tle, stan sprawdza się przez `GET /api/checkout`.
async fn accepted(guest: &GuestSession) -> (StatusCode, Json<CheckoutSnapshot>) {
    (
        StatusCode::ACCEPTED,
        Json(services::checkout_snapshot(guest).await),
    )
}

pub async fn submit_checkout_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
    Json(form): Json<CheckoutFormPayload>,
) -> Result<(StatusCode, Json<CheckoutSnapshot>), AppError> {
    match services::submit_checkout(&app_state, &guest, form).await? {
        Some(_run) => Ok(accepted(&guest).await),
        None => Ok((
            StatusCode::OK,
            Json(services::checkout_snapshot(&guest).await),
        )),
    }
}

pub async fn cancel_checkout_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
) -> Json<CheckoutSnapshot> {
    services::cancel_checkout(&app_state, &guest).await;
    Json(services::checkout_snapshot(&guest).await)
}

pub async fn reset_checkout_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
) -> Json<CheckoutSnapshot> {
    services::reset_checkout(&app_state, &guest).await;
    Json(services::checkout_snapshot(&guest).await)
}

pub async fn confirm_blik_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
    Json(payload): Json<BlikCodePayload>,
) -> Result<(StatusCode, Json<CheckoutSnapshot>), AppError> {
    services::confirm_blik(&app_state, &guest, payload.code.as_deref()).await?;
    Ok(accepted(&guest).await)
}

pub async fn regenerate_blik_handler(
    guest: GuestSession,
) -> Result<Json<CheckoutSnapshot>, AppError> {
    services::regenerate_blik(&guest).await?;
    Ok(Json(services::checkout_snapshot(&guest).await))
}

pub async fn confirm_p24_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
    Json(payload): Json<P24ConfirmPayload>,
) -> Result<(StatusCode, Json<CheckoutSnapshot>), AppError> {
    services::confirm_p24(&app_state, &guest, payload.channel).await?;
    Ok(accepted(&guest).await)
}

pub async fn simulate_paypal_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
) -> Result<(StatusCode, Json<CheckoutSnapshot>), AppError> {
    services::simulate_paypal(&app_state, &guest).await?;
    Ok(accepted(&guest).await)
}

pub async fn approve_paypal_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
    Json(payload): Json<PayPalApprovePayload>,
) -> Result<(StatusCode, Json<CheckoutSnapshot>), AppError> {
    services::approve_paypal(&app_state, &guest, payload.order_id).await?;
    Ok(accepted(&guest).await)
}

pub async fn paypal_error_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
    Json(payload): Json<PayPalErrorPayload>,
) -> Result<Json<CheckoutSnapshot>, AppError> {
    services::report_paypal_error(&app_state, &guest, &payload.message).await?;
    Ok(Json(services::checkout_snapshot(&guest).await))
}

// --- PROXY OPERATORÓW ---

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Rejestracja transakcji P24. Nigdy nie zwraca kluczy ani CRC.
pub async fn register_p24_payment_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<P24RegisterPayload>,
) -> Result<Json<Value>, AppError> {
    let (Some(session_id), Some(amount), Some(email)) = (
        present(payload.session_id),
        payload.amount.filter(|amount| *amount > 0),
        present(payload.email),
    ) else {
        return Err(AppError::BadRequest("Missing required fields".to_string()));
    };
    let currency = present(payload.currency).unwrap_or_else(|| P24_CURRENCY.to_string());
    let description = payload.description.unwrap_or_default();

    let transaction = app_state.p24.build_transaction(
        &session_id,
        amount,
        &currency,
        &description,
        &email,
        payload.channel,
    )?;
    match app_state
        .p24
        .register(&transaction, &CancellationToken::new())
        .await?
    {
        P24Registration::Registered { token } => Ok(Json(json!({
            "success": true,
            "token": token,
        }))),
        P24Registration::Rejected(message) => Err(AppError::PaymentProvider(message)),
        P24Registration::Aborted => Err(AppError::InternalServerError(
            "Rejestracja P24 przerwana".to_string(),
        )),
    }
}

/// urlStatus: powiadomienie P24 o opłaconej transakcji.
pub async fn p24_status_handler(
    State(app_state): State<Arc<AppState>>,
    Json(notification): Json<P24Notification>,
) -> Result<Json<Value>, AppError> {
    tracing::info!(
        "Powiadomienie P24: sesja={}, zamówienie={}",
        notification.session_id,
        notification.order_id
    );
    services::handle_p24_notification(&app_state, notification).await?;
    Ok(Json(json!({ "status": "OK" })))
}

pub async fn create_paypal_order_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderPayload>,
) -> Result<Json<PayPalOrder>, AppError> {
    app_state
        .paypal
        .create_order_or_fallback(&payload)
        .await
        .map(Json)
}

pub async fn capture_paypal_order_handler(
    State(app_state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<PayPalOrder>, AppError> {
    app_state
        .paypal
        .capture_order(&order_id, None)
        .await
        .map(Json)
}

/// Konfiguracja bezpieczna do pokazania w przeglądarce.
#[derive(Debug, Serialize)]
pub struct PublicConfig {
    pub paypal_client_id: String,
    pub paypal_sdk_enabled: bool,
    pub base_url: String,
    pub currency: String,
}

pub async fn public_config_handler(State(app_state): State<Arc<AppState>>) -> Json<PublicConfig> {
    let config = &app_state.config;
    let sdk_enabled = config.paypal.has_real_client_id();
    Json(PublicConfig {
        paypal_client_id: if sdk_enabled {
            config.paypal.client_id.clone()
        } else {
            String::new()
        },
        paypal_sdk_enabled: sdk_enabled,
        base_url: config.base_url.as_str().trim_end_matches('/').to_string(),
        currency: config.currency.clone(),
    })
}
