// src/services.rs

//! Operacje na sesji gościa wspólne dla API JSON i widoków HTMX.
//!
//! Płatności działają w osobnych zadaniach (`tokio::spawn`). Zadanie po
//! zakończeniu ponownie blokuje sesję i rozlicza wynik przez
//! `CheckoutFlow::settle`, który ignoruje wyniki anulowanych prób.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::catalog::find_product;
use crate::checkout::{AttemptStep, CheckoutFlow, CheckoutSnapshot, Settled};
use crate::errors::AppError;
use crate::models::{
    AddToCartPayload, CartDetailsResponse, CheckoutFormPayload, Order, PaymentMethod,
};
use crate::payments::p24::{P24Channel, P24Notification, P24_CURRENCY};
use crate::payments::paypal::{PayPalApproval, PayPalFailure};
use crate::payments::{PaymentDetails, PaymentOutcome, PaymentReceipt};
use crate::session::{GuestSession, ShopSession};
use crate::state::AppState;

pub type PaymentRun = JoinHandle<Settled>;

/// Komunikat dla użytkownika zamiast wewnętrznego błędu operatora.
fn user_facing_message(err: &AppError) -> String {
    match err {
        AppError::PaymentProvider(message)
        | AppError::BadRequest(message)
        | AppError::UnprocessableEntity(message) => message.clone(),
        _ => "Payment failed. Please try again.".to_string(),
    }
}

fn ensure_cart_editable(shop: &ShopSession) -> Result<(), AppError> {
    if shop.checkout.attempt().is_some() {
        return Err(AppError::Conflict(
            "Cart cannot change while a payment is in progress".to_string(),
        ));
    }
    Ok(())
}

// --- KOSZYK ---

pub async fn cart_details(guest: &GuestSession) -> CartDetailsResponse {
    guest.handle.lock().await.cart.details()
}

pub async fn add_to_cart(
    guest: &GuestSession,
    payload: AddToCartPayload,
) -> Result<CartDetailsResponse, AppError> {
    let product = find_product(payload.product_id).ok_or(AppError::NotFound)?;
    let size = payload
        .size
        .as_deref()
        .or_else(|| product.default_size())
        .ok_or_else(|| AppError::UnprocessableEntity("Size is required".to_string()))?;
    let color = payload
        .color
        .as_deref()
        .or_else(|| product.default_color())
        .ok_or_else(|| AppError::UnprocessableEntity("Color is required".to_string()))?;
    let quantity = payload.quantity.unwrap_or(1);

    let mut shop = guest.handle.lock().await;
    ensure_cart_editable(&shop)?;
    shop.cart.add_item(product, size, color, quantity)?;
    tracing::info!("Gość {}: dodano {} do koszyka", guest.id, product.name);
    Ok(shop.cart.details())
}

pub async fn update_cart_item(
    guest: &GuestSession,
    line_id: &str,
    quantity: i64,
) -> Result<CartDetailsResponse, AppError> {
    let mut shop = guest.handle.lock().await;
    ensure_cart_editable(&shop)?;
    shop.cart.update_quantity(line_id, quantity)?;
    Ok(shop.cart.details())
}

pub async fn remove_cart_item(
    guest: &GuestSession,
    line_id: &str,
) -> Result<CartDetailsResponse, AppError> {
    let mut shop = guest.handle.lock().await;
    ensure_cart_editable(&shop)?;
    if !shop.cart.remove_item(line_id) {
        tracing::debug!("Gość {}: linia {} nie istnieje", guest.id, line_id);
    }
    Ok(shop.cart.details())
}

// --- ZAMÓWIENIE ---

pub async fn checkout_snapshot(guest: &GuestSession) -> CheckoutSnapshot {
    guest.handle.lock().await.checkout.snapshot(Instant::now())
}

/// Uruchamia bieżącą próbę płatności w tle.
fn launch_payment(
    state: &Arc<AppState>,
    guest: &GuestSession,
    shop: &mut ShopSession,
    details: PaymentDetails,
) -> Result<PaymentRun, AppError> {
    let request = shop
        .checkout
        .payment_request(&shop.cart, &state.config.currency, details)?;
    let (attempt_id, token) = shop.checkout.begin_attempt()?;
    let provider = state.providers.get(request.details.method());

    tracing::info!(
        "Gość {}: start płatności {} (próba {})",
        guest.id,
        provider.method(),
        attempt_id
    );

    let state = Arc::clone(state);
    let guest = guest.clone();
    Ok(tokio::spawn(async move {
        let outcome = match provider.initiate(request, token.clone()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Płatność {} zakończona błędem: {}", attempt_id, e);
                PaymentOutcome::Declined(user_facing_message(&e))
            }
        };
        settle_outcome(&state, &guest, attempt_id, &token, outcome).await
    }))
}

async fn settle_outcome(
    state: &Arc<AppState>,
    guest: &GuestSession,
    attempt_id: Uuid,
    token: &CancellationToken,
    outcome: PaymentOutcome,
) -> Settled {
    let settled = {
        let mut shop = guest.handle.lock().await;
        let ShopSession { cart, checkout } = &mut *shop;
        let settled = checkout.settle(attempt_id, token, outcome, cart);
        // Indeks zmienia się tylko pod blokadą sesji (patrz forget_p24_session)
        if let (Settled::Pending { .. }, Some(session_id)) =
            (&settled, checkout.pending_p24_session())
        {
            state.p24_sessions.insert(session_id.to_string(), guest.id).await;
        }
        settled
    };

    if let Settled::Completed(order) = &settled {
        send_confirmation(state, order);
    }
    settled
}

fn send_confirmation(state: &Arc<AppState>, order: &Order) {
    let Some(mailer) = state.mailer.clone() else {
        return;
    };
    let order = order.clone();
    tokio::spawn(async move {
        if let Err(e) = mailer.send_order_confirmation(&order).await {
            tracing::error!(
                "Nie udało się wysłać potwierdzenia zamówienia {}: {}",
                order.order_number,
                e
            );
        }
    });
}

/// Wysłanie formularza. Dla karty zwraca uruchomioną płatność,
/// dla pozostałych metod tylko otwiera okno płatności.
pub async fn submit_checkout(
    state: &Arc<AppState>,
    guest: &GuestSession,
    form: CheckoutFormPayload,
) -> Result<Option<PaymentRun>, AppError> {
    let mut guard = guest.handle.lock().await;
    let shop = &mut *guard;

    let submission = shop.checkout.submit(
        form,
        &shop.cart,
        state.config.simulation.blik_code_ttl,
        Instant::now(),
    )?;
    let Some(card) = submission.card else {
        return Ok(None);
    };
    launch_payment(state, guest, shop, PaymentDetails::Card(card)).map(Some)
}

/// Zapisuje wpisany kod BLIK (tylko cyfry, max 6) i zwraca to, co zostało.
pub async fn input_blik_code(guest: &GuestSession, raw: &str) -> Result<String, AppError> {
    let mut shop = guest.handle.lock().await;
    let attempt = shop.checkout.attempt_mut()?;
    let code = attempt.blik_mut()?.input(raw).to_string();
    Ok(code)
}

pub async fn confirm_blik(
    state: &Arc<AppState>,
    guest: &GuestSession,
    raw_code: Option<&str>,
) -> Result<PaymentRun, AppError> {
    let mut guard = guest.handle.lock().await;
    let shop = &mut *guard;

    let attempt = shop.checkout.attempt_mut()?;
    let blik = attempt.blik_mut()?;
    if let Some(raw) = raw_code {
        blik.input(raw);
    }
    let code = match blik.ready_code(Instant::now()) {
        Ok(code) => code.to_string(),
        Err(e) => {
            attempt.error = Some(e.to_string());
            return Err(e.into());
        }
    };
    launch_payment(state, guest, shop, PaymentDetails::Blik { code })
}

pub async fn regenerate_blik(guest: &GuestSession) -> Result<(), AppError> {
    let mut shop = guest.handle.lock().await;
    let attempt = shop.checkout.attempt_mut()?;
    if attempt.in_flight {
        return Err(AppError::Conflict(
            "Payment is already being processed".to_string(),
        ));
    }
    attempt.blik_mut()?.regenerate(Instant::now());
    attempt.error = None;
    tracing::debug!("Gość {}: nowy kod BLIK", guest.id);
    Ok(())
}

pub async fn select_p24_channel(guest: &GuestSession, channel: P24Channel) -> Result<(), AppError> {
    let mut shop = guest.handle.lock().await;
    let attempt = shop.checkout.attempt_mut()?;
    match &mut attempt.step {
        AttemptStep::P24 {
            channel: current, ..
        } => {
            *current = channel;
            Ok(())
        }
        _ => Err(AppError::Conflict("Przelewy24 payment is not open".to_string())),
    }
}

pub async fn confirm_p24(
    state: &Arc<AppState>,
    guest: &GuestSession,
    channel: Option<P24Channel>,
) -> Result<PaymentRun, AppError> {
    if let Some(channel) = channel {
        select_p24_channel(guest, channel).await?;
    }
    let mut guard = guest.handle.lock().await;
    let shop = &mut *guard;
    let channel = match shop.checkout.attempt().map(|a| &a.step) {
        Some(AttemptStep::P24 { channel, .. }) => *channel,
        _ => {
            return Err(AppError::Conflict(
                "Przelewy24 payment is not open".to_string(),
            ));
        }
    };
    launch_payment(state, guest, shop, PaymentDetails::P24 { channel })
}

/// Powiadomienie P24 (urlStatus): podpis, weryfikacja, rozliczenie próby.
pub async fn handle_p24_notification(
    state: &Arc<AppState>,
    notification: P24Notification,
) -> Result<Settled, AppError> {
    state.p24.check_notification(&notification)?;

    let guest_id = state
        .p24_sessions
        .get(&notification.session_id)
        .await
        .ok_or_else(|| {
            tracing::warn!("Powiadomienie P24 dla nieznanej sesji {}", notification.session_id);
            AppError::NotFound
        })?;
    let guest = state.sessions.get(guest_id).await.ok_or(AppError::NotFound)?;

    let pending = guest
        .handle
        .lock()
        .await
        .checkout
        .pending_p24(&notification.session_id);
    let Some((attempt_id, token)) = pending else {
        tracing::info!(
            "Powiadomienie P24 {} bez oczekującej płatności, pomijam",
            notification.session_id
        );
        return Ok(Settled::Ignored);
    };

    state.p24.verify(&notification).await?;
    state.p24_sessions.invalidate(&notification.session_id).await;

    let receipt = PaymentReceipt {
        method: PaymentMethod::P24,
        reference: notification.session_id.clone(),
        capture_id: Some(notification.order_id.to_string()),
        amount: notification.amount,
        currency: P24_CURRENCY.to_string(),
        payer: None,
        status: "COMPLETED".to_string(),
    };
    Ok(settle_outcome(
        state,
        &guest,
        attempt_id,
        &token,
        PaymentOutcome::Succeeded(receipt),
    )
    .await)
}

fn ensure_paypal_open(shop: &ShopSession) -> Result<(), AppError> {
    match shop.checkout.attempt() {
        Some(attempt) if attempt.method == PaymentMethod::PayPal => Ok(()),
        _ => Err(AppError::Conflict("PayPal payment is not open".to_string())),
    }
}

pub async fn simulate_paypal(
    state: &Arc<AppState>,
    guest: &GuestSession,
) -> Result<PaymentRun, AppError> {
    let mut guard = guest.handle.lock().await;
    let shop = &mut *guard;
    ensure_paypal_open(shop)?;
    launch_payment(
        state,
        guest,
        shop,
        PaymentDetails::PayPal(PayPalApproval::Simulated),
    )
}

pub async fn approve_paypal(
    state: &Arc<AppState>,
    guest: &GuestSession,
    order_id: String,
) -> Result<PaymentRun, AppError> {
    if order_id.trim().is_empty() {
        return Err(AppError::BadRequest("Missing PayPal order id".to_string()));
    }
    let mut guard = guest.handle.lock().await;
    let shop = &mut *guard;
    ensure_paypal_open(shop)?;
    launch_payment(
        state,
        guest,
        shop,
        PaymentDetails::PayPal(PayPalApproval::Approved { order_id }),
    )
}

/// Błąd zgłoszony przez przyciski PayPal w przeglądarce.
pub async fn report_paypal_error(
    state: &Arc<AppState>,
    guest: &GuestSession,
    message: &str,
) -> Result<Settled, AppError> {
    let (attempt_id, token) = {
        let shop = guest.handle.lock().await;
        ensure_paypal_open(&shop)?;
        shop.checkout
            .attempt()
            .map(|a| a.handle())
            .ok_or_else(|| AppError::Conflict("PayPal payment is not open".to_string()))?
    };
    tracing::warn!("Gość {}: błąd okna PayPal: {}", guest.id, message);
    let outcome = PayPalFailure::classify(message).outcome();
    Ok(settle_outcome(state, guest, attempt_id, &token, outcome).await)
}

/// Anulowanie płatności. Oczekująca sesja P24 przestaje być rozpoznawana.
pub async fn cancel_checkout(state: &Arc<AppState>, guest: &GuestSession) -> bool {
    let mut shop = guest.handle.lock().await;
    forget_p24_session(state, &shop.checkout).await;
    shop.checkout.cancel()
}

pub async fn reset_checkout(state: &Arc<AppState>, guest: &GuestSession) {
    let mut shop = guest.handle.lock().await;
    forget_p24_session(state, &shop.checkout).await;
    shop.checkout.reset();
}

async fn forget_p24_session(state: &Arc<AppState>, checkout: &CheckoutFlow) {
    if let Some(session_id) = checkout.pending_p24_session() {
        state.p24_sessions.invalidate(session_id).await;
        tracing::debug!("Sesja P24 {} usunięta z indeksu", session_id);
    }
}
