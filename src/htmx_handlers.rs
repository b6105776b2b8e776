// src/htmx_handlers.rs

use axum::{
    Form,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue},
    response::Response,
};
use maud::{Markup, PreEscaped, html};
use serde::Deserialize;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tokio::time::Instant;
use urlencoding::encode;

use crate::cart::{Cart, FREE_SHIPPING_THRESHOLD, MAX_LINE_QUANTITY, format_price};
use crate::catalog::all_products;
use crate::checkout::{AttemptStep, CheckoutFlow, CheckoutStage, PaymentAttempt};
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::models::{AddToCartPayload, CheckoutFormPayload, Order, PaymentMethod, Product};
use crate::payments::blik::{BLIK_CODE_LEN, BlikCode};
use crate::payments::minor_to_decimal;
use crate::payments::p24::P24Channel;
use crate::response::build_response;
use crate::services;
use crate::session::{GuestSession, ShopSession};
use crate::state::AppState;

// --- FORMULARZE HTMX ---

#[derive(Debug, Deserialize)]
pub struct AddToCartForm {
    pub size: Option<String>,
    pub color: Option<String>,
    pub quantity: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct QuantityForm {
    pub quantity: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct BlikForm {
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct P24ChannelForm {
    pub channel: P24Channel,
}

#[derive(Debug, Deserialize)]
pub struct PayPalApproveForm {
    pub order_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PayPalErrorForm {
    #[serde(default)]
    pub message: String,
}

/// Nagłówek HX-Trigger z nową liczbą sztuk w koszyku (licznik w nawigacji).
fn cart_count_trigger(cart: &Cart) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let trigger_payload = serde_json::json!({
        "updateCartCount": { "newCount": cart.total_items() }
    });
    if let Ok(trigger_value) = HeaderValue::from_str(&trigger_payload.to_string()) {
        headers.insert("HX-Trigger", trigger_value);
    } else {
        tracing::error!("MAUD Cart: Nie można utworzyć nagłówka HX-Trigger");
    }
    headers
}

/// Błędy, które użytkownik może poprawić, pokazujemy w sekcji zamiast kodu 4xx
/// (HTMX domyślnie nie podmienia treści przy błędach).
fn user_message<T>(result: Result<T, AppError>) -> Result<Option<String>, AppError> {
    match result {
        Ok(_) => Ok(None),
        Err(AppError::UnprocessableEntity(message))
        | Err(AppError::Conflict(message))
        | Err(AppError::BadRequest(message)) => {
            tracing::debug!("MAUD Checkout: komunikat dla użytkownika: {}", message);
            Ok(Some(message))
        }
        Err(AppError::NotFound) => Ok(Some("Product not found".to_string())),
        Err(e) => Err(e),
    }
}

async fn checkout_fragment(
    app_state: &AppState,
    guest: &GuestSession,
    flash: Option<String>,
) -> Markup {
    let shop = guest.handle.lock().await;
    render_checkout_section(&shop, &app_state.config, Instant::now(), flash.as_deref(), None)
}

// --- STRONY ---

pub async fn home_page_handler(headers: HeaderMap) -> Result<Response, AppError> {
    build_response(&headers, render_home()).await
}

pub async fn about_page_handler(headers: HeaderMap) -> Result<Response, AppError> {
    build_response(&headers, render_about()).await
}

pub async fn agents_page_handler(headers: HeaderMap) -> Result<Response, AppError> {
    build_response(&headers, render_agents()).await
}

pub async fn shop_page_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    tracing::info!("MAUD: /shop dla gościa {}", guest.id);
    let content = {
        let shop = guest.handle.lock().await;
        render_shop(all_products(), &shop, &app_state.config, Instant::now())
    };
    build_response(&headers, content).await
}

/// Powrót z bramki P24 (urlReturn). Wynik przychodzi powiadomieniem,
/// więc strona tylko odpytuje stan zamówienia.
pub async fn payment_return_page_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let content = {
        let shop = guest.handle.lock().await;
        html! {
            section ."max-w-3xl mx-auto px-4 py-16" {
                h1 ."text-3xl font-bold text-white mb-8 text-center" { "Payment status" }
                (render_checkout_section(&shop, &app_state.config, Instant::now(), None, None))
            }
        }
    };
    build_response(&headers, content).await
}

// --- KOSZYK ---

pub async fn get_cart_panel_htmx_handler(guest: GuestSession) -> (HeaderMap, Markup) {
    let shop = guest.handle.lock().await;
    (cart_count_trigger(&shop.cart), render_cart_panel(&shop.cart, None))
}

pub async fn add_item_to_cart_htmx_handler(
    guest: GuestSession,
    Path(product_id): Path<u32>,
    Form(form): Form<AddToCartForm>,
) -> Result<(HeaderMap, Markup), AppError> {
    tracing::info!("MAUD AddToCart: produkt {} dla gościa {}", product_id, guest.id);
    let payload = AddToCartPayload {
        product_id,
        size: form.size,
        color: form.color,
        quantity: form.quantity,
    };
    let flash = user_message(services::add_to_cart(&guest, payload).await)?;
    let shop = guest.handle.lock().await;
    Ok((
        cart_count_trigger(&shop.cart),
        render_cart_panel(&shop.cart, flash.as_deref()),
    ))
}

pub async fn update_cart_item_htmx_handler(
    guest: GuestSession,
    Path(line_id): Path<String>,
    Form(form): Form<QuantityForm>,
) -> Result<(HeaderMap, Markup), AppError> {
    let flash =
        user_message(services::update_cart_item(&guest, &line_id, form.quantity).await)?;
    let shop = guest.handle.lock().await;
    Ok((
        cart_count_trigger(&shop.cart),
        render_cart_panel(&shop.cart, flash.as_deref()),
    ))
}

pub async fn remove_cart_item_htmx_handler(
    guest: GuestSession,
    Path(line_id): Path<String>,
) -> Result<(HeaderMap, Markup), AppError> {
    let flash = user_message(services::remove_cart_item(&guest, &line_id).await)?;
    let shop = guest.handle.lock().await;
    Ok((
        cart_count_trigger(&shop.cart),
        render_cart_panel(&shop.cart, flash.as_deref()),
    ))
}

// --- ZAMÓWIENIE ---

pub async fn get_checkout_htmx_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
) -> Markup {
    checkout_fragment(&app_state, &guest, None).await
}

pub async fn submit_checkout_htmx_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
    Form(form): Form<CheckoutFormPayload>,
) -> Result<Markup, AppError> {
    let submitted = form.clone();
    match user_message(services::submit_checkout(&app_state, &guest, form).await)? {
        None => Ok(checkout_fragment(&app_state, &guest, None).await),
        Some(message) => {
            // Formularz nie został przyjęty - pokazujemy go z wpisanymi danymi
            let shop = guest.handle.lock().await;
            Ok(render_checkout_section(
                &shop,
                &app_state.config,
                Instant::now(),
                Some(&message),
                Some(&submitted),
            ))
        }
    }
}

pub async fn cancel_checkout_htmx_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
) -> Markup {
    services::cancel_checkout(&app_state, &guest).await;
    checkout_fragment(&app_state, &guest, None).await
}

/// "Continue shopping" po zakończonym zamówieniu.
pub async fn reset_checkout_htmx_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
) -> (HeaderMap, Markup) {
    services::reset_checkout(&app_state, &guest).await;
    let shop = guest.handle.lock().await;
    (
        cart_count_trigger(&shop.cart),
        render_checkout_section(&shop, &app_state.config, Instant::now(), None, None),
    )
}

// --- BLIK ---

/// Zwraca kod po odfiltrowaniu (tylko cyfry, max 6) - podgląd pod polem.
pub async fn blik_input_htmx_handler(
    guest: GuestSession,
    Form(form): Form<BlikForm>,
) -> Result<Markup, AppError> {
    let code = services::input_blik_code(&guest, &form.code)
        .await
        .map_err(|e| match e {
            AppError::Conflict(message) => {
                AppError::UnprocessableEntityWithHtml(render_flash(Some(&message)))
            }
            other => other,
        })?;
    Ok(render_blik_code_preview(&code))
}

pub async fn blik_timer_htmx_handler(guest: GuestSession) -> Markup {
    let shop = guest.handle.lock().await;
    match shop.checkout.attempt().map(|a| (&a.step, a.in_flight)) {
        Some((AttemptStep::Blik(code), in_flight)) => {
            render_blik_timer(code, Instant::now(), in_flight, true)
        }
        _ => html! {},
    }
}

pub async fn confirm_blik_htmx_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
    Form(form): Form<BlikForm>,
) -> Result<Markup, AppError> {
    let result = services::confirm_blik(&app_state, &guest, Some(form.code.as_str())).await;
    // Błąd kodu BLIK jest już zapisany w oknie płatności
    let flash = match result {
        Err(AppError::UnprocessableEntity(_)) => None,
        other => user_message(other)?,
    };
    Ok(checkout_fragment(&app_state, &guest, flash).await)
}

pub async fn regenerate_blik_htmx_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
) -> Result<Markup, AppError> {
    let flash = user_message(services::regenerate_blik(&guest).await)?;
    Ok(checkout_fragment(&app_state, &guest, flash).await)
}

// --- PRZELEWY24 ---

pub async fn select_p24_channel_htmx_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
    Form(form): Form<P24ChannelForm>,
) -> Result<Markup, AppError> {
    let flash = user_message(services::select_p24_channel(&guest, form.channel).await)?;
    Ok(checkout_fragment(&app_state, &guest, flash).await)
}

pub async fn confirm_p24_htmx_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
) -> Result<Markup, AppError> {
    let flash = user_message(services::confirm_p24(&app_state, &guest, None).await)?;
    Ok(checkout_fragment(&app_state, &guest, flash).await)
}

// --- PAYPAL ---

pub async fn simulate_paypal_htmx_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
) -> Result<Markup, AppError> {
    let flash = user_message(services::simulate_paypal(&app_state, &guest).await)?;
    Ok(checkout_fragment(&app_state, &guest, flash).await)
}

pub async fn approve_paypal_htmx_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
    Form(form): Form<PayPalApproveForm>,
) -> Result<Markup, AppError> {
    let flash =
        user_message(services::approve_paypal(&app_state, &guest, form.order_id).await)?;
    Ok(checkout_fragment(&app_state, &guest, flash).await)
}

pub async fn paypal_error_htmx_handler(
    State(app_state): State<Arc<AppState>>,
    guest: GuestSession,
    Form(form): Form<PayPalErrorForm>,
) -> Result<Markup, AppError> {
    let flash =
        user_message(services::report_paypal_error(&app_state, &guest, &form.message).await)?;
    Ok(checkout_fragment(&app_state, &guest, flash).await)
}

// --- WIDOKI ---

fn render_section_heading(prefix: &str, highlight: &str) -> Markup {
    html! {
        h2 ."text-4xl font-bold text-white mb-12 text-center" {
            (prefix) " " span ."cyber-text" { (highlight) }
        }
    }
}

fn render_feature_card(title: &str, description: &str, gradient: &str) -> Markup {
    html! {
        div ."glass-morphism p-6 rounded-xl h-full flex flex-col" {
            div class=(format!("w-14 h-14 rounded-lg mb-4 bg-gradient-to-br {}", gradient)) {}
            h3 ."text-white font-bold text-xl mb-3" { (title) }
            p ."text-gray-300 flex-1" { (description) }
        }
    }
}

pub fn render_home() -> Markup {
    let features = [
        ("Virtual Reality", "Immerse yourself in photorealistic 3D environments with haptic feedback and spatial audio", "from-blue-500 to-cyan-500"),
        ("AI Agents", "Intelligent virtual beings that learn, adapt, and interact naturally in digital spaces", "from-purple-500 to-pink-500"),
        ("Digital Assets", "Own, trade, and create unique digital items with blockchain-verified authenticity", "from-green-500 to-emerald-500"),
        ("Social Spaces", "Connect with people worldwide in shared virtual environments and experiences", "from-orange-500 to-red-500"),
    ];
    let stats = [
        ("500M+", "Active Users"),
        ("1000+", "Virtual Worlds"),
        ("24/7", "Availability"),
        ("100+", "Partners"),
    ];

    html! {
        section ."min-h-[70vh] flex flex-col items-center justify-center text-center px-4" {
            h1 ."text-5xl md:text-7xl font-bold text-white mb-6" {
                "Welcome to the " span ."cyber-text" { "MetaVerse Hub" }
            }
            p ."text-xl text-gray-300 max-w-3xl mb-10" {
                "Step into infinite digital worlds where imagination meets technology."
            }
            div ."flex gap-4" {
                a href="/shop" hx-get="/shop" hx-target="#content" hx-push-url="true"
                    class="px-8 py-3 rounded-lg bg-gradient-to-r from-cyan-500 to-purple-600 text-white font-semibold" {
                    "Visit the Store"
                }
                a href="/agents" hx-get="/agents" hx-target="#content" hx-push-url="true"
                    class="px-8 py-3 rounded-lg glass-morphism text-white font-semibold" {
                    "Meet AI Agents"
                }
            }
        }
        main ."max-w-7xl mx-auto px-4 sm:px-6 lg:px-8 space-y-20 py-20" {
            section {
                (render_section_heading("Explore", "Infinite Possibilities"))
                div ."grid grid-cols-1 md:grid-cols-2 lg:grid-cols-4 gap-8 items-stretch" {
                    @for (title, description, gradient) in features {
                        (render_feature_card(title, description, gradient))
                    }
                }
            }
            section ."max-w-2xl mx-auto" {
                h2 ."text-2xl font-bold text-blue-300 mb-6" { "Frequently Asked Questions" }
                div ."space-y-4" {
                    details ."bg-white/10 p-4 rounded-lg" {
                        summary ."text-white font-semibold cursor-pointer" { "What equipment do I need for Metaverse?" }
                        p ."mt-2 text-white/80" {
                            "To fully experience the Metaverse, you'll need a VR headset, a high-speed internet connection, and a compatible device or computer."
                        }
                    }
                    details ."bg-white/10 p-4 rounded-lg" {
                        summary ."text-white font-semibold cursor-pointer" { "Is Metaverse safe?" }
                        p ."mt-2 text-white/80" {
                            "The Metaverse implements various security measures and protocols to ensure user safety and data protection."
                        }
                    }
                }
            }
            section ."grid grid-cols-2 md:grid-cols-4 gap-4" {
                @for (value, label) in stats {
                    div ."bg-white/10 p-6 rounded-lg text-center" {
                        div ."text-3xl font-bold text-blue-300" { (value) }
                        div ."text-white/80 text-sm" { (label) }
                    }
                }
            }
        }
    }
}

pub fn render_about() -> Markup {
    let values = [
        ("Innovation", "Pushing the boundaries of what's possible with emerging technologies"),
        ("Inclusivity", "Creating accessible experiences for users of all backgrounds and abilities"),
        ("Security", "Ensuring safe and secure virtual environments for all users"),
        ("Excellence", "Delivering premium quality experiences that exceed expectations"),
        ("Transparency", "Open communication and honest practices in all our endeavors"),
        ("Sustainability", "Building environmentally conscious virtual worlds for future generations"),
    ];
    html! {
        main ."max-w-6xl mx-auto px-4 py-20 space-y-16" {
            h1 ."text-5xl font-bold text-white text-center" {
                "About " span ."cyber-text" { "MetaVerse Hub" }
            }
            section ."glass-morphism p-8 rounded-xl" {
                h2 ."text-3xl font-bold text-white mb-4" { "Our Mission" }
                p ."text-gray-300 text-lg" {
                    "We build the bridge between people and the digital worlds they imagine."
                }
            }
            section {
                h2 ."text-3xl font-bold text-white mb-8 text-center" { "Our Core Values" }
                div ."grid md:grid-cols-2 lg:grid-cols-3 gap-6" {
                    @for (title, description) in values {
                        div ."glass-morphism p-6 rounded-xl" {
                            h3 ."text-xl font-bold text-white mb-2" { (title) }
                            p ."text-gray-300" { (description) }
                        }
                    }
                }
            }
            section ."glass-morphism p-8 rounded-xl text-center" {
                h2 ."text-3xl font-bold text-white mb-4" { "Our Vision for the Future" }
                p ."text-gray-300 text-lg" {
                    "A connected metaverse where everyone can create, learn and belong."
                }
            }
        }
    }
}

pub fn render_agents() -> Markup {
    let capabilities = [
        ("Autonomous Decision Making", "Make complex decisions independently based on environmental analysis and learned patterns"),
        ("Adaptive Learning", "Continuously evolve and improve through experience and interaction with users"),
        ("Natural Communication", "Engage in sophisticated conversations using natural language processing"),
        ("Real-time Processing", "Process information and respond instantly to changing virtual environments"),
        ("Social Intelligence", "Understand social cues and interact appropriately in group settings"),
        ("Creative Problem Solving", "Generate innovative solutions and create original content autonomously"),
    ];
    let kinds = [
        "Personal Assistants",
        "Creative Collaborators",
        "Social Facilitators",
        "Knowledge Experts",
    ];
    html! {
        main ."max-w-6xl mx-auto px-4 py-20 space-y-16" {
            header ."text-center" {
                h1 ."text-5xl font-bold text-white mb-4" { span ."cyber-text" { "AI Agents" } }
                p ."text-xl text-gray-300" { "The Future of Digital Intelligence" }
            }
            section {
                h2 ."text-3xl font-bold text-white mb-8 text-center" { "Core Capabilities" }
                div ."grid md:grid-cols-2 lg:grid-cols-3 gap-6" {
                    @for (title, description) in capabilities {
                        (render_feature_card(title, description, "from-purple-500 to-cyan-500"))
                    }
                }
            }
            section {
                h2 ."text-3xl font-bold text-white mb-8 text-center" { "Types of AI Agents" }
                ul ."grid md:grid-cols-2 gap-4" {
                    @for kind in kinds {
                        li ."glass-morphism p-4 rounded-lg text-white font-semibold" { (kind) }
                    }
                }
            }
            section ."glass-morphism p-8 rounded-xl text-center" {
                h2 ."text-3xl font-bold text-white mb-4" { "The Future of AI Agents" }
                p ."text-gray-300 text-lg" {
                    "Agents will become companions, collaborators and guides across every virtual world."
                }
            }
        }
    }
}

pub fn render_shop(products: &[Product], shop: &ShopSession, config: &AppConfig, now: Instant) -> Markup {
    let perks = [
        ("Premium Quality", "High-quality materials and cutting-edge printing technology".to_string()),
        ("Fast Shipping", format!("Free worldwide shipping on all orders over {}", format_price(FREE_SHIPPING_THRESHOLD))),
        ("Limited Edition", "Exclusive designs available only for a limited time".to_string()),
        ("Secure Payment", "SSL encrypted checkout with multiple payment options".to_string()),
    ];
    html! {
        main ."max-w-7xl mx-auto px-4 py-16 space-y-12" {
            h1 ."text-5xl font-bold text-center" { span ."cyber-text" { "MetaVerse Store" } }
            div ."grid lg:grid-cols-3 gap-8" {
                div ."lg:col-span-2 space-y-8" {
                    @for product in products {
                        (render_product_card(product))
                    }
                    (render_checkout_section(shop, config, now, None, None))
                }
                aside ."lg:sticky lg:top-24 self-start" {
                    (render_cart_panel(&shop.cart, None))
                }
            }
            section ."grid md:grid-cols-4 gap-6" {
                @for (title, description) in &perks {
                    div ."glass-morphism p-6 rounded-xl text-center" {
                        h3 ."text-white font-bold mb-2" { (title) }
                        p ."text-gray-300 text-sm" { (description) }
                    }
                }
            }
        }
    }
}

pub fn render_product_card(product: &Product) -> Markup {
    let default_size = product.default_size().unwrap_or_default();
    let default_color = product.default_color().unwrap_or_default();
    html! {
        article ."glass-morphism rounded-xl p-6 grid md:grid-cols-2 gap-6" {
            div ."relative" {
                img src=(product.image) alt=(product.name) class="w-full rounded-lg" loading="lazy";
                @if let Some(discount) = product.discount_percent() {
                    span ."absolute top-3 left-3 bg-pink-600 text-white text-sm font-bold px-3 py-1 rounded-full" {
                        "-" (discount) "%"
                    }
                }
            }
            div ."space-y-4" {
                h2 ."text-3xl font-bold text-white" { (product.name) }
                div ."flex items-center gap-2 text-yellow-400" {
                    span { "★ " (format!("{:.1}", product.rating)) }
                    span ."text-gray-400 text-sm" { "(" (product.reviews) " reviews)" }
                }
                div ."flex items-baseline gap-3" {
                    span ."text-3xl font-bold text-cyan-300" { (format_price(product.price)) }
                    @if let Some(original) = product.original_price {
                        span ."text-lg text-gray-500 line-through" { (format_price(original)) }
                    }
                }
                p ."text-gray-300" { (product.description) }
                ul ."text-gray-300 text-sm list-disc list-inside" {
                    @for feature in &product.features {
                        li { (feature) }
                    }
                }
                form hx-post=(format!("/htmx/cart/add/{}", product.id))
                    hx-target="#cart-panel" hx-swap="outerHTML"
                    class="space-y-3" {
                    label ."block text-sm text-gray-300" {
                        "Size"
                        select name="size" class="mt-1 w-full rounded bg-white/10 text-white p-2" {
                            @for size in &product.sizes {
                                option value=(size) selected[size == default_size] { (size) }
                            }
                        }
                    }
                    label ."block text-sm text-gray-300" {
                        "Color"
                        select name="color" class="mt-1 w-full rounded bg-white/10 text-white p-2" {
                            @for color in &product.colors {
                                option value=(color) selected[color == default_color] { (color) }
                            }
                        }
                    }
                    label ."block text-sm text-gray-300" {
                        "Quantity"
                        input type="number" name="quantity" value="1" min="1" max=(MAX_LINE_QUANTITY)
                            class="mt-1 w-24 rounded bg-white/10 text-white p-2";
                    }
                    @if product.in_stock {
                        button type="submit"
                            class="w-full py-3 rounded-lg bg-gradient-to-r from-cyan-500 to-purple-600 text-white font-semibold" {
                            "Add to Cart"
                        }
                    } @else {
                        button type="button" disabled class="w-full py-3 rounded-lg bg-gray-600 text-gray-300" {
                            "Out of Stock"
                        }
                    }
                }
            }
        }
    }
}

fn render_flash(message: Option<&str>) -> Markup {
    html! {
        @if let Some(message) = message {
            div ."bg-red-500/20 border border-red-500/40 text-red-200 rounded-lg p-3 text-sm" role="alert" {
                (message)
            }
        }
    }
}

pub fn render_cart_panel(cart: &Cart, flash: Option<&str>) -> Markup {
    let summary = cart.summary();
    html! {
        div #cart-panel ."glass-morphism rounded-xl p-6 space-y-4" {
            h2 ."text-2xl font-bold text-white" { "Shopping Cart (" (summary.total_items) ")" }
            (render_flash(flash))
            @if cart.is_empty() {
                p ."text-gray-400 py-6 text-center" { "Your cart is empty" }
            } @else {
                ul role="list" ."divide-y divide-white/10" {
                    @for item in cart.items() {
                        // Kolor w identyfikatorze może mieć spację
                        @let line = encode(&item.line_id);
                        li ."flex py-4 gap-4" {
                            img src=(item.image) alt=(item.name) class="h-16 w-16 rounded object-cover" loading="lazy";
                            div ."flex-1" {
                                div ."flex justify-between text-white font-medium" {
                                    h3 { (item.name) }
                                    p { (format_price(item.line_total())) }
                                }
                                p ."text-xs text-gray-400" { (item.selected_size) " / " (item.selected_color) }
                                div ."flex items-center gap-2 mt-2" {
                                    button type="button"
                                        hx-post=(format!("/htmx/cart/update/{}", line))
                                        hx-vals=(format!(r#"{{"quantity": {}}}"#, i64::from(item.quantity) - 1))
                                        hx-target="#cart-panel" hx-swap="outerHTML"
                                        class="px-2 rounded bg-white/10 text-white" { "−" }
                                    span ."text-white w-6 text-center" { (item.quantity) }
                                    button type="button" disabled[item.quantity >= MAX_LINE_QUANTITY]
                                        hx-post=(format!("/htmx/cart/update/{}", line))
                                        hx-vals=(format!(r#"{{"quantity": {}}}"#, i64::from(item.quantity) + 1))
                                        hx-target="#cart-panel" hx-swap="outerHTML"
                                        class="px-2 rounded bg-white/10 text-white" { "+" }
                                    button type="button"
                                        hx-post=(format!("/htmx/cart/remove/{}", line))
                                        hx-target="#cart-panel" hx-swap="outerHTML"
                                        class="ml-auto text-sm text-pink-400 hover:text-pink-300" { "Remove" }
                                }
                            }
                        }
                    }
                }
                dl ."space-y-1 text-sm text-gray-300" {
                    div ."flex justify-between" { dt { "Subtotal" } dd { (format_price(summary.subtotal)) } }
                    div ."flex justify-between" {
                        dt { "Shipping" }
                        dd {
                            @if summary.shipping == 0 { span ."text-green-400" { "FREE" } }
                            @else { (format_price(summary.shipping)) }
                        }
                    }
                    div ."flex justify-between" { dt { "Tax" } dd { (format_price(summary.tax)) } }
                    div ."flex justify-between text-lg font-bold text-white pt-2 border-t border-white/10" {
                        dt { "Total" } dd { (format_price(summary.total)) }
                    }
                }
                @if summary.shipping > 0 {
                    p ."text-xs text-cyan-300" {
                        "Add " (format_price(FREE_SHIPPING_THRESHOLD - summary.subtotal + 1)) " more for free shipping"
                    }
                }
            }
        }
    }
}

/// Sekcja zamówienia. Odpytuje serwer co sekundę, dopóki płatność trwa.
pub fn render_checkout_section(
    shop: &ShopSession,
    config: &AppConfig,
    now: Instant,
    flash: Option<&str>,
    submitted: Option<&CheckoutFormPayload>,
) -> Markup {
    let checkout = &shop.checkout;
    let busy = matches!(checkout.stage(), CheckoutStage::Processing)
        || checkout.attempt().is_some_and(|a| a.in_flight);
    html! {
        section #checkout-section ."glass-morphism rounded-xl p-6 space-y-4"
            hx-get=[busy.then_some("/htmx/checkout")]
            hx-trigger=[busy.then_some("every 1s")]
            hx-swap=[busy.then_some("outerHTML")] {
            @match checkout.stage() {
                CheckoutStage::Complete(order) => {
                    (render_order_complete(order))
                }
                CheckoutStage::Processing => {
                    (render_processing())
                }
                CheckoutStage::FormEntry => {
                    (render_checkout_form(checkout, &shop.cart, submitted, flash))
                    @if let Some(attempt) = checkout.attempt() {
                        (render_payment_modal(attempt, &shop.cart, config, now))
                    }
                }
            }
        }
    }
}

fn render_processing() -> Markup {
    html! {
        div ."text-center py-12" {
            div ."mx-auto mb-4 h-12 w-12 rounded-full border-4 border-cyan-400 border-t-transparent animate-spin" {}
            h2 ."text-2xl font-bold text-white" { "Processing Payment..." }
            p ."text-gray-300" { "Please don't close this window" }
        }
    }
}

pub fn render_order_complete(order: &Order) -> Markup {
    html! {
        div ."text-center py-8 space-y-4" {
            h2 ."text-3xl font-bold text-green-400" { "Order Confirmed!" }
            p ."text-gray-300" { "Thank you for your purchase." }
            p ."text-white" { "Order number: " strong { (order.order_number) } }
            p ."text-gray-300" {
                "Paid " (format_price(order.summary.total)) " with " (order.payment.method)
            }
            p ."text-gray-400 text-sm" {
                "You'll receive a confirmation email shortly at " (order.contact.email)
            }
            button type="button" hx-post="/htmx/checkout/reset"
                hx-target="#checkout-section" hx-swap="outerHTML"
                class="px-6 py-3 rounded-lg bg-gradient-to-r from-cyan-500 to-purple-600 text-white font-semibold" {
                "Continue Shopping"
            }
        }
    }
}

fn text_field(name: &str, label: &str, kind: &str, value: &str) -> Markup {
    html! {
        label ."block text-sm text-gray-300" {
            (label)
            input type=(kind) name=(name) value=(value) required
                class="mt-1 w-full rounded bg-white/10 text-white p-2";
        }
    }
}

fn render_checkout_form(
    checkout: &CheckoutFlow,
    cart: &Cart,
    submitted: Option<&CheckoutFormPayload>,
    flash: Option<&str>,
) -> Markup {
    let form = submitted.or(checkout.form());
    let method = form.map_or(PaymentMethod::Card, |f| f.payment_method);
    let error = flash.or(checkout.form_error());

    html! {
        h2 ."text-2xl font-bold text-white" { "Checkout" }
        (render_flash(error))
        @if cart.is_empty() {
            p ."text-gray-400" { "Add something to your cart to check out." }
        } @else {
            form hx-post="/htmx/checkout" hx-target="#checkout-section" hx-swap="outerHTML"
                "x-data"=(format!("{{ method: '{}' }}", method.as_param()))
                class="space-y-4" {
                div ."grid md:grid-cols-2 gap-4" {
                    (text_field("email", "Email", "email", form.map_or("", |f| f.email.as_str())))
                    (text_field("first_name", "First name", "text", form.map_or("", |f| f.first_name.as_str())))
                    (text_field("last_name", "Last name", "text", form.map_or("", |f| f.last_name.as_str())))
                    (text_field("address", "Address", "text", form.map_or("", |f| f.address.as_str())))
                    (text_field("city", "City", "text", form.map_or("", |f| f.city.as_str())))
                    (text_field("zip_code", "ZIP code", "text", form.map_or("", |f| f.zip_code.as_str())))
                }
                input type="hidden" name="country" value=(form.map_or("United States", |f| f.country.as_str()));
                fieldset ."space-y-2" {
                    legend ."text-white font-semibold mb-2" { "Payment method" }
                    @for option in PaymentMethod::iter() {
                        label ."flex items-center gap-2 text-gray-200" {
                            input type="radio" name="payment_method" value=(option.as_param())
                                "x-model"="method" checked[option == method];
                            (option)
                        }
                    }
                }
                div "x-show"="method === 'card'" ."grid md:grid-cols-2 gap-4" {
                    label ."block text-sm text-gray-300" {
                        "Card number"
                        input type="text" name="card_number" inputmode="numeric" autocomplete="cc-number"
                            placeholder="1234 5678 9012 3456" class="mt-1 w-full rounded bg-white/10 text-white p-2";
                    }
                    label ."block text-sm text-gray-300" {
                        "Name on card"
                        input type="text" name="card_name" autocomplete="cc-name"
                            value=(form.and_then(|f| f.card_name.as_deref()).unwrap_or_default())
                            class="mt-1 w-full rounded bg-white/10 text-white p-2";
                    }
                    label ."block text-sm text-gray-300" {
                        "Expiry date"
                        input type="text" name="expiry_date" placeholder="MM/YY" autocomplete="cc-exp"
                            class="mt-1 w-full rounded bg-white/10 text-white p-2";
                    }
                    label ."block text-sm text-gray-300" {
                        "CVV"
                        input type="password" name="cvv" inputmode="numeric" maxlength="4" autocomplete="cc-csc"
                            class="mt-1 w-full rounded bg-white/10 text-white p-2";
                    }
                }
                button type="submit" disabled[checkout.attempt().is_some()]
                    class="w-full py-3 rounded-lg bg-gradient-to-r from-cyan-500 to-purple-600 text-white font-semibold" {
                    "Complete Order - " (format_price(cart.summary().total))
                }
            }
        }
    }
}

fn render_modal_frame(title: &str, attempt: &PaymentAttempt, body: Markup) -> Markup {
    html! {
        div ."fixed inset-0 z-50 flex items-center justify-center bg-black/70 p-4" role="dialog" aria-modal="true" {
            div ."glass-morphism rounded-xl p-6 w-full max-w-md space-y-4" {
                div ."flex justify-between items-center" {
                    h3 ."text-xl font-bold text-white" { (title) }
                    button type="button" hx-post="/htmx/checkout/cancel"
                        hx-target="#checkout-section" hx-swap="outerHTML"
                        aria-label="Close" class="text-gray-400 hover:text-white" { "✕" }
                }
                (render_flash(attempt.error.as_deref()))
                @if let Some(notice) = &attempt.notice {
                    div ."bg-yellow-500/20 text-yellow-200 rounded-lg p-3 text-sm" { (notice) }
                }
                (body)
            }
        }
    }
}

fn render_payment_modal(attempt: &PaymentAttempt, cart: &Cart, config: &AppConfig, now: Instant) -> Markup {
    match &attempt.step {
        AttemptStep::Blik(code) => render_blik_modal(attempt, code, now),
        AttemptStep::P24 { channel, pending } => render_modal_frame(
            "Przelewy24",
            attempt,
            render_p24_body(attempt, *channel, pending.as_ref().map(|p| p.redirect_url.as_str())),
        ),
        AttemptStep::PayPal => render_modal_frame("PayPal", attempt, render_paypal_body(attempt, cart, config)),
        AttemptStep::Card => html! {},
    }
}

fn render_blik_code_preview(code: &str) -> Markup {
    html! {
        span #blik-code-preview ."font-mono tracking-widest text-cyan-300" {
            (code) ("•".repeat(BLIK_CODE_LEN.saturating_sub(code.len())))
        }
    }
}

/// Licznik BLIK. Po wygaśnięciu przestaje odpytywać i blokuje przycisk (swap out-of-band).
pub fn render_blik_timer(code: &BlikCode, now: Instant, in_flight: bool, with_oob: bool) -> Markup {
    let expired = code.is_expired(now);
    html! {
        span #blik-timer ."font-mono text-white"
            hx-get=[(!expired).then_some("/htmx/payments/blik/timer")]
            hx-trigger=[(!expired).then_some("every 1s")]
            hx-swap=[(!expired).then_some("outerHTML")] {
            @if expired { "Code expired" } @else { (code.countdown(now)) }
        }
        @if with_oob && expired {
            (render_blik_submit(true, in_flight, true))
        }
    }
}

fn render_blik_submit(expired: bool, in_flight: bool, oob: bool) -> Markup {
    html! {
        button #blik-submit type="submit" disabled[expired || in_flight]
            hx-swap-oob=[oob.then_some("true")]
            class="w-full py-3 rounded-lg bg-gradient-to-r from-pink-500 to-purple-600 text-white font-semibold disabled:opacity-50" {
            @if in_flight { "Processing..." } @else { "Pay with BLIK" }
        }
    }
}

fn render_blik_modal(attempt: &PaymentAttempt, code: &BlikCode, now: Instant) -> Markup {
    let expired = code.is_expired(now);
    let body = html! {
        p ."text-gray-300 text-sm" { "Enter the 6-digit code from your banking app." }
        div ."flex justify-between text-sm text-gray-300" {
            span { "Time left: " (render_blik_timer(code, now, attempt.in_flight, false)) }
            (render_blik_code_preview(code.code()))
        }
        form hx-post="/htmx/payments/blik" hx-target="#checkout-section" hx-swap="outerHTML" class="space-y-3" {
            input type="text" name="code" value=(code.code()) inputmode="numeric"
                maxlength=(BLIK_CODE_LEN) pattern="[0-9]*" autocomplete="one-time-code"
                hx-post="/htmx/payments/blik/input" hx-trigger="input changed delay:150ms"
                hx-target="#blik-code-preview" hx-swap="outerHTML"
                disabled[attempt.in_flight]
                class="w-full text-center text-2xl font-mono tracking-[0.5em] rounded bg-white/10 text-white p-3";
            (render_blik_submit(expired, attempt.in_flight, false))
        }
        @if expired && !attempt.in_flight {
            button type="button" hx-post="/htmx/payments/blik/regenerate"
                hx-target="#checkout-section" hx-swap="outerHTML"
                class="w-full py-2 rounded-lg glass-morphism text-white" { "Generate new code" }
        }
    };
    render_modal_frame("BLIK", attempt, body)
}

fn render_p24_body(attempt: &PaymentAttempt, selected: P24Channel, redirect_url: Option<&str>) -> Markup {
    html! {
        @if let Some(url) = redirect_url {
            p ."text-gray-300" { "Complete the payment on the Przelewy24 page. This window updates automatically." }
            a href=(url) target="_blank" rel="noopener"
                class="block text-center w-full py-3 rounded-lg bg-red-600 text-white font-semibold" {
                "Continue to Przelewy24"
            }
        } @else {
            p ."text-gray-300 text-sm" { "Choose how you want to pay:" }
            div ."space-y-2" {
                @for channel in P24Channel::iter() {
                    button type="button" hx-post="/htmx/payments/p24/channel"
                        hx-vals=(format!(r#"{{"channel": "{}"}}"#, channel.as_param()))
                        hx-target="#checkout-section" hx-swap="outerHTML"
                        disabled[attempt.in_flight]
                        class=(if channel == selected {
                            "w-full p-3 rounded-lg border-2 border-red-500 text-white text-left"
                        } else {
                            "w-full p-3 rounded-lg border border-white/20 text-gray-300 text-left"
                        }) {
                        (channel)
                    }
                }
            }
            button type="button" hx-post="/htmx/payments/p24"
                hx-target="#checkout-section" hx-swap="outerHTML"
                disabled[attempt.in_flight]
                class="w-full py-3 rounded-lg bg-red-600 text-white font-semibold disabled:opacity-50" {
                @if attempt.in_flight { "Connecting to Przelewy24..." } @else { "Pay with Przelewy24" }
            }
        }
    }
}

fn render_paypal_body(attempt: &PaymentAttempt, cart: &Cart, config: &AppConfig) -> Markup {
    let total = cart.summary().total;
    let sdk_enabled = config.paypal.has_real_client_id();
    html! {
        p ."text-gray-300" { "Total: " strong ."text-white" { (format_price(total)) } }
        @if attempt.in_flight {
            p ."text-center text-gray-300" { "Processing PayPal payment..." }
        } @else if sdk_enabled {
            div #paypal-buttons
                data-client-id=(config.paypal.client_id)
                data-amount=(minor_to_decimal(total))
                data-currency=(config.currency) {}
            script src=(format!(
                "https://www.paypal.com/sdk/js?client-id={}&currency={}",
                config.paypal.client_id, config.currency
            )) {}
            script { (PreEscaped(PAYPAL_BUTTONS_SCRIPT)) }
        } @else {
            div ."rounded-lg border border-dashed border-white/30 p-4 text-center text-gray-400 text-sm" {
                "PayPal buttons are unavailable in demo mode."
            }
            button type="button" hx-post="/htmx/payments/paypal/simulate"
                hx-target="#checkout-section" hx-swap="outerHTML"
                class="w-full py-3 rounded-lg bg-yellow-400 text-blue-900 font-semibold" {
                "Simulate PayPal Payment"
            }
        }
    }
}

// Przyciski SDK: zamówienie tworzy serwer, zatwierdzenie i błędy wracają przez HTMX
const PAYPAL_BUTTONS_SCRIPT: &str = r#"
(function () {
  var el = document.getElementById('paypal-buttons');
  if (!el || !window.paypal) { return; }
  var post = function (path, values) {
    htmx.ajax('POST', path, { target: '#checkout-section', swap: 'outerHTML', values: values });
  };
  window.paypal.Buttons({
    createOrder: function () {
      return fetch('/api/paypal/create-order', {
        method: 'POST',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify({
          amount: el.dataset.amount,
          currency: el.dataset.currency,
          description: 'MetaVerse Hub Order'
        })
      }).then(function (r) { return r.json(); }).then(function (order) { return order.id; });
    },
    onApprove: function (data) { post('/htmx/payments/paypal/approve', { order_id: data.orderID }); },
    onCancel: function () { post('/htmx/payments/paypal/error', { message: 'Window closed' }); },
    onError: function (err) { post('/htmx/payments/paypal/error', { message: String(err) }); }
  }).render('#paypal-buttons');
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::find_product;
    use crate::config::test_config;
    use crate::models::sample_form;
    use std::time::Duration;

    fn shop_with_shirts(quantity: u32) -> ShopSession {
        let mut shop = ShopSession::default();
        let product = find_product(1).unwrap();
        shop.cart.add_item(product, "M", "Black", quantity).unwrap();
        shop
    }

    #[test]
    fn test_cart_panel_shows_free_shipping_and_total() {
        let shop = shop_with_shirts(2);
        let html = render_cart_panel(&shop.cart, None).into_string();
        assert!(html.contains("FREE"));
        assert!(html.contains("$64.78"));
        assert!(html.contains("Shopping Cart (2)"));
    }

    #[test]
    fn test_cart_panel_encodes_line_ids() {
        let mut cart = Cart::new();
        cart.add_item(find_product(1).unwrap(), "M", "Cyber Blue", MAX_LINE_QUANTITY)
            .unwrap();
        let html = render_cart_panel(&cart, None).into_string();
        assert!(html.contains("/htmx/cart/update/1-M-Cyber%20Blue-"));
        assert!(html.contains("/htmx/cart/remove/1-M-Cyber%20Blue-"));
        assert!(!html.contains("/htmx/cart/update/1-M-Cyber Blue"));
        assert!(html.contains(r#"disabled"#));
    }

    #[test]
    fn test_cart_panel_empty() {
        let html = render_cart_panel(&Cart::new(), None).into_string();
        assert!(html.contains("Your cart is empty"));
        assert!(!html.contains("Subtotal"));
    }

    #[tokio::test]
    async fn test_blik_modal_countdown_and_expiry() {
        let config = test_config();
        let mut shop = shop_with_shirts(1);
        let now = Instant::now();
        shop.checkout
            .submit(sample_form(PaymentMethod::Blik), &shop.cart, Duration::from_secs(120), now)
            .unwrap();

        let html = render_checkout_section(&shop, &config, now, None, None).into_string();
        assert!(html.contains("2:00"));
        assert!(html.contains("/htmx/payments/blik/timer"));
        assert!(!html.contains("Generate new code"));

        let later = now + Duration::from_secs(121);
        let html = render_checkout_section(&shop, &config, later, None, None).into_string();
        assert!(html.contains("Code expired"));
        assert!(html.contains("Generate new code"));
        assert!(!html.contains("/htmx/payments/blik/timer"));
    }

    #[tokio::test]
    async fn test_paypal_modal_without_client_id_offers_simulation() {
        let config = test_config();
        let mut shop = shop_with_shirts(1);
        shop.checkout
            .submit(sample_form(PaymentMethod::PayPal), &shop.cart, Duration::from_secs(120), Instant::now())
            .unwrap();
        let html = render_checkout_section(&shop, &config, Instant::now(), None, None).into_string();
        assert!(html.contains("Simulate PayPal Payment"));
        assert!(!html.contains("paypal.com/sdk/js"));
    }

    #[tokio::test]
    async fn test_processing_section_polls() {
        let config = test_config();
        let mut shop = shop_with_shirts(1);
        shop.checkout
            .submit(sample_form(PaymentMethod::Card), &shop.cart, Duration::from_secs(120), Instant::now())
            .unwrap();
        let html = render_checkout_section(&shop, &config, Instant::now(), None, None).into_string();
        assert!(html.contains("Processing Payment..."));
        assert!(html.contains(r#"hx-trigger="every 1s""#));
    }

    #[test]
    fn test_form_keeps_submitted_values_and_error() {
        let config = test_config();
        let shop = shop_with_shirts(1);
        let mut form = sample_form(PaymentMethod::Blik);
        form.email = "not-an-email".into();
        let html = render_checkout_section(
            &shop,
            &config,
            Instant::now(),
            Some("Please enter a valid email address"),
            Some(&form),
        )
        .into_string();
        assert!(html.contains("not-an-email"));
        assert!(html.contains("Please enter a valid email address"));
        assert!(html.contains("{ method: 'blik' }"));
    }
}
