// src/main.rs

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
};
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Deklaracje modułów
mod cart; // dla src/cart.rs
mod catalog; // dla src/catalog.rs
mod checkout; // dla src/checkout.rs
mod config; // dla src/config.rs
mod email_service; // dla src/email_service.rs
mod errors; // dla src/errors.rs
mod extractor; // dla src/extractor.rs
mod handlers; // dla src/handlers.rs
mod htmx_handlers;
mod middleware; // dla src/middleware.rs
mod models; // dla src/models.rs
mod payments; // dla src/payments/
mod response;
mod services;
mod session; // dla src/session.rs
mod state; // dla src/state.rs

// Importy z własnych modułów
use crate::config::AppConfig;
use crate::handlers::*;
use crate::htmx_handlers::*;
use crate::middleware::ensure_guest_session;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    dotenv().ok();

    // Inicjalizacja systemu logowania (tracing)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "metaverse_hub=debug,tower_http=debug".into()), // np. RUST_LOG=info cargo run
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Inicjalizacja serwera...");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Błędna konfiguracja: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        "Tryb płatności: P24 {}, PayPal {}",
        if config.p24.is_live() { "live" } else { "demo" },
        if config.paypal.is_live() { "live" } else { "demo" }
    );

    let addr = config.socket_addr();
    let app_state = Arc::new(AppState::new(config));
    let app = app_router(app_state);

    tracing::info!("Serwer nasłuchuje na {}", addr);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Nie można powiązać adresu {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app.into_make_service()).await {
        tracing::error!("Błąd serwera: {}", e);
    }
}

/// Definicja routingu aplikacji
pub fn app_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        // --- API JSON ---
        .route("/api/products", get(list_products))
        .route("/api/products/{id}", get(get_product_details))
        .route("/api/cart", get(get_cart_handler))
        .route("/api/cart/items", post(add_item_to_cart_handler))
        .route(
            "/api/cart/items/{line_id}",
            patch(update_cart_item_handler).delete(remove_cart_item_handler),
        )
        .route(
            "/api/checkout",
            get(get_checkout_handler).post(submit_checkout_handler),
        )
        .route("/api/checkout/cancel", post(cancel_checkout_handler))
        .route("/api/checkout/reset", post(reset_checkout_handler))
        .route("/api/payments/blik", post(confirm_blik_handler))
        .route("/api/payments/blik/regenerate", post(regenerate_blik_handler))
        .route("/api/payments/p24", post(confirm_p24_handler))
        .route("/api/payments/paypal/simulate", post(simulate_paypal_handler))
        .route("/api/payments/paypal/approve", post(approve_paypal_handler))
        .route("/api/payments/paypal/error", post(paypal_error_handler))
        .route("/api/payment/register", post(register_p24_payment_handler))
        .route("/api/payment/status", post(p24_status_handler))
        .route("/api/paypal/create-order", post(create_paypal_order_handler))
        .route(
            "/api/paypal/capture/{order_id}",
            post(capture_paypal_order_handler),
        )
        .route("/api/config", get(public_config_handler))
        // --- STRONY ---
        .route("/", get(home_page_handler))
        .route("/about", get(about_page_handler))
        .route("/agents", get(agents_page_handler))
        .route("/shop", get(shop_page_handler))
        .route("/shop/payment-success", get(payment_return_page_handler))
        // --- FRAGMENTY HTMX ---
        .route("/htmx/cart", get(get_cart_panel_htmx_handler))
        .route("/htmx/cart/add/{product_id}", post(add_item_to_cart_htmx_handler))
        .route(
            "/htmx/cart/update/{line_id}",
            post(update_cart_item_htmx_handler),
        )
        .route(
            "/htmx/cart/remove/{line_id}",
            post(remove_cart_item_htmx_handler),
        )
        .route(
            "/htmx/checkout",
            get(get_checkout_htmx_handler).post(submit_checkout_htmx_handler),
        )
        .route("/htmx/checkout/cancel", post(cancel_checkout_htmx_handler))
        .route("/htmx/checkout/reset", post(reset_checkout_htmx_handler))
        .route("/htmx/payments/blik", post(confirm_blik_htmx_handler))
        .route("/htmx/payments/blik/input", post(blik_input_htmx_handler))
        .route("/htmx/payments/blik/timer", get(blik_timer_htmx_handler))
        .route(
            "/htmx/payments/blik/regenerate",
            post(regenerate_blik_htmx_handler),
        )
        .route("/htmx/payments/p24", post(confirm_p24_htmx_handler))
        .route(
            "/htmx/payments/p24/channel",
            post(select_p24_channel_htmx_handler),
        )
        .route(
            "/htmx/payments/paypal/simulate",
            post(simulate_paypal_htmx_handler),
        )
        .route(
            "/htmx/payments/paypal/approve",
            post(approve_paypal_htmx_handler),
        )
        .route("/htmx/payments/paypal/error", post(paypal_error_htmx_handler))
        .nest_service("/static", ServeDir::new("static"))
        .layer(axum::middleware::from_fn(ensure_guest_session))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app() -> Router {
        app_router(Arc::new(AppState::new(test_config())))
    }

    fn json_request(method: &str, uri: &str, guest: Uuid, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-guest-session-id", guest.to_string())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str, guest: Uuid) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-guest-session-id", guest.to_string())
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_products_endpoint() {
        let response = app()
            .oneshot(get_request("/api/products/1", Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let product = body_json(response).await;
        assert_eq!(product["name"], "MetaVerse Hub T-Shirt");
        assert_eq!(product["price"], 2999);

        let response = app()
            .oneshot(get_request("/api/products/99", Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_new_visitor_gets_session_cookie() {
        let response = app()
            .oneshot(Request::builder().uri("/api/cart").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap();
        assert!(cookie.starts_with("guest_session_id="));
        assert!(cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn test_cart_totals_through_api() {
        let app = app();
        let guest = Uuid::new_v4();
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/cart/items",
                guest,
                json!({ "product_id": 1, "size": "L", "color": "Navy", "quantity": 2 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let cart = body_json(app.oneshot(get_request("/api/cart", guest)).await.unwrap()).await;
        assert_eq!(cart["summary"]["subtotal"], 5998);
        assert_eq!(cart["summary"]["shipping"], 0);
        assert_eq!(cart["summary"]["tax"], 480);
        assert_eq!(cart["summary"]["total"], 6478);
    }

    #[tokio::test]
    async fn test_line_with_spaced_color_is_reachable_by_encoded_id() {
        let app = app();
        let guest = Uuid::new_v4();
        let added = body_json(
            app.clone()
                .oneshot(json_request(
                    "POST",
                    "/api/cart/items",
                    guest,
                    json!({ "product_id": 1, "size": "M", "color": "Cyber Blue", "quantity": 1 }),
                ))
                .await
                .unwrap(),
        )
        .await;
        let line_id = added["items"][0]["line_id"].as_str().unwrap().to_string();
        assert!(line_id.contains(' '));
        let uri = format!("/api/cart/items/{}", urlencoding::encode(&line_id));

        let response = app
            .clone()
            .oneshot(json_request("PATCH", &uri, guest, json!({ "quantity": 100 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = app
            .clone()
            .oneshot(json_request("PATCH", &uri, guest, json!({ "quantity": 3 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["items"][0]["quantity"], 3);

        let request = Request::builder()
            .method("POST")
            .uri(format!("/htmx/cart/remove/{}", urlencoding::encode(&line_id)))
            .header("HX-Request", "true")
            .header("x-guest-session-id", guest.to_string())
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let cart = body_json(app.oneshot(get_request("/api/cart", guest)).await.unwrap()).await;
        assert_eq!(cart["items"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_checkout_with_empty_cart_is_rejected() {
        let form = json!({
            "email": "neo@metaverse.dev",
            "first_name": "Thomas",
            "last_name": "Anderson",
            "address": "101 Matrix Ave",
            "city": "Capital City",
            "zip_code": "00-001",
            "payment_method": "blik"
        });
        let response = app()
            .oneshot(json_request("POST", "/api/checkout", Uuid::new_v4(), form))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(response).await["error"], "Your cart is empty");
    }

    #[tokio::test]
    async fn test_p24_register_proxy() {
        let app = app();
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/payment/register",
                Uuid::new_v4(),
                json!({ "sessionId": "MV_1_abc", "currency": "PLN" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Missing required fields");

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/payment/register",
                Uuid::new_v4(),
                json!({
                    "sessionId": "MV_1_abc",
                    "amount": 6478,
                    "currency": "PLN",
                    "description": "MetaVerse Hub Order",
                    "email": "neo@metaverse.dev"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert!(body["token"].as_str().unwrap().starts_with("demo_token_"));
        assert!(body.get("crc").is_none());
    }

    #[tokio::test]
    async fn test_paypal_demo_order_and_capture() {
        let app = app();
        let guest = Uuid::new_v4();
        let created = body_json(
            app.clone()
                .oneshot(json_request(
                    "POST",
                    "/api/paypal/create-order",
                    guest,
                    json!({ "amount": "64.78", "currency": "USD", "description": "Order" }),
                ))
                .await
                .unwrap(),
        )
        .await;
        let order_id = created["id"].as_str().unwrap().to_string();
        assert!(order_id.starts_with("SANDBOX_"));
        assert_eq!(created["links"][0]["rel"], "approve");

        let response = app
            .oneshot(json_request(
                "POST",
                &format!("/api/paypal/capture/{}", order_id),
                guest,
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let captured = body_json(response).await;
        assert_eq!(captured["status"], "COMPLETED");
        assert_eq!(
            captured["purchase_units"][0]["payments"]["captures"][0]["amount"]["value"],
            "64.78"
        );
    }

    #[tokio::test]
    async fn test_public_config_hides_secrets() {
        let response = app()
            .oneshot(get_request("/api/config", Uuid::new_v4()))
            .await
            .unwrap();
        let config = body_json(response).await;
        assert_eq!(config["paypal_sdk_enabled"], false);
        assert_eq!(config["currency"], "USD");
        assert!(config.get("paypal_client_secret").is_none());
    }

    #[tokio::test]
    async fn test_htmx_request_gets_fragment() {
        let request = Request::builder()
            .uri("/shop")
            .header("HX-Request", "true")
            .header("x-guest-session-id", Uuid::new_v4().to_string())
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("MetaVerse Store"));
        assert!(html.contains(r#"id="cart-panel""#));
        assert!(!html.contains("<html"));
    }
}
