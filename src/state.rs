// src/state.rs

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use reqwest::Client;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::email_service::EmailService;
use crate::payments::p24::P24Client;
use crate::payments::paypal::PayPalClient;
use crate::payments::PaymentProviders;
use crate::session::SessionStore;

const SESSION_IDLE: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: SessionStore,
    /// Sesja P24 -> sesja gościa, która czeka na powiadomienie
    pub p24_sessions: Cache<String, Uuid>,
    pub p24: Arc<P24Client>,
    pub paypal: Arc<PayPalClient>,
    pub providers: PaymentProviders,
    pub mailer: Option<Arc<EmailService>>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let config = Arc::new(config);
        let http = Client::new();

        let p24 = Arc::new(P24Client::new(Arc::clone(&config), http.clone()));
        let paypal = Arc::new(PayPalClient::new(Arc::clone(&config), http));
        let providers = PaymentProviders::new(&config, Arc::clone(&p24), Arc::clone(&paypal));

        let mailer = EmailService::from_config(&config.email).map(Arc::new);
        if mailer.is_none() {
            tracing::warn!("Brak RESEND_API_KEY - potwierdzenia e-mail są wyłączone");
        }

        Self {
            sessions: SessionStore::new(SESSION_IDLE),
            p24_sessions: Cache::builder()
                .max_capacity(10_000)
                .time_to_idle(SESSION_IDLE)
                .build(),
            p24,
            paypal,
            providers,
            mailer,
            config,
        }
    }
}
