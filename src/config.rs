// src/config.rs

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

// Wartości domyślne z piaskownicy P24 - traktujemy je jak brak prawdziwych kluczy
const P24_SANDBOX_ID: u32 = 64195;
const P24_SANDBOX_API_KEY: &str = "sandbox_api_key";
const P24_SANDBOX_CRC: &str = "sandbox_crc";

pub const PAYPAL_DEMO_CLIENT_ID: &str = "demo_paypal_client_id";
const PAYPAL_DEMO_SECRET: &str = "demo_secret";
// Prawdziwe identyfikatory klienta PayPal są długie
const PAYPAL_MIN_CLIENT_ID_LEN: usize = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Nieprawidłowa wartość zmiennej {0}: {1}")]
    InvalidValue(String, String),
}

/// Pełna konfiguracja aplikacji, wczytywana raz przy starcie.
#[derive(Debug)]
pub struct AppConfig {
    pub host: IpAddr,
    pub port: u16,
    pub base_url: Url,
    pub currency: String,
    pub p24: P24Config,
    pub paypal: PayPalConfig,
    pub email: EmailConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug)]
pub struct P24Config {
    pub merchant_id: u32,
    pub pos_id: u32,
    pub api_key: Option<SecretString>,
    pub crc: Option<SecretString>,
    pub test_mode: bool,
}

impl P24Config {
    /// Tryb "live" wymaga prawdziwego klucza API i klucza CRC.
    pub fn is_live(&self) -> bool {
        self.api_key.is_some() && self.crc.is_some()
    }

    pub fn api_url(&self) -> &'static str {
        if self.test_mode {
            "https://sandbox.przelewy24.pl/api/v1"
        } else {
            "https://secure.przelewy24.pl/api/v1"
        }
    }

    pub fn gateway_url(&self) -> &'static str {
        if self.test_mode {
            "https://sandbox.przelewy24.pl"
        } else {
            "https://secure.przelewy24.pl"
        }
    }

    pub fn crc_secret(&self) -> &str {
        self.crc
            .as_ref()
            .map_or(P24_SANDBOX_CRC, |crc| crc.expose_secret())
    }
}

#[derive(Debug)]
pub struct PayPalConfig {
    /// Publiczny identyfikator klienta (może trafić do przeglądarki).
    pub client_id: String,
    pub client_secret: Option<SecretString>,
    pub api_url: String,
    pub web_url: String,
}

impl PayPalConfig {
    /// Czy identyfikator klienta wygląda na prawdziwy - wtedy renderujemy przyciski SDK.
    pub fn has_real_client_id(&self) -> bool {
        !self.client_id.is_empty()
            && self.client_id != PAYPAL_DEMO_CLIENT_ID
            && self.client_id.len() > PAYPAL_MIN_CLIENT_ID_LEN
    }

    /// Bez sekretu klienta serwer odpowiada danymi demonstracyjnymi.
    pub fn is_live(&self) -> bool {
        self.client_secret.is_some()
    }
}

#[derive(Debug)]
pub struct EmailConfig {
    pub resend_api_key: Option<SecretString>,
    pub from: String,
}

/// Parametry symulowanych bramek płatniczych.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub card_delay: Duration,
    pub blik_delay: Duration,
    pub blik_success_rate: f64,
    pub blik_code_ttl: Duration,
    pub p24_register_delay: Duration,
    pub p24_redirect_delay: Duration,
    pub p24_success_rate: f64,
    pub paypal_delay: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            card_delay: Duration::from_millis(3000),
            blik_delay: Duration::from_millis(3000),
            blik_success_rate: 0.8,
            blik_code_ttl: Duration::from_secs(120),
            p24_register_delay: Duration::from_millis(1500),
            p24_redirect_delay: Duration::from_millis(2000),
            p24_success_rate: 0.8,
            paypal_delay: Duration::from_millis(2000),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Buduje konfigurację z dowolnego źródła klucz -> wartość.
    /// Puste wartości traktujemy tak samo jak brak zmiennej.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = parse_or(&get, "APP_HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?;
        let port = parse_or(&get, "APP_PORT", 3000u16)?;

        let base_url_raw = get("APP_BASE_URL").unwrap_or_else(|| "http://localhost:3000".into());
        let base_url = Url::parse(&base_url_raw)
            .map_err(|e| ConfigError::InvalidValue("APP_BASE_URL".into(), e.to_string()))?;

        let p24 = P24Config {
            merchant_id: parse_or(&get, "P24_MERCHANT_ID", P24_SANDBOX_ID)?,
            pos_id: parse_or(&get, "P24_POS_ID", P24_SANDBOX_ID)?,
            api_key: get("P24_API_KEY")
                .filter(|v| v != P24_SANDBOX_API_KEY)
                .map(SecretString::from),
            crc: get("P24_CRC")
                .filter(|v| v != P24_SANDBOX_CRC)
                .map(SecretString::from),
            test_mode: parse_or(&get, "P24_TEST_MODE", true)?,
        };

        let paypal = PayPalConfig {
            client_id: get("PAYPAL_CLIENT_ID").unwrap_or_else(|| PAYPAL_DEMO_CLIENT_ID.into()),
            client_secret: get("PAYPAL_CLIENT_SECRET")
                .filter(|v| v != PAYPAL_DEMO_SECRET)
                .map(SecretString::from),
            api_url: get("PAYPAL_API_URL")
                .unwrap_or_else(|| "https://api-m.sandbox.paypal.com".into()),
            web_url: get("PAYPAL_WEB_URL")
                .unwrap_or_else(|| "https://www.sandbox.paypal.com".into()),
        };

        let email = EmailConfig {
            resend_api_key: get("RESEND_API_KEY").map(SecretString::from),
            from: get("ORDER_EMAIL_FROM")
                .unwrap_or_else(|| "MetaVerse Hub <orders@metaversehub.dev>".into()),
        };

        let defaults = SimulationConfig::default();
        let simulation = SimulationConfig {
            card_delay: millis_or(&get, "CARD_DELAY_MS", defaults.card_delay)?,
            blik_delay: millis_or(&get, "BLIK_DELAY_MS", defaults.blik_delay)?,
            blik_success_rate: rate_or(&get, "BLIK_SUCCESS_RATE", defaults.blik_success_rate)?,
            blik_code_ttl: Duration::from_secs(parse_or(
                &get,
                "BLIK_CODE_TTL_SECS",
                defaults.blik_code_ttl.as_secs(),
            )?),
            p24_register_delay: millis_or(&get, "P24_REGISTER_DELAY_MS", defaults.p24_register_delay)?,
            p24_redirect_delay: millis_or(&get, "P24_REDIRECT_DELAY_MS", defaults.p24_redirect_delay)?,
            p24_success_rate: rate_or(&get, "P24_SUCCESS_RATE", defaults.p24_success_rate)?,
            paypal_delay: millis_or(&get, "PAYPAL_DELAY_MS", defaults.paypal_delay)?,
        };

        Ok(Self {
            host,
            port,
            base_url,
            currency: get("SHOP_CURRENCY").unwrap_or_else(|| "USD".into()),
            p24,
            paypal,
            email,
            simulation,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Buduje absolutny adres w obrębie aplikacji, np. adres powrotu z bramki.
    pub fn absolute_url(&self, path: &str) -> String {
        self.base_url
            .join(path)
            .map(String::from)
            .unwrap_or_else(|_| format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path))
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

fn millis_or<G>(get: &G, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let ms = parse_or(get, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(ms))
}

fn rate_or<G>(get: &G, key: &str, default: f64) -> Result<f64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let rate = parse_or(get, key, default)?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("{} nie mieści się w przedziale 0..=1", rate),
        ))
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    let mut config = AppConfig::from_lookup(|_| None).expect("domyślna konfiguracja");
    config.simulation = SimulationConfig {
        card_delay: Duration::ZERO,
        blik_delay: Duration::ZERO,
        blik_success_rate: 1.0,
        blik_code_ttl: Duration::from_secs(120),
        p24_register_delay: Duration::ZERO,
        p24_redirect_delay: Duration::ZERO,
        p24_success_rate: 1.0,
        paypal_delay: Duration::ZERO,
    };
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_are_demo_mode() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.currency, "USD");
        assert!(!config.p24.is_live());
        assert!(!config.paypal.is_live());
        assert!(!config.paypal.has_real_client_id());
        assert_eq!(config.p24.merchant_id, 64195);
        assert_eq!(config.simulation.blik_code_ttl, Duration::from_secs(120));
    }

    #[test]
    fn test_sandbox_placeholders_do_not_enable_live_mode() {
        let config = config_from(&[
            ("P24_API_KEY", "sandbox_api_key"),
            ("P24_CRC", "sandbox_crc"),
            ("PAYPAL_CLIENT_SECRET", "demo_secret"),
        ])
        .unwrap();
        assert!(!config.p24.is_live());
        assert!(!config.paypal.is_live());
    }

    #[test]
    fn test_real_credentials_enable_live_mode() {
        let config = config_from(&[
            ("P24_API_KEY", "abc123"),
            ("P24_CRC", "crc456"),
            ("P24_TEST_MODE", "false"),
            ("PAYPAL_CLIENT_SECRET", "shh"),
            ("PAYPAL_CLIENT_ID", "AeA1QIZXiflr1_-r0U2UbWTziOWX1GRQer5jkUq4ZfWT5qwb6qQRPq7jDtv57TL4POEEezGLdutcxnkJ"),
        ])
        .unwrap();
        assert!(config.p24.is_live());
        assert_eq!(config.p24.api_url(), "https://secure.przelewy24.pl/api/v1");
        assert!(config.paypal.is_live());
        assert!(config.paypal.has_real_client_id());
    }

    #[test]
    fn test_short_client_id_is_not_plausible() {
        let config = config_from(&[("PAYPAL_CLIENT_ID", "short-id")]).unwrap();
        assert!(!config.paypal.has_real_client_id());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            config_from(&[("APP_PORT", "abc")]),
            Err(ConfigError::InvalidValue(key, _)) if key == "APP_PORT"
        ));
        assert!(matches!(
            config_from(&[("BLIK_SUCCESS_RATE", "1.5")]),
            Err(ConfigError::InvalidValue(key, _)) if key == "BLIK_SUCCESS_RATE"
        ));
    }

    #[test]
    fn test_absolute_url() {
        let config = config_from(&[("APP_BASE_URL", "https://shop.example.com")]).unwrap();
        assert_eq!(
            config.absolute_url("/shop/payment-success"),
            "https://shop.example.com/shop/payment-success"
        );
    }
}
