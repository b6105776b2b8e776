// src/models.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};
use validator::Validate;

use crate::errors::AppError;
use crate::payments::p24::P24Channel;
use crate::payments::{CardDetails, PaymentReceipt};

/// Pozycja statycznego katalogu. Tworzona raz, nigdy nie modyfikowana.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: u32,
    pub name: String,
    /// Cena w centach
    pub price: i64,
    pub original_price: Option<i64>,
    pub description: String,
    pub image: String,
    pub sizes: Vec<String>,
    pub colors: Vec<String>,
    pub features: Vec<String>,
    pub in_stock: bool,
    pub rating: f32,
    pub reviews: u32,
}

impl Product {
    pub fn default_size(&self) -> Option<&str> {
        self.sizes.first().map(String::as_str)
    }

    pub fn default_color(&self) -> Option<&str> {
        self.colors.first().map(String::as_str)
    }

    /// Procent rabatu względem ceny pierwotnej (tylko do wyświetlenia).
    pub fn discount_percent(&self) -> Option<i64> {
        match self.original_price {
            Some(original) if original > self.price && original > 0 => {
                Some(((original - self.price) * 100 + original / 2) / original)
            }
            _ => None,
        }
    }
}

/// Pojedyncza linia koszyka: produkt + wybrany wariant + ilość.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartItem {
    pub line_id: String,
    pub product_id: u32,
    pub name: String,
    pub price: i64,
    pub image: String,
    pub selected_size: String,
    pub selected_color: String,
    pub quantity: u32,
    pub added_at: DateTime<Utc>,
}

impl CartItem {
    pub fn line_total(&self) -> i64 {
        self.price * i64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CartSummary {
    pub total_items: u32,
    pub subtotal: i64,
    pub shipping: i64,
    pub tax: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartDetailsResponse {
    pub items: Vec<CartItem>,
    pub summary: CartSummary,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumIter)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    #[strum(to_string = "Credit Card")]
    Card,
    #[strum(to_string = "BLIK")]
    Blik,
    #[strum(to_string = "Przelewy24")]
    P24,
    #[strum(to_string = "PayPal")]
    PayPal,
}

impl PaymentMethod {
    /// Wartość używana w formularzach i w JSON-ie.
    pub fn as_param(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Blik => "blik",
            PaymentMethod::P24 => "p24",
            PaymentMethod::PayPal => "paypal",
        }
    }
}

// --- STRUKTURY PAYLOAD DLA HANDLERÓW ---

#[derive(Debug, Clone, Deserialize)]
pub struct AddToCartPayload {
    pub product_id: u32,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub quantity: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateQuantityPayload {
    pub quantity: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlikCodePayload {
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct P24ConfirmPayload {
    #[serde(default)]
    pub channel: Option<P24Channel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayPalApprovePayload {
    #[serde(alias = "orderID", alias = "orderId")]
    pub order_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayPalErrorPayload {
    #[serde(default)]
    pub message: String,
}

/// Wejście proxy rejestracji P24. Pola opcjonalne, bo brak ma dać 400
/// "Missing required fields", a nie błąd deserializacji.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct P24RegisterPayload {
    pub session_id: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub description: Option<String>,
    pub email: Option<String>,
    pub channel: Option<P24Channel>,
}

fn default_country() -> String {
    "United States".to_string()
}

/// Formularz zamówienia. Pola karty są wymagane tylko dla płatności kartą.
#[derive(Clone, Deserialize, Validate)]
pub struct CheckoutFormPayload {
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,

    #[validate(length(min = 1, max = 100, message = "First name is required"))]
    pub first_name: String,

    #[validate(length(min = 1, max = 100, message = "Last name is required"))]
    pub last_name: String,

    #[validate(length(min = 1, max = 255, message = "Address is required"))]
    pub address: String,

    #[validate(length(min = 1, max = 100, message = "City is required"))]
    pub city: String,

    #[validate(length(min = 1, max = 20, message = "ZIP code is required"))]
    pub zip_code: String,

    #[serde(default = "default_country")]
    #[validate(length(min = 1, max = 100, message = "Country is required"))]
    pub country: String,

    pub payment_method: PaymentMethod,

    #[serde(default)]
    pub card_number: Option<String>,
    #[serde(default)]
    pub expiry_date: Option<String>,
    #[serde(default)]
    pub cvv: Option<String>,
    #[serde(default)]
    pub card_name: Option<String>,
}

// Dane karty nigdy nie trafiają do logów
impl fmt::Debug for CheckoutFormPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hidden = |value: &Option<String>| value.as_ref().map(|_| "***");
        f.debug_struct("CheckoutFormPayload")
            .field("email", &self.email)
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("address", &self.address)
            .field("city", &self.city)
            .field("zip_code", &self.zip_code)
            .field("country", &self.country)
            .field("payment_method", &self.payment_method)
            .field("card_number", &hidden(&self.card_number))
            .field("expiry_date", &hidden(&self.expiry_date))
            .field("cvv", &hidden(&self.cvv))
            .field("card_name", &hidden(&self.card_name))
            .finish()
    }
}

fn non_empty(opt_s: &Option<String>) -> Option<String> {
    opt_s
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl CheckoutFormPayload {
    /// Pełna walidacja: pola wspólne + pola karty, jeśli wybrano kartę.
    pub fn validate_all(&self) -> Result<(), Vec<String>> {
        let mut messages = match self.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => AppError::validation_messages(&errors),
        };
        if self.payment_method == PaymentMethod::Card {
            if let Err(card_errors) = self.card_details() {
                messages.extend(card_errors);
            }
        }
        if messages.is_empty() {
            Ok(())
        } else {
            Err(messages)
        }
    }

    pub fn card_details(&self) -> Result<CardDetails, Vec<String>> {
        let mut missing = Vec::new();
        let number = non_empty(&self.card_number);
        let expiry = non_empty(&self.expiry_date);
        let cvv = non_empty(&self.cvv);
        let name = non_empty(&self.card_name);
        if number.is_none() {
            missing.push("Card number is required".to_string());
        }
        if expiry.is_none() {
            missing.push("Expiry date is required".to_string());
        }
        if cvv.is_none() {
            missing.push("CVV is required".to_string());
        }
        if name.is_none() {
            missing.push("Name on card is required".to_string());
        }
        match (number, expiry, cvv, name) {
            (Some(number), Some(expiry_date), Some(cvv), Some(card_name)) => Ok(CardDetails {
                number,
                expiry_date,
                cvv,
                card_name,
            }),
            _ => Err(missing),
        }
    }

    /// Kopia formularza bez danych karty (do przechowania w sesji).
    pub fn without_card(self) -> Self {
        Self {
            card_number: None,
            expiry_date: None,
            cvv: None,
            card_name: None,
            ..self
        }
    }

    pub fn contact(&self) -> ContactDetails {
        ContactDetails {
            email: self.email.trim().to_string(),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            address: self.address.trim().to_string(),
            city: self.city.trim().to_string(),
            zip_code: self.zip_code.trim().to_string(),
            country: self.country.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContactDetails {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub city: String,
    pub zip_code: String,
    pub country: String,
}

/// Zamówienie istnieje wyłącznie w pamięci sesji, od chwili udanej płatności.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub order_number: String,
    pub items: Vec<CartItem>,
    pub summary: CartSummary,
    pub contact: ContactDetails,
    pub payment: PaymentReceipt,
    pub placed_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) fn sample_form(method: PaymentMethod) -> CheckoutFormPayload {
    CheckoutFormPayload {
        email: "neo@metaverse.dev".into(),
        first_name: "Thomas".into(),
        last_name: "Anderson".into(),
        address: "101 Matrix Ave".into(),
        city: "Capital City".into(),
        zip_code: "00-001".into(),
        country: default_country(),
        payment_method: method,
        card_number: Some("4242424242424242".into()),
        expiry_date: Some("12/30".into()),
        cvv: Some("123".into()),
        card_name: Some("T Anderson".into()),
    }
}
