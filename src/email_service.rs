// src/email_service.rs

use maud::{html, Markup, PreEscaped};
use resend_rs::{types::CreateEmailBaseOptions, Resend};
use secrecy::ExposeSecret;

use crate::{cart::format_price, config::EmailConfig, errors::AppError, models::Order};

/// Wysyłka potwierdzeń zamówień przez Resend.
pub struct EmailService {
    resend: Resend,
    from: String,
}

impl EmailService {
    /// `None`, gdy nie skonfigurowano klucza Resend - wtedy maili nie wysyłamy.
    pub fn from_config(config: &EmailConfig) -> Option<Self> {
        let api_key = config.resend_api_key.as_ref()?;
        Some(Self {
            resend: Resend::new(api_key.expose_secret()),
            from: config.from.clone(),
        })
    }

    pub async fn send_order_confirmation(&self, order: &Order) -> Result<(), AppError> {
        let recipient_email = order.contact.email.clone();
        let subject = format!("Order confirmation #{}", order.order_number);
        let email_html_content = render_order_confirmation_email_html(order);

        let params = CreateEmailBaseOptions::new(&self.from, vec![recipient_email.clone()], &subject)
            .with_html(&email_html_content.into_string());

        tracing::info!(
            "Wysyłanie e-maila z potwierdzeniem zamówienia {} do: {}",
            order.order_number,
            recipient_email
        );

        self.resend.emails.send(params).await.map_err(|e| {
            tracing::error!("Błąd API Resend: {:?}", e);
            AppError::InternalServerError("Błąd podczas wysyłania e-maila.".to_string())
        })?;

        tracing::info!("E-mail z potwierdzeniem zamówienia został wysłany pomyślnie.");
        Ok(())
    }
}

impl std::fmt::Debug for EmailService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailService")
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

pub fn render_order_confirmation_email_html(order: &Order) -> Markup {
    let summary = &order.summary;
    let contact = &order.contact;

    html! {
        (PreEscaped("<!DOCTYPE html>"))
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { "Order confirmation" }
                style {
                    (PreEscaped(r#"
                        body { font-family: Arial, sans-serif; color: #e2e8f0; background: #0f172a; }
                        .container { max-width: 600px; margin: auto; padding: 20px; border: 1px solid #164e63; }
                        .header { text-align: center; }
                        .header h1 { color: #22d3ee; }
                        .item { border-bottom: 1px solid #1e293b; padding: 10px 0; }
                        .row { display: flex; justify-content: space-between; }
                        .total { text-align: right; font-weight: bold; font-size: 1.2em; margin-top: 20px; }
                    "#))
                }
            }
            body {
                div class="container" {
                    div class="header" {
                        h1 { "MetaVerse Hub" }
                        h2 { "Order Confirmed!" }
                    }
                    h3 { "Hi, " (contact.first_name) "!" }
                    p { "Thank you for your purchase. Your order number is " strong { (order.order_number) } "." }

                    @for item in &order.items {
                        div class="item" {
                            strong { (item.name) }
                            br;
                            span { "Size: " (item.selected_size) " | Color: " (item.selected_color) " | Qty: " (item.quantity) }
                            br;
                            span { (format_price(item.line_total())) }
                        }
                    }

                    div class="row" { span { "Subtotal" } span { (format_price(summary.subtotal)) } }
                    div class="row" {
                        span { "Shipping" }
                        span { @if summary.shipping == 0 { "FREE" } @else { (format_price(summary.shipping)) } }
                    }
                    div class="row" { span { "Tax" } span { (format_price(summary.tax)) } }
                    p class="total" { "Total: " (format_price(summary.total)) }

                    p { "Paid with " (order.payment.method) "." }

                    div {
                        h4 { "Shipping address" }
                        p {
                            (contact.first_name) " " (contact.last_name) br;
                            (contact.address) br;
                            (contact.zip_code) " " (contact.city) br;
                            (contact.country)
                        }
                    }
                    p { "The MetaVerse Hub team" }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmailConfig;
    use crate::models::{sample_form, CartSummary, PaymentMethod};
    use crate::payments::PaymentReceipt;
    use chrono::Utc;

    #[test]
    fn test_email_contains_order_number_and_total() {
        let order = Order {
            order_number: "MV1700000000000".into(),
            items: Vec::new(),
            summary: CartSummary {
                total_items: 2,
                subtotal: 5998,
                shipping: 0,
                tax: 480,
                total: 6478,
            },
            contact: sample_form(PaymentMethod::P24).contact(),
            payment: PaymentReceipt {
                method: PaymentMethod::P24,
                reference: "MV_1700000000000_x".into(),
                capture_id: None,
                amount: 6478,
                currency: "PLN".into(),
                payer: None,
                status: "COMPLETED".into(),
            },
            placed_at: Utc::now(),
        };
        let html = render_order_confirmation_email_html(&order).into_string();
        assert!(html.contains("MV1700000000000"));
        assert!(html.contains("$64.78"));
        assert!(html.contains("FREE"));
        assert!(html.contains("Przelewy24"));
    }

    #[test]
    fn test_no_api_key_means_no_mailer() {
        let config = EmailConfig {
            resend_api_key: None,
            from: "shop@example.com".into(),
        };
        assert!(EmailService::from_config(&config).is_none());
    }
}
