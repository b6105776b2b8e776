use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

use maud::Markup;
use serde_json::json;
use thiserror::Error;
use validator::ValidationErrors;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Nie znaleziono zasobu")]
    NotFound,

    #[error("Błędy walidacji")]
    ValidationError(#[from] ValidationErrors),

    #[error("Nieprawidłowe dane wejściowe: {0}")]
    UnprocessableEntity(String),

    #[error("Niepoprawne żądanie: {0}")]
    BadRequest(String),

    #[error("Wystąpił konflikt: {0}")]
    Conflict(String),

    #[error("Błąd operatora płatności: {0}")]
    PaymentProvider(String),

    #[error("Błąd komunikacji HTTP: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Wewnętrzny błąd serwera: {0}")]
    InternalServerError(String),

    #[error("Błąd walidacji formularza")]
    UnprocessableEntityWithHtml(Markup),
}

impl AppError {
    /// Zamienia błędy walidatora na czytelne komunikaty, po jednym na pole.
    pub fn validation_messages(errors: &ValidationErrors) -> Vec<String> {
        let mut messages = Vec::new();
        for (field, field_errors) in errors.field_errors() {
            for error in field_errors {
                let msg = error.message.as_ref().map_or_else(
                    || format!("Field '{}' is invalid", field),
                    |m| m.to_string(),
                );
                messages.push(msg);
            }
        }
        messages.sort();
        messages
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Resource not found".to_string()),
            AppError::ValidationError(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                AppError::validation_messages(&errors).join("; "),
            ),
            AppError::UnprocessableEntity(message) => (StatusCode::UNPROCESSABLE_ENTITY, message),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::Conflict(message) => (StatusCode::CONFLICT, message),
            AppError::PaymentProvider(message) => {
                tracing::error!("Błąd operatora płatności: {}", message);
                (StatusCode::BAD_GATEWAY, message)
            }
            AppError::HttpClient(err) => {
                tracing::error!("Błąd klienta HTTP: {:?}", err);
                (
                    StatusCode::BAD_GATEWAY,
                    "Payment provider is unavailable, please try again".to_string(),
                )
            }
            AppError::InternalServerError(message) => {
                tracing::error!("Wewnętrzny błąd serwera: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::UnprocessableEntityWithHtml(markup) => {
                return (StatusCode::UNPROCESSABLE_ENTITY, markup).into_response();
            }
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}
