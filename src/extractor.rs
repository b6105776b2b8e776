// src/extractor.rs

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap, HeaderName, HeaderValue},
};
use axum_extra::{
    extract::cookie::CookieJar,
    headers::{self, Header, HeaderMapExt},
};
use once_cell::sync::Lazy;
use std::sync::Arc;
use uuid::Uuid;

use crate::{errors::AppError, session::GuestSession, state::AppState};

pub const GUEST_SESSION_COOKIE: &str = "guest_session_id";

/// Nagłówek `X-Guest-Session-Id` - alternatywa dla ciasteczka (np. dla klientów API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XGuestSessionId(pub Uuid);

static X_GUEST_SESSION_ID: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-guest-session-id"));

impl Header for XGuestSessionId {
    fn name() -> &'static HeaderName {
        &X_GUEST_SESSION_ID
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        Self: Sized,
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let uuid = Uuid::parse_str(value.to_str().map_err(|_| headers::Error::invalid())?)
            .map_err(|_| headers::Error::invalid())?;
        Ok(XGuestSessionId(uuid))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        // Uuid w formie tekstowej to zawsze poprawna wartość nagłówka
        if let Ok(value) = HeaderValue::from_str(&self.0.to_string()) {
            values.extend(std::iter::once(value));
        }
    }
}

/// Identyfikator sesji gościa: najpierw nagłówek, potem ciasteczko.
pub fn guest_id_from_headers(headers: &HeaderMap) -> Option<Uuid> {
    if let Some(XGuestSessionId(id)) = headers.typed_get::<XGuestSessionId>() {
        return Some(id);
    }
    CookieJar::from_headers(headers)
        .get(GUEST_SESSION_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
}

/// Identyfikator ustalony przez middleware `ensure_guest_session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestSessionId(pub Uuid);

impl<S> FromRequestParts<S> for GuestSession
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .extensions
            .get::<GuestSessionId>()
            .map(|GuestSessionId(id)| *id)
            .or_else(|| guest_id_from_headers(&parts.headers))
            .ok_or_else(|| {
                tracing::warn!("Żądanie bez identyfikatora sesji gościa");
                AppError::BadRequest("Missing guest session".to_string())
            })?;

        let app_state = Arc::<AppState>::from_ref(state);
        Ok(app_state.sessions.get_or_create(id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;

    #[test]
    fn test_header_wins_over_cookie() {
        let from_header = Uuid::new_v4();
        let from_cookie = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.typed_insert(XGuestSessionId(from_header));
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{}={}", GUEST_SESSION_COOKIE, from_cookie)).unwrap(),
        );
        assert_eq!(guest_id_from_headers(&headers), Some(from_header));

        headers.remove("x-guest-session-id");
        assert_eq!(guest_id_from_headers(&headers), Some(from_cookie));
    }

    #[test]
    fn test_invalid_ids_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("x-guest-session-id", HeaderValue::from_static("not-a-uuid"));
        headers.insert(COOKIE, HeaderValue::from_static("guest_session_id=nope"));
        assert_eq!(guest_id_from_headers(&headers), None);
    }
}
