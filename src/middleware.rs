// src/middleware.rs

use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use uuid::Uuid;

use crate::extractor::{guest_id_from_headers, GuestSessionId, GUEST_SESSION_COOKIE};

/// Każdy odwiedzający dostaje ciasteczko sesji gościa przy pierwszym żądaniu.
pub async fn ensure_guest_session(mut req: Request, next: Next) -> Response {
    let existing = guest_id_from_headers(req.headers());
    let id = existing.unwrap_or_else(Uuid::new_v4);
    req.extensions_mut().insert(GuestSessionId(id));

    let response = next.run(req).await;
    if existing.is_some() {
        return response;
    }

    tracing::debug!("Ustawiam ciasteczko sesji gościa {}", id);
    let cookie = Cookie::build((GUEST_SESSION_COOKIE, id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::hours(2))
        .build();
    (CookieJar::new().add(cookie), response).into_response()
}
