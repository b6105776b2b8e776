// src/response.rs

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use lol_html::{element, html_content::ContentType, HtmlRewriter, Settings};
use maud::Markup;
use tokio::fs;

use crate::errors::AppError;

const SHELL_PATH: &str = "static/index.html";

pub fn is_htmx_request(headers: &HeaderMap) -> bool {
    headers.contains_key("HX-Request")
}

/// Wstawia treść do `#content` w szablonie strony.
/// Usuwa atrybuty HTMX inicjujące ładowanie, żeby HTMX nie nadpisał
/// treści wyrenderowanej po stronie serwera.
pub fn render_into_shell(shell: &[u8], content_markup: Markup) -> Result<Vec<u8>, AppError> {
    let content_string = content_markup.into_string();
    let mut response_body = Vec::new();

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![element!("#content", |el| {
                el.set_inner_content(&content_string, ContentType::Html);
                el.remove_attribute("hx-trigger");
                el.remove_attribute("hx-get");
                Ok(())
            })],
            ..Settings::default()
        },
        |c: &[u8]| response_body.extend_from_slice(c),
    );

    rewriter
        .write(shell)
        .and_then(|_| rewriter.end())
        .map_err(|e| {
            tracing::error!("Błąd przetwarzania szablonu strony: {}", e);
            AppError::InternalServerError("Błąd renderowania strony".to_string())
        })?;
    Ok(response_body)
}

async fn serve_full_page(content_markup: Markup) -> Result<Response, AppError> {
    let shell_content = fs::read(SHELL_PATH).await.map_err(|e| {
        tracing::error!("Nie można wczytać pliku szablonu {}: {}", SHELL_PATH, e);
        AppError::InternalServerError("Błąd wczytywania szablonu strony".to_string())
    })?;

    let body = render_into_shell(&shell_content, content_markup)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        Body::from(body),
    )
        .into_response())
}

/// Fragment dla żądań HTMX, pełna strona dla odświeżenia (F5) i wejść z zewnątrz.
pub async fn build_response(headers: &HeaderMap, page_content: Markup) -> Result<Response, AppError> {
    if is_htmx_request(headers) {
        Ok(page_content.into_response())
    } else {
        serve_full_page(page_content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maud::html;

    #[test]
    fn test_content_is_injected_and_htmx_loader_removed() {
        let shell = br#"<html><body><main id="content" hx-get="/htmx/home" hx-trigger="load">old</main></body></html>"#;
        let body = render_into_shell(shell, html! { h1 { "MetaVerse Store" } }).unwrap();
        let page = String::from_utf8(body).unwrap();
        assert!(page.contains(r#"<main id="content"><h1>MetaVerse Store</h1></main>"#));
        assert!(!page.contains("hx-trigger"));
        assert!(!page.contains("old"));
    }

    #[test]
    fn test_htmx_header_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_htmx_request(&headers));
        headers.insert("HX-Request", "true".parse().unwrap());
        assert!(is_htmx_request(&headers));
    }
}
