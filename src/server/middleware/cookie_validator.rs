//! Rejects any request with no `Cookie` header (or a non-ASCII one) before it reaches a
//! handler, so session bootstrap never runs against obviously-bad input.

use axum::body::Body;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AdapterError;

/// The validated, as-sent cookie header, stashed in request extensions for handlers to pick up.
#[derive(Clone)]
pub struct CookieHeader(pub String);

pub async fn require_cookie_header(mut req: Request<Body>, next: Next<Body>) -> Response {
    let raw = req
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match raw {
        Some(cookie) if cookie.is_ascii() && !cookie.trim().is_empty() => {
            req.extensions_mut().insert(CookieHeader(cookie));
            next.run(req).await
        }
        _ => AdapterError::InputError("missing or invalid Cookie header".to_string()).into_response(),
    }
}
