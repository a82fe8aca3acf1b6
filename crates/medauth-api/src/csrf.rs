//! CSRF double-submit cookie guard
//!
//! Safe methods (GET, HEAD, OPTIONS, TRACE) pass through and receive a fresh
//! random `csrf_token` cookie when the request carried none. Every other
//! method must echo the cookie value in the `X-CSRF-Token` header; the two are
//! compared in constant time and a mismatch is rejected with 403 before the
//! handler runs.
//!
//! The guard keeps no server-side state and does not touch the session
//! stores.

use crate::context::extract_ip_address;
use crate::error::AppError;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use medauth_auth::audit::{audit_log, AuditEvent};
use rand::RngCore;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct CsrfConfig {
    pub cookie_name: String,
    pub header_name: String,
    /// Adds the `Secure` attribute; disable only for plain-HTTP local development
    pub secure_cookie: bool,
    /// Path prefixes that skip verification (e.g. machine-to-machine webhooks)
    pub exempt_paths: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: "csrf_token".to_string(),
            header_name: "x-csrf-token".to_string(),
            secure_cookie: true,
            exempt_paths: Vec::new(),
        }
    }
}

impl CsrfConfig {
    pub fn with_exempt_path(mut self, prefix: impl Into<String>) -> Self {
        self.exempt_paths.push(prefix.into());
        self
    }

    fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|prefix| path.starts_with(prefix))
    }

    fn set_cookie_value(&self, token: &str) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Strict",
            self.cookie_name, token
        );
        if self.secure_cookie {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// 32 random bytes, URL-safe base64 without padding
pub fn generate_csrf_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Constant-time equality; absent or empty values never match
pub fn tokens_match(cookie: Option<&str>, header: Option<&str>) -> bool {
    match (cookie, header) {
        (Some(cookie), Some(header)) if !cookie.is_empty() && !header.is_empty() => {
            cookie.as_bytes().ct_eq(header.as_bytes()).into()
        }
        _ => false,
    }
}

/// Value of cookie `name` from the `Cookie` request headers
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// Double-submit CSRF middleware.
///
/// ```ignore
/// let app = Router::new()
///     .route("/api/v1/users/me", post(update_profile))
///     .layer(middleware::from_fn_with_state(
///         Arc::new(CsrfConfig::default()),
///         csrf_middleware,
///     ));
/// ```
pub async fn csrf_middleware(
    State(config): State<Arc<CsrfConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let cookie = cookie_value(request.headers(), &config.cookie_name);

    if is_safe_method(request.method()) {
        let mut response = next.run(request).await;
        if cookie.is_none() {
            let token = generate_csrf_token();
            if let Ok(value) = HeaderValue::from_str(&config.set_cookie_value(&token)) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }
        return response;
    }

    if config.is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let supplied = request
        .headers()
        .get(config.header_name.as_str())
        .and_then(|v| v.to_str().ok());

    if !tokens_match(cookie.as_deref(), supplied) {
        let ip_address = extract_ip_address(request.headers());
        warn!(
            method = %request.method(),
            path = %request.uri().path(),
            ip = ?ip_address,
            "CSRF token mismatch"
        );
        audit_log(&AuditEvent::CsrfRejected {
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            ip_address,
        });
        return AppError::CsrfValidationFailed.into_response();
    }

    next.run(request).await
}
