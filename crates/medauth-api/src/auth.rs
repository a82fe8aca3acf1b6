/// Bearer token authentication for protected routes
///
/// Extracts `Authorization: Bearer <token>`, validates it through
/// [`TokenIssuer::validate_access_token`] (signature, expiry, type and cache
/// liveness) and adds [`AuthenticatedUser`] to request extensions.
use crate::context::{extract_ip_address, extract_user_agent};
use crate::error::AppError;
use axum::{
    body::Body,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use medauth_auth::audit::{audit_log, AuditEvent};
use medauth_auth::{Claims, TokenIssuer};
use medauth_core::{AuthResult, UserRole};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Caller identity taken from a live access token.
///
/// Handlers read it with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: Option<UserRole>,
    /// Access token ID; identifies the session for logout
    pub jti: String,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Some(UserRole::Admin)
    }
}

impl TryFrom<Claims> for AuthenticatedUser {
    type Error = medauth_core::AuthError;

    fn try_from(claims: Claims) -> AuthResult<Self> {
        Ok(Self {
            user_id: claims.user_id()?,
            role: claims.role(),
            email: claims.email,
            jti: claims.jti,
        })
    }
}

/// Raw token from an `Authorization: Bearer` header
pub fn bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Middleware that requires a valid, live access token
pub async fn require_auth(
    State(issuer): State<Arc<TokenIssuer>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&request).ok_or(AppError::MissingCredentials)?;

    let user = match issuer
        .validate_access_token(token)
        .await
        .and_then(AuthenticatedUser::try_from)
    {
        Ok(user) => user,
        Err(e) => {
            if e.is_token_error() {
                audit_log(&AuditEvent::InvalidToken {
                    ip_address: extract_ip_address(request.headers()),
                    user_agent: extract_user_agent(request.headers()),
                    reason: e.to_string(),
                });
            }
            return Err(e.into());
        }
    };

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Middleware for admin-only routes; layer it inside [`require_auth`]
pub async fn require_admin(request: Request<Body>, next: Next) -> Result<Response, AppError> {
    let is_admin = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or(AppError::MissingCredentials)?
        .is_admin();

    if !is_admin {
        return Err(AppError::Forbidden);
    }
    Ok(next.run(request).await)
}
