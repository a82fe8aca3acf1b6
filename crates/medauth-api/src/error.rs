//! HTTP error mapping
//!
//! Every rejection produced by the middleware in this crate, and every
//! [`AuthError`] a handler returns, renders as a JSON [`ApiError`] body.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use medauth_core::AuthError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// API error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Errors that end a request
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Missing or malformed Authorization header")]
    MissingCredentials,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("CSRF token validation failed")]
    CsrfValidationFailed,

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(err) => auth_status(err),
            AppError::MissingCredentials => StatusCode::UNAUTHORIZED,
            AppError::Forbidden | AppError::CsrfValidationFailed => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn body(&self) -> ApiError {
        match self {
            AppError::Auth(AuthError::Infrastructure(_)) => {
                ApiError::new("INTERNAL_ERROR", "Internal server error")
            }
            AppError::Auth(AuthError::AccountLocked {
                locked_until: Some(until),
            }) => ApiError::new("ACCOUNT_LOCKED", self.to_string())
                .with_details(format!("locked until {}", until.to_rfc3339())),
            AppError::Auth(err) => ApiError::new(auth_code(err), err.to_string()),
            AppError::MissingCredentials => ApiError::new("UNAUTHORIZED", self.to_string()),
            AppError::Forbidden => ApiError::new("FORBIDDEN", self.to_string()),
            AppError::CsrfValidationFailed => ApiError::new("CSRF_FAILED", self.to_string()),
            AppError::RateLimited { retry_after_secs } => {
                ApiError::new("RATE_LIMITED", self.to_string())
                    .with_details(format!("retry after {retry_after_secs}s"))
            }
        }
    }
}

fn auth_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidCredentials
        | AuthError::TokenInvalid
        | AuthError::TokenExpired
        | AuthError::TokenRevoked
        | AuthError::TokenAlreadyUsed => StatusCode::UNAUTHORIZED,
        AuthError::AccountLocked { .. } => StatusCode::LOCKED,
        AuthError::AccountInactive => StatusCode::FORBIDDEN,
        AuthError::Validation(_) => StatusCode::BAD_REQUEST,
        AuthError::Conflict(_) => StatusCode::CONFLICT,
        AuthError::NotFound(_) => StatusCode::NOT_FOUND,
        AuthError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn auth_code(err: &AuthError) -> &'static str {
    match err {
        AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
        AuthError::AccountLocked { .. } => "ACCOUNT_LOCKED",
        AuthError::AccountInactive => "ACCOUNT_INACTIVE",
        AuthError::TokenInvalid => "TOKEN_INVALID",
        AuthError::TokenExpired => "TOKEN_EXPIRED",
        AuthError::TokenRevoked => "TOKEN_REVOKED",
        AuthError::TokenAlreadyUsed => "TOKEN_ALREADY_USED",
        AuthError::Validation(_) => "BAD_REQUEST",
        AuthError::Conflict(_) => "CONFLICT",
        AuthError::NotFound(_) => "NOT_FOUND",
        AuthError::Infrastructure(_) => "INTERNAL_ERROR",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Auth(AuthError::Infrastructure(detail)) = &self {
            error!(error = %detail, "Request failed on infrastructure error");
        }

        let status = self.status_code();
        let mut response = (status, Json(self.body())).into_response();

        if let AppError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
