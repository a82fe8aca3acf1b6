//! Authentication error taxonomy
//!
//! Every operation exposed to the route layer returns [`AuthResult`]. Credential
//! and account failures are ordinary variants here so callers can match on them;
//! only [`AuthError::Infrastructure`] means a store could not be reached.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by the session, token and account services
#[derive(Error, Debug)]
pub enum AuthError {
    /// Unknown user or wrong password. The two cases are never distinguished.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is locked")]
    AccountLocked { locked_until: Option<DateTime<Utc>> },

    #[error("Account is not active")]
    AccountInactive,

    /// Bad signature, wrong `type` claim or undecodable token
    #[error("Invalid token")]
    TokenInvalid,

    #[error("Token has expired")]
    TokenExpired,

    /// Liveness entry missing from the fast cache, or explicitly blacklisted
    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Token has already been used")]
    TokenAlreadyUsed,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl AuthError {
    /// True for failures caused by the caller rather than by a backing store
    pub fn is_client_error(&self) -> bool {
        !matches!(self, AuthError::Infrastructure(_))
    }

    /// True for every token-related rejection
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            AuthError::TokenInvalid
                | AuthError::TokenExpired
                | AuthError::TokenRevoked
                | AuthError::TokenAlreadyUsed
        )
    }
}

pub type AuthResult<T> = std::result::Result<T, AuthError>;
