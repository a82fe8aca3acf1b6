//! Security audit logging for session and account events
//!
//! Every event is logged at INFO level with the "audit" target, so security
//! tooling can route it separately from application logs. The serialized
//! event is attached as the `event` field for log aggregators.
//!
//! Plaintext tokens and passwords never appear in an event.
//!
//! # Example
//!
//! ```ignore
//! use medauth_auth::audit::{audit_log, AuditEvent};
//!
//! audit_log(&AuditEvent::Logout {
//!     user_id: session.user_id,
//!     session_id: session.id,
//!     ip_address: None,
//! });
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    LoginSuccess {
        user_id: Uuid,
        email: String,
        session_id: Option<Uuid>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    LoginFailure {
        email: String,
        reason: String,
        ip_address: Option<String>,
        failed_attempts: Option<i32>,
        account_locked: bool,
    },

    AccountLocked {
        user_id: Uuid,
        email: String,
        reason: String,
        locked_until: DateTime<Utc>,
        ip_address: Option<String>,
    },

    AccountUnlocked {
        user_id: Uuid,
        email: String,
        unlocked_by: Option<Uuid>,
    },

    Logout {
        user_id: Uuid,
        session_id: Uuid,
        ip_address: Option<String>,
    },

    TokenRefresh {
        user_id: Uuid,
        old_session_id: Uuid,
        new_session_id: Uuid,
        ip_address: Option<String>,
    },

    SessionRevoked {
        user_id: Uuid,
        session_id: Uuid,
        reason: String,
    },

    /// Bulk revocation; `revoked < expected` means a partial failure
    SessionsRevoked {
        user_id: Uuid,
        reason: String,
        revoked: usize,
        expected: usize,
    },

    RegistrationSuccess {
        user_id: Uuid,
        email: String,
        role: String,
        ip_address: Option<String>,
    },

    RegistrationFailure {
        email: String,
        reason: String,
        ip_address: Option<String>,
    },

    PasswordResetRequested {
        email: String,
        user_id: Option<Uuid>,
        ip_address: Option<String>,
    },

    PasswordResetCompleted {
        user_id: Uuid,
        sessions_revoked: usize,
    },

    PasswordChange {
        user_id: Uuid,
        sessions_revoked: usize,
    },

    EmailVerified {
        user_id: Uuid,
        email: String,
    },

    AccountDeleted {
        user_id: Uuid,
        email: String,
        sessions_revoked: usize,
    },

    InvalidToken {
        ip_address: Option<String>,
        user_agent: Option<String>,
        reason: String,
    },

    CsrfRejected {
        method: String,
        path: String,
        ip_address: Option<String>,
    },

    RateLimited {
        path: String,
        key: String,
        max_calls: u32,
        window_secs: u64,
    },
}

impl AuditEvent {
    /// Value of the serialized `event_type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            AuditEvent::LoginSuccess { .. } => "login_success",
            AuditEvent::LoginFailure { .. } => "login_failure",
            AuditEvent::AccountLocked { .. } => "account_locked",
            AuditEvent::AccountUnlocked { .. } => "account_unlocked",
            AuditEvent::Logout { .. } => "logout",
            AuditEvent::TokenRefresh { .. } => "token_refresh",
            AuditEvent::SessionRevoked { .. } => "session_revoked",
            AuditEvent::SessionsRevoked { .. } => "sessions_revoked",
            AuditEvent::RegistrationSuccess { .. } => "registration_success",
            AuditEvent::RegistrationFailure { .. } => "registration_failure",
            AuditEvent::PasswordResetRequested { .. } => "password_reset_requested",
            AuditEvent::PasswordResetCompleted { .. } => "password_reset_completed",
            AuditEvent::PasswordChange { .. } => "password_change",
            AuditEvent::EmailVerified { .. } => "email_verified",
            AuditEvent::AccountDeleted { .. } => "account_deleted",
            AuditEvent::InvalidToken { .. } => "invalid_token",
            AuditEvent::CsrfRejected { .. } => "csrf_rejected",
            AuditEvent::RateLimited { .. } => "rate_limited",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::AccountLocked { .. } => "Account locked",
            AuditEvent::AccountUnlocked { .. } => "Account unlocked",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::TokenRefresh { .. } => "Token refresh",
            AuditEvent::SessionRevoked { .. } => "Session revoked",
            AuditEvent::SessionsRevoked { .. } => "User sessions revoked",
            AuditEvent::RegistrationSuccess { .. } => "Registration successful",
            AuditEvent::RegistrationFailure { .. } => "Registration failed",
            AuditEvent::PasswordResetRequested { .. } => "Password reset requested",
            AuditEvent::PasswordResetCompleted { .. } => "Password reset completed",
            AuditEvent::PasswordChange { .. } => "Password changed",
            AuditEvent::EmailVerified { .. } => "Email verified",
            AuditEvent::AccountDeleted { .. } => "Account deleted",
            AuditEvent::InvalidToken { .. } => "Invalid token",
            AuditEvent::CsrfRejected { .. } => "CSRF validation failed",
            AuditEvent::RateLimited { .. } => "Rate limit exceeded",
        }
    }

    /// Subject of the event, when one is known
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            AuditEvent::LoginSuccess { user_id, .. }
            | AuditEvent::AccountLocked { user_id, .. }
            | AuditEvent::AccountUnlocked { user_id, .. }
            | AuditEvent::Logout { user_id, .. }
            | AuditEvent::TokenRefresh { user_id, .. }
            | AuditEvent::SessionRevoked { user_id, .. }
            | AuditEvent::SessionsRevoked { user_id, .. }
            | AuditEvent::RegistrationSuccess { user_id, .. }
            | AuditEvent::PasswordResetCompleted { user_id, .. }
            | AuditEvent::PasswordChange { user_id, .. }
            | AuditEvent::EmailVerified { user_id, .. }
            | AuditEvent::AccountDeleted { user_id, .. } => Some(*user_id),
            AuditEvent::PasswordResetRequested { user_id, .. } => *user_id,
            AuditEvent::LoginFailure { .. }
            | AuditEvent::RegistrationFailure { .. }
            | AuditEvent::InvalidToken { .. }
            | AuditEvent::CsrfRejected { .. }
            | AuditEvent::RateLimited { .. } => None,
        }
    }
}

/// Log a security audit event with structured fields
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();

    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    info!(
        target: "audit",
        timestamp = %timestamp,
        event_type = event.event_type(),
        user_id = ?event.user_id(),
        event = %event_json,
        "{}",
        event.message()
    );
}
