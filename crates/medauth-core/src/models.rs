//! Identity data model
//!
//! This module defines the records the session subsystem reads and writes:
//! - User: account identity, credentials and lockout counters
//! - Session: one issued access/refresh token pair
//! - OneTimeToken: password-reset and email-verification audit rows
//!
//! Rows are never hard-deleted here. Users are soft-deleted, sessions are
//! revoked, and one-time tokens are marked used.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device;

/// User role
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Customer,
    Partner,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Customer => "customer",
            UserRole::Partner => "partner",
            UserRole::Admin => "admin",
        }
    }

    /// Parse role from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "customer" => Some(UserRole::Customer),
            "partner" => Some(UserRole::Partner),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Account status
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Suspended,
    Deleted,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
            UserStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(UserStatus::Active),
            "suspended" => Some(UserStatus::Suspended),
            "deleted" => Some(UserStatus::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,

    /// Login email, stored lowercase
    pub email: String,

    /// Dedup form of the email (see [`crate::validators::normalize_email`])
    pub email_normalized: String,

    /// Argon2id PHC string, never serialized
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    pub full_name: Option<String>,
    pub role: UserRole,
    pub status: UserStatus,

    /// Why the account was suspended or deleted
    pub status_reason: Option<String>,

    pub email_verified: bool,
    pub email_verified_at: Option<DateTime<Utc>>,

    /// Consecutive failed logins since the last success
    pub failed_login_count: i32,
    pub locked_until: Option<DateTime<Utc>>,

    pub password_changed_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    /// Create an active customer account
    pub fn new(
        email: impl Into<String>,
        email_normalized: impl Into<String>,
        password_hash: impl Into<String>,
        full_name: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            email_normalized: email_normalized.into(),
            password_hash: password_hash.into(),
            full_name,
            role: UserRole::Customer,
            status: UserStatus::Active,
            status_reason: None,
            email_verified: false,
            email_verified_at: None,
            failed_login_count: 0,
            locked_until: None,
            password_changed_at: Some(now),
            last_login_at: None,
            last_login_ip: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_role(mut self, role: UserRole) -> Self {
        self.role = role;
        self
    }

    /// `status == active` and not soft-deleted
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active && self.deleted_at.is_none()
    }

    pub fn is_locked(&self) -> bool {
        self.is_locked_at(Utc::now())
    }

    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// True once the password is older than `max_age`, or was never recorded
    pub fn requires_password_change(&self, max_age: Duration) -> bool {
        match self.password_changed_at {
            Some(changed) => Utc::now() - changed > max_age,
            None => true,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Request metadata recorded on sessions and one-time tokens
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
}

impl ClientContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

/// One issued access/refresh token pair.
///
/// `active → revoked` is the only transition. Revoked rows stay for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub access_token_jti: String,
    pub refresh_token_jti: Option<String>,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub is_active: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    /// New active session for a freshly minted token pair
    pub fn new(
        user_id: Uuid,
        access_token_jti: impl Into<String>,
        refresh_token_jti: impl Into<String>,
        access_expires_at: DateTime<Utc>,
        refresh_expires_at: DateTime<Utc>,
        context: &ClientContext,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            access_token_jti: access_token_jti.into(),
            refresh_token_jti: Some(refresh_token_jti.into()),
            access_expires_at,
            refresh_expires_at,
            ip_address: context.ip_address.clone(),
            user_agent: context.user_agent.clone(),
            device_id: context.device_id.clone(),
            device_name: device::device_name(context.user_agent.as_deref()),
            is_active: true,
            revoked_at: None,
            revoked_reason: None,
            created_at,
            last_activity_at: created_at,
        }
    }

    pub fn is_revoked(&self) -> bool {
        !self.is_active
    }

    pub fn is_refresh_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_expires_at
    }

    /// Apply the revocation transition; no-op on an already revoked row
    pub fn revoke(&mut self, reason: &str, at: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        self.is_active = false;
        self.revoked_at = Some(at);
        self.revoked_reason = Some(reason.to_string());
        true
    }
}

/// Which recovery flow a one-time token belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OneTimeTokenKind {
    PasswordReset,
    EmailVerification,
}

impl OneTimeTokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OneTimeTokenKind::PasswordReset => "password_reset",
            OneTimeTokenKind::EmailVerification => "email_verification",
        }
    }

    /// Fast cache key for the plaintext token
    pub fn cache_key(&self, token: &str) -> String {
        match self {
            OneTimeTokenKind::PasswordReset => format!("password_reset:{token}"),
            OneTimeTokenKind::EmailVerification => format!("email_verify:{token}"),
        }
    }
}

impl std::fmt::Display for OneTimeTokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable audit row for a password-reset or email-verification token.
///
/// Only the SHA-256 hash of the token is stored. A token is valid while it is
/// unused and unexpired; once `used` is set it never becomes valid again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OneTimeToken {
    pub id: Uuid,
    pub kind: OneTimeTokenKind,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OneTimeToken {
    pub fn new(
        kind: OneTimeTokenKind,
        user_id: Uuid,
        token_hash: impl Into<String>,
        expires_at: DateTime<Utc>,
        context: &ClientContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            user_id,
            token_hash: token_hash.into(),
            expires_at,
            used: false,
            used_at: None,
            ip_address: context.ip_address.clone(),
            user_agent: context.user_agent.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.used && !self.is_expired_at(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User::new(
            "user@example.com",
            "user@example.com",
            "$argon2id$v=19$hash",
            Some("Test User".to_string()),
        )
    }

    #[test]
    fn test_role_round_trip_strings() {
        assert_eq!(UserRole::parse("ADMIN"), Some(UserRole::Admin));
        assert_eq!(UserRole::parse("partner"), Some(UserRole::Partner));
        assert_eq!(UserRole::parse("editor"), None);
        assert_eq!(UserRole::Customer.to_string(), "customer");
    }

    #[test]
    fn test_user_is_active() {
        let mut user = sample_user();
        assert!(user.is_active());

        user.status = UserStatus::Suspended;
        assert!(!user.is_active());

        user.status = UserStatus::Active;
        user.deleted_at = Some(Utc::now());
        assert!(!user.is_active());
    }

    #[test]
    fn test_user_is_locked() {
        let mut user = sample_user();
        assert!(!user.is_locked());

        user.locked_until = Some(Utc::now() + Duration::minutes(15));
        assert!(user.is_locked());

        user.locked_until = Some(Utc::now() - Duration::minutes(1));
        assert!(!user.is_locked());
    }

    #[test]
    fn test_requires_password_change() {
        let mut user = sample_user();
        assert!(!user.requires_password_change(Duration::days(90)));

        user.password_changed_at = Some(Utc::now() - Duration::days(91));
        assert!(user.requires_password_change(Duration::days(90)));
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let json = serde_json::to_string(&sample_user()).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(json.contains("user@example.com"));
    }

    #[test]
    fn test_session_revoke_is_terminal() {
        let now = Utc::now();
        let context = ClientContext::new()
            .with_ip("192.168.1.1")
            .with_user_agent("Mozilla/5.0 (Windows NT 10.0) Chrome/120.0 Safari/537.36");
        let mut session = Session::new(
            Uuid::new_v4(),
            "access-jti",
            "refresh-jti",
            now + Duration::minutes(240),
            now + Duration::days(7),
            &context,
            now,
        );
        assert_eq!(session.device_name.as_deref(), Some("Chrome Desktop"));

        assert!(session.revoke("user_logout", now));
        assert!(session.is_revoked());
        assert!(!session.revoke("token_refresh", now));
        assert_eq!(session.revoked_reason.as_deref(), Some("user_logout"));
    }

    #[test]
    fn test_one_time_token_validity() {
        let mut token = OneTimeToken::new(
            OneTimeTokenKind::PasswordReset,
            Uuid::new_v4(),
            "hash",
            Utc::now() + Duration::hours(1),
            &ClientContext::default(),
        );
        assert!(token.is_valid());
        assert!(!token.is_expired());

        token.used = true;
        assert!(!token.is_valid());

        token.used = false;
        token.expires_at = Utc::now() - Duration::seconds(1);
        assert!(token.is_expired());
        assert!(!token.is_valid());
    }

    #[test]
    fn test_one_time_token_cache_keys() {
        assert_eq!(
            OneTimeTokenKind::PasswordReset.cache_key("abc"),
            "password_reset:abc"
        );
        assert_eq!(
            OneTimeTokenKind::EmailVerification.cache_key("abc"),
            "email_verify:abc"
        );
    }
}
