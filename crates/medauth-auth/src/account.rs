//! Account flows built on the session and one-time token services
//!
//! Registration, login with lockout, logout, password reset and change,
//! email verification, self-service session management, admin lock/unlock
//! and soft deletion. Each flow writes a security audit event.

use crate::audit::{audit_log, AuditEvent};
use crate::hybrid::HybridTokenService;
use crate::jwt::{TokenIssuer, TokenPair};
use crate::password::PasswordHasher;
use chrono::{Duration as ChronoDuration, Utc};
use medauth_core::validators::{normalize_email, validate_email, PasswordPolicy};
use medauth_core::{
    AuthError, AuthResult, ClientContext, SecurityConfig, Session, User, UserStatus,
};
use medauth_store::{DurableStore, FastCache};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub const REASON_USER_LOGOUT: &str = "user_logout";
pub const REASON_PASSWORD_RESET: &str = "password_reset";
pub const REASON_PASSWORD_CHANGED: &str = "password_changed";
pub const REASON_USER_REVOKED: &str = "user_revoked";
pub const REASON_USER_REVOKED_ALL: &str = "user_revoked_all";
pub const REASON_ACCOUNT_DELETED: &str = "account_deleted";

/// Cache marker for an account waiting out its deletion grace period
pub fn deletion_pending_key(user_id: Uuid) -> String {
    format!("deletion_pending:{user_id}")
}

/// Result of a successful registration
#[derive(Debug, Clone)]
pub struct Registration {
    pub user: User,
    /// Plaintext email verification token, to be delivered out of band
    pub verification_token: String,
}

/// Result of a successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub tokens: TokenPair,
    pub session_id: Uuid,
    /// Password is older than the configured maximum age
    pub password_change_required: bool,
}

pub struct AccountService {
    store: Arc<dyn DurableStore>,
    cache: Arc<dyn FastCache>,
    issuer: Arc<TokenIssuer>,
    tokens: Arc<HybridTokenService>,
    hasher: PasswordHasher,
    security: SecurityConfig,
    policy: PasswordPolicy,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn DurableStore>,
        cache: Arc<dyn FastCache>,
        issuer: Arc<TokenIssuer>,
        tokens: Arc<HybridTokenService>,
        hasher: PasswordHasher,
        security: SecurityConfig,
    ) -> Self {
        let policy = PasswordPolicy::with_min_length(security.password_min_length);
        Self {
            store,
            cache,
            issuer,
            tokens,
            hasher,
            security,
            policy,
        }
    }

    /// Create an active customer account and its first email verification token.
    ///
    /// # Errors
    ///
    /// * `AuthError::Validation` - malformed email or weak password
    /// * `AuthError::Conflict` - email or a normalized variant is taken
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: Option<String>,
        context: &ClientContext,
    ) -> AuthResult<Registration> {
        let email = email.trim().to_lowercase();
        match self.try_register(&email, password, full_name, context).await {
            Ok(registration) => {
                audit_log(&AuditEvent::RegistrationSuccess {
                    user_id: registration.user.id,
                    email: registration.user.email.clone(),
                    role: registration.user.role.to_string(),
                    ip_address: context.ip_address.clone(),
                });
                Ok(registration)
            }
            Err(e) => {
                audit_log(&AuditEvent::RegistrationFailure {
                    email,
                    reason: e.to_string(),
                    ip_address: context.ip_address.clone(),
                });
                Err(e)
            }
        }
    }

    async fn try_register(
        &self,
        email: &str,
        password: &str,
        full_name: Option<String>,
        context: &ClientContext,
    ) -> AuthResult<Registration> {
        validate_email(email).map_err(AuthError::Validation)?;
        self.policy.validate(password).map_err(AuthError::Validation)?;

        let normalized = normalize_email(email);
        if self.store.find_user_by_email(email).await?.is_some()
            || self
                .store
                .find_user_by_normalized_email(&normalized)
                .await?
                .is_some()
        {
            return Err(AuthError::Conflict("Email already registered".to_string()));
        }

        let hash = self.hasher.hash_async(password).await?;
        let user = User::new(email, normalized, hash, full_name);
        self.store.insert_user(&user).await?;

        let verification_token = self
            .tokens
            .create_email_verification_token(&user, context)
            .await?;

        info!(user_id = %user.id, "User registered");
        Ok(Registration {
            user,
            verification_token,
        })
    }

    /// Authenticate with email and password and open a new session.
    ///
    /// The lock is checked before the password, so correct credentials on a
    /// locked account still fail. Each wrong password bumps the failure
    /// counter; reaching the configured maximum locks the account.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        context: &ClientContext,
    ) -> AuthResult<LoginOutcome> {
        let email = email.trim().to_lowercase();

        let Some(mut user) = self.store.find_user_by_email(&email).await? else {
            warn!("Login attempt for unknown email");
            self.audit_login_failure(&email, "unknown_email", context, None, false);
            return Err(AuthError::InvalidCredentials);
        };

        if user.is_locked() {
            self.audit_login_failure(&email, "account_locked", context, None, true);
            return Err(AuthError::AccountLocked {
                locked_until: user.locked_until,
            });
        }

        if !user.is_active() {
            self.audit_login_failure(&email, "account_inactive", context, None, false);
            return Err(AuthError::AccountInactive);
        }

        let now = Utc::now();

        if !self.hasher.verify_async(password, &user.password_hash).await? {
            user.failed_login_count += 1;
            let locked = user.failed_login_count >= self.security.max_login_attempts;
            if locked {
                let until =
                    now + ChronoDuration::minutes(self.security.lockout_duration_minutes);
                user.locked_until = Some(until);
                warn!(user_id = %user.id, "Account locked after repeated failed logins");
                audit_log(&AuditEvent::AccountLocked {
                    user_id: user.id,
                    email: user.email.clone(),
                    reason: "too_many_failed_logins".to_string(),
                    locked_until: until,
                    ip_address: context.ip_address.clone(),
                });
            }
            user.updated_at = now;
            self.store.update_user(&user).await?;

            self.audit_login_failure(
                &email,
                "invalid_password",
                context,
                Some(user.failed_login_count),
                locked,
            );
            return Err(AuthError::InvalidCredentials);
        }

        user.failed_login_count = 0;
        user.locked_until = None;
        user.last_login_at = Some(now);
        user.last_login_ip = context.ip_address.clone();
        user.updated_at = now;
        self.store.update_user(&user).await?;

        let (tokens, session) = self.issuer.create_session(&user, context).await?;

        audit_log(&AuditEvent::LoginSuccess {
            user_id: user.id,
            email: user.email.clone(),
            session_id: Some(session.id),
            ip_address: context.ip_address.clone(),
            user_agent: context.user_agent.clone(),
        });

        let max_age = ChronoDuration::days(self.security.password_max_age_days);
        Ok(LoginOutcome {
            password_change_required: user.requires_password_change(max_age),
            session_id: session.id,
            tokens,
            user,
        })
    }

    fn audit_login_failure(
        &self,
        email: &str,
        reason: &str,
        context: &ClientContext,
        failed_attempts: Option<i32>,
        account_locked: bool,
    ) {
        audit_log(&AuditEvent::LoginFailure {
            email: email.to_string(),
            reason: reason.to_string(),
            ip_address: context.ip_address.clone(),
            failed_attempts,
            account_locked,
        });
    }

    /// End the session behind `access_token`
    pub async fn logout(&self, access_token: &str, context: &ClientContext) -> AuthResult<()> {
        let claims = self.issuer.validate_access_token(access_token).await?;
        let session = self
            .store
            .find_session_by_access_jti(&claims.jti)
            .await?
            .ok_or(AuthError::TokenRevoked)?;

        self.issuer
            .revoke_session(session.id, REASON_USER_LOGOUT)
            .await?;

        audit_log(&AuditEvent::Logout {
            user_id: session.user_id,
            session_id: session.id,
            ip_address: context.ip_address.clone(),
        });
        Ok(())
    }

    pub async fn refresh(
        &self,
        refresh_token: &str,
        context: &ClientContext,
    ) -> AuthResult<TokenPair> {
        self.issuer.refresh_tokens(refresh_token, context).await
    }

    /// Issue a reset token. Unknown or inactive emails get `Ok(None)` so the
    /// caller can answer identically either way.
    pub async fn request_password_reset(
        &self,
        email: &str,
        context: &ClientContext,
    ) -> AuthResult<Option<String>> {
        let email = email.trim().to_lowercase();
        let user = self
            .store
            .find_user_by_email(&email)
            .await?
            .filter(User::is_active);

        audit_log(&AuditEvent::PasswordResetRequested {
            email,
            user_id: user.as_ref().map(|u| u.id),
            ip_address: context.ip_address.clone(),
        });

        match user {
            Some(user) => Ok(Some(
                self.tokens.create_password_reset_token(&user, context).await?,
            )),
            None => Ok(None),
        }
    }

    /// Set a new password from a reset token and end every session.
    /// Returns the number of sessions revoked.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<usize> {
        let mut user = self.tokens.verify_password_reset_token(token).await?;
        self.policy
            .validate(new_password)
            .map_err(AuthError::Validation)?;

        let now = Utc::now();
        user.password_hash = self.hasher.hash_async(new_password).await?;
        user.password_changed_at = Some(now);
        user.failed_login_count = 0;
        user.locked_until = None;
        user.updated_at = now;
        self.store.update_user(&user).await?;

        if !self.tokens.mark_password_reset_token_used(token).await? {
            // Lost a race with a concurrent reset using the same token
            warn!(user_id = %user.id, "Password reset token consumed concurrently");
        }

        let sessions_revoked = self
            .issuer
            .revoke_all_user_sessions(user.id, REASON_PASSWORD_RESET)
            .await?;

        audit_log(&AuditEvent::PasswordResetCompleted {
            user_id: user.id,
            sessions_revoked,
        });
        Ok(sessions_revoked)
    }

    pub async fn verify_email(&self, token: &str) -> AuthResult<User> {
        let mut user = self.tokens.verify_email_verification_token(token).await?;

        // Claim the token before touching the user so only one caller proceeds
        if !self.tokens.mark_email_verification_token_used(token).await? {
            warn!(user_id = %user.id, "Email verification token consumed concurrently");
            return Err(AuthError::TokenAlreadyUsed);
        }

        let now = Utc::now();
        user.email_verified = true;
        user.email_verified_at = Some(now);
        user.updated_at = now;
        self.store.update_user(&user).await?;

        audit_log(&AuditEvent::EmailVerified {
            user_id: user.id,
            email: user.email.clone(),
        });
        Ok(user)
    }

    /// Issue a fresh verification token for an unverified account
    pub async fn resend_email_verification(
        &self,
        user_id: Uuid,
        context: &ClientContext,
    ) -> AuthResult<String> {
        let user = self.active_user(user_id).await?;
        if user.email_verified {
            return Err(AuthError::Conflict("Email already verified".to_string()));
        }
        self.tokens
            .create_email_verification_token(&user, context)
            .await
    }

    /// Returns the number of sessions revoked (zero unless `revoke_all`)
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
        revoke_all: bool,
    ) -> AuthResult<usize> {
        let mut user = self.active_user(user_id).await?;

        if !self.hasher.verify_async(current_password, &user.password_hash).await? {
            return Err(AuthError::Validation(
                "Current password is incorrect".to_string(),
            ));
        }
        if current_password == new_password {
            return Err(AuthError::Validation(
                "New password must differ from the current password".to_string(),
            ));
        }
        self.policy
            .validate(new_password)
            .map_err(AuthError::Validation)?;

        let now = Utc::now();
        user.password_hash = self.hasher.hash_async(new_password).await?;
        user.password_changed_at = Some(now);
        user.updated_at = now;
        self.store.update_user(&user).await?;

        let sessions_revoked = if revoke_all {
            self.issuer
                .revoke_all_user_sessions(user.id, REASON_PASSWORD_CHANGED)
                .await?
        } else {
            0
        };

        audit_log(&AuditEvent::PasswordChange {
            user_id,
            sessions_revoked,
        });
        Ok(sessions_revoked)
    }

    pub async fn list_sessions(&self, user_id: Uuid, active_only: bool) -> AuthResult<Vec<Session>> {
        Ok(self.store.list_user_sessions(user_id, active_only).await?)
    }

    /// Revoke one of the caller's own sessions
    pub async fn revoke_own_session(&self, user_id: Uuid, session_id: Uuid) -> AuthResult<()> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .filter(|s| s.user_id == user_id)
            .ok_or_else(|| AuthError::NotFound("Session not found".to_string()))?;

        if session.is_revoked() {
            return Err(AuthError::Conflict("Session is already revoked".to_string()));
        }

        self.issuer
            .revoke_session(session.id, REASON_USER_REVOKED)
            .await?;
        Ok(())
    }

    pub async fn revoke_all_sessions(&self, user_id: Uuid) -> AuthResult<usize> {
        self.issuer
            .revoke_all_user_sessions(user_id, REASON_USER_REVOKED_ALL)
            .await
    }

    /// Suspend an account for `duration` and end all its sessions.
    /// Admin accounts cannot be locked this way.
    pub async fn lock_user(
        &self,
        user_id: Uuid,
        reason: &str,
        duration: ChronoDuration,
    ) -> AuthResult<usize> {
        let mut user = self.user(user_id).await?;
        if user.is_admin() {
            return Err(AuthError::Validation(
                "Cannot lock admin accounts".to_string(),
            ));
        }

        let now = Utc::now();
        let until = now + duration;
        user.status = UserStatus::Suspended;
        user.status_reason = Some(reason.to_string());
        user.locked_until = Some(until);
        user.updated_at = now;
        self.store.update_user(&user).await?;

        let revoked = self
            .issuer
            .revoke_all_user_sessions(user.id, &format!("account_locked: {reason}"))
            .await?;

        audit_log(&AuditEvent::AccountLocked {
            user_id: user.id,
            email: user.email.clone(),
            reason: reason.to_string(),
            locked_until: until,
            ip_address: None,
        });
        Ok(revoked)
    }

    pub async fn unlock_user(&self, user_id: Uuid, unlocked_by: Option<Uuid>) -> AuthResult<User> {
        let mut user = self.user(user_id).await?;
        if user.status == UserStatus::Deleted {
            return Err(AuthError::Conflict("Account is deleted".to_string()));
        }

        user.status = UserStatus::Active;
        user.status_reason = None;
        user.locked_until = None;
        user.failed_login_count = 0;
        user.updated_at = Utc::now();
        self.store.update_user(&user).await?;

        audit_log(&AuditEvent::AccountUnlocked {
            user_id: user.id,
            email: user.email.clone(),
            unlocked_by,
        });
        Ok(user)
    }

    /// Soft delete: the row stays, status flips to deleted, sessions end and
    /// a `deletion_pending` marker lives for the grace period.
    pub async fn delete_account(&self, user_id: Uuid, password: &str) -> AuthResult<usize> {
        let mut user = self.active_user(user_id).await?;
        if !self.hasher.verify_async(password, &user.password_hash).await? {
            return Err(AuthError::InvalidCredentials);
        }

        let now = Utc::now();
        user.status = UserStatus::Deleted;
        user.status_reason = Some("User requested deletion".to_string());
        user.deleted_at = Some(now);
        user.updated_at = now;
        self.store.update_user(&user).await?;

        let sessions_revoked = self
            .issuer
            .revoke_all_user_sessions(user.id, REASON_ACCOUNT_DELETED)
            .await?;

        let grace = Duration::from_secs(self.security.deletion_grace_days * 86_400);
        self.cache
            .set_ex(&deletion_pending_key(user.id), &now.to_rfc3339(), grace)
            .await?;

        audit_log(&AuditEvent::AccountDeleted {
            user_id: user.id,
            email: user.email.clone(),
            sessions_revoked,
        });
        Ok(sessions_revoked)
    }

    async fn user(&self, user_id: Uuid) -> AuthResult<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User not found".to_string()))
    }

    async fn active_user(&self, user_id: Uuid) -> AuthResult<User> {
        let user = self.user(user_id).await?;
        if !user.is_active() {
            return Err(AuthError::AccountInactive);
        }
        Ok(user)
    }
}
