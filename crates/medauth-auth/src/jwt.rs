//! JWT session lifecycle
//!
//! [`TokenIssuer`] mints, validates, refreshes and revokes access/refresh
//! token pairs signed with HMAC-SHA256. Each pair is backed by:
//! - one `Session` row in the durable store (audit record)
//! - two fast-cache liveness keys, `session:access:{jti}` and
//!   `session:refresh:{jti}`, holding the user id
//!
//! The fast cache is the only liveness oracle on the hot path: an access
//! token whose key is gone is rejected even if its signature and `exp` are
//! fine. Revocation deletes the liveness keys first, then flips the row, then
//! writes `blacklist:*` keys as an explicit record of the kill.

use crate::audit::{audit_log, AuditEvent};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use medauth_core::{
    AuthError, AuthResult, ClientContext, Session, SessionSecrets, TokenConfig, User, UserRole,
};
use medauth_store::{DurableStore, FastCache};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Reason recorded on a session consumed by refresh rotation
pub const REASON_TOKEN_REFRESH: &str = "token_refresh";

/// Value stored under blacklist keys
const BLACKLIST_VALUE: &str = "revoked";

/// Fast cache key namespace
pub mod keys {
    use super::TokenType;

    pub fn session_access(jti: &str) -> String {
        format!("session:access:{jti}")
    }

    pub fn session_refresh(jti: &str) -> String {
        format!("session:refresh:{jti}")
    }

    /// CSRF tokens are never blacklisted
    pub fn blacklist(token_type: TokenType, jti: &str) -> Option<String> {
        match token_type {
            TokenType::Access => Some(format!("blacklist:access:{jti}")),
            TokenType::Refresh => Some(format!("blacklist:refresh:{jti}")),
            TokenType::Csrf => None,
        }
    }
}

/// The `type` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
    Csrf,
}

/// JWT claims shared by all three token types.
///
/// `email` and `role` are present on access tokens only; `iat` is absent on
/// CSRF tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Subject - user ID
    pub sub: String,
    /// JWT ID - random per token, used as the cache and revocation key
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Claims {
    pub fn user_id(&self) -> AuthResult<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AuthError::TokenInvalid)
    }

    pub fn role(&self) -> Option<UserRole> {
        self.role.as_deref().and_then(UserRole::parse)
    }
}

/// Token pair returned by login and refresh
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Always "bearer"
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    /// Refresh token lifetime in seconds
    pub refresh_expires_in: u64,
}

/// Issues and tracks JWT sessions over the fast cache and durable store
pub struct TokenIssuer {
    cache: Arc<dyn FastCache>,
    store: Arc<dyn DurableStore>,
    config: TokenConfig,
    session_encoding: EncodingKey,
    session_decoding: DecodingKey,
    csrf_encoding: EncodingKey,
    csrf_decoding: DecodingKey,
}

impl TokenIssuer {
    pub fn new(
        cache: Arc<dyn FastCache>,
        store: Arc<dyn DurableStore>,
        secrets: &SessionSecrets,
        config: TokenConfig,
    ) -> Self {
        Self {
            cache,
            store,
            config,
            session_encoding: EncodingKey::from_secret(secrets.jwt_secret()),
            session_decoding: DecodingKey::from_secret(secrets.jwt_secret()),
            csrf_encoding: EncodingKey::from_secret(secrets.csrf_secret()),
            csrf_decoding: DecodingKey::from_secret(secrets.csrf_secret()),
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Mint a new access/refresh pair for `user`.
    ///
    /// Writes the `Session` row first, then the two liveness keys with TTLs
    /// equal to each token's lifetime.
    ///
    /// # Errors
    ///
    /// * `AuthError::Infrastructure` - a store was unreachable
    pub async fn create_tokens(
        &self,
        user: &User,
        context: &ClientContext,
    ) -> AuthResult<TokenPair> {
        self.create_session(user, context).await.map(|(pair, _)| pair)
    }

    /// [`Self::create_tokens`], also returning the stored session row
    pub async fn create_session(
        &self,
        user: &User,
        context: &ClientContext,
    ) -> AuthResult<(TokenPair, Session)> {
        let now = Utc::now();
        let access_ttl = self.config.access_ttl();
        let refresh_ttl = self.config.refresh_ttl();
        let access_expires_at = now + chrono_span(access_ttl);
        let refresh_expires_at = now + chrono_span(refresh_ttl);

        let access_jti = Uuid::new_v4().to_string();
        let refresh_jti = Uuid::new_v4().to_string();
        let user_id = user.id.to_string();

        let access_claims = Claims {
            sub: user_id.clone(),
            jti: access_jti.clone(),
            iat: Some(now.timestamp()),
            exp: access_expires_at.timestamp(),
            token_type: TokenType::Access,
            email: Some(user.email.clone()),
            role: Some(user.role.as_str().to_string()),
        };
        let refresh_claims = Claims {
            sub: user_id.clone(),
            jti: refresh_jti.clone(),
            iat: Some(now.timestamp()),
            exp: refresh_expires_at.timestamp(),
            token_type: TokenType::Refresh,
            email: None,
            role: None,
        };

        let access_token = self.sign(&access_claims, &self.session_encoding)?;
        let refresh_token = self.sign(&refresh_claims, &self.session_encoding)?;

        let session = Session::new(
            user.id,
            &access_jti,
            &refresh_jti,
            access_expires_at,
            refresh_expires_at,
            context,
            now,
        );
        self.store.insert_session(&session).await?;

        self.cache
            .set_ex(&keys::session_access(&access_jti), &user_id, access_ttl)
            .await?;
        self.cache
            .set_ex(&keys::session_refresh(&refresh_jti), &user_id, refresh_ttl)
            .await?;

        info!(
            user_id = %user.id,
            session_id = %session.id,
            device = ?session.device_name,
            "Session created"
        );

        let pair = TokenPair {
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
            expires_in: access_ttl.as_secs(),
            refresh_expires_in: refresh_ttl.as_secs(),
        };
        Ok((pair, session))
    }

    /// Validate an access token.
    ///
    /// Checks signature, expiry and `type`, then requires the access jti to
    /// be live in the fast cache. Never touches the durable store.
    pub async fn validate_access_token(&self, token: &str) -> AuthResult<Claims> {
        let claims = self.decode_session_token(token)?;
        if claims.token_type != TokenType::Access {
            return Err(AuthError::TokenInvalid);
        }

        if !self
            .cache
            .exists(&keys::session_access(&claims.jti))
            .await?
        {
            debug!(jti = %claims.jti, "Access token not live");
            return Err(AuthError::TokenRevoked);
        }

        Ok(claims)
    }

    /// Rotate a refresh token into a brand-new pair.
    ///
    /// The refresh liveness key is consumed with an atomic take, so of two
    /// concurrent calls with the same token only one proceeds. The old
    /// session is revoked with reason `token_refresh` before the new pair is
    /// minted.
    pub async fn refresh_tokens(
        &self,
        refresh_token: &str,
        context: &ClientContext,
    ) -> AuthResult<TokenPair> {
        let claims = self.decode_session_token(refresh_token)?;
        if claims.token_type != TokenType::Refresh {
            return Err(AuthError::TokenInvalid);
        }

        if self
            .cache
            .take(&keys::session_refresh(&claims.jti))
            .await?
            .is_none()
        {
            warn!(jti = %claims.jti, "Refresh token not live or already rotated");
            return Err(AuthError::TokenRevoked);
        }

        let session = self
            .store
            .find_active_session_by_refresh_jti(&claims.jti)
            .await?
            .ok_or(AuthError::TokenRevoked)?;

        if session.user_id != claims.user_id()? {
            warn!(session_id = %session.id, "Refresh token subject does not own session");
            return Err(AuthError::TokenInvalid);
        }

        let user = match self.store.get_user(session.user_id).await? {
            Some(user) if user.is_active() => user,
            _ => {
                self.revoke_session(session.id, "account_inactive").await?;
                return Err(AuthError::AccountInactive);
            }
        };

        self.revoke_session(session.id, REASON_TOKEN_REFRESH).await?;
        let (pair, new_session) = self.create_session(&user, context).await?;

        audit_log(&AuditEvent::TokenRefresh {
            user_id: user.id,
            old_session_id: session.id,
            new_session_id: new_session.id,
            ip_address: context.ip_address.clone(),
        });

        Ok(pair)
    }

    /// Revoke one session.
    ///
    /// Deletes both liveness keys, flips the row to revoked with `reason`,
    /// then writes blacklist keys that live for the rest of the refresh
    /// lifetime. Returns `false` when the session does not exist. Revoking
    /// an already revoked session succeeds and keeps its original reason.
    pub async fn revoke_session(&self, session_id: Uuid, reason: &str) -> AuthResult<bool> {
        let Some(session) = self.store.get_session(session_id).await? else {
            return Ok(false);
        };

        self.cache
            .delete(&keys::session_access(&session.access_token_jti))
            .await?;
        if let Some(refresh_jti) = &session.refresh_token_jti {
            self.cache.delete(&keys::session_refresh(refresh_jti)).await?;
        }

        let now = Utc::now();
        let Some(revoked) = self.store.revoke_session(session_id, reason, now).await? else {
            return Ok(false);
        };

        if let Some(remaining) = remaining(revoked.refresh_expires_at, now) {
            if let Some(key) = keys::blacklist(TokenType::Access, &revoked.access_token_jti) {
                self.cache.set_ex(&key, BLACKLIST_VALUE, remaining).await?;
            }
            if let Some(jti) = &revoked.refresh_token_jti {
                if let Some(key) = keys::blacklist(TokenType::Refresh, jti) {
                    self.cache.set_ex(&key, BLACKLIST_VALUE, remaining).await?;
                }
            }
        }

        audit_log(&AuditEvent::SessionRevoked {
            user_id: revoked.user_id,
            session_id,
            reason: revoked.revoked_reason.clone().unwrap_or_else(|| reason.to_string()),
        });
        Ok(true)
    }

    /// Revoke every active session of `user_id`.
    ///
    /// Best effort: a failure on one session is logged and the rest are
    /// still attempted. Returns how many were revoked.
    pub async fn revoke_all_user_sessions(&self, user_id: Uuid, reason: &str) -> AuthResult<usize> {
        let sessions = self.store.list_user_sessions(user_id, true).await?;
        let expected = sessions.len();
        let mut revoked = 0;

        for session in sessions {
            match self.revoke_session(session.id, reason).await {
                Ok(true) => revoked += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    user_id = %user_id,
                    session_id = %session.id,
                    error = %e,
                    "Failed to revoke session"
                ),
            }
        }

        if revoked < expected {
            warn!(user_id = %user_id, revoked, expected, reason, "Partial session revocation");
        }
        audit_log(&AuditEvent::SessionsRevoked {
            user_id,
            reason: reason.to_string(),
            revoked,
            expected,
        });
        Ok(revoked)
    }

    /// Whether `jti` was deliberately revoked and the record is still kept.
    /// Diagnostic only; validation does not consult it.
    pub async fn is_blacklisted(&self, token_type: TokenType, jti: &str) -> AuthResult<bool> {
        match keys::blacklist(token_type, jti) {
            Some(key) => Ok(self.cache.exists(&key).await?),
            None => Ok(false),
        }
    }

    /// Stateless CSRF token bound to `user_id`, signed with the CSRF secret
    pub fn generate_csrf_token(&self, user_id: &str) -> AuthResult<String> {
        let expires_at = Utc::now() + chrono_span(self.config.csrf_ttl());
        let claims = Claims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: None,
            exp: expires_at.timestamp(),
            token_type: TokenType::Csrf,
            email: None,
            role: None,
        };
        self.sign(&claims, &self.csrf_encoding)
    }

    pub fn validate_csrf_token(&self, token: &str, user_id: &str) -> bool {
        match decode_with(token, &self.csrf_decoding) {
            Ok(claims) => claims.token_type == TokenType::Csrf && claims.sub == user_id,
            Err(_) => false,
        }
    }

    fn decode_session_token(&self, token: &str) -> AuthResult<Claims> {
        decode_with(token, &self.session_decoding)
    }

    fn sign(&self, claims: &Claims, key: &EncodingKey) -> AuthResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, key)
            .map_err(|e| AuthError::Infrastructure(format!("Failed to encode JWT: {e}")))
    }
}

fn decode_with(token: &str, key: &DecodingKey) -> AuthResult<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "sub"]);

    decode::<Claims>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::TokenInvalid,
        })
}

fn chrono_span(duration: Duration) -> ChronoDuration {
    ChronoDuration::seconds(duration.as_secs() as i64)
}

/// Time left until `until`, `None` once it has passed
fn remaining(until: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    (until - now).to_std().ok().filter(|d| !d.is_zero())
}
