//! One-time tokens for password reset and email verification
//!
//! Each token is stored twice:
//! - fast cache: `password_reset:{token}` / `email_verify:{token}` → user id,
//!   with a TTL equal to the token lifetime
//! - durable store: an audit row keyed by the SHA-256 hex digest of the token
//!
//! Verification tries the cache first and falls back to the durable row, which
//! is the authority on expiry and single use. The plaintext token is returned
//! to the caller once and never persisted durably.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use medauth_core::{
    AuthError, AuthResult, ClientContext, OneTimeToken, OneTimeTokenKind, TokenConfig, User,
};
use medauth_store::{DurableStore, FastCache};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default token entropy in bytes (64 hex characters)
pub const DEFAULT_TOKEN_BYTES: usize = 32;

/// Cryptographically random token of `length` bytes, hex encoded
pub fn generate_secure_token(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Unsalted SHA-256 hex digest. Deterministic so rows can be looked up by hash.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Whole seconds left until `expires_at`, rounded down so a cache entry
/// never outlives its durable row. `None` below one second.
fn cache_ttl_until(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    let left = (expires_at - now).to_std().ok()?;
    Some(Duration::from_secs(left.as_secs())).filter(|ttl| !ttl.is_zero())
}

/// Password-reset and email-verification token service
pub struct HybridTokenService {
    cache: Arc<dyn FastCache>,
    store: Arc<dyn DurableStore>,
    config: TokenConfig,
}

impl HybridTokenService {
    pub fn new(cache: Arc<dyn FastCache>, store: Arc<dyn DurableStore>, config: TokenConfig) -> Self {
        Self {
            cache,
            store,
            config,
        }
    }

    pub async fn create_password_reset_token(
        &self,
        user: &User,
        context: &ClientContext,
    ) -> AuthResult<String> {
        self.create(OneTimeTokenKind::PasswordReset, user, context)
            .await
    }

    pub async fn verify_password_reset_token(&self, token: &str) -> AuthResult<User> {
        self.verify(OneTimeTokenKind::PasswordReset, token).await
    }

    pub async fn mark_password_reset_token_used(&self, token: &str) -> AuthResult<bool> {
        self.mark_used(OneTimeTokenKind::PasswordReset, token).await
    }

    pub async fn create_email_verification_token(
        &self,
        user: &User,
        context: &ClientContext,
    ) -> AuthResult<String> {
        self.create(OneTimeTokenKind::EmailVerification, user, context)
            .await
    }

    pub async fn verify_email_verification_token(&self, token: &str) -> AuthResult<User> {
        self.verify(OneTimeTokenKind::EmailVerification, token).await
    }

    pub async fn mark_email_verification_token_used(&self, token: &str) -> AuthResult<bool> {
        self.mark_used(OneTimeTokenKind::EmailVerification, token)
            .await
    }

    fn ttl(&self, kind: OneTimeTokenKind) -> Duration {
        match kind {
            OneTimeTokenKind::PasswordReset => self.config.password_reset_ttl(),
            OneTimeTokenKind::EmailVerification => self.config.email_verification_ttl(),
        }
    }

    /// Durable row first, then a cache entry that expires no later than it
    async fn create(
        &self,
        kind: OneTimeTokenKind,
        user: &User,
        context: &ClientContext,
    ) -> AuthResult<String> {
        let token = generate_secure_token(DEFAULT_TOKEN_BYTES);
        let ttl = self.ttl(kind);
        let expires_at = Utc::now() + ChronoDuration::seconds(ttl.as_secs() as i64);

        let record = OneTimeToken::new(kind, user.id, hash_token(&token), expires_at, context);
        self.store.insert_one_time_token(&record).await?;

        let cache_ttl = cache_ttl_until(record.expires_at, Utc::now());
        if let Some(cache_ttl) = cache_ttl {
            self.cache
                .set_ex(&kind.cache_key(&token), &user.id.to_string(), cache_ttl)
                .await?;
        }

        info!(
            kind = %kind,
            user_id = %user.id,
            record_id = %record.id,
            ttl_secs = ttl.as_secs(),
            cached_secs = cache_ttl.map(|t| t.as_secs()).unwrap_or(0),
            "One-time token issued"
        );
        Ok(token)
    }

    async fn verify(&self, kind: OneTimeTokenKind, token: &str) -> AuthResult<User> {
        if token.is_empty() {
            return Err(AuthError::TokenInvalid);
        }

        // Fast path
        if let Some(user) = self.cached_user(kind, token).await? {
            debug!(kind = %kind, user_id = %user.id, "One-time token accepted from cache");
            return Ok(user);
        }

        // Fallback: the durable row decides
        let Some(record) = self.store.find_one_time_token(kind, &hash_token(token)).await? else {
            warn!(kind = %kind, "Unknown one-time token presented");
            return Err(AuthError::TokenInvalid);
        };

        if record.used {
            warn!(kind = %kind, record_id = %record.id, "Reuse of consumed one-time token");
            return Err(AuthError::TokenAlreadyUsed);
        }
        if record.is_expired() {
            return Err(AuthError::TokenExpired);
        }

        let user = self
            .store
            .get_user(record.user_id)
            .await?
            .ok_or(AuthError::TokenInvalid)?;
        if !user.is_active() {
            return Err(AuthError::AccountInactive);
        }

        debug!(kind = %kind, user_id = %user.id, "One-time token accepted from durable store");
        Ok(user)
    }

    async fn cached_user(&self, kind: OneTimeTokenKind, token: &str) -> AuthResult<Option<User>> {
        let Some(raw_id) = self.cache.get(&kind.cache_key(token)).await? else {
            return Ok(None);
        };
        let Ok(user_id) = Uuid::parse_str(&raw_id) else {
            return Ok(None);
        };
        Ok(self
            .store
            .get_user(user_id)
            .await?
            .filter(|user| user.is_active()))
    }

    /// Cache entry first, then the durable flag. `false` when no unused row matched.
    async fn mark_used(&self, kind: OneTimeTokenKind, token: &str) -> AuthResult<bool> {
        self.cache.delete(&kind.cache_key(token)).await?;

        let marked = self
            .store
            .mark_one_time_token_used(kind, &hash_token(token), Utc::now())
            .await?;
        if marked {
            info!(kind = %kind, "One-time token consumed");
        }
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medauth_store::{MemoryCache, MemoryStore};

    async fn service() -> (HybridTokenService, Arc<MemoryCache>, Arc<MemoryStore>, User) {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryStore::new());
        let user = User::new("user@example.com", "user@example.com", "hash", None);
        store.insert_user(&user).await.unwrap();
        let service = HybridTokenService::new(cache.clone(), store.clone(), TokenConfig::default());
        (service, cache, store, user)
    }

    #[test]
    fn test_generate_secure_token() {
        let token = generate_secure_token(DEFAULT_TOKEN_BYTES);
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_secure_token(DEFAULT_TOKEN_BYTES));
        assert_eq!(generate_secure_token(8).len(), 16);
    }

    #[test]
    fn test_hash_token_is_deterministic() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_reset_token_fast_path_and_fallback() {
        let (service, cache, store, user) = service().await;
        let token = service
            .create_password_reset_token(&user, &ClientContext::new().with_ip("10.0.0.7"))
            .await
            .unwrap();

        // Plaintext never stored durably
        let record = store
            .find_one_time_token(OneTimeTokenKind::PasswordReset, &hash_token(&token))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(record.token_hash, token);
        assert_eq!(record.ip_address.as_deref(), Some("10.0.0.7"));

        let ttl = cache.ttl(&format!("password_reset:{token}")).await.unwrap();
        assert!(ttl <= Duration::from_secs(3600));

        assert_eq!(service.verify_password_reset_token(&token).await.unwrap().id, user.id);

        cache.flush().await;
        assert_eq!(service.verify_password_reset_token(&token).await.unwrap().id, user.id);
    }

    #[tokio::test]
    async fn test_used_token_rejected() {
        let (service, _, _, user) = service().await;
        let token = service
            .create_password_reset_token(&user, &ClientContext::default())
            .await
            .unwrap();

        assert!(service.mark_password_reset_token_used(&token).await.unwrap());
        for _ in 0..2 {
            assert!(matches!(
                service.verify_password_reset_token(&token).await,
                Err(AuthError::TokenAlreadyUsed)
            ));
        }
        assert!(!service.mark_password_reset_token_used(&token).await.unwrap());
    }

    #[test]
    fn test_cache_ttl_never_outlives_row() {
        let now = Utc::now();
        assert_eq!(
            cache_ttl_until(now + ChronoDuration::milliseconds(3_599_900), now),
            Some(Duration::from_secs(3599))
        );
        assert_eq!(
            cache_ttl_until(now + ChronoDuration::seconds(3600), now),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(cache_ttl_until(now + ChronoDuration::milliseconds(900), now), None);
        assert_eq!(cache_ttl_until(now - ChronoDuration::seconds(1), now), None);
    }

    #[tokio::test]
    async fn test_cache_entry_expires_before_row() {
        let (service, cache, store, user) = service().await;
        let token = service
            .create_password_reset_token(&user, &ClientContext::default())
            .await
            .unwrap();

        let record = store
            .find_one_time_token(OneTimeTokenKind::PasswordReset, &hash_token(&token))
            .await
            .unwrap()
            .unwrap();
        let cached = cache.ttl(&format!("password_reset:{token}")).await.unwrap();
        let row_left = (record.expires_at - Utc::now()).to_std().unwrap();
        assert!(cached < Duration::from_secs(3600));
        assert!(cached <= row_left + Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_expired_reset_token_rejected() {
        let (service, cache, store, user) = service().await;
        let token = generate_secure_token(DEFAULT_TOKEN_BYTES);
        let record = OneTimeToken::new(
            OneTimeTokenKind::PasswordReset,
            user.id,
            hash_token(&token),
            Utc::now() - ChronoDuration::seconds(1),
            &ClientContext::default(),
        );
        store.insert_one_time_token(&record).await.unwrap();

        for _ in 0..2 {
            assert!(matches!(
                service.verify_password_reset_token(&token).await,
                Err(AuthError::TokenExpired)
            ));
        }
        assert!(!cache.exists(&format!("password_reset:{token}")).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let (service, _, store, user) = service().await;
        let token = generate_secure_token(DEFAULT_TOKEN_BYTES);
        let record = OneTimeToken::new(
            OneTimeTokenKind::EmailVerification,
            user.id,
            hash_token(&token),
            Utc::now() - ChronoDuration::minutes(1),
            &ClientContext::default(),
        );
        store.insert_one_time_token(&record).await.unwrap();

        for _ in 0..2 {
            assert!(matches!(
                service.verify_email_verification_token(&token).await,
                Err(AuthError::TokenExpired)
            ));
        }
    }

    #[tokio::test]
    async fn test_unknown_and_cross_kind_tokens_rejected() {
        let (service, _, _, user) = service().await;
        assert!(matches!(
            service.verify_password_reset_token("deadbeef").await,
            Err(AuthError::TokenInvalid)
        ));
        assert!(matches!(
            service.verify_password_reset_token("").await,
            Err(AuthError::TokenInvalid)
        ));

        let verify_token = service
            .create_email_verification_token(&user, &ClientContext::default())
            .await
            .unwrap();
        assert!(matches!(
            service.verify_password_reset_token(&verify_token).await,
            Err(AuthError::TokenInvalid)
        ));
        assert!(service.verify_email_verification_token(&verify_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_email_verification_ttl() {
        let (service, cache, _, user) = service().await;
        let token = service
            .create_email_verification_token(&user, &ClientContext::default())
            .await
            .unwrap();

        let ttl = cache.ttl(&format!("email_verify:{token}")).await.unwrap();
        assert!(ttl > Duration::from_secs(6 * 86_400));
    }

    #[tokio::test]
    async fn test_inactive_user_rejected() {
        let (service, _, store, mut user) = service().await;
        let token = service
            .create_password_reset_token(&user, &ClientContext::default())
            .await
            .unwrap();

        user.status = medauth_core::UserStatus::Deleted;
        user.deleted_at = Some(Utc::now());
        store.update_user(&user).await.unwrap();

        assert!(matches!(
            service.verify_password_reset_token(&token).await,
            Err(AuthError::AccountInactive)
        ));
    }
}
