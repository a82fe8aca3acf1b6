//! In-memory implementations of [`FastCache`] and [`DurableStore`].
//!
//! # Purpose
//! Local development and tests, with no Redis or Postgres required. Services
//! take their stores as `Arc<dyn ...>`, so these drop in wherever the real
//! backends would.
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - **Single-process consistency**: every operation takes the write or read
//!   lock of the map it touches, so single-key operations are atomic exactly as
//!   they are on the real backends.
//!
//! Cache deadlines use `tokio::time::Instant`, so tests can drive expiry with
//! a paused clock.

use crate::cache::{ttl_secs, FastCache};
use crate::durable::DurableStore;
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medauth_core::{OneTimeToken, OneTimeTokenKind, Session, User};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// TTL-honouring in-memory cache
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remaining TTL of a live key
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.expires_at - now)
    }

    /// Drop every entry, as a cache flush would
    pub async fn flush(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl FastCache for MemoryCache {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs(ttl));
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.is_live(Instant::now()));
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|entry| entry.is_live(now)))
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        let removed = self.entries.write().await.remove(key);
        Ok(removed
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// In-memory durable store double
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
    sessions: RwLock<HashMap<Uuid, Session>>,
    tokens: RwLock<HashMap<(OneTimeTokenKind, String), OneTimeToken>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) || users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("email already registered".into()));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_user_by_normalized_email(&self, normalized: &str) -> StoreResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email_normalized == normalized)
            .cloned())
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut users = self.users.write().await;
        match users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("user {}", user.id))),
        }
    }

    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let duplicate_jti = sessions.values().any(|s| {
            s.access_token_jti == session.access_token_jti
                || (session.refresh_token_jti.is_some()
                    && s.refresh_token_jti == session.refresh_token_jti)
        });
        if sessions.contains_key(&session.id) || duplicate_jti {
            return Err(StoreError::Conflict("session jti already exists".into()));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<Option<Session>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn find_active_session_by_refresh_jti(&self, jti: &str) -> StoreResult<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|s| s.is_active && s.refresh_token_jti.as_deref() == Some(jti))
            .cloned())
    }

    async fn find_session_by_access_jti(&self, jti: &str) -> StoreResult<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|s| s.access_token_jti == jti)
            .cloned())
    }

    async fn list_user_sessions(
        &self,
        user_id: Uuid,
        active_only: bool,
    ) -> StoreResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id && (!active_only || s.is_active))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn revoke_session(
        &self,
        id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Session>> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.get_mut(&id).map(|session| {
            session.revoke(reason, at);
            session.clone()
        }))
    }

    async fn insert_one_time_token(&self, token: &OneTimeToken) -> StoreResult<()> {
        let mut tokens = self.tokens.write().await;
        let key = (token.kind, token.token_hash.clone());
        if tokens.contains_key(&key) {
            return Err(StoreError::Conflict("token hash already exists".into()));
        }
        tokens.insert(key, token.clone());
        Ok(())
    }

    async fn find_one_time_token(
        &self,
        kind: OneTimeTokenKind,
        token_hash: &str,
    ) -> StoreResult<Option<OneTimeToken>> {
        Ok(self
            .tokens
            .read()
            .await
            .get(&(kind, token_hash.to_string()))
            .cloned())
    }

    async fn mark_one_time_token_used(
        &self,
        kind: OneTimeTokenKind,
        token_hash: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tokens = self.tokens.write().await;
        match tokens.get_mut(&(kind, token_hash.to_string())) {
            Some(token) if !token.used => {
                token.used = true;
                token.used_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn is_durable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use medauth_core::ClientContext;

    fn user(email: &str) -> User {
        User::new(email, email, "hash", None)
    }

    fn session_for(user_id: Uuid, tag: &str) -> Session {
        let now = Utc::now();
        Session::new(
            user_id,
            format!("access-{tag}"),
            format!("refresh-{tag}"),
            now + ChronoDuration::minutes(240),
            now + ChronoDuration::days(7),
            &ClientContext::default(),
            now,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_entries_expire() {
        let cache = MemoryCache::new();
        cache
            .set_ex("session:access:abc", "user-1", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.exists("session:access:abc").await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(!cache.exists("session:access:abc").await.unwrap());
        assert_eq!(cache.get("session:access:abc").await.unwrap(), None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_cache_take_is_single_shot() {
        let cache = MemoryCache::new();
        cache
            .set_ex("k", "v", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.take("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(cache.take("k").await.unwrap(), None);
        assert!(!cache.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_ttl_reported() {
        let cache = MemoryCache::new();
        cache
            .set_ex("k", "v", Duration::from_secs(3600))
            .await
            .unwrap();
        let ttl = cache.ttl("k").await.unwrap();
        assert!(ttl <= Duration::from_secs(3600));
        assert!(ttl > Duration::from_secs(3590));
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemoryStore::new();
        store.insert_user(&user("a@example.com")).await.unwrap();

        let result = store.insert_user(&user("a@example.com")).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_update_missing_user() {
        let store = MemoryStore::new();
        let result = store.update_user(&user("ghost@example.com")).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_revoke_session_keeps_first_reason() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let session = session_for(owner, "1");
        store.insert_session(&session).await.unwrap();

        let revoked = store
            .revoke_session(session.id, "user_logout", Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(!revoked.is_active);

        let again = store
            .revoke_session(session.id, "token_refresh", Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.revoked_reason.as_deref(), Some("user_logout"));

        assert!(store
            .find_active_session_by_refresh_jti("refresh-1")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .revoke_session(Uuid::new_v4(), "x", Utc::now())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_user_sessions_filters() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let first = session_for(owner, "1");
        let second = session_for(owner, "2");
        store.insert_session(&first).await.unwrap();
        store.insert_session(&second).await.unwrap();
        store
            .insert_session(&session_for(Uuid::new_v4(), "3"))
            .await
            .unwrap();
        store
            .revoke_session(first.id, "user_revoked", Utc::now())
            .await
            .unwrap();

        assert_eq!(store.list_user_sessions(owner, false).await.unwrap().len(), 2);
        let active = store.list_user_sessions(owner, true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
    }

    #[tokio::test]
    async fn test_mark_one_time_token_used_once() {
        let store = MemoryStore::new();
        let token = OneTimeToken::new(
            OneTimeTokenKind::PasswordReset,
            Uuid::new_v4(),
            "digest",
            Utc::now() + ChronoDuration::hours(1),
            &ClientContext::default(),
        );
        store.insert_one_time_token(&token).await.unwrap();

        // Same hash under the other kind is a different row
        assert!(store
            .find_one_time_token(OneTimeTokenKind::EmailVerification, "digest")
            .await
            .unwrap()
            .is_none());

        let kind = OneTimeTokenKind::PasswordReset;
        assert!(store.mark_one_time_token_used(kind, "digest", Utc::now()).await.unwrap());
        assert!(!store.mark_one_time_token_used(kind, "digest", Utc::now()).await.unwrap());

        let stored = store.find_one_time_token(kind, "digest").await.unwrap().unwrap();
        assert!(stored.used);
        assert!(stored.used_at.is_some());
    }
}
