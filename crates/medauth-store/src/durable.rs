use crate::StoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medauth_core::{OneTimeToken, OneTimeTokenKind, Session, User};
use uuid::Uuid;

/// Relational store holding the audit-grade identity records.
///
/// Misses are `Ok(None)`, never errors. Rows are only ever inserted or
/// updated; nothing here hard-deletes.
#[async_trait]
pub trait DurableStore: Send + Sync {
    // Users

    /// Insert a new user. Duplicate email yields [`crate::StoreError::Conflict`].
    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_normalized_email(&self, normalized: &str) -> StoreResult<Option<User>>;
    /// Overwrite the mutable columns of an existing user
    async fn update_user(&self, user: &User) -> StoreResult<()>;

    // Sessions

    async fn insert_session(&self, session: &Session) -> StoreResult<()>;
    async fn get_session(&self, id: Uuid) -> StoreResult<Option<Session>>;
    async fn find_active_session_by_refresh_jti(&self, jti: &str) -> StoreResult<Option<Session>>;
    async fn find_session_by_access_jti(&self, jti: &str) -> StoreResult<Option<Session>>;
    /// Newest first
    async fn list_user_sessions(
        &self,
        user_id: Uuid,
        active_only: bool,
    ) -> StoreResult<Vec<Session>>;
    /// Flip an active session to revoked and return the row as stored.
    ///
    /// An already revoked row is returned unchanged (its original reason is
    /// kept). `None` means no such session.
    async fn revoke_session(
        &self,
        id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Session>>;

    // One-time tokens

    async fn insert_one_time_token(&self, token: &OneTimeToken) -> StoreResult<()>;
    /// Look up by hash regardless of `used`
    async fn find_one_time_token(
        &self,
        kind: OneTimeTokenKind,
        token_hash: &str,
    ) -> StoreResult<Option<OneTimeToken>>;
    /// Set `used`/`used_at` on an unused row. Returns false when no unused
    /// row matched.
    async fn mark_one_time_token_used(
        &self,
        kind: OneTimeTokenKind,
        token_hash: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn health_check(&self) -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;

    fn is_durable(&self) -> bool;
}
