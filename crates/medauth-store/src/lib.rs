//! medauth Store - fast cache and durable store backends
//!
//! Two independent stores back the session subsystem:
//! - [`FastCache`]: TTL key/value store answering "is this token live right now"
//! - [`DurableStore`]: relational store holding users, sessions and one-time
//!   token rows as the audit source of truth
//!
//! There is no transaction spanning both. Callers order their writes and rely
//! on cache TTLs to bound any inconsistency.

pub mod cache;
pub mod durable;
pub mod memory;
pub mod postgres;
pub mod redis_cache;

pub use cache::FastCache;
pub use durable::DurableStore;
pub use memory::{MemoryCache, MemoryStore};
pub use postgres::PgStore;
pub use redis_cache::RedisCache;

use medauth_core::AuthError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cache backend error: {0}")]
    Cache(String),

    #[error("database error: {0}")]
    Database(String),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Cache(err.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if postgres::is_unique_violation(&err) {
            return StoreError::Conflict(err.to_string());
        }
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AuthError::NotFound(what),
            StoreError::Conflict(what) => AuthError::Conflict(what),
            other => AuthError::Infrastructure(other.to_string()),
        }
    }
}
