//! Redis-backed [`FastCache`].
//!
//! Uses a multiplexed [`ConnectionManager`], which reconnects on its own and is
//! cheap to clone per call. Retries and timeouts are left to the client.

use crate::cache::{ttl_secs, FastCache};
use crate::StoreResult;
use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct RedisCache {
    redis: ConnectionManager,
}

impl RedisCache {
    /// Connect to `redis_url`. The URL may carry credentials and is never logged.
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let redis = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        info!("Connected to Redis");
        Ok(Self { redis })
    }

    pub fn from_manager(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl FastCache for RedisCache {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.redis.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.redis.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.redis.clone();
        let count: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(count > 0)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.redis.clone();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    // GETDEL needs Redis 6.2+
    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.redis.clone();
        let value: Option<String> = redis::cmd("GETDEL").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.redis.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> String {
        std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/15".to_string())
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_redis_take_is_single_shot() {
        let cache = RedisCache::connect(&redis_url()).await.unwrap();
        let key = format!("test:take:{}", uuid::Uuid::new_v4());

        cache.set_ex(&key, "user-1", Duration::from_secs(30)).await.unwrap();
        assert!(cache.exists(&key).await.unwrap());
        assert_eq!(cache.take(&key).await.unwrap().as_deref(), Some("user-1"));
        assert_eq!(cache.take(&key).await.unwrap(), None);
        assert!(!cache.delete(&key).await.unwrap());
    }
}
