use crate::StoreResult;
use async_trait::async_trait;
use std::time::Duration;

/// Low-latency TTL key/value store.
///
/// Every entry written through this trait carries a TTL, so a value that is
/// never explicitly deleted still disappears on its own. Single-key
/// operations must be atomic on the backend; nothing here coordinates across
/// keys.
#[async_trait]
pub trait FastCache: Send + Sync {
    /// Store `value` under `key` for `ttl`. Sub-second TTLs round up to one second.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Remove `key`, returning whether it was present
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Atomically read and remove `key`. Of several concurrent callers at
    /// most one observes the value.
    async fn take(&self, key: &str) -> StoreResult<Option<String>>;

    async fn ping(&self) -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;
}

/// TTL in whole seconds, never zero
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_rounding() {
        assert_eq!(ttl_secs(Duration::from_secs(60)), 60);
        assert_eq!(ttl_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_secs(Duration::ZERO), 1);
    }
}
