use crate::error::CacheError;
use async_trait::async_trait;
use hexabase_common::config::RemoteServiceConfig;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The minimal key/value surface every higher-level store in this crate is
/// built on. Kept narrow (get/set/del/get-and-delete/incr) rather than
/// exposing raw `redis::Cmd` so `InMemoryCache` can back tests without a
/// running Redis.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn del(&self, key: &str) -> Result<(), CacheError>;
    async fn get_and_delete(&self, key: &str) -> Result<Option<String>, CacheError>;
    /// Sets `key` to `value` with `ttl` only if it does not already exist.
    /// Returns `true` if the set happened. Used by lease acquisition and
    /// idempotency keys where only the first writer should win.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;
    /// Increments `key` by one, creating it with `ttl` if absent, and
    /// returns the post-increment value. Used by rate limiters.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, CacheError>;
}

/// Redis-backed implementation, the one wired into the running control
/// plane. Connects through `redis::aio::ConnectionManager`, which
/// transparently reconnects, so callers don't need their own retry loop
/// for transient connection drops.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn configured(config: &RemoteServiceConfig) -> Result<Self, CacheError> {
        let url = format!("redis://{}:{}", config.host, config.port);
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn get_and_delete(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        if value.is_some() {
            let _: () = conn.del(key).await?;
        }
        Ok(value)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.manager.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, CacheError> {
        let mut conn = self.manager.clone();
        let count: i64 = conn.incr(key, 1).await?;
        if count == 1 {
            let _: () = conn.expire(key, ttl.as_secs().max(1) as i64).await?;
        }
        Ok(count)
    }
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process fake used by unit tests across the workspace, matching the
/// teacher's habit of pairing every `Db*Repo` with a `Mock*Repo` test
/// double. Not used in the running binary.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn prune_if_expired(entries: &mut HashMap<String, Entry>, key: &str) {
        if let Some(entry) = entries.get(key) {
            if entry.expires_at <= Instant::now() {
                entries.remove(key);
            }
        }
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        Self::prune_if_expired(&mut entries, key);
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.remove(key);
        Ok(())
    }

    async fn get_and_delete(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        Self::prune_if_expired(&mut entries, key);
        Ok(entries.remove(key).map(|e| e.value))
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        Self::prune_if_expired(&mut entries, key);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, CacheError> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        Self::prune_if_expired(&mut entries, key);
        let next = match entries.get(key) {
            Some(entry) => entry.value.parse::<i64>().unwrap_or(0) + 1,
            None => 1,
        };
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    async fn set_nx_ex_only_wins_once() {
        let cache = InMemoryCache::new();
        assert!(cache
            .set_nx_ex("ws:1", "holder-a", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!cache
            .set_nx_ex("ws:1", "holder-b", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[test]
    async fn get_and_delete_removes_the_key() {
        let cache = InMemoryCache::new();
        cache
            .set_ex("state:abc", "verifier", Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(
            cache.get_and_delete("state:abc").await.unwrap(),
            Some("verifier".to_string())
        );
        assert_eq!(cache.get("state:abc").await.unwrap(), None);
    }

    #[test]
    async fn incr_with_expiry_counts_up() {
        let cache = InMemoryCache::new();
        assert_eq!(
            cache
                .incr_with_expiry("rl:login:1.2.3.4", Duration::from_secs(60))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            cache
                .incr_with_expiry("rl:login:1.2.3.4", Duration::from_secs(60))
                .await
                .unwrap(),
            2
        );
    }
}
