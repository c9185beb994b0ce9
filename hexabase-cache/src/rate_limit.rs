use crate::client::Cache;
use crate::error::CacheError;
use std::sync::Arc;
use std::time::Duration;

/// Fixed-window counter rate limiter. Good enough for the login/refresh
/// surfaces in spec §4.2: it can admit a short burst at window boundaries,
/// which is an acceptable trade against the simplicity of a single
/// `INCR` + `EXPIRE` pair per check.
pub struct RateLimiter {
    cache: Arc<dyn Cache>,
}

pub struct RateLimit {
    pub max_requests: i64,
    pub window: Duration,
}

impl RateLimit {
    pub const LOGIN_PER_IP: RateLimit = RateLimit {
        max_requests: 10,
        window: Duration::from_secs(60),
    };
    pub const REFRESH_PER_USER: RateLimit = RateLimit {
        max_requests: 30,
        window: Duration::from_secs(60),
    };
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// Returns `true` if the call under `scope`/`key` is within budget,
    /// incrementing its counter as a side effect. `scope` namespaces
    /// distinct limiters (`login`, `refresh`) so the same subject can't
    /// collide across them.
    pub async fn check(
        &self,
        scope: &str,
        key: &str,
        limit: &RateLimit,
    ) -> Result<bool, CacheError> {
        let cache_key = format!("rl:{scope}:{key}");
        let count = self.cache.incr_with_expiry(&cache_key, limit.window).await?;
        Ok(count <= limit.max_requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryCache;
    use test_r::test;

    #[test]
    async fn admits_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new(Arc::new(InMemoryCache::new()));
        let limit = RateLimit {
            max_requests: 3,
            window: Duration::from_secs(60),
        };

        for _ in 0..3 {
            assert!(limiter.check("login", "1.2.3.4", &limit).await.unwrap());
        }
        assert!(!limiter.check("login", "1.2.3.4", &limit).await.unwrap());
    }

    #[test]
    async fn scopes_are_independent() {
        let limiter = RateLimiter::new(Arc::new(InMemoryCache::new()));
        let limit = RateLimit {
            max_requests: 1,
            window: Duration::from_secs(60),
        };
        assert!(limiter.check("login", "user-1", &limit).await.unwrap());
        assert!(limiter.check("refresh", "user-1", &limit).await.unwrap());
    }
}
