use crate::client::Cache;
use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// JWKS is small, globally shared, and expensive to compute on every
/// verification, so it gets a single cache slot with a short TTL rather
/// than a per-key store.
const JWKS_CACHE_KEY: &str = "identity:jwks:current";
const JWKS_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedJwks {
    pub keys_json: String,
    pub fetched_at_unix: i64,
}

pub struct JwksCache {
    cache: Arc<dyn Cache>,
}

impl JwksCache {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    pub async fn get(&self) -> Result<Option<CachedJwks>, CacheError> {
        match self.cache.get(JWKS_CACHE_KEY).await? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, jwks: &CachedJwks) -> Result<(), CacheError> {
        let payload = serde_json::to_string(jwks)?;
        self.cache.set_ex(JWKS_CACHE_KEY, &payload, JWKS_TTL).await
    }

    pub async fn invalidate(&self) -> Result<(), CacheError> {
        self.cache.del(JWKS_CACHE_KEY).await
    }
}
