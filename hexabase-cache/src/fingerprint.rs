use crate::client::Cache;
use crate::error::CacheError;
use std::sync::Arc;
use std::time::Duration;

/// Session-device binding: a hash derived from the issuing request's
/// User-Agent/client attributes, stored against the session id and
/// re-checked on every refresh so a stolen refresh token cannot be used
/// from a materially different client.
pub struct FingerprintStore {
    cache: Arc<dyn Cache>,
}

impl FingerprintStore {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    fn key(session_id: &str) -> String {
        format!("identity:fingerprint:{session_id}")
    }

    pub async fn bind(
        &self,
        session_id: &str,
        fingerprint: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.cache.set_ex(&Self::key(session_id), fingerprint, ttl).await
    }

    pub async fn matches(&self, session_id: &str, fingerprint: &str) -> Result<bool, CacheError> {
        match self.cache.get(&Self::key(session_id)).await? {
            Some(bound) => Ok(bound == fingerprint),
            None => Ok(false),
        }
    }
}
