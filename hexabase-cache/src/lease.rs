use crate::client::Cache;
use crate::error::CacheError;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Default lease duration for a Workspace under active reconciliation
/// (spec §5): long enough to cover one orchestrator stage, short enough
/// that a crashed worker's lease clears before an operator would think to
/// intervene manually.
pub const WORKSPACE_LEASE_TTL: Duration = Duration::from_secs(120);

/// Default task lease duration (spec §5): heartbeat-renewed while a
/// worker is actively processing a stage.
pub const TASK_LEASE_TTL: Duration = Duration::from_secs(60);

/// A held lease, returned by [`LeaseManager::acquire`]. Carries the
/// random `token` that proves ownership so `renew`/`release` can't affect
/// a lease some other holder has since acquired after this one expired.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseHandle {
    pub resource: String,
    pub token: String,
}

/// Mutual-exclusion lease over an arbitrary named resource (`ws:<id>`,
/// `task:<id>`), backed by a single cache key holding the current
/// holder's token. Acquisition is a single `SET NX EX`; renewal and
/// release both verify the caller still holds the token before acting,
/// so a lease that already expired and was re-acquired by someone else is
/// never silently stolen back.
pub struct LeaseManager {
    cache: Arc<dyn Cache>,
}

impl LeaseManager {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    fn key(resource: &str) -> String {
        format!("lease:{resource}")
    }

    pub async fn acquire(
        &self,
        resource: &str,
        ttl: Duration,
    ) -> Result<Option<LeaseHandle>, CacheError> {
        let token = Uuid::new_v4().to_string();
        let acquired = self.cache.set_nx_ex(&Self::key(resource), &token, ttl).await?;
        if acquired {
            Ok(Some(LeaseHandle {
                resource: resource.to_string(),
                token,
            }))
        } else {
            Ok(None)
        }
    }

    /// Extends the lease if `handle` is still the current holder.
    /// Returns `false` if the lease was lost (expired and possibly
    /// re-acquired by another worker) before the heartbeat arrived.
    pub async fn renew(&self, handle: &LeaseHandle, ttl: Duration) -> Result<bool, CacheError> {
        let key = Self::key(&handle.resource);
        match self.cache.get(&key).await? {
            Some(current) if current == handle.token => {
                self.cache.set_ex(&key, &handle.token, ttl).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Releases the lease if `handle` is still the current holder;
    /// otherwise a no-op, since the resource is already someone else's.
    pub async fn release(&self, handle: &LeaseHandle) -> Result<(), CacheError> {
        let key = Self::key(&handle.resource);
        if let Some(current) = self.cache.get(&key).await? {
            if current == handle.token {
                self.cache.del(&key).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryCache;
    use test_r::test;

    #[test]
    async fn second_acquire_fails_while_held() {
        let mgr = LeaseManager::new(Arc::new(InMemoryCache::new()));
        let first = mgr.acquire("ws:123", WORKSPACE_LEASE_TTL).await.unwrap();
        assert!(first.is_some());

        let second = mgr.acquire("ws:123", WORKSPACE_LEASE_TTL).await.unwrap();
        assert!(second.is_none());
    }

    #[test]
    async fn release_then_reacquire_succeeds() {
        let mgr = LeaseManager::new(Arc::new(InMemoryCache::new()));
        let handle = mgr.acquire("ws:123", WORKSPACE_LEASE_TTL).await.unwrap().unwrap();
        mgr.release(&handle).await.unwrap();

        let second = mgr.acquire("ws:123", WORKSPACE_LEASE_TTL).await.unwrap();
        assert!(second.is_some());
    }

    #[test]
    async fn renew_fails_for_a_stale_handle() {
        let mgr = LeaseManager::new(Arc::new(InMemoryCache::new()));
        let handle = mgr.acquire("ws:123", WORKSPACE_LEASE_TTL).await.unwrap().unwrap();
        mgr.release(&handle).await.unwrap();
        let other = mgr.acquire("ws:123", WORKSPACE_LEASE_TTL).await.unwrap().unwrap();
        assert_ne!(handle.token, other.token);

        assert!(!mgr.renew(&handle, WORKSPACE_LEASE_TTL).await.unwrap());
        assert!(mgr.renew(&other, WORKSPACE_LEASE_TTL).await.unwrap());
    }
}
