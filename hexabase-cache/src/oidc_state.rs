use crate::client::Cache;
use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on how long an OIDC authorization-code flow may be in
/// flight before its state is considered abandoned.
pub const OIDC_STATE_TTL: Duration = Duration::from_secs(10 * 60);

/// PKCE + CSRF state for a single in-flight external OIDC login, keyed by
/// the opaque `state` parameter handed to the identity provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OidcFlowState {
    pub pkce_verifier: String,
    pub nonce: String,
    pub redirect_uri: String,
    pub requested_at_unix: i64,
    /// Target audience for the access token this flow will mint: the
    /// platform audience for a plain UI login, or a Workspace id when the
    /// flow is the vCluster kubeconfig exec plugin's own OIDC round trip
    /// (spec §4.2 "vCluster OIDC plumbing").
    pub audience: String,
}

/// Get-and-delete store backing the external login flow: a `state` value
/// can be redeemed exactly once, closing the replay window the authorize
/// redirect would otherwise leave open.
pub struct OidcStateStore {
    cache: Arc<dyn Cache>,
}

impl OidcStateStore {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    fn key(state: &str) -> String {
        format!("oidc:state:{state}")
    }

    pub async fn put(&self, state: &str, flow: &OidcFlowState) -> Result<(), CacheError> {
        let payload = serde_json::to_string(flow)?;
        self.cache
            .set_ex(&Self::key(state), &payload, OIDC_STATE_TTL)
            .await
    }

    /// Consumes the state: a second call for the same `state` returns
    /// `None`, whether or not the first call happened.
    pub async fn take(&self, state: &str) -> Result<Option<OidcFlowState>, CacheError> {
        match self.cache.get_and_delete(&Self::key(state)).await? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryCache;
    use test_r::test;

    #[test]
    async fn state_is_redeemed_exactly_once() {
        let store = OidcStateStore::new(Arc::new(InMemoryCache::new()));
        let flow = OidcFlowState {
            pkce_verifier: "verifier".to_string(),
            nonce: "nonce".to_string(),
            redirect_uri: "https://app.example/callback".to_string(),
            requested_at_unix: 0,
            audience: "hexabase-platform".to_string(),
        };
        store.put("abc123", &flow).await.unwrap();

        let first = store.take("abc123").await.unwrap();
        assert!(first.is_some());

        let second = store.take("abc123").await.unwrap();
        assert!(second.is_none());
    }
}
