//! Readiness probe contract (SPEC_FULL.md §10): the control plane has no
//! HTTP edge of its own, so this isn't a `/healthcheck` route like the
//! teacher's `HealthcheckApi` — it's the trait an operator's own liveness
//! tooling (or a future edge layer) composes over the same dependencies
//! the worker loop needs anyway: DB, cache, bus.

use async_trait::async_trait;
use hexabase_bus::Bus;
use hexabase_cache::Cache;
use hexabase_service_base::db::PostgresPool;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady,
}

#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    fn name(&self) -> &'static str;
    async fn check(&self) -> Readiness;
}

pub struct DbReadiness {
    pool: PostgresPool,
}

impl DbReadiness {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadinessCheck for DbReadiness {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn check(&self) -> Readiness {
        match sqlx::query("SELECT 1").execute(self.pool.inner()).await {
            Ok(_) => Readiness::Ready,
            Err(err) => {
                tracing::warn!(error = %err, "db readiness check failed");
                Readiness::NotReady
            }
        }
    }
}

pub struct CacheReadiness {
    cache: Arc<dyn Cache>,
}

impl CacheReadiness {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ReadinessCheck for CacheReadiness {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn check(&self) -> Readiness {
        let probe_key = "hexabase:readiness-probe";
        match self.cache.set_ex(probe_key, "1", Duration::from_secs(5)).await {
            Ok(()) => Readiness::Ready,
            Err(err) => {
                tracing::warn!(error = %err, "cache readiness check failed");
                Readiness::NotReady
            }
        }
    }
}

pub struct BusReadiness {
    bus: Arc<dyn Bus>,
}

impl BusReadiness {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ReadinessCheck for BusReadiness {
    fn name(&self) -> &'static str {
        "bus"
    }

    async fn check(&self) -> Readiness {
        match self.bus.ensure_group(hexabase_bus::Topic::SystemMaintenance, "readiness-probe").await {
            Ok(()) => Readiness::Ready,
            Err(err) => {
                tracing::warn!(error = %err, "bus readiness check failed");
                Readiness::NotReady
            }
        }
    }
}

/// Composes every dependency check; `ready()` is `Readiness::Ready` only if
/// all of them are.
pub struct CompositeReadiness {
    checks: Vec<Arc<dyn ReadinessCheck>>,
}

impl CompositeReadiness {
    pub fn new(checks: Vec<Arc<dyn ReadinessCheck>>) -> Self {
        Self { checks }
    }

    pub async fn ready(&self) -> bool {
        for check in &self.checks {
            if check.check().await == Readiness::NotReady {
                tracing::warn!(component = check.name(), "dependency not ready");
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    struct AlwaysReady;

    #[async_trait]
    impl ReadinessCheck for AlwaysReady {
        fn name(&self) -> &'static str {
            "always-ready"
        }

        async fn check(&self) -> Readiness {
            Readiness::Ready
        }
    }

    struct AlwaysNotReady;

    #[async_trait]
    impl ReadinessCheck for AlwaysNotReady {
        fn name(&self) -> &'static str {
            "always-not-ready"
        }

        async fn check(&self) -> Readiness {
            Readiness::NotReady
        }
    }

    #[test]
    async fn composite_is_ready_only_if_every_check_is() {
        let all_ready = CompositeReadiness::new(vec![Arc::new(AlwaysReady), Arc::new(AlwaysReady)]);
        assert!(all_ready.ready().await);

        let one_down = CompositeReadiness::new(vec![Arc::new(AlwaysReady), Arc::new(AlwaysNotReady)]);
        assert!(!one_down.ready().await);
    }
}
