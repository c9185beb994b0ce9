//! Composition root binary for the control plane (spec §0 crate layout:
//! "composition root, config, task worker runtime"). No HTTP/gRPC edge
//! of its own — the spec's external interfaces are a contract for a
//! future edge service to implement against these same `Services` — so
//! `HexabaseServer::run` only ever starts the task worker loop and waits
//! for shutdown, the inner half of the teacher's `CloudService::run`.

pub mod bootstrap;
pub mod config;
pub mod healthcheck;
pub mod worker;

#[cfg(test)]
test_r::enable!();

use crate::bootstrap::Services;
use crate::config::HexabaseServerConfig;
use crate::healthcheck::{BusReadiness, CacheReadiness, CompositeReadiness, DbReadiness, ReadinessCheck};
use crate::worker::{TaskWorker, WorkerDeps};
use anyhow::Context;
use include_dir::{include_dir, Dir};
use prometheus::Registry;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

static HIERARCHY_MIGRATIONS: Dir = include_dir!("$CARGO_MANIFEST_DIR/../hexabase-hierarchy/migrations");
static IDENTITY_MIGRATIONS: Dir = include_dir!("$CARGO_MANIFEST_DIR/../hexabase-identity/migrations");
static TASKS_MIGRATIONS: Dir = include_dir!("$CARGO_MANIFEST_DIR/../hexabase-tasks/migrations");
static FUNCTIONS_MIGRATIONS: Dir = include_dir!("$CARGO_MANIFEST_DIR/../hexabase-functions/migrations");

pub struct HexabaseServer {
    config: HexabaseServerConfig,
    services: Services,
    readiness: Arc<CompositeReadiness>,
}

impl HexabaseServer {
    pub async fn new(config: HexabaseServerConfig, _prometheus_registry: Registry) -> Result<Self, anyhow::Error> {
        info!("initializing hexabase-server");

        let db = hexabase_service_base::db::PostgresPool::configured(&config.db).await.context("db connect")?;
        for (label, migrations) in [
            ("hierarchy", &HIERARCHY_MIGRATIONS),
            ("identity", &IDENTITY_MIGRATIONS),
            ("tasks", &TASKS_MIGRATIONS),
            ("functions", &FUNCTIONS_MIGRATIONS),
        ] {
            db.migrate(migrations).await.with_context(|| format!("{label} migration"))?;
        }

        let services = Services::new(&config).await.context("service initialization")?;

        let readiness = Arc::new(CompositeReadiness::new(vec![
            Arc::new(DbReadiness::new(services.db.clone())) as Arc<dyn ReadinessCheck>,
            Arc::new(CacheReadiness::new(services.cache.clone())),
            Arc::new(BusReadiness::new(services.bus.clone())),
        ]));

        Ok(Self { config, services, readiness })
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub async fn ready(&self) -> bool {
        self.readiness.ready().await
    }

    /// Spawns the task worker loop and blocks until `shutdown` fires,
    /// mirroring the teacher's `CloudService::run` spawning its HTTP/gRPC
    /// servers into a `JoinSet` — here there's just the one long-running
    /// task, since this control plane has no edge of its own.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), anyhow::Error> {
        let deps = WorkerDeps {
            orchestrator: self.services.orchestrator.clone(),
            functions: self.services.functions.clone(),
            tasks: self.services.tasks.clone(),
        };
        let worker = Arc::new(TaskWorker::new(deps, self.config.worker.clone()));
        worker.run(shutdown).await;
        Ok(())
    }
}

/// Resolves once SIGTERM/SIGINT is received (or immediately, on
/// platforms without `tokio::signal` support for one of them), so `run`
/// can hand its `watch::Receiver` to both the worker loop and anything
/// else that needs a graceful-shutdown signal.
pub fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        info!("shutdown signal received");
        let _ = tx.send(true);
    });
    rx
}
