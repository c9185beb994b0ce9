//! Composition root (spec layout §0): wires every crate's `Db*` repos
//! into every crate's `*ServiceDefault`, the way the teacher's
//! `cloud_service::bootstrap::Services::new`/`make_with_db` does — minus
//! the generic `Pool`/`DB::Db` ceremony, since this control plane only
//! ever runs against Postgres (`hexabase_service_base::db::PostgresPool`
//! already made that simplification).

use crate::config::HexabaseServerConfig;
use hexabase_aiops::{AiopsGateway, AiopsGatewayDefault};
use hexabase_bus::{Bus, RedisBus};
use hexabase_cache::lease::LeaseManager;
use hexabase_cache::{Cache, RedisCache};
use hexabase_functions::repo::{
    ApplicationRepo, DbApplicationRepo, DbFunctionRepo, DbFunctionTriggerRepo, DbFunctionVersionRepo, FunctionRepo, FunctionTriggerRepo,
    FunctionVersionRepo,
};
use hexabase_functions::{FunctionsService, FunctionsServiceDefault};
use hexabase_hierarchy::audit::{AuditSink, DbAuditSink};
use hexabase_hierarchy::repo::{
    AlertRepo, DbAlertRepo, DbGroupRepo, DbOrganizationRepo, DbOrganizationUserRepo, DbPlanRepo, DbProjectRepo, DbRoleAssignmentRepo,
    DbRoleRepo, DbUserRepo, DbWorkspaceRepo, GroupRepo, OrganizationRepo, OrganizationUserRepo, PlanRepo, ProjectRepo,
    RoleAssignmentRepo, RoleRepo, UserRepo, WorkspaceRepo,
};
use hexabase_hierarchy::{HierarchyService, HierarchyServiceDefault};
use hexabase_identity::oidc::{ExternalProviderConfig, OidcProviderRegistry};
use hexabase_identity::repo::DbAuthTokenRepo;
use hexabase_identity::{IdentityService, IdentityServiceDefault, KeyRing};
use hexabase_orchestrator::host::{HostClusterApi, KubeHostClusterApi};
use hexabase_orchestrator::virtualization::{InMemoryVirtualizationApi, VirtualizationApi};
use hexabase_orchestrator::{OrchestratorService, OrchestratorServiceDefault};
use hexabase_service_base::db::PostgresPool;
use hexabase_tasks::repo::DbTaskRepo;
use hexabase_tasks::{TaskEngine, TaskEngineDefault};
use std::collections::HashMap;
use std::sync::Arc;

/// Every `*Service` the control plane is built from, composed once at
/// startup and shared (via `Arc`) across the task worker loop and any
/// future edge layer. Mirrors the teacher's `Services` struct shape.
#[derive(Clone)]
pub struct Services {
    pub hierarchy: Arc<HierarchyServiceDefault>,
    pub identity: Arc<dyn IdentityService>,
    pub orchestrator: Arc<dyn OrchestratorService>,
    pub functions: Arc<dyn FunctionsService>,
    pub aiops: Arc<dyn AiopsGateway>,
    pub tasks: Arc<dyn TaskEngine>,
    pub cache: Arc<dyn Cache>,
    pub bus: Arc<dyn Bus>,
    pub db: PostgresPool,
    /// Exposed directly rather than behind a service: nothing in
    /// SPEC_FULL.md yet triggers an alert (that needs the metrics
    /// ingestion pipeline §11 scopes out), but the table and repo exist
    /// so a future sweep can write to it without another migration.
    pub alerts: Arc<dyn AlertRepo>,
}

impl Services {
    pub async fn new(config: &HexabaseServerConfig) -> Result<Self, anyhow::Error> {
        let db = PostgresPool::configured(&config.db).await?;
        let cache: Arc<dyn Cache> = Arc::new(RedisCache::configured(&config.cache).await?);
        let bus: Arc<dyn Bus> = Arc::new(RedisBus::configured(&config.bus).await?);
        Self::make_with(config, db, cache, bus).await
    }

    async fn make_with(
        config: &HexabaseServerConfig,
        db: PostgresPool,
        cache: Arc<dyn Cache>,
        bus: Arc<dyn Bus>,
    ) -> Result<Self, anyhow::Error> {
        let orgs: Arc<dyn OrganizationRepo> = Arc::new(DbOrganizationRepo::new(db.clone()));
        let users: Arc<dyn UserRepo> = Arc::new(DbUserRepo::new(db.clone()));
        let org_users: Arc<dyn OrganizationUserRepo> = Arc::new(DbOrganizationUserRepo::new(db.clone()));
        let workspaces: Arc<dyn WorkspaceRepo> = Arc::new(DbWorkspaceRepo::new(db.clone()));
        let plans: Arc<dyn PlanRepo> = Arc::new(DbPlanRepo::new(db.clone()));
        let projects: Arc<dyn ProjectRepo> = Arc::new(DbProjectRepo::new(db.clone()));
        let groups: Arc<dyn GroupRepo> = Arc::new(DbGroupRepo::new(db.clone()));
        let roles: Arc<dyn RoleRepo> = Arc::new(DbRoleRepo::new(db.clone()));
        let role_assignments: Arc<dyn RoleAssignmentRepo> = Arc::new(DbRoleAssignmentRepo::new(db.clone()));
        let alerts: Arc<dyn AlertRepo> = Arc::new(DbAlertRepo::new(db.clone()));
        let audit: Arc<dyn AuditSink> = Arc::new(DbAuditSink::new(db.clone()));

        let hierarchy = Arc::new(HierarchyServiceDefault::new(
            orgs,
            users,
            org_users,
            workspaces.clone(),
            plans.clone(),
            projects,
            groups,
            roles,
            role_assignments,
            audit.clone(),
            bus.clone(),
        ));

        let tokens = Arc::new(DbAuthTokenRepo::new(db.clone()));
        let providers: HashMap<String, ExternalProviderConfig> = config
            .oidc_providers
            .iter()
            .map(|(name, cfg)| {
                (
                    name.clone(),
                    ExternalProviderConfig {
                        issuer_url: cfg.issuer_url.clone(),
                        client_id: cfg.client_id.clone(),
                        client_secret: cfg.client_secret.clone(),
                    },
                )
            })
            .collect();
        let keys = Arc::new(KeyRing::generate()?);
        let identity: Arc<dyn IdentityService> = Arc::new(IdentityServiceDefault::new(
            tokens,
            hierarchy.clone(),
            Arc::new(OidcProviderRegistry::new(providers)),
            keys,
            bus.clone(),
            cache.clone(),
        ));

        let host: Arc<dyn HostClusterApi> = {
            let kube = KubeHostClusterApi::new();
            kube.connect().await?;
            Arc::new(kube)
        };
        let virtualization: Arc<dyn VirtualizationApi> = Arc::new(InMemoryVirtualizationApi::new());
        let leases = LeaseManager::new(cache.clone());
        let task_repo = Arc::new(DbTaskRepo::new(db.clone()));
        let tasks: Arc<dyn TaskEngine> = Arc::new(TaskEngineDefault::new(task_repo, bus.clone()));

        let orchestrator: Arc<dyn OrchestratorService> = Arc::new(OrchestratorServiceDefault::new(
            workspaces.clone(),
            plans.clone(),
            hierarchy.clone(),
            tasks.clone(),
            host,
            virtualization,
            leases,
        ));

        let function_repo: Arc<dyn FunctionRepo> = Arc::new(DbFunctionRepo::new(db.clone()));
        let version_repo: Arc<dyn FunctionVersionRepo> = Arc::new(DbFunctionVersionRepo::new(db.clone()));
        let trigger_repo: Arc<dyn FunctionTriggerRepo> = Arc::new(DbFunctionTriggerRepo::new(db.clone()));
        let application_repo: Arc<dyn ApplicationRepo> = Arc::new(DbApplicationRepo::new(db.clone()));
        let provider = functions_provider();
        let functions: Arc<dyn FunctionsService> = Arc::new(FunctionsServiceDefault::new(
            function_repo.clone(),
            version_repo,
            trigger_repo,
            application_repo.clone(),
            workspaces.clone(),
            provider,
            bus.clone(),
        ));

        let aiops: Arc<dyn AiopsGateway> = Arc::new(AiopsGatewayDefault::new(
            identity.clone(),
            hierarchy.clone(),
            functions.clone(),
            function_repo,
            application_repo,
            audit,
        ));

        Ok(Self {
            hierarchy,
            identity,
            orchestrator,
            functions,
            aiops,
            tasks,
            cache,
            bus,
            db,
            alerts,
        })
    }
}

/// Single, globally-configured `Provider` (SPEC_FULL.md §11 open-question
/// decision: per-workspace dynamic provider selection via
/// `workspace_provider_configs` is out of scope for this build — see
/// DESIGN.md). Fission is the teacher-adjacent choice: the spec's
/// functions model (source/image versions, cold-start metrics) maps onto
/// Fission's build-then-invoke lifecycle more directly than Knative's.
fn functions_provider() -> Arc<dyn hexabase_functions::provider::Provider> {
    Arc::new(hexabase_functions::provider::FissionProvider::new("hexabase-functions"))
}
