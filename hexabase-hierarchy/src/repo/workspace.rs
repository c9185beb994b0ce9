use crate::model::{Plan, PlanTier, ResourceQuota, Workspace, WorkspaceStatus};
use async_trait::async_trait;
use hexabase_common::ids::{OrgId, PlanId, WorkspaceId};
use hexabase_service_base::db::PostgresPool;
use hexabase_service_base::RepoError;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait WorkspaceRepo: Send + Sync {
    async fn insert(&self, workspace: &Workspace) -> Result<(), RepoError>;
    async fn get(&self, id: WorkspaceId) -> Result<Option<Workspace>, RepoError>;
    async fn list_for_org(&self, org_id: OrgId) -> Result<Vec<Workspace>, RepoError>;
    /// Conditional update used by the orchestrator's state machine: fails
    /// (returns `false`) if `expected_status` no longer matches, so two
    /// racing stage-completions don't both apply their transition.
    async fn update_status(
        &self,
        id: WorkspaceId,
        expected_status: WorkspaceStatus,
        new_status: WorkspaceStatus,
    ) -> Result<bool, RepoError>;
    async fn set_plan_tier(&self, id: WorkspaceId, tier: PlanTier) -> Result<(), RepoError>;
    async fn set_api_endpoint(&self, id: WorkspaceId, endpoint: &str) -> Result<(), RepoError>;
    async fn delete(&self, id: WorkspaceId) -> Result<(), RepoError>;
}

#[async_trait]
pub trait PlanRepo: Send + Sync {
    async fn insert(&self, plan: &Plan) -> Result<(), RepoError>;
    async fn get(&self, id: PlanId) -> Result<Option<Plan>, RepoError>;
    async fn list(&self) -> Result<Vec<Plan>, RepoError>;
}

pub struct DbWorkspaceRepo {
    pool: PostgresPool,
}

impl DbWorkspaceRepo {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: uuid::Uuid,
    org_id: uuid::Uuid,
    name: String,
    plan_id: uuid::Uuid,
    plan_tier: String,
    status: String,
    vcluster_instance_name: String,
    vcluster_namespace: String,
    api_endpoint: Option<String>,
    oidc_client_id: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

fn status_to_str(status: WorkspaceStatus) -> String {
    status.to_string()
}

fn str_to_status(s: &str) -> Result<WorkspaceStatus, RepoError> {
    use WorkspaceStatus::*;
    Ok(match s {
        "pending_creation" => PendingCreation,
        "provisioning" => Provisioning,
        "configuring" => Configuring,
        "running" => Running,
        "stopping" => Stopping,
        "stopped" => Stopped,
        "upgrading" => Upgrading,
        "backing_up" => BackingUp,
        "failed_creation" => FailedCreation,
        "failed_upgrade" => FailedUpgrade,
        "deleting" => Deleting,
        "deleted" => Deleted,
        other => return Err(RepoError::QueryError(format!("unknown workspace status: {other}"))),
    })
}

fn tier_to_str(tier: PlanTier) -> &'static str {
    match tier {
        PlanTier::Shared => "shared",
        PlanTier::Dedicated => "dedicated",
    }
}

impl TryFrom<WorkspaceRow> for Workspace {
    type Error = RepoError;

    fn try_from(row: WorkspaceRow) -> Result<Self, Self::Error> {
        Ok(Workspace {
            id: WorkspaceId(row.id),
            org_id: OrgId(row.org_id),
            name: row.name,
            plan_id: PlanId(row.plan_id),
            plan_tier: if row.plan_tier == "dedicated" {
                PlanTier::Dedicated
            } else {
                PlanTier::Shared
            },
            status: str_to_status(&row.status)?,
            vcluster_instance_name: row.vcluster_instance_name,
            vcluster_namespace: row.vcluster_namespace,
            api_endpoint: row.api_endpoint,
            oidc_client_id: row.oidc_client_id,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl WorkspaceRepo for DbWorkspaceRepo {
    async fn insert(&self, workspace: &Workspace) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO workspaces (id, org_id, name, plan_id, plan_tier, status, \
             vcluster_instance_name, vcluster_namespace, api_endpoint, oidc_client_id, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
        )
        .bind(workspace.id.0)
        .bind(workspace.org_id.0)
        .bind(&workspace.name)
        .bind(workspace.plan_id.0)
        .bind(tier_to_str(workspace.plan_tier))
        .bind(status_to_str(workspace.status))
        .bind(&workspace.vcluster_instance_name)
        .bind(&workspace.vcluster_namespace)
        .bind(&workspace.api_endpoint)
        .bind(&workspace.oidc_client_id)
        .bind(workspace.created_at)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn get(&self, id: WorkspaceId) -> Result<Option<Workspace>, RepoError> {
        let row: Option<WorkspaceRow> = sqlx::query_as("SELECT * FROM workspaces WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool.inner())
            .await?;
        row.map(Workspace::try_from).transpose()
    }

    async fn list_for_org(&self, org_id: OrgId) -> Result<Vec<Workspace>, RepoError> {
        let rows: Vec<WorkspaceRow> = sqlx::query_as("SELECT * FROM workspaces WHERE org_id = $1")
            .bind(org_id.0)
            .fetch_all(self.pool.inner())
            .await?;
        rows.into_iter().map(Workspace::try_from).collect()
    }

    async fn update_status(
        &self,
        id: WorkspaceId,
        expected_status: WorkspaceStatus,
        new_status: WorkspaceStatus,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query("UPDATE workspaces SET status = $1 WHERE id = $2 AND status = $3")
            .bind(status_to_str(new_status))
            .bind(id.0)
            .bind(status_to_str(expected_status))
            .execute(self.pool.inner())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_plan_tier(&self, id: WorkspaceId, tier: PlanTier) -> Result<(), RepoError> {
        sqlx::query("UPDATE workspaces SET plan_tier = $1 WHERE id = $2")
            .bind(tier_to_str(tier))
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn set_api_endpoint(&self, id: WorkspaceId, endpoint: &str) -> Result<(), RepoError> {
        sqlx::query("UPDATE workspaces SET api_endpoint = $1 WHERE id = $2")
            .bind(endpoint)
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn delete(&self, id: WorkspaceId) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM workspaces WHERE id = $1")
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }
}

pub struct DbPlanRepo {
    pool: PostgresPool,
}

impl DbPlanRepo {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: uuid::Uuid,
    name: String,
    cpu_millicores: i64,
    memory_mb: i64,
    storage_gb: i64,
    max_pods: i32,
    allow_dedicated_nodes: bool,
    price_tier: String,
}

impl From<PlanRow> for Plan {
    fn from(row: PlanRow) -> Self {
        Plan {
            id: PlanId(row.id),
            name: row.name,
            resource_quota: ResourceQuota {
                cpu_millicores: row.cpu_millicores,
                memory_mb: row.memory_mb,
                storage_gb: row.storage_gb,
                max_pods: row.max_pods,
            },
            allow_dedicated_nodes: row.allow_dedicated_nodes,
            price_tier: row.price_tier,
        }
    }
}

#[async_trait]
impl PlanRepo for DbPlanRepo {
    async fn insert(&self, plan: &Plan) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO plans (id, name, cpu_millicores, memory_mb, storage_gb, max_pods, \
             allow_dedicated_nodes, price_tier) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
        )
        .bind(plan.id.0)
        .bind(&plan.name)
        .bind(plan.resource_quota.cpu_millicores)
        .bind(plan.resource_quota.memory_mb)
        .bind(plan.resource_quota.storage_gb)
        .bind(plan.resource_quota.max_pods)
        .bind(plan.allow_dedicated_nodes)
        .bind(&plan.price_tier)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn get(&self, id: PlanId) -> Result<Option<Plan>, RepoError> {
        let row: Option<PlanRow> = sqlx::query_as("SELECT * FROM plans WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool.inner())
            .await?;
        Ok(row.map(Plan::from))
    }

    async fn list(&self) -> Result<Vec<Plan>, RepoError> {
        let rows: Vec<PlanRow> = sqlx::query_as("SELECT * FROM plans").fetch_all(self.pool.inner()).await?;
        Ok(rows.into_iter().map(Plan::from).collect())
    }
}

#[derive(Default)]
pub struct InMemoryWorkspaceRepo {
    workspaces: Mutex<HashMap<WorkspaceId, Workspace>>,
}

impl InMemoryWorkspaceRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkspaceRepo for InMemoryWorkspaceRepo {
    async fn insert(&self, workspace: &Workspace) -> Result<(), RepoError> {
        self.workspaces
            .lock()
            .expect("lock poisoned")
            .insert(workspace.id, workspace.clone());
        Ok(())
    }

    async fn get(&self, id: WorkspaceId) -> Result<Option<Workspace>, RepoError> {
        Ok(self.workspaces.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn list_for_org(&self, org_id: OrgId) -> Result<Vec<Workspace>, RepoError> {
        Ok(self
            .workspaces
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|w| w.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        id: WorkspaceId,
        expected_status: WorkspaceStatus,
        new_status: WorkspaceStatus,
    ) -> Result<bool, RepoError> {
        let mut workspaces = self.workspaces.lock().expect("lock poisoned");
        match workspaces.get_mut(&id) {
            Some(ws) if ws.status == expected_status => {
                ws.status = new_status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_plan_tier(&self, id: WorkspaceId, tier: PlanTier) -> Result<(), RepoError> {
        if let Some(ws) = self.workspaces.lock().expect("lock poisoned").get_mut(&id) {
            ws.plan_tier = tier;
        }
        Ok(())
    }

    async fn set_api_endpoint(&self, id: WorkspaceId, endpoint: &str) -> Result<(), RepoError> {
        if let Some(ws) = self.workspaces.lock().expect("lock poisoned").get_mut(&id) {
            ws.api_endpoint = Some(endpoint.to_string());
        }
        Ok(())
    }

    async fn delete(&self, id: WorkspaceId) -> Result<(), RepoError> {
        self.workspaces.lock().expect("lock poisoned").remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPlanRepo {
    plans: Mutex<HashMap<PlanId, Plan>>,
}

impl InMemoryPlanRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, plan: Plan) {
        self.plans.lock().expect("lock poisoned").insert(plan.id, plan);
    }
}

#[async_trait]
impl PlanRepo for InMemoryPlanRepo {
    async fn insert(&self, plan: &Plan) -> Result<(), RepoError> {
        self.plans.lock().expect("lock poisoned").insert(plan.id, plan.clone());
        Ok(())
    }

    async fn get(&self, id: PlanId) -> Result<Option<Plan>, RepoError> {
        Ok(self.plans.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Plan>, RepoError> {
        Ok(self.plans.lock().expect("lock poisoned").values().cloned().collect())
    }
}
