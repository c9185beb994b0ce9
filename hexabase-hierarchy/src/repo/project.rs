use crate::model::{Project, ResourceQuota};
use async_trait::async_trait;
use hexabase_common::ids::{ProjectId, WorkspaceId};
use hexabase_service_base::db::PostgresPool;
use hexabase_service_base::RepoError;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait ProjectRepo: Send + Sync {
    async fn insert(&self, project: &Project) -> Result<(), RepoError>;
    async fn get(&self, id: ProjectId) -> Result<Option<Project>, RepoError>;
    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<Project>, RepoError>;
    async fn list_children(&self, parent_id: ProjectId) -> Result<Vec<Project>, RepoError>;
    async fn find_by_namespace(
        &self,
        workspace_id: WorkspaceId,
        namespace_name: &str,
    ) -> Result<Option<Project>, RepoError>;
    async fn set_quota(&self, id: ProjectId, quota: &ResourceQuota) -> Result<(), RepoError>;
    async fn delete(&self, id: ProjectId) -> Result<(), RepoError>;
}

pub struct DbProjectRepo {
    pool: PostgresPool,
}

impl DbProjectRepo {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: uuid::Uuid,
    workspace_id: uuid::Uuid,
    parent_project_id: Option<uuid::Uuid>,
    name: String,
    namespace_name: String,
    cpu_millicores: i64,
    memory_mb: i64,
    storage_gb: i64,
    max_pods: i32,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            id: ProjectId(row.id),
            workspace_id: WorkspaceId(row.workspace_id),
            parent_project_id: row.parent_project_id.map(ProjectId),
            name: row.name,
            namespace_name: row.namespace_name,
            resource_quota: ResourceQuota {
                cpu_millicores: row.cpu_millicores,
                memory_mb: row.memory_mb,
                storage_gb: row.storage_gb,
                max_pods: row.max_pods,
            },
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl ProjectRepo for DbProjectRepo {
    async fn insert(&self, project: &Project) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO projects (id, workspace_id, parent_project_id, name, namespace_name, \
             cpu_millicores, memory_mb, storage_gb, max_pods, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
        )
        .bind(project.id.0)
        .bind(project.workspace_id.0)
        .bind(project.parent_project_id.map(|id| id.0))
        .bind(&project.name)
        .bind(&project.namespace_name)
        .bind(project.resource_quota.cpu_millicores)
        .bind(project.resource_quota.memory_mb)
        .bind(project.resource_quota.storage_gb)
        .bind(project.resource_quota.max_pods)
        .bind(project.created_at)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn get(&self, id: ProjectId) -> Result<Option<Project>, RepoError> {
        let row: Option<ProjectRow> = sqlx::query_as("SELECT * FROM projects WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool.inner())
            .await?;
        Ok(row.map(Project::from))
    }

    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<Project>, RepoError> {
        let rows: Vec<ProjectRow> = sqlx::query_as("SELECT * FROM projects WHERE workspace_id = $1")
            .bind(workspace_id.0)
            .fetch_all(self.pool.inner())
            .await?;
        Ok(rows.into_iter().map(Project::from).collect())
    }

    async fn list_children(&self, parent_id: ProjectId) -> Result<Vec<Project>, RepoError> {
        let rows: Vec<ProjectRow> = sqlx::query_as("SELECT * FROM projects WHERE parent_project_id = $1")
            .bind(parent_id.0)
            .fetch_all(self.pool.inner())
            .await?;
        Ok(rows.into_iter().map(Project::from).collect())
    }

    async fn find_by_namespace(
        &self,
        workspace_id: WorkspaceId,
        namespace_name: &str,
    ) -> Result<Option<Project>, RepoError> {
        let row: Option<ProjectRow> =
            sqlx::query_as("SELECT * FROM projects WHERE workspace_id = $1 AND namespace_name = $2")
                .bind(workspace_id.0)
                .bind(namespace_name)
                .fetch_optional(self.pool.inner())
                .await?;
        Ok(row.map(Project::from))
    }

    async fn set_quota(&self, id: ProjectId, quota: &ResourceQuota) -> Result<(), RepoError> {
        sqlx::query(
            "UPDATE projects SET cpu_millicores = $1, memory_mb = $2, storage_gb = $3, max_pods = $4 \
             WHERE id = $5",
        )
        .bind(quota.cpu_millicores)
        .bind(quota.memory_mb)
        .bind(quota.storage_gb)
        .bind(quota.max_pods)
        .bind(id.0)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn delete(&self, id: ProjectId) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProjectRepo {
    projects: Mutex<HashMap<ProjectId, Project>>,
}

impl InMemoryProjectRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectRepo for InMemoryProjectRepo {
    async fn insert(&self, project: &Project) -> Result<(), RepoError> {
        self.projects.lock().expect("lock poisoned").insert(project.id, project.clone());
        Ok(())
    }

    async fn get(&self, id: ProjectId) -> Result<Option<Project>, RepoError> {
        Ok(self.projects.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<Project>, RepoError> {
        Ok(self
            .projects
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|p| p.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn list_children(&self, parent_id: ProjectId) -> Result<Vec<Project>, RepoError> {
        Ok(self
            .projects
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|p| p.parent_project_id == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn find_by_namespace(
        &self,
        workspace_id: WorkspaceId,
        namespace_name: &str,
    ) -> Result<Option<Project>, RepoError> {
        Ok(self
            .projects
            .lock()
            .expect("lock poisoned")
            .values()
            .find(|p| p.workspace_id == workspace_id && p.namespace_name == namespace_name)
            .cloned())
    }

    async fn set_quota(&self, id: ProjectId, quota: &ResourceQuota) -> Result<(), RepoError> {
        if let Some(p) = self.projects.lock().expect("lock poisoned").get_mut(&id) {
            p.resource_quota = quota.clone();
        }
        Ok(())
    }

    async fn delete(&self, id: ProjectId) -> Result<(), RepoError> {
        self.projects.lock().expect("lock poisoned").remove(&id);
        Ok(())
    }
}
