use crate::model::{Role, RoleAssignment, RoleScope};
use async_trait::async_trait;
use hexabase_common::ids::{GroupId, ProjectId, RoleAssignmentId, RoleId, WorkspaceId};
use hexabase_service_base::db::PostgresPool;
use hexabase_service_base::RepoError;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait RoleRepo: Send + Sync {
    async fn insert(&self, role: &Role) -> Result<(), RepoError>;
    async fn get(&self, id: RoleId) -> Result<Option<Role>, RepoError>;
    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<Role>, RepoError>;
    async fn find_by_name(&self, workspace_id: WorkspaceId, name: &str) -> Result<Option<Role>, RepoError>;
    async fn delete(&self, id: RoleId) -> Result<(), RepoError>;
}

#[async_trait]
pub trait RoleAssignmentRepo: Send + Sync {
    async fn insert(&self, assignment: &RoleAssignment) -> Result<(), RepoError>;
    async fn delete(&self, id: RoleAssignmentId) -> Result<(), RepoError>;
    async fn find(&self, role_id: RoleId, group_id: GroupId) -> Result<Option<RoleAssignment>, RepoError>;
    async fn list_for_group(&self, group_id: GroupId) -> Result<Vec<RoleAssignment>, RepoError>;
    async fn list_for_groups(&self, group_ids: &[GroupId]) -> Result<Vec<RoleAssignment>, RepoError>;
}

pub struct DbRoleRepo {
    pool: PostgresPool,
}

impl DbRoleRepo {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RoleRow {
    id: uuid::Uuid,
    scope: String,
    workspace_id: uuid::Uuid,
    project_id: Option<uuid::Uuid>,
    name: String,
    rules_json: String,
    preset: bool,
}

impl TryFrom<RoleRow> for Role {
    type Error = RepoError;

    fn try_from(row: RoleRow) -> Result<Self, Self::Error> {
        let scope = match row.scope.as_str() {
            "workspace" => RoleScope::Workspace,
            "project" => RoleScope::Project,
            other => return Err(RepoError::QueryError(format!("unknown role scope: {other}"))),
        };
        Ok(Role {
            id: RoleId(row.id),
            scope,
            workspace_id: WorkspaceId(row.workspace_id),
            project_id: row.project_id.map(ProjectId),
            name: row.name,
            rules_json: row.rules_json,
            preset: row.preset,
        })
    }
}

fn scope_to_str(scope: RoleScope) -> &'static str {
    match scope {
        RoleScope::Workspace => "workspace",
        RoleScope::Project => "project",
    }
}

#[async_trait]
impl RoleRepo for DbRoleRepo {
    async fn insert(&self, role: &Role) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO roles (id, scope, workspace_id, project_id, name, rules_json, preset) \
             VALUES ($1,$2,$3,$4,$5,$6,$7)",
        )
        .bind(role.id.0)
        .bind(scope_to_str(role.scope))
        .bind(role.workspace_id.0)
        .bind(role.project_id.map(|id| id.0))
        .bind(&role.name)
        .bind(&role.rules_json)
        .bind(role.preset)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn get(&self, id: RoleId) -> Result<Option<Role>, RepoError> {
        let row: Option<RoleRow> = sqlx::query_as("SELECT * FROM roles WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool.inner())
            .await?;
        row.map(Role::try_from).transpose()
    }

    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<Role>, RepoError> {
        let rows: Vec<RoleRow> = sqlx::query_as("SELECT * FROM roles WHERE workspace_id = $1")
            .bind(workspace_id.0)
            .fetch_all(self.pool.inner())
            .await?;
        rows.into_iter().map(Role::try_from).collect()
    }

    async fn find_by_name(&self, workspace_id: WorkspaceId, name: &str) -> Result<Option<Role>, RepoError> {
        let row: Option<RoleRow> =
            sqlx::query_as("SELECT * FROM roles WHERE workspace_id = $1 AND name = $2")
                .bind(workspace_id.0)
                .bind(name)
                .fetch_optional(self.pool.inner())
                .await?;
        row.map(Role::try_from).transpose()
    }

    async fn delete(&self, id: RoleId) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }
}

pub struct DbRoleAssignmentRepo {
    pool: PostgresPool,
}

impl DbRoleAssignmentRepo {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RoleAssignmentRow {
    id: uuid::Uuid,
    role_id: uuid::Uuid,
    group_id: uuid::Uuid,
}

impl From<RoleAssignmentRow> for RoleAssignment {
    fn from(row: RoleAssignmentRow) -> Self {
        RoleAssignment {
            id: RoleAssignmentId(row.id),
            role_id: RoleId(row.role_id),
            group_id: GroupId(row.group_id),
        }
    }
}

#[async_trait]
impl RoleAssignmentRepo for DbRoleAssignmentRepo {
    async fn insert(&self, assignment: &RoleAssignment) -> Result<(), RepoError> {
        sqlx::query("INSERT INTO role_assignments (id, role_id, group_id) VALUES ($1,$2,$3)")
            .bind(assignment.id.0)
            .bind(assignment.role_id.0)
            .bind(assignment.group_id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn delete(&self, id: RoleAssignmentId) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM role_assignments WHERE id = $1")
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn find(&self, role_id: RoleId, group_id: GroupId) -> Result<Option<RoleAssignment>, RepoError> {
        let row: Option<RoleAssignmentRow> =
            sqlx::query_as("SELECT * FROM role_assignments WHERE role_id = $1 AND group_id = $2")
                .bind(role_id.0)
                .bind(group_id.0)
                .fetch_optional(self.pool.inner())
                .await?;
        Ok(row.map(RoleAssignment::from))
    }

    async fn list_for_group(&self, group_id: GroupId) -> Result<Vec<RoleAssignment>, RepoError> {
        let rows: Vec<RoleAssignmentRow> =
            sqlx::query_as("SELECT * FROM role_assignments WHERE group_id = $1")
                .bind(group_id.0)
                .fetch_all(self.pool.inner())
                .await?;
        Ok(rows.into_iter().map(RoleAssignment::from).collect())
    }

    async fn list_for_groups(&self, group_ids: &[GroupId]) -> Result<Vec<RoleAssignment>, RepoError> {
        let ids: Vec<uuid::Uuid> = group_ids.iter().map(|id| id.0).collect();
        let rows: Vec<RoleAssignmentRow> =
            sqlx::query_as("SELECT * FROM role_assignments WHERE group_id = ANY($1)")
                .bind(&ids)
                .fetch_all(self.pool.inner())
                .await?;
        Ok(rows.into_iter().map(RoleAssignment::from).collect())
    }
}

#[derive(Default)]
pub struct InMemoryRoleRepo {
    roles: Mutex<HashMap<RoleId, Role>>,
}

impl InMemoryRoleRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleRepo for InMemoryRoleRepo {
    async fn insert(&self, role: &Role) -> Result<(), RepoError> {
        self.roles.lock().expect("lock poisoned").insert(role.id, role.clone());
        Ok(())
    }

    async fn get(&self, id: RoleId) -> Result<Option<Role>, RepoError> {
        Ok(self.roles.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<Role>, RepoError> {
        Ok(self
            .roles
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|r| r.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn find_by_name(&self, workspace_id: WorkspaceId, name: &str) -> Result<Option<Role>, RepoError> {
        Ok(self
            .roles
            .lock()
            .expect("lock poisoned")
            .values()
            .find(|r| r.workspace_id == workspace_id && r.name == name)
            .cloned())
    }

    async fn delete(&self, id: RoleId) -> Result<(), RepoError> {
        self.roles.lock().expect("lock poisoned").remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRoleAssignmentRepo {
    assignments: Mutex<HashMap<RoleAssignmentId, RoleAssignment>>,
}

impl InMemoryRoleAssignmentRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleAssignmentRepo for InMemoryRoleAssignmentRepo {
    async fn insert(&self, assignment: &RoleAssignment) -> Result<(), RepoError> {
        self.assignments
            .lock()
            .expect("lock poisoned")
            .insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn delete(&self, id: RoleAssignmentId) -> Result<(), RepoError> {
        self.assignments.lock().expect("lock poisoned").remove(&id);
        Ok(())
    }

    async fn find(&self, role_id: RoleId, group_id: GroupId) -> Result<Option<RoleAssignment>, RepoError> {
        Ok(self
            .assignments
            .lock()
            .expect("lock poisoned")
            .values()
            .find(|a| a.role_id == role_id && a.group_id == group_id)
            .cloned())
    }

    async fn list_for_group(&self, group_id: GroupId) -> Result<Vec<RoleAssignment>, RepoError> {
        Ok(self
            .assignments
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|a| a.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn list_for_groups(&self, group_ids: &[GroupId]) -> Result<Vec<RoleAssignment>, RepoError> {
        Ok(self
            .assignments
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|a| group_ids.contains(&a.group_id))
            .cloned()
            .collect())
    }
}
