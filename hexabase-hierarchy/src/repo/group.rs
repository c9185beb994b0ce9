use crate::model::Group;
use async_trait::async_trait;
use hexabase_common::ids::{GroupId, UserId, WorkspaceId};
use hexabase_service_base::db::PostgresPool;
use hexabase_service_base::RepoError;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;

#[async_trait]
pub trait GroupRepo: Send + Sync {
    async fn insert(&self, group: &Group) -> Result<(), RepoError>;
    async fn get(&self, id: GroupId) -> Result<Option<Group>, RepoError>;
    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<Group>, RepoError>;
    async fn find_by_name(&self, workspace_id: WorkspaceId, name: &str) -> Result<Option<Group>, RepoError>;
    async fn set_parent(&self, id: GroupId, parent_id: Option<GroupId>) -> Result<(), RepoError>;
    async fn delete(&self, id: GroupId) -> Result<(), RepoError>;

    async fn add_member(&self, group_id: GroupId, user_id: UserId) -> Result<(), RepoError>;
    async fn remove_member(&self, group_id: GroupId, user_id: UserId) -> Result<(), RepoError>;
    async fn list_members(&self, group_id: GroupId) -> Result<Vec<UserId>, RepoError>;
    async fn list_groups_for_user(&self, workspace_id: WorkspaceId, user_id: UserId) -> Result<Vec<GroupId>, RepoError>;
}

pub struct DbGroupRepo {
    pool: PostgresPool,
}

impl DbGroupRepo {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: uuid::Uuid,
    workspace_id: uuid::Uuid,
    name: String,
    parent_group_id: Option<uuid::Uuid>,
    is_seed: bool,
}

impl From<GroupRow> for Group {
    fn from(row: GroupRow) -> Self {
        Group {
            id: GroupId(row.id),
            workspace_id: WorkspaceId(row.workspace_id),
            name: row.name,
            parent_group_id: row.parent_group_id.map(GroupId),
            is_seed: row.is_seed,
        }
    }
}

#[async_trait]
impl GroupRepo for DbGroupRepo {
    async fn insert(&self, group: &Group) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO groups (id, workspace_id, name, parent_group_id, is_seed) VALUES ($1,$2,$3,$4,$5)",
        )
        .bind(group.id.0)
        .bind(group.workspace_id.0)
        .bind(&group.name)
        .bind(group.parent_group_id.map(|id| id.0))
        .bind(group.is_seed)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn get(&self, id: GroupId) -> Result<Option<Group>, RepoError> {
        let row: Option<GroupRow> = sqlx::query_as("SELECT * FROM groups WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool.inner())
            .await?;
        Ok(row.map(Group::from))
    }

    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<Group>, RepoError> {
        let rows: Vec<GroupRow> = sqlx::query_as("SELECT * FROM groups WHERE workspace_id = $1")
            .bind(workspace_id.0)
            .fetch_all(self.pool.inner())
            .await?;
        Ok(rows.into_iter().map(Group::from).collect())
    }

    async fn find_by_name(&self, workspace_id: WorkspaceId, name: &str) -> Result<Option<Group>, RepoError> {
        let row: Option<GroupRow> =
            sqlx::query_as("SELECT * FROM groups WHERE workspace_id = $1 AND name = $2")
                .bind(workspace_id.0)
                .bind(name)
                .fetch_optional(self.pool.inner())
                .await?;
        Ok(row.map(Group::from))
    }

    async fn set_parent(&self, id: GroupId, parent_id: Option<GroupId>) -> Result<(), RepoError> {
        sqlx::query("UPDATE groups SET parent_group_id = $1 WHERE id = $2")
            .bind(parent_id.map(|id| id.0))
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn delete(&self, id: GroupId) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM groups WHERE id = $1")
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn add_member(&self, group_id: GroupId, user_id: UserId) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO group_memberships (group_id, user_id) VALUES ($1,$2) \
             ON CONFLICT (group_id, user_id) DO NOTHING",
        )
        .bind(group_id.0)
        .bind(user_id.0)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn remove_member(&self, group_id: GroupId, user_id: UserId) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM group_memberships WHERE group_id = $1 AND user_id = $2")
            .bind(group_id.0)
            .bind(user_id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn list_members(&self, group_id: GroupId) -> Result<Vec<UserId>, RepoError> {
        let rows: Vec<(uuid::Uuid,)> =
            sqlx::query_as("SELECT user_id FROM group_memberships WHERE group_id = $1")
                .bind(group_id.0)
                .fetch_all(self.pool.inner())
                .await?;
        Ok(rows.into_iter().map(|(id,)| UserId(id)).collect())
    }

    async fn list_groups_for_user(&self, workspace_id: WorkspaceId, user_id: UserId) -> Result<Vec<GroupId>, RepoError> {
        let rows: Vec<(uuid::Uuid,)> = sqlx::query_as(
            "SELECT gm.group_id FROM group_memberships gm \
             JOIN groups g ON g.id = gm.group_id \
             WHERE g.workspace_id = $1 AND gm.user_id = $2",
        )
        .bind(workspace_id.0)
        .bind(user_id.0)
        .fetch_all(self.pool.inner())
        .await?;
        Ok(rows.into_iter().map(|(id,)| GroupId(id)).collect())
    }
}

#[derive(Default)]
pub struct InMemoryGroupRepo {
    groups: Mutex<HashMap<GroupId, Group>>,
    memberships: Mutex<HashSet<(GroupId, UserId)>>,
}

impl InMemoryGroupRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GroupRepo for InMemoryGroupRepo {
    async fn insert(&self, group: &Group) -> Result<(), RepoError> {
        self.groups.lock().expect("lock poisoned").insert(group.id, group.clone());
        Ok(())
    }

    async fn get(&self, id: GroupId) -> Result<Option<Group>, RepoError> {
        Ok(self.groups.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<Group>, RepoError> {
        Ok(self
            .groups
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|g| g.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn find_by_name(&self, workspace_id: WorkspaceId, name: &str) -> Result<Option<Group>, RepoError> {
        Ok(self
            .groups
            .lock()
            .expect("lock poisoned")
            .values()
            .find(|g| g.workspace_id == workspace_id && g.name == name)
            .cloned())
    }

    async fn set_parent(&self, id: GroupId, parent_id: Option<GroupId>) -> Result<(), RepoError> {
        if let Some(g) = self.groups.lock().expect("lock poisoned").get_mut(&id) {
            g.parent_group_id = parent_id;
        }
        Ok(())
    }

    async fn delete(&self, id: GroupId) -> Result<(), RepoError> {
        self.groups.lock().expect("lock poisoned").remove(&id);
        self.memberships.lock().expect("lock poisoned").retain(|(g, _)| *g != id);
        Ok(())
    }

    async fn add_member(&self, group_id: GroupId, user_id: UserId) -> Result<(), RepoError> {
        self.memberships.lock().expect("lock poisoned").insert((group_id, user_id));
        Ok(())
    }

    async fn remove_member(&self, group_id: GroupId, user_id: UserId) -> Result<(), RepoError> {
        self.memberships.lock().expect("lock poisoned").remove(&(group_id, user_id));
        Ok(())
    }

    async fn list_members(&self, group_id: GroupId) -> Result<Vec<UserId>, RepoError> {
        Ok(self
            .memberships
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|(g, _)| *g == group_id)
            .map(|(_, u)| *u)
            .collect())
    }

    async fn list_groups_for_user(&self, workspace_id: WorkspaceId, user_id: UserId) -> Result<Vec<GroupId>, RepoError> {
        let groups = self.groups.lock().expect("lock poisoned");
        Ok(self
            .memberships
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|(g, u)| *u == user_id && groups.get(g).is_some_and(|g| g.workspace_id == workspace_id))
            .map(|(g, _)| *g)
            .collect())
    }
}
