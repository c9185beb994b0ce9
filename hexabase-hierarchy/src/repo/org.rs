use crate::model::{OrgRole, Organization, OrganizationUser, User};
use async_trait::async_trait;
use hexabase_common::ids::{OrgId, UserId};
use hexabase_service_base::db::PostgresPool;
use hexabase_service_base::RepoError;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait OrganizationRepo: Send + Sync {
    async fn insert(&self, org: &Organization) -> Result<(), RepoError>;
    async fn get(&self, id: OrgId) -> Result<Option<Organization>, RepoError>;
    async fn list_for_owner(&self, owner_user_id: UserId) -> Result<Vec<Organization>, RepoError>;
    async fn delete(&self, id: OrgId) -> Result<(), RepoError>;
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn insert(&self, user: &User) -> Result<(), RepoError>;
    async fn get(&self, id: UserId) -> Result<Option<User>, RepoError>;
    async fn find_by_provider_subject(
        &self,
        provider: &str,
        external_subject: &str,
    ) -> Result<Option<User>, RepoError>;
    async fn touch_last_login(&self, id: UserId) -> Result<(), RepoError>;
}

#[async_trait]
pub trait OrganizationUserRepo: Send + Sync {
    async fn upsert(&self, membership: &OrganizationUser) -> Result<(), RepoError>;
    async fn list_for_org(&self, org_id: OrgId) -> Result<Vec<OrganizationUser>, RepoError>;
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<OrganizationUser>, RepoError>;
    async fn remove(&self, org_id: OrgId, user_id: UserId) -> Result<(), RepoError>;
}

pub struct DbOrganizationRepo {
    pool: PostgresPool,
}

impl DbOrganizationRepo {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrganizationRepo for DbOrganizationRepo {
    async fn insert(&self, org: &Organization) -> Result<(), RepoError> {
        sqlx::query("INSERT INTO organizations (id, name, owner_user_id, created_at) VALUES ($1,$2,$3,$4)")
            .bind(org.id.0)
            .bind(&org.name)
            .bind(org.owner_user_id.0)
            .bind(org.created_at)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn get(&self, id: OrgId) -> Result<Option<Organization>, RepoError> {
        let row: Option<(uuid::Uuid, String, uuid::Uuid, chrono::DateTime<chrono::Utc>)> =
            sqlx::query_as("SELECT id, name, owner_user_id, created_at FROM organizations WHERE id = $1")
                .bind(id.0)
                .fetch_optional(self.pool.inner())
                .await?;
        Ok(row.map(|(id, name, owner, created_at)| Organization {
            id: OrgId(id),
            name,
            owner_user_id: UserId(owner),
            created_at,
        }))
    }

    async fn list_for_owner(&self, owner_user_id: UserId) -> Result<Vec<Organization>, RepoError> {
        let rows: Vec<(uuid::Uuid, String, uuid::Uuid, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(
            "SELECT id, name, owner_user_id, created_at FROM organizations WHERE owner_user_id = $1",
        )
        .bind(owner_user_id.0)
        .fetch_all(self.pool.inner())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name, owner, created_at)| Organization {
                id: OrgId(id),
                name,
                owner_user_id: UserId(owner),
                created_at,
            })
            .collect())
    }

    async fn delete(&self, id: OrgId) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM organizations WHERE id = $1")
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }
}

pub struct DbUserRepo {
    pool: PostgresPool,
}

impl DbUserRepo {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: uuid::Uuid,
    external_subject: String,
    provider: String,
    email: String,
    display_name: String,
    created_at: chrono::DateTime<chrono::Utc>,
    last_login_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId(row.id),
            external_subject: row.external_subject,
            provider: row.provider,
            email: row.email,
            display_name: row.display_name,
            created_at: row.created_at,
            last_login_at: row.last_login_at,
        }
    }
}

#[async_trait]
impl UserRepo for DbUserRepo {
    async fn insert(&self, user: &User) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO users (id, external_subject, provider, email, display_name, created_at, last_login_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7)",
        )
        .bind(user.id.0)
        .bind(&user.external_subject)
        .bind(&user.provider)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(user.created_at)
        .bind(user.last_login_at)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn get(&self, id: UserId) -> Result<Option<User>, RepoError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool.inner())
            .await?;
        Ok(row.map(User::from))
    }

    async fn find_by_provider_subject(
        &self,
        provider: &str,
        external_subject: &str,
    ) -> Result<Option<User>, RepoError> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT * FROM users WHERE provider = $1 AND external_subject = $2")
                .bind(provider)
                .bind(external_subject)
                .fetch_optional(self.pool.inner())
                .await?;
        Ok(row.map(User::from))
    }

    async fn touch_last_login(&self, id: UserId) -> Result<(), RepoError> {
        sqlx::query("UPDATE users SET last_login_at = $1 WHERE id = $2")
            .bind(chrono::Utc::now())
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }
}

pub struct DbOrganizationUserRepo {
    pool: PostgresPool,
}

impl DbOrganizationUserRepo {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

fn role_to_str(role: OrgRole) -> &'static str {
    match role {
        OrgRole::Owner => "owner",
        OrgRole::Admin => "admin",
        OrgRole::Member => "member",
    }
}

fn str_to_role(s: &str) -> OrgRole {
    match s {
        "owner" => OrgRole::Owner,
        "admin" => OrgRole::Admin,
        _ => OrgRole::Member,
    }
}

#[async_trait]
impl OrganizationUserRepo for DbOrganizationUserRepo {
    async fn upsert(&self, membership: &OrganizationUser) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO organization_users (org_id, user_id, role) VALUES ($1,$2,$3) \
             ON CONFLICT (org_id, user_id) DO UPDATE SET role = EXCLUDED.role",
        )
        .bind(membership.org_id.0)
        .bind(membership.user_id.0)
        .bind(role_to_str(membership.role))
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn list_for_org(&self, org_id: OrgId) -> Result<Vec<OrganizationUser>, RepoError> {
        let rows: Vec<(uuid::Uuid, uuid::Uuid, String)> =
            sqlx::query_as("SELECT org_id, user_id, role FROM organization_users WHERE org_id = $1")
                .bind(org_id.0)
                .fetch_all(self.pool.inner())
                .await?;
        Ok(rows
            .into_iter()
            .map(|(org_id, user_id, role)| OrganizationUser {
                org_id: OrgId(org_id),
                user_id: UserId(user_id),
                role: str_to_role(&role),
            })
            .collect())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<OrganizationUser>, RepoError> {
        let rows: Vec<(uuid::Uuid, uuid::Uuid, String)> =
            sqlx::query_as("SELECT org_id, user_id, role FROM organization_users WHERE user_id = $1")
                .bind(user_id.0)
                .fetch_all(self.pool.inner())
                .await?;
        Ok(rows
            .into_iter()
            .map(|(org_id, user_id, role)| OrganizationUser {
                org_id: OrgId(org_id),
                user_id: UserId(user_id),
                role: str_to_role(&role),
            })
            .collect())
    }

    async fn remove(&self, org_id: OrgId, user_id: UserId) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM organization_users WHERE org_id = $1 AND user_id = $2")
            .bind(org_id.0)
            .bind(user_id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryOrganizationRepo {
    orgs: Mutex<HashMap<OrgId, Organization>>,
}

impl InMemoryOrganizationRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrganizationRepo for InMemoryOrganizationRepo {
    async fn insert(&self, org: &Organization) -> Result<(), RepoError> {
        self.orgs.lock().expect("lock poisoned").insert(org.id, org.clone());
        Ok(())
    }

    async fn get(&self, id: OrgId) -> Result<Option<Organization>, RepoError> {
        Ok(self.orgs.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn list_for_owner(&self, owner_user_id: UserId) -> Result<Vec<Organization>, RepoError> {
        Ok(self
            .orgs
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|o| o.owner_user_id == owner_user_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: OrgId) -> Result<(), RepoError> {
        self.orgs.lock().expect("lock poisoned").remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserRepo {
    users: Mutex<HashMap<UserId, User>>,
}

impl InMemoryUserRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepo for InMemoryUserRepo {
    async fn insert(&self, user: &User) -> Result<(), RepoError> {
        self.users.lock().expect("lock poisoned").insert(user.id, user.clone());
        Ok(())
    }

    async fn get(&self, id: UserId) -> Result<Option<User>, RepoError> {
        Ok(self.users.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn find_by_provider_subject(
        &self,
        provider: &str,
        external_subject: &str,
    ) -> Result<Option<User>, RepoError> {
        Ok(self
            .users
            .lock()
            .expect("lock poisoned")
            .values()
            .find(|u| u.provider == provider && u.external_subject == external_subject)
            .cloned())
    }

    async fn touch_last_login(&self, id: UserId) -> Result<(), RepoError> {
        if let Some(user) = self.users.lock().expect("lock poisoned").get_mut(&id) {
            user.last_login_at = Some(chrono::Utc::now());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryOrganizationUserRepo {
    memberships: Mutex<HashMap<(OrgId, UserId), OrgRole>>,
}

impl InMemoryOrganizationUserRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrganizationUserRepo for InMemoryOrganizationUserRepo {
    async fn upsert(&self, membership: &OrganizationUser) -> Result<(), RepoError> {
        self.memberships
            .lock()
            .expect("lock poisoned")
            .insert((membership.org_id, membership.user_id), membership.role);
        Ok(())
    }

    async fn list_for_org(&self, org_id: OrgId) -> Result<Vec<OrganizationUser>, RepoError> {
        Ok(self
            .memberships
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|((org, _), _)| *org == org_id)
            .map(|((org_id, user_id), role)| OrganizationUser {
                org_id: *org_id,
                user_id: *user_id,
                role: *role,
            })
            .collect())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<OrganizationUser>, RepoError> {
        Ok(self
            .memberships
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|((_, user), _)| *user == user_id)
            .map(|((org_id, user_id), role)| OrganizationUser {
                org_id: *org_id,
                user_id: *user_id,
                role: *role,
            })
            .collect())
    }

    async fn remove(&self, org_id: OrgId, user_id: UserId) -> Result<(), RepoError> {
        self.memberships.lock().expect("lock poisoned").remove(&(org_id, user_id));
        Ok(())
    }
}
