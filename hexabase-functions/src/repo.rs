//! Persistence for the façade's own state (spec §6 `functions`,
//! `function_versions`, `function_triggers`; `applications` is this
//! expansion's addition for the Application half of §4.5). Same
//! trait/`Db*`/`InMemory*` triad as every other crate's `repo` module.

use crate::model::{Application, BuildStatus, Function, FunctionTrigger, FunctionVersion, TriggerKind, VersionSource};
use async_trait::async_trait;
use hexabase_common::ids::{ApplicationId, FunctionId, FunctionTriggerId, FunctionVersionId, ProjectId, WorkspaceId};
use hexabase_service_base::db::PostgresPool;
use hexabase_service_base::RepoError;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait FunctionRepo: Send + Sync {
    async fn insert(&self, function: &Function) -> Result<(), RepoError>;
    async fn get(&self, id: FunctionId) -> Result<Option<Function>, RepoError>;
    async fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<Function>, RepoError>;
    async fn set_active_version(&self, id: FunctionId, version_id: Option<FunctionVersionId>) -> Result<(), RepoError>;
    async fn delete(&self, id: FunctionId) -> Result<(), RepoError>;
}

#[async_trait]
pub trait FunctionVersionRepo: Send + Sync {
    async fn insert(&self, version: &FunctionVersion) -> Result<(), RepoError>;
    async fn get(&self, id: FunctionVersionId) -> Result<Option<FunctionVersion>, RepoError>;
    async fn list_for_function(&self, function_id: FunctionId) -> Result<Vec<FunctionVersion>, RepoError>;
    async fn set_build_status(&self, id: FunctionVersionId, status: BuildStatus, build_log: Option<String>) -> Result<(), RepoError>;
}

#[async_trait]
pub trait FunctionTriggerRepo: Send + Sync {
    async fn insert(&self, trigger: &FunctionTrigger) -> Result<(), RepoError>;
    async fn get(&self, id: FunctionTriggerId) -> Result<Option<FunctionTrigger>, RepoError>;
    async fn list_for_function(&self, function_id: FunctionId) -> Result<Vec<FunctionTrigger>, RepoError>;
    async fn delete(&self, id: FunctionTriggerId) -> Result<(), RepoError>;
}

#[async_trait]
pub trait ApplicationRepo: Send + Sync {
    async fn insert(&self, application: &Application) -> Result<(), RepoError>;
    async fn get(&self, id: ApplicationId) -> Result<Option<Application>, RepoError>;
    async fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<Application>, RepoError>;
    async fn set_image(&self, id: ApplicationId, image: &str) -> Result<(), RepoError>;
    async fn set_replicas(&self, id: ApplicationId, replicas: i32) -> Result<(), RepoError>;
    async fn delete(&self, id: ApplicationId) -> Result<(), RepoError>;
}

fn build_status_to_str(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::Building => "building",
        BuildStatus::Success => "success",
        BuildStatus::Failed => "failed",
    }
}

fn str_to_build_status(s: &str) -> Result<BuildStatus, RepoError> {
    Ok(match s {
        "building" => BuildStatus::Building,
        "success" => BuildStatus::Success,
        "failed" => BuildStatus::Failed,
        other => return Err(RepoError::QueryError(format!("unknown build status: {other}"))),
    })
}

fn trigger_kind_to_str(kind: TriggerKind) -> &'static str {
    match kind {
        TriggerKind::Http => "http",
        TriggerKind::Schedule => "schedule",
        TriggerKind::Event => "event",
    }
}

fn str_to_trigger_kind(s: &str) -> Result<TriggerKind, RepoError> {
    Ok(match s {
        "http" => TriggerKind::Http,
        "schedule" => TriggerKind::Schedule,
        "event" => TriggerKind::Event,
        other => return Err(RepoError::QueryError(format!("unknown trigger kind: {other}"))),
    })
}

fn application_kind_to_str(kind: crate::model::ApplicationKind) -> &'static str {
    match kind {
        crate::model::ApplicationKind::Deployment => "deployment",
        crate::model::ApplicationKind::StatefulSet => "stateful_set",
    }
}

fn str_to_application_kind(s: &str) -> Result<crate::model::ApplicationKind, RepoError> {
    Ok(match s {
        "deployment" => crate::model::ApplicationKind::Deployment,
        "stateful_set" => crate::model::ApplicationKind::StatefulSet,
        other => return Err(RepoError::QueryError(format!("unknown application kind: {other}"))),
    })
}

pub struct DbFunctionRepo {
    pool: PostgresPool,
}

impl DbFunctionRepo {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct FunctionRow {
    id: uuid::Uuid,
    workspace_id: uuid::Uuid,
    project_id: uuid::Uuid,
    name: String,
    runtime: String,
    memory_mb: i32,
    timeout_s: i32,
    env_json: String,
    active_version_id: Option<uuid::Uuid>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<FunctionRow> for Function {
    type Error = RepoError;

    fn try_from(row: FunctionRow) -> Result<Self, Self::Error> {
        let env: Vec<(String, String)> =
            serde_json::from_str(&row.env_json).map_err(|e| RepoError::QueryError(format!("malformed env_json: {e}")))?;
        Ok(Function {
            id: FunctionId(row.id),
            workspace_id: WorkspaceId(row.workspace_id),
            project_id: ProjectId(row.project_id),
            name: row.name,
            runtime: row.runtime,
            memory_mb: row.memory_mb,
            timeout_s: row.timeout_s,
            env,
            active_version_id: row.active_version_id.map(FunctionVersionId),
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl FunctionRepo for DbFunctionRepo {
    async fn insert(&self, function: &Function) -> Result<(), RepoError> {
        let env_json = serde_json::to_string(&function.env).expect("env must serialize");
        sqlx::query(
            "INSERT INTO functions (id, workspace_id, project_id, name, runtime, memory_mb, timeout_s, \
             env_json, active_version_id, created_at) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
        )
        .bind(function.id.0)
        .bind(function.workspace_id.0)
        .bind(function.project_id.0)
        .bind(&function.name)
        .bind(&function.runtime)
        .bind(function.memory_mb)
        .bind(function.timeout_s)
        .bind(env_json)
        .bind(function.active_version_id.map(|id| id.0))
        .bind(function.created_at)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn get(&self, id: FunctionId) -> Result<Option<Function>, RepoError> {
        let row: Option<FunctionRow> = sqlx::query_as("SELECT * FROM functions WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool.inner())
            .await?;
        row.map(Function::try_from).transpose()
    }

    async fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<Function>, RepoError> {
        let rows: Vec<FunctionRow> = sqlx::query_as("SELECT * FROM functions WHERE project_id = $1")
            .bind(project_id.0)
            .fetch_all(self.pool.inner())
            .await?;
        rows.into_iter().map(Function::try_from).collect()
    }

    async fn set_active_version(&self, id: FunctionId, version_id: Option<FunctionVersionId>) -> Result<(), RepoError> {
        sqlx::query("UPDATE functions SET active_version_id = $1 WHERE id = $2")
            .bind(version_id.map(|v| v.0))
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn delete(&self, id: FunctionId) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM functions WHERE id = $1")
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryFunctionRepo {
    functions: Mutex<HashMap<FunctionId, Function>>,
}

impl InMemoryFunctionRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FunctionRepo for InMemoryFunctionRepo {
    async fn insert(&self, function: &Function) -> Result<(), RepoError> {
        self.functions.lock().expect("lock poisoned").insert(function.id, function.clone());
        Ok(())
    }

    async fn get(&self, id: FunctionId) -> Result<Option<Function>, RepoError> {
        Ok(self.functions.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<Function>, RepoError> {
        Ok(self
            .functions
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|f| f.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn set_active_version(&self, id: FunctionId, version_id: Option<FunctionVersionId>) -> Result<(), RepoError> {
        if let Some(f) = self.functions.lock().expect("lock poisoned").get_mut(&id) {
            f.active_version_id = version_id;
        }
        Ok(())
    }

    async fn delete(&self, id: FunctionId) -> Result<(), RepoError> {
        self.functions.lock().expect("lock poisoned").remove(&id);
        Ok(())
    }
}

pub struct DbFunctionVersionRepo {
    pool: PostgresPool,
}

impl DbFunctionVersionRepo {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct FunctionVersionRow {
    id: uuid::Uuid,
    function_id: uuid::Uuid,
    source_json: String,
    build_status: String,
    build_log: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<FunctionVersionRow> for FunctionVersion {
    type Error = RepoError;

    fn try_from(row: FunctionVersionRow) -> Result<Self, Self::Error> {
        let source: VersionSource =
            serde_json::from_str(&row.source_json).map_err(|e| RepoError::QueryError(format!("malformed source_json: {e}")))?;
        Ok(FunctionVersion {
            id: FunctionVersionId(row.id),
            function_id: FunctionId(row.function_id),
            source,
            build_status: str_to_build_status(&row.build_status)?,
            build_log: row.build_log,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl FunctionVersionRepo for DbFunctionVersionRepo {
    async fn insert(&self, version: &FunctionVersion) -> Result<(), RepoError> {
        let source_json = serde_json::to_string(&version.source).expect("source must serialize");
        sqlx::query(
            "INSERT INTO function_versions (id, function_id, source_json, build_status, build_log, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(version.id.0)
        .bind(version.function_id.0)
        .bind(source_json)
        .bind(build_status_to_str(version.build_status))
        .bind(&version.build_log)
        .bind(version.created_at)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn get(&self, id: FunctionVersionId) -> Result<Option<FunctionVersion>, RepoError> {
        let row: Option<FunctionVersionRow> = sqlx::query_as("SELECT * FROM function_versions WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool.inner())
            .await?;
        row.map(FunctionVersion::try_from).transpose()
    }

    async fn list_for_function(&self, function_id: FunctionId) -> Result<Vec<FunctionVersion>, RepoError> {
        let rows: Vec<FunctionVersionRow> = sqlx::query_as("SELECT * FROM function_versions WHERE function_id = $1")
            .bind(function_id.0)
            .fetch_all(self.pool.inner())
            .await?;
        rows.into_iter().map(FunctionVersion::try_from).collect()
    }

    async fn set_build_status(&self, id: FunctionVersionId, status: BuildStatus, build_log: Option<String>) -> Result<(), RepoError> {
        sqlx::query("UPDATE function_versions SET build_status = $1, build_log = $2 WHERE id = $3")
            .bind(build_status_to_str(status))
            .bind(build_log)
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryFunctionVersionRepo {
    versions: Mutex<HashMap<FunctionVersionId, FunctionVersion>>,
}

impl InMemoryFunctionVersionRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FunctionVersionRepo for InMemoryFunctionVersionRepo {
    async fn insert(&self, version: &FunctionVersion) -> Result<(), RepoError> {
        self.versions.lock().expect("lock poisoned").insert(version.id, version.clone());
        Ok(())
    }

    async fn get(&self, id: FunctionVersionId) -> Result<Option<FunctionVersion>, RepoError> {
        Ok(self.versions.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn list_for_function(&self, function_id: FunctionId) -> Result<Vec<FunctionVersion>, RepoError> {
        Ok(self
            .versions
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|v| v.function_id == function_id)
            .cloned()
            .collect())
    }

    async fn set_build_status(&self, id: FunctionVersionId, status: BuildStatus, build_log: Option<String>) -> Result<(), RepoError> {
        if let Some(v) = self.versions.lock().expect("lock poisoned").get_mut(&id) {
            v.build_status = status;
            v.build_log = build_log;
        }
        Ok(())
    }
}

pub struct DbFunctionTriggerRepo {
    pool: PostgresPool,
}

impl DbFunctionTriggerRepo {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct FunctionTriggerRow {
    id: uuid::Uuid,
    function_id: uuid::Uuid,
    kind: String,
    config_json: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<FunctionTriggerRow> for FunctionTrigger {
    type Error = RepoError;

    fn try_from(row: FunctionTriggerRow) -> Result<Self, Self::Error> {
        Ok(FunctionTrigger {
            id: FunctionTriggerId(row.id),
            function_id: FunctionId(row.function_id),
            kind: str_to_trigger_kind(&row.kind)?,
            config_json: row.config_json,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl FunctionTriggerRepo for DbFunctionTriggerRepo {
    async fn insert(&self, trigger: &FunctionTrigger) -> Result<(), RepoError> {
        sqlx::query("INSERT INTO function_triggers (id, function_id, kind, config_json, created_at) VALUES ($1,$2,$3,$4,$5)")
            .bind(trigger.id.0)
            .bind(trigger.function_id.0)
            .bind(trigger_kind_to_str(trigger.kind))
            .bind(&trigger.config_json)
            .bind(trigger.created_at)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn get(&self, id: FunctionTriggerId) -> Result<Option<FunctionTrigger>, RepoError> {
        let row: Option<FunctionTriggerRow> = sqlx::query_as("SELECT * FROM function_triggers WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool.inner())
            .await?;
        row.map(FunctionTrigger::try_from).transpose()
    }

    async fn list_for_function(&self, function_id: FunctionId) -> Result<Vec<FunctionTrigger>, RepoError> {
        let rows: Vec<FunctionTriggerRow> = sqlx::query_as("SELECT * FROM function_triggers WHERE function_id = $1")
            .bind(function_id.0)
            .fetch_all(self.pool.inner())
            .await?;
        rows.into_iter().map(FunctionTrigger::try_from).collect()
    }

    async fn delete(&self, id: FunctionTriggerId) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM function_triggers WHERE id = $1")
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryFunctionTriggerRepo {
    triggers: Mutex<HashMap<FunctionTriggerId, FunctionTrigger>>,
}

impl InMemoryFunctionTriggerRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FunctionTriggerRepo for InMemoryFunctionTriggerRepo {
    async fn insert(&self, trigger: &FunctionTrigger) -> Result<(), RepoError> {
        self.triggers.lock().expect("lock poisoned").insert(trigger.id, trigger.clone());
        Ok(())
    }

    async fn get(&self, id: FunctionTriggerId) -> Result<Option<FunctionTrigger>, RepoError> {
        Ok(self.triggers.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn list_for_function(&self, function_id: FunctionId) -> Result<Vec<FunctionTrigger>, RepoError> {
        Ok(self
            .triggers
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|t| t.function_id == function_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: FunctionTriggerId) -> Result<(), RepoError> {
        self.triggers.lock().expect("lock poisoned").remove(&id);
        Ok(())
    }
}

pub struct DbApplicationRepo {
    pool: PostgresPool,
}

impl DbApplicationRepo {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ApplicationRow {
    id: uuid::Uuid,
    workspace_id: uuid::Uuid,
    project_id: uuid::Uuid,
    name: String,
    kind: String,
    image: String,
    replicas: i32,
    has_ingress: bool,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<ApplicationRow> for Application {
    type Error = RepoError;

    fn try_from(row: ApplicationRow) -> Result<Self, Self::Error> {
        Ok(Application {
            id: ApplicationId(row.id),
            workspace_id: WorkspaceId(row.workspace_id),
            project_id: ProjectId(row.project_id),
            name: row.name,
            kind: str_to_application_kind(&row.kind)?,
            image: row.image,
            replicas: row.replicas,
            has_ingress: row.has_ingress,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl ApplicationRepo for DbApplicationRepo {
    async fn insert(&self, application: &Application) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO applications (id, workspace_id, project_id, name, kind, image, replicas, \
             has_ingress, created_at) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
        )
        .bind(application.id.0)
        .bind(application.workspace_id.0)
        .bind(application.project_id.0)
        .bind(&application.name)
        .bind(application_kind_to_str(application.kind))
        .bind(&application.image)
        .bind(application.replicas)
        .bind(application.has_ingress)
        .bind(application.created_at)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn get(&self, id: ApplicationId) -> Result<Option<Application>, RepoError> {
        let row: Option<ApplicationRow> = sqlx::query_as("SELECT * FROM applications WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool.inner())
            .await?;
        row.map(Application::try_from).transpose()
    }

    async fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<Application>, RepoError> {
        let rows: Vec<ApplicationRow> = sqlx::query_as("SELECT * FROM applications WHERE project_id = $1")
            .bind(project_id.0)
            .fetch_all(self.pool.inner())
            .await?;
        rows.into_iter().map(Application::try_from).collect()
    }

    async fn set_image(&self, id: ApplicationId, image: &str) -> Result<(), RepoError> {
        sqlx::query("UPDATE applications SET image = $1 WHERE id = $2")
            .bind(image)
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn set_replicas(&self, id: ApplicationId, replicas: i32) -> Result<(), RepoError> {
        sqlx::query("UPDATE applications SET replicas = $1 WHERE id = $2")
            .bind(replicas)
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn delete(&self, id: ApplicationId) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM applications WHERE id = $1")
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryApplicationRepo {
    applications: Mutex<HashMap<ApplicationId, Application>>,
}

impl InMemoryApplicationRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApplicationRepo for InMemoryApplicationRepo {
    async fn insert(&self, application: &Application) -> Result<(), RepoError> {
        self.applications.lock().expect("lock poisoned").insert(application.id, application.clone());
        Ok(())
    }

    async fn get(&self, id: ApplicationId) -> Result<Option<Application>, RepoError> {
        Ok(self.applications.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<Application>, RepoError> {
        Ok(self
            .applications
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn set_image(&self, id: ApplicationId, image: &str) -> Result<(), RepoError> {
        if let Some(a) = self.applications.lock().expect("lock poisoned").get_mut(&id) {
            a.image = image.to_string();
        }
        Ok(())
    }

    async fn set_replicas(&self, id: ApplicationId, replicas: i32) -> Result<(), RepoError> {
        if let Some(a) = self.applications.lock().expect("lock poisoned").get_mut(&id) {
            a.replicas = replicas;
        }
        Ok(())
    }

    async fn delete(&self, id: ApplicationId) -> Result<(), RepoError> {
        self.applications.lock().expect("lock poisoned").remove(&id);
        Ok(())
    }
}
