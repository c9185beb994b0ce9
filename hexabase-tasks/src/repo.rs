use crate::model::{Task, TaskFilter, TaskKind, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hexabase_common::ids::TaskId;
use hexabase_service_base::db::PostgresPool;
use hexabase_service_base::RepoError;

/// Storage port for [`Task`] rows. Kept narrow and imperative (no
/// generic query builder) the way `hexabase-service-base` already
/// simplifies the teacher's `RowMeta`/`Pool<DB>` generics down to
/// Postgres-only repos — this crate only ever needs a handful of access
/// patterns, all named in spec §4.3.
#[async_trait]
pub trait TaskRepo: Send + Sync {
    async fn insert(&self, task: &Task) -> Result<(), RepoError>;
    async fn get(&self, id: TaskId) -> Result<Option<Task>, RepoError>;
    /// Finds a non-terminal task with the same `(kind, correlation_id)`,
    /// implementing the idempotent-coalescing invariant (spec §3).
    async fn find_non_terminal_by_correlation(
        &self,
        kind: TaskKind,
        correlation_id: &str,
    ) -> Result<Option<Task>, RepoError>;
    async fn find_recent_by_dedup_key(
        &self,
        kind: TaskKind,
        dedup_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Task>, RepoError>;
    /// Atomically claims one pending (or lease-expired) task of `kind`
    /// for `worker_id`, setting `status=running` and the new
    /// `lease_until`. Returns `None` if nothing is claimable.
    async fn claim_one(
        &self,
        kind: TaskKind,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Task>, RepoError>;
    /// Extends the lease for a task still held by `worker_id`; `false` if
    /// the lease was already lost (expired and reclaimed, or terminal).
    async fn renew_lease(
        &self,
        id: TaskId,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, RepoError>;
    async fn update_progress(
        &self,
        id: TaskId,
        stage: Option<&str>,
        progress_pct: u8,
    ) -> Result<(), RepoError>;
    async fn complete(&self, id: TaskId) -> Result<(), RepoError>;
    async fn fail(
        &self,
        id: TaskId,
        error: &str,
        retryable: bool,
        next_attempt: u32,
        retry_not_before: Option<DateTime<Utc>>,
    ) -> Result<(), RepoError>;
    async fn request_cancel(&self, id: TaskId) -> Result<(), RepoError>;
    async fn is_cancel_requested(&self, id: TaskId) -> Result<bool, RepoError>;
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, RepoError>;
}

/// Postgres-backed repo. The `tasks` table is named in spec §6's
/// persisted-state layout; columns mirror [`Task`] field-for-field, with
/// `payload`/`kind` stored as `jsonb`/`text` respectively.
pub struct DbTaskRepo {
    pool: PostgresPool,
}

impl DbTaskRepo {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepo for DbTaskRepo {
    async fn insert(&self, task: &Task) -> Result<(), RepoError> {
        let kind = task.kind.to_string();
        let status = task.status.to_string();
        let payload = serde_json::to_value(&task.payload)
            .map_err(|e| RepoError::QueryError(e.to_string()))?;
        sqlx::query(
            "INSERT INTO tasks (id, kind, payload, status, attempt, max_attempts, \
             progress_pct, stage, last_error, lease_until, leased_by, retry_not_before, \
             cancel_requested, created_at, updated_at, correlation_id, dedup_key) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)",
        )
        .bind(task.id.0)
        .bind(kind)
        .bind(payload)
        .bind(status)
        .bind(task.attempt as i32)
        .bind(task.max_attempts as i32)
        .bind(task.progress_pct as i16)
        .bind(&task.stage)
        .bind(&task.last_error)
        .bind(task.lease_until)
        .bind(&task.leased_by)
        .bind(task.retry_not_before)
        .bind(task.cancel_requested)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(&task.correlation_id)
        .bind(&task.dedup_key)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, RepoError> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool.inner())
            .await?;
        row.map(TaskRow::into_task).transpose()
    }

    async fn find_non_terminal_by_correlation(
        &self,
        kind: TaskKind,
        correlation_id: &str,
    ) -> Result<Option<Task>, RepoError> {
        let row: Option<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks WHERE kind = $1 AND correlation_id = $2 \
             AND status IN ('pending','running') LIMIT 1",
        )
        .bind(kind.to_string())
        .bind(correlation_id)
        .fetch_optional(self.pool.inner())
        .await?;
        row.map(TaskRow::into_task).transpose()
    }

    async fn find_recent_by_dedup_key(
        &self,
        kind: TaskKind,
        dedup_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Task>, RepoError> {
        let row: Option<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks WHERE kind = $1 AND dedup_key = $2 AND created_at >= $3 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(kind.to_string())
        .bind(dedup_key)
        .bind(since)
        .fetch_optional(self.pool.inner())
        .await?;
        row.map(TaskRow::into_task).transpose()
    }

    async fn claim_one(
        &self,
        kind: TaskKind,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Task>, RepoError> {
        let now = Utc::now();
        let row: Option<TaskRow> = sqlx::query_as(
            "UPDATE tasks SET status = 'running', leased_by = $1, lease_until = $2, \
             updated_at = $3 WHERE id = ( \
               SELECT id FROM tasks \
               WHERE kind = $4 AND ( \
                 status = 'pending' OR (status = 'running' AND lease_until < $3) \
               ) AND (retry_not_before IS NULL OR retry_not_before <= $3) \
               ORDER BY created_at ASC LIMIT 1 FOR UPDATE SKIP LOCKED \
             ) RETURNING *",
        )
        .bind(worker_id)
        .bind(lease_until)
        .bind(now)
        .bind(kind.to_string())
        .fetch_optional(self.pool.inner())
        .await?;
        row.map(TaskRow::into_task).transpose()
    }

    async fn renew_lease(
        &self,
        id: TaskId,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE tasks SET lease_until = $1, updated_at = $2 \
             WHERE id = $3 AND leased_by = $4 AND status = 'running'",
        )
        .bind(lease_until)
        .bind(Utc::now())
        .bind(id.0)
        .bind(worker_id)
        .execute(self.pool.inner())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(
        &self,
        id: TaskId,
        stage: Option<&str>,
        progress_pct: u8,
    ) -> Result<(), RepoError> {
        sqlx::query("UPDATE tasks SET stage = $1, progress_pct = $2, updated_at = $3 WHERE id = $4")
            .bind(stage)
            .bind(progress_pct as i16)
            .bind(Utc::now())
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn complete(&self, id: TaskId) -> Result<(), RepoError> {
        sqlx::query(
            "UPDATE tasks SET status = 'succeeded', progress_pct = 100, updated_at = $1 WHERE id = $2",
        )
        .bind(Utc::now())
        .bind(id.0)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn fail(
        &self,
        id: TaskId,
        error: &str,
        retryable: bool,
        next_attempt: u32,
        retry_not_before: Option<DateTime<Utc>>,
    ) -> Result<(), RepoError> {
        let status = if retryable { "pending" } else { "failed" };
        sqlx::query(
            "UPDATE tasks SET status = $1, last_error = $2, attempt = $3, \
             lease_until = NULL, leased_by = NULL, retry_not_before = $4, updated_at = $5 WHERE id = $6",
        )
        .bind(status)
        .bind(error)
        .bind(next_attempt as i32)
        .bind(retry_not_before)
        .bind(Utc::now())
        .bind(id.0)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn request_cancel(&self, id: TaskId) -> Result<(), RepoError> {
        sqlx::query("UPDATE tasks SET cancel_requested = true, updated_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn is_cancel_requested(&self, id: TaskId) -> Result<bool, RepoError> {
        let row: Option<(bool,)> =
            sqlx::query_as("SELECT cancel_requested FROM tasks WHERE id = $1")
                .bind(id.0)
                .fetch_optional(self.pool.inner())
                .await?;
        Ok(row.map(|(flag,)| flag).unwrap_or(false))
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, RepoError> {
        let mut query = String::from("SELECT * FROM tasks WHERE true");
        if filter.kind.is_some() {
            query.push_str(" AND kind = $1");
        }
        let rows: Vec<TaskRow> = if let Some(kind) = &filter.kind {
            sqlx::query_as(&query)
                .bind(kind.to_string())
                .fetch_all(self.pool.inner())
                .await?
        } else {
            sqlx::query_as(&query).fetch_all(self.pool.inner()).await?
        };
        rows.into_iter()
            .map(TaskRow::into_task)
            .collect::<Result<Vec<_>, _>>()
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: uuid::Uuid,
    kind: String,
    payload: serde_json::Value,
    status: String,
    attempt: i32,
    max_attempts: i32,
    progress_pct: i16,
    stage: Option<String>,
    last_error: Option<String>,
    lease_until: Option<DateTime<Utc>>,
    leased_by: Option<String>,
    retry_not_before: Option<DateTime<Utc>>,
    cancel_requested: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    correlation_id: String,
    dedup_key: Option<String>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task, RepoError> {
        let payload = serde_json::from_value(self.payload)
            .map_err(|e| RepoError::QueryError(format!("malformed task payload: {e}")))?;
        let kind = self
            .kind
            .parse()
            .map_err(|_| RepoError::QueryError(format!("unknown task kind: {}", self.kind)))?;
        let status = self
            .status
            .parse()
            .map_err(|_| RepoError::QueryError(format!("unknown task status: {}", self.status)))?;
        Ok(Task {
            id: TaskId(self.id),
            kind,
            payload,
            status,
            attempt: self.attempt as u32,
            max_attempts: self.max_attempts as u32,
            progress_pct: self.progress_pct as u8,
            stage: self.stage,
            last_error: self.last_error,
            lease_until: self.lease_until,
            leased_by: self.leased_by,
            retry_not_before: self.retry_not_before,
            cancel_requested: self.cancel_requested,
            created_at: self.created_at,
            updated_at: self.updated_at,
            correlation_id: self.correlation_id,
            dedup_key: self.dedup_key,
        })
    }
}

impl std::str::FromStr for TaskKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workspace_create" => Ok(TaskKind::WorkspaceCreate),
            "workspace_start" => Ok(TaskKind::WorkspaceStart),
            "workspace_stop" => Ok(TaskKind::WorkspaceStop),
            "workspace_upgrade" => Ok(TaskKind::WorkspaceUpgrade),
            "workspace_backup" => Ok(TaskKind::WorkspaceBackup),
            "workspace_restore" => Ok(TaskKind::WorkspaceRestore),
            "workspace_delete" => Ok(TaskKind::WorkspaceDelete),
            "allocate_dedicated_node" => Ok(TaskKind::AllocateDedicatedNode),
            "function_deploy_version" => Ok(TaskKind::FunctionDeployVersion),
            "function_invoke_async" => Ok(TaskKind::FunctionInvokeAsync),
            "notify_user" => Ok(TaskKind::NotifyUser),
            "maintenance_sweep" => Ok(TaskKind::MaintenanceSweep),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(()),
        }
    }
}

/// In-memory fake, the one actually exercised by this crate's tests
/// (spec §9: "dedicated in-memory implementations ... no reflection
/// mocks").
#[derive(Default)]
pub struct InMemoryTaskRepo {
    tasks: std::sync::Mutex<std::collections::HashMap<TaskId, Task>>,
}

impl InMemoryTaskRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepo for InMemoryTaskRepo {
    async fn insert(&self, task: &Task) -> Result<(), RepoError> {
        self.tasks
            .lock()
            .expect("task repo lock poisoned")
            .insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, RepoError> {
        Ok(self.tasks.lock().expect("task repo lock poisoned").get(&id).cloned())
    }

    async fn find_non_terminal_by_correlation(
        &self,
        kind: TaskKind,
        correlation_id: &str,
    ) -> Result<Option<Task>, RepoError> {
        Ok(self
            .tasks
            .lock()
            .expect("task repo lock poisoned")
            .values()
            .find(|t| t.kind == kind && t.correlation_id == correlation_id && !t.status.is_terminal())
            .cloned())
    }

    async fn find_recent_by_dedup_key(
        &self,
        kind: TaskKind,
        dedup_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Task>, RepoError> {
        Ok(self
            .tasks
            .lock()
            .expect("task repo lock poisoned")
            .values()
            .filter(|t| {
                t.kind == kind && t.dedup_key.as_deref() == Some(dedup_key) && t.created_at >= since
            })
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn claim_one(
        &self,
        kind: TaskKind,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Task>, RepoError> {
        let now = Utc::now();
        let mut tasks = self.tasks.lock().expect("task repo lock poisoned");
        let claimable = tasks
            .values_mut()
            .filter(|t| {
                t.kind == kind
                    && (t.status == TaskStatus::Pending
                        || (t.status == TaskStatus::Running
                            && t.lease_until.map(|l| l < now).unwrap_or(false)))
                    && t.retry_not_before.map(|rnb| rnb <= now).unwrap_or(true)
            })
            .min_by_key(|t| t.created_at);
        if let Some(task) = claimable {
            task.status = TaskStatus::Running;
            task.leased_by = Some(worker_id.to_string());
            task.lease_until = Some(lease_until);
            task.updated_at = now;
            Ok(Some(task.clone()))
        } else {
            Ok(None)
        }
    }

    async fn renew_lease(
        &self,
        id: TaskId,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        let mut tasks = self.tasks.lock().expect("task repo lock poisoned");
        match tasks.get_mut(&id) {
            Some(task)
                if task.status == TaskStatus::Running
                    && task.leased_by.as_deref() == Some(worker_id) =>
            {
                task.lease_until = Some(lease_until);
                task.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_progress(
        &self,
        id: TaskId,
        stage: Option<&str>,
        progress_pct: u8,
    ) -> Result<(), RepoError> {
        let mut tasks = self.tasks.lock().expect("task repo lock poisoned");
        if let Some(task) = tasks.get_mut(&id) {
            task.stage = stage.map(str::to_string);
            task.progress_pct = progress_pct;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn complete(&self, id: TaskId) -> Result<(), RepoError> {
        let mut tasks = self.tasks.lock().expect("task repo lock poisoned");
        if let Some(task) = tasks.get_mut(&id) {
            task.status = TaskStatus::Succeeded;
            task.progress_pct = 100;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn fail(
        &self,
        id: TaskId,
        error: &str,
        retryable: bool,
        next_attempt: u32,
        retry_not_before: Option<DateTime<Utc>>,
    ) -> Result<(), RepoError> {
        let mut tasks = self.tasks.lock().expect("task repo lock poisoned");
        if let Some(task) = tasks.get_mut(&id) {
            task.status = if retryable {
                TaskStatus::Pending
            } else {
                TaskStatus::Failed
            };
            task.last_error = Some(error.to_string());
            task.attempt = next_attempt;
            task.lease_until = None;
            task.leased_by = None;
            task.retry_not_before = retry_not_before;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn request_cancel(&self, id: TaskId) -> Result<(), RepoError> {
        let mut tasks = self.tasks.lock().expect("task repo lock poisoned");
        if let Some(task) = tasks.get_mut(&id) {
            if task.status == TaskStatus::Pending {
                task.status = TaskStatus::Cancelled;
            } else {
                task.cancel_requested = true;
            }
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn is_cancel_requested(&self, id: TaskId) -> Result<bool, RepoError> {
        Ok(self
            .tasks
            .lock()
            .expect("task repo lock poisoned")
            .get(&id)
            .map(|t| t.cancel_requested)
            .unwrap_or(false))
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, RepoError> {
        Ok(self
            .tasks
            .lock()
            .expect("task repo lock poisoned")
            .values()
            .filter(|t| filter.kind.map(|k| k == t.kind).unwrap_or(true))
            .filter(|t| filter.status.map(|s| s == t.status).unwrap_or(true))
            .filter(|t| {
                filter
                    .correlation_id
                    .as_deref()
                    .map(|cid| cid == t.correlation_id)
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }
}
