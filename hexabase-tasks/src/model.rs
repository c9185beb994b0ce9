//! Task data model (spec §3 "Task", §4.3, §9 redesign flag: dynamic
//! `interface{}` payloads become a tagged union over task kinds, one
//! dispatch table keyed by `kind`, rather than a free-form JSON blob with
//! runtime type assertions.

use chrono::{DateTime, Utc};
use hexabase_common::ids::{TaskId, WorkspaceId};
use serde::{Deserialize, Serialize};

/// The closed set of asynchronous operations the control plane drives
/// through the task engine (spec §6 event surface topics, §4.1/§4.5
/// operations). Each variant names both the queue group a worker joins
/// and the payload shape below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TaskKind {
    WorkspaceCreate,
    WorkspaceStart,
    WorkspaceStop,
    WorkspaceUpgrade,
    WorkspaceBackup,
    WorkspaceRestore,
    WorkspaceDelete,
    AllocateDedicatedNode,
    FunctionDeployVersion,
    FunctionInvokeAsync,
    NotifyUser,
    MaintenanceSweep,
}

/// Per-kind payload record (spec §9: "tagged union over task kinds with
/// per-kind payload records"). Serialized as the task's `payload` column;
/// `serde`'s externally-tagged default matches `kind` to the worker's
/// dispatch `match`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    WorkspaceCreate {
        workspace_id: WorkspaceId,
    },
    WorkspaceStart {
        workspace_id: WorkspaceId,
    },
    WorkspaceStop {
        workspace_id: WorkspaceId,
    },
    WorkspaceUpgrade {
        workspace_id: WorkspaceId,
        target_version: String,
    },
    WorkspaceBackup {
        workspace_id: WorkspaceId,
        backup_config_json: String,
    },
    WorkspaceRestore {
        workspace_id: WorkspaceId,
        snapshot_ref: String,
    },
    WorkspaceDelete {
        workspace_id: WorkspaceId,
    },
    AllocateDedicatedNode {
        workspace_id: WorkspaceId,
        instance_type: String,
        region: String,
        ssh_key: Option<String>,
    },
    FunctionDeployVersion {
        workspace_id: WorkspaceId,
        function_id: String,
        version_id: String,
    },
    FunctionInvokeAsync {
        workspace_id: WorkspaceId,
        function_id: String,
        invocation_id: String,
        request_json: String,
    },
    NotifyUser {
        workspace_id: Option<WorkspaceId>,
        user_id: String,
        message: String,
    },
    MaintenanceSweep {
        reason: String,
    },
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::WorkspaceCreate { .. } => TaskKind::WorkspaceCreate,
            TaskPayload::WorkspaceStart { .. } => TaskKind::WorkspaceStart,
            TaskPayload::WorkspaceStop { .. } => TaskKind::WorkspaceStop,
            TaskPayload::WorkspaceUpgrade { .. } => TaskKind::WorkspaceUpgrade,
            TaskPayload::WorkspaceBackup { .. } => TaskKind::WorkspaceBackup,
            TaskPayload::WorkspaceRestore { .. } => TaskKind::WorkspaceRestore,
            TaskPayload::WorkspaceDelete { .. } => TaskKind::WorkspaceDelete,
            TaskPayload::AllocateDedicatedNode { .. } => TaskKind::AllocateDedicatedNode,
            TaskPayload::FunctionDeployVersion { .. } => TaskKind::FunctionDeployVersion,
            TaskPayload::FunctionInvokeAsync { .. } => TaskKind::FunctionInvokeAsync,
            TaskPayload::NotifyUser { .. } => TaskKind::NotifyUser,
            TaskPayload::MaintenanceSweep { .. } => TaskKind::MaintenanceSweep,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses are what `(kind, correlation_id)` uniqueness
    /// among "non-terminal states" (spec §3 invariant) is scoped against.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub payload: TaskPayload,
    pub status: TaskStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub progress_pct: u8,
    pub stage: Option<String>,
    pub last_error: Option<String>,
    pub lease_until: Option<DateTime<Utc>>,
    pub leased_by: Option<String>,
    /// Backoff floor: a retryable failure sets this from
    /// [`hexabase_common::retry::RetryConfig::delay_for_attempt`] so the
    /// task isn't reclaimed before its computed delay elapses.
    pub retry_not_before: Option<DateTime<Utc>>,
    /// Cooperative cancel flag (spec §4.3/§5): set by `Cancel`, checked by
    /// the worker on its next heartbeat or stage boundary.
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub correlation_id: String,
    pub dedup_key: Option<String>,
}

impl Task {
    pub fn new(payload: TaskPayload, correlation_id: String, dedup_key: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            kind: payload.kind(),
            payload,
            status: TaskStatus::Pending,
            attempt: 0,
            max_attempts: 8,
            progress_pct: 0,
            stage: None,
            last_error: None,
            lease_until: None,
            leased_by: None,
            retry_not_before: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            correlation_id,
            dedup_key,
        }
    }
}

/// Row of a task lease claim, mirroring the `(workerId, expiry)` pair
/// named in spec §5.
#[derive(Debug, Clone)]
pub struct TaskLease {
    pub worker_id: String,
    pub expiry: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub kind: Option<TaskKind>,
    pub status: Option<TaskStatus>,
    pub correlation_id: Option<String>,
}
