//! Function/Application facade data model (spec §4.5). Entities here are
//! engine-neutral by construction: nothing in this module names a Fission
//! or Knative resource shape, so a provider swap never touches this file.

use chrono::{DateTime, Utc};
use hexabase_common::ids::{ApplicationId, FunctionId, FunctionTriggerId, FunctionVersionId, InvocationId, ProjectId, UserId, WorkspaceId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ProviderKind {
    Fission,
    Knative,
}

/// What a [`crate::provider::Provider`] can do, so the façade never has to
/// special-case an engine by name (spec §4.5 "exposes its capabilities").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub provider: ProviderKind,
    pub supported_runtimes: Vec<String>,
    pub max_memory_mb: i32,
    pub cold_start_class: ColdStartClass,
    pub supports_async: bool,
    pub supports_scale_to_zero: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ColdStartClass {
    None,
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum BuildStatus {
    Building,
    Success,
    Failed,
}

/// What a version is built from. `DeployVersion(fn, source|image)` in the
/// spec collapses to one of these two cases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VersionSource {
    Source { archive_ref: String, builder_runtime: String },
    Image { image_ref: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub id: FunctionId,
    pub workspace_id: WorkspaceId,
    pub project_id: ProjectId,
    pub name: String,
    pub runtime: String,
    pub memory_mb: i32,
    pub timeout_s: i32,
    pub env: Vec<(String, String)>,
    /// The only thing a `SetActiveVersion` call changes (spec §4.5
    /// "active version is a property of the function, not of a deployment
    /// object").
    pub active_version_id: Option<FunctionVersionId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionVersion {
    pub id: FunctionVersionId,
    pub function_id: FunctionId,
    pub source: VersionSource,
    pub build_status: BuildStatus,
    pub build_log: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TriggerKind {
    Http,
    Schedule,
    Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionTrigger {
    pub id: FunctionTriggerId,
    pub function_id: FunctionId,
    pub kind: TriggerKind,
    /// Opaque per-kind config: an HTTP path/method pair, a cron
    /// expression, or an event source selector — shaped and interpreted
    /// entirely by the provider, same idiom as `Role::rules_json`.
    pub config_json: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ApplicationKind {
    Deployment,
    StatefulSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub workspace_id: WorkspaceId,
    pub project_id: ProjectId,
    pub name: String,
    pub kind: ApplicationKind,
    pub image: String,
    pub replicas: i32,
    pub has_ingress: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum InstancePhase {
    Pending,
    Running,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub pod_name: String,
    pub phase: InstancePhase,
    pub node_name: Option<String>,
    pub restarts: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResult {
    pub invocation_id: InvocationId,
    pub status_code: u16,
    pub duration_ms: i64,
    pub cold_start: bool,
    pub output: Vec<u8>,
}

/// Who caused a mutating call, so events can carry `initiated_by` per
/// spec §4.5. Mirrors `hexabase_hierarchy::audit::Actor` but this crate
/// doesn't depend on the audit module just for this one field shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InitiatedBy {
    User(UserId),
    Agent { acting_for: UserId },
}

impl InitiatedBy {
    pub fn tag(&self) -> String {
        match self {
            InitiatedBy::User(id) => format!("user:{id}"),
            InitiatedBy::Agent { acting_for } => format!("agent:{acting_for}"),
        }
    }
}

/// Structured events the façade emits per operation (spec §4.5
/// "Observability surface ... what the core emits, not stores").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FunctionEvent {
    Created {
        workspace_id: WorkspaceId,
        project_id: ProjectId,
        function_id: FunctionId,
        initiated_by: String,
    },
    Deployed {
        workspace_id: WorkspaceId,
        project_id: ProjectId,
        function_id: FunctionId,
        version_id: FunctionVersionId,
        duration_ms: i64,
        initiated_by: String,
    },
    ActiveVersionChanged {
        workspace_id: WorkspaceId,
        project_id: ProjectId,
        function_id: FunctionId,
        version_id: FunctionVersionId,
        initiated_by: String,
    },
    RolledBack {
        workspace_id: WorkspaceId,
        project_id: ProjectId,
        function_id: FunctionId,
        version_id: FunctionVersionId,
        initiated_by: String,
    },
    Invoked {
        workspace_id: WorkspaceId,
        project_id: ProjectId,
        function_id: FunctionId,
        version_id: FunctionVersionId,
        invocation_id: InvocationId,
        duration_ms: i64,
        cold_start: bool,
        initiated_by: String,
    },
    Failed {
        workspace_id: WorkspaceId,
        project_id: ProjectId,
        function_id: FunctionId,
        version_id: Option<FunctionVersionId>,
        reason: String,
        initiated_by: String,
    },
}
