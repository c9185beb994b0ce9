//! Tenant hierarchy & policy data model (spec §3): Organization →
//! Workspace(vCluster) → Project(Namespace), the Group forest, Roles,
//! RoleAssignments, and Alerts. Entities are plain structs; invariant
//! enforcement lives in [`crate::service`].

use chrono::{DateTime, Utc};
use hexabase_common::ids::{
    AlertId, GroupId, OrgId, PlanId, ProjectId, RoleAssignmentId, RoleId, UserId, WorkspaceId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrgId,
    pub name: String,
    pub owner_user_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum OrgRole {
    Owner,
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub external_subject: String,
    pub provider: String,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Business-level membership only: spec §3 is explicit that this "does
/// not grant any rights inside vClusters" — vCluster RBAC is governed
/// entirely by [`Group`]/[`Role`]/[`RoleAssignment`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationUser {
    pub org_id: OrgId,
    pub user_id: UserId,
    pub role: OrgRole,
}

/// Lifecycle state machine driven by the orchestrator (spec §4.1),
/// persisted here because it is a `Workspace` column. Kept a disjoint
/// field from [`PlanTier`] per the resolved Open Question in SPEC_FULL.md
/// §11.1 — the source conflated them, this implementation does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum WorkspaceStatus {
    PendingCreation,
    Provisioning,
    Configuring,
    Running,
    Stopping,
    Stopped,
    Upgrading,
    BackingUp,
    FailedCreation,
    FailedUpgrade,
    Deleting,
    Deleted,
}

impl WorkspaceStatus {
    /// Valid direct transitions per the state machine diagram in spec
    /// §4.1, used both to validate orchestrator writes and as the audit
    /// property test in spec §8 item 1.
    pub fn can_transition_to(&self, next: WorkspaceStatus) -> bool {
        use WorkspaceStatus::*;
        if next == Deleting {
            return *self != Deleted;
        }
        matches!(
            (self, next),
            (PendingCreation, Provisioning)
                | (Provisioning, Configuring)
                | (Provisioning, FailedCreation)
                | (Configuring, Running)
                | (Configuring, FailedCreation)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Stopped, Running)
                | (Running, Upgrading)
                | (Upgrading, Running)
                | (Upgrading, FailedUpgrade)
                | (Running, BackingUp)
                | (BackingUp, Running)
                | (Deleting, Deleted)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PlanTier {
    Shared,
    Dedicated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub cpu_millicores: i64,
    pub memory_mb: i64,
    pub storage_gb: i64,
    pub max_pods: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub resource_quota: ResourceQuota,
    pub allow_dedicated_nodes: bool,
    pub price_tier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub org_id: OrgId,
    pub name: String,
    pub plan_id: PlanId,
    pub plan_tier: PlanTier,
    pub status: WorkspaceStatus,
    pub vcluster_instance_name: String,
    pub vcluster_namespace: String,
    pub api_endpoint: Option<String>,
    pub oidc_client_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub workspace_id: WorkspaceId,
    pub parent_project_id: Option<ProjectId>,
    pub name: String,
    pub namespace_name: String,
    pub resource_quota: ResourceQuota,
    pub created_at: DateTime<Utc>,
}

/// The three seed groups every Workspace is created with (spec §3/§8),
/// and whose names may never be reused for a custom group.
pub const SEED_GROUP_WORKSPACE_MEMBERS: &str = "WorkspaceMembers";
pub const SEED_GROUP_WS_ADMINS: &str = "WSAdmins";
pub const SEED_GROUP_WS_USERS: &str = "WSUsers";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub parent_group_id: Option<GroupId>,
    /// Seed groups are protected from deletion (spec §8 property 2).
    pub is_seed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group_id: GroupId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RoleScope {
    Workspace,
    Project,
}

pub const PRESET_ROLE_WORKSPACE_ADMIN: &str = "hexabase:workspace-admin";
pub const PRESET_ROLE_WORKSPACE_VIEWER: &str = "hexabase:workspace-viewer";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub scope: RoleScope,
    pub workspace_id: WorkspaceId,
    pub project_id: Option<ProjectId>,
    pub name: String,
    /// Kubernetes RBAC `rules` payload (verb/resource/apiGroup tuples),
    /// opaque to this crate — materialized by the orchestrator into
    /// (Cluster)Role objects inside the vCluster.
    pub rules_json: String,
    pub preset: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: RoleAssignmentId,
    pub role_id: RoleId,
    pub group_id: GroupId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum AlertKind {
    QuotaExceeded,
    WorkspaceUnhealthy,
    NodeUnreachable,
    CertificateExpiring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub workspace_id: WorkspaceId,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub threshold: f64,
    pub value: f64,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}
