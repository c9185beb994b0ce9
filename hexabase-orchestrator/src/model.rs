//! vCluster Orchestrator data model (spec §4.1): the restartable stage
//! sequence `CreateWorkspace` drives through, plus the health and
//! dedicated-node shapes the host/virtualization abstractions exchange.

use chrono::{DateTime, Utc};
use hexabase_common::ids::WorkspaceId;
use serde::{Deserialize, Serialize};

/// Ordered sub-stages of the `PendingCreation -> Running` climb (spec
/// §4.1 algorithm 1). Each stage is individually idempotent so a crashed
/// worker picks back up mid-sequence instead of restarting from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ProvisioningStage {
    CreateVCluster,
    WaitReady,
    ApplyOidc,
    InstallHnc,
    ApplyResourceQuota,
    SeedGroupsAndRoles,
    ApplyDefaultBindings,
}

impl ProvisioningStage {
    pub const ALL: [ProvisioningStage; 7] = [
        ProvisioningStage::CreateVCluster,
        ProvisioningStage::WaitReady,
        ProvisioningStage::ApplyOidc,
        ProvisioningStage::InstallHnc,
        ProvisioningStage::ApplyResourceQuota,
        ProvisioningStage::SeedGroupsAndRoles,
        ProvisioningStage::ApplyDefaultBindings,
    ];

    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).expect("stage in ALL")
    }

    pub fn progress_pct(&self) -> u8 {
        (((self.index() + 1) * 100) / Self::ALL.len()) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unreachable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: ComponentStatus,
    pub message: Option<String>,
}

/// Returned by `GetHealth` (spec §4.1 public contract); also the shape an
/// alerting sweep over every `Running` workspace would fan out against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub workspace_id: WorkspaceId,
    pub overall: ComponentStatus,
    pub components: Vec<ComponentHealth>,
    pub checked_at: DateTime<Utc>,
}

/// `AllocateDedicatedNode` task payload material (spec §4.1 algorithm 2):
/// provision a VM via the virtualization backend, then taint/label it and
/// patch the vCluster's pod placement to land exclusively on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedicatedNodeRequest {
    pub workspace_id: WorkspaceId,
    pub instance_type: String,
    pub region: String,
    pub ssh_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedNode {
    pub node_name: String,
    pub ip_address: String,
}

/// `dedicated=<workspace_id>` taint/label/toleration value (spec §4.1):
/// centralized here so the host API and the virtualization API agree on
/// the exact string without either hardcoding the other's format.
pub fn dedicated_node_pool_label(workspace_id: WorkspaceId) -> String {
    workspace_id.to_string()
}
