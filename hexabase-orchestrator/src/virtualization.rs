//! Dedicated-node virtualization backend (spec §4.1 algorithm 2). The
//! spec explicitly lists the Proxmox API as "out of scope (external
//! collaborator)" (spec §1) — referenced by contract only — so this
//! module defines the trait the orchestrator calls against and an
//! in-memory fake for it; no real HTTP client to a vendor API is wired
//! up here.

use crate::error::VirtualizationError;
use crate::model::{DedicatedNodeRequest, ProvisionedNode};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait VirtualizationApi: Send + Sync {
    /// Provisions a VM sized for `request.instance_type` in
    /// `request.region`, authorized with `request.ssh_key`, and returns
    /// the node's name/address once it has joined the host cluster as a
    /// kubelet (spec §4.1 "provision a VM via the virtualization API").
    async fn provision_node(&self, request: &DedicatedNodeRequest) -> Result<ProvisionedNode, VirtualizationError>;

    async fn deprovision_node(&self, node_name: &str) -> Result<(), VirtualizationError>;
}

#[derive(Default)]
pub struct InMemoryVirtualizationApi {
    nodes: Mutex<HashMap<String, ProvisionedNode>>,
}

impl InMemoryVirtualizationApi {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VirtualizationApi for InMemoryVirtualizationApi {
    async fn provision_node(&self, request: &DedicatedNodeRequest) -> Result<ProvisionedNode, VirtualizationError> {
        let node = ProvisionedNode {
            node_name: format!("node-{}", request.workspace_id),
            ip_address: "10.0.0.1".to_string(),
        };
        self.nodes.lock().expect("lock poisoned").insert(node.node_name.clone(), node.clone());
        Ok(node)
    }

    async fn deprovision_node(&self, node_name: &str) -> Result<(), VirtualizationError> {
        self.nodes.lock().expect("lock poisoned").remove(node_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexabase_common::ids::WorkspaceId;
    use test_r::test;

    #[test]
    async fn provisioning_then_deprovisioning_a_node_round_trips() {
        let api = InMemoryVirtualizationApi::new();
        let request = DedicatedNodeRequest {
            workspace_id: WorkspaceId::generate(),
            instance_type: "m5.large".to_string(),
            region: "us-east-1".to_string(),
            ssh_key: Some("ssh-ed25519 AAAA...".to_string()),
        };

        let node = api.provision_node(&request).await.unwrap();
        assert!(node.node_name.contains(&request.workspace_id.to_string()));

        api.deprovision_node(&node.node_name).await.unwrap();
    }
}
