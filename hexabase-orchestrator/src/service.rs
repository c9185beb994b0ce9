//! vCluster Orchestrator (C6, spec §4.1): the single front door for
//! every workspace lifecycle operation. Requests enqueue a task;
//! [`OrchestratorServiceDefault::execute`] is what a task-engine worker
//! calls once it has claimed that task, and drives the host cluster
//! through the operation's reconciliation stages under a per-workspace
//! lease (spec §5) so two workers can never race the same vCluster.

use crate::error::{HostClusterError, OrchestratorError};
use crate::host::{HostClusterApi, OidcConfig, RbacGrant};
use crate::model::{DedicatedNodeRequest, HealthReport, ProvisioningStage};
use crate::virtualization::VirtualizationApi;
use async_trait::async_trait;
use hexabase_cache::lease::{LeaseHandle, LeaseManager, WORKSPACE_LEASE_TTL};
use hexabase_common::ids::{TaskId, WorkspaceId};
use hexabase_hierarchy::model::{PlanTier, Workspace, WorkspaceStatus};
use hexabase_hierarchy::repo::{PlanRepo, WorkspaceRepo};
use hexabase_hierarchy::{HierarchyService, HierarchyServiceDefault};
use hexabase_tasks::model::{Task, TaskFilter, TaskPayload};
use hexabase_tasks::TaskEngine;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_READY_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_READY_POLLS: u32 = 24;

#[async_trait]
pub trait OrchestratorService: Send + Sync {
    async fn request_create(&self, workspace_id: WorkspaceId) -> Result<TaskId, OrchestratorError>;
    async fn request_start(&self, workspace_id: WorkspaceId) -> Result<TaskId, OrchestratorError>;
    async fn request_stop(&self, workspace_id: WorkspaceId) -> Result<TaskId, OrchestratorError>;
    async fn request_upgrade(&self, workspace_id: WorkspaceId, target_version: String) -> Result<TaskId, OrchestratorError>;
    async fn request_backup(&self, workspace_id: WorkspaceId, backup_config_json: String) -> Result<TaskId, OrchestratorError>;
    async fn request_restore(&self, workspace_id: WorkspaceId, snapshot_ref: String) -> Result<TaskId, OrchestratorError>;
    /// Cancels any non-terminal task on `workspace_id` and enqueues the
    /// delete, so a delete always wins a race with an in-flight create or
    /// upgrade (spec §4.1 "Delete supersedes").
    async fn request_delete(&self, workspace_id: WorkspaceId) -> Result<TaskId, OrchestratorError>;
    async fn request_allocate_dedicated_node(&self, request: DedicatedNodeRequest) -> Result<TaskId, OrchestratorError>;
    async fn get_health(&self, workspace_id: WorkspaceId) -> Result<HealthReport, OrchestratorError>;
    async fn get_kubeconfig(&self, workspace_id: WorkspaceId) -> Result<String, OrchestratorError>;

    /// Executed by a task-engine worker after `tasks.claim(...)` returns
    /// `task`. Acquires the per-workspace lease, dispatches on
    /// `task.payload`, and releases the lease before returning.
    async fn execute(&self, task: &Task) -> Result<(), OrchestratorError>;
}

pub struct OrchestratorServiceDefault {
    workspaces: Arc<dyn WorkspaceRepo>,
    plans: Arc<dyn PlanRepo>,
    hierarchy: Arc<HierarchyServiceDefault>,
    tasks: Arc<dyn TaskEngine>,
    host: Arc<dyn HostClusterApi>,
    virtualization: Arc<dyn VirtualizationApi>,
    leases: LeaseManager,
    ready_poll_interval: Duration,
}

impl OrchestratorServiceDefault {
    pub fn new(
        workspaces: Arc<dyn WorkspaceRepo>,
        plans: Arc<dyn PlanRepo>,
        hierarchy: Arc<HierarchyServiceDefault>,
        tasks: Arc<dyn TaskEngine>,
        host: Arc<dyn HostClusterApi>,
        virtualization: Arc<dyn VirtualizationApi>,
        leases: LeaseManager,
    ) -> Self {
        Self {
            workspaces,
            plans,
            hierarchy,
            tasks,
            host,
            virtualization,
            leases,
            ready_poll_interval: DEFAULT_READY_POLL_INTERVAL,
        }
    }

    /// Test/tuning hook: production always wants the default poll cadence,
    /// but a `WaitReady` integration test shouldn't burn real wall-clock
    /// seconds waiting on a fake that's ready after its second poll.
    pub fn with_ready_poll_interval(mut self, interval: Duration) -> Self {
        self.ready_poll_interval = interval;
        self
    }

    async fn get_workspace(&self, workspace_id: WorkspaceId) -> Result<Workspace, OrchestratorError> {
        self.workspaces
            .get(workspace_id)
            .await?
            .ok_or_else(|| OrchestratorError::WorkspaceNotFound(workspace_id.to_string()))
    }

    async fn acquire_lease(&self, workspace_id: WorkspaceId) -> Result<LeaseHandle, OrchestratorError> {
        self.leases
            .acquire(&format!("ws:{workspace_id}"), WORKSPACE_LEASE_TTL)
            .await?
            .ok_or_else(|| OrchestratorError::WorkspaceLeaseHeld(workspace_id.to_string()))
    }

    async fn release_lease(&self, handle: &LeaseHandle) {
        if let Err(err) = self.leases.release(handle).await {
            tracing::warn!(resource = %handle.resource, error = %err, "failed to release workspace lease");
        }
    }

    async fn report_stage(&self, task_id: TaskId, stage: ProvisioningStage) -> Result<(), OrchestratorError> {
        self.tasks
            .report_progress(task_id, &stage.to_string(), stage.progress_pct())
            .await?;
        Ok(())
    }

    /// `WaitReady` stage (spec §4.1): a bounded poll loop, not a single
    /// blocking call, so the cooperative cancel flag and the task's
    /// progress both get a chance to update between attempts.
    async fn wait_ready(&self, task: &Task, ws: &Workspace) -> Result<(), OrchestratorError> {
        for _ in 0..MAX_READY_POLLS {
            if self.tasks.is_cancelled(task.id).await? {
                return Err(OrchestratorError::Cancelled);
            }
            if self
                .host
                .vcluster_is_ready(&ws.vcluster_namespace, &ws.vcluster_instance_name)
                .await?
            {
                return Ok(());
            }
            self.report_stage(task.id, ProvisioningStage::WaitReady).await?;
            tokio::time::sleep(self.ready_poll_interval).await;
        }
        Err(OrchestratorError::Host(HostClusterError::Upstream(
            "vCluster did not become ready in time".to_string(),
        )))
    }

    /// `SeedGroupsAndRoles` + `ApplyDefaultBindings` stages: the
    /// hierarchy service already owns the Groups/Roles/RoleAssignments
    /// rows (created in `create_workspace`); this materializes
    /// `ResolveBindings`'s output into actual vCluster RBAC objects.
    async fn apply_bindings(&self, ws: &Workspace) -> Result<(), OrchestratorError> {
        let bindings = self.hierarchy.resolve_bindings(ws.id).await?;
        let mut grants = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let group = self
                .hierarchy
                .get_group(binding.group_id)
                .await?
                .ok_or_else(|| OrchestratorError::WorkspaceNotFound(format!("group {}", binding.group_id)))?;
            let role = self
                .hierarchy
                .get_role(binding.role_id)
                .await?
                .ok_or_else(|| OrchestratorError::WorkspaceNotFound(format!("role {}", binding.role_id)))?;
            grants.push(RbacGrant {
                group_name: group.name,
                role_name: role.name,
                rules_json: role.rules_json,
            });
        }
        self.host.apply_rbac(&ws.vcluster_namespace, &grants).await?;
        Ok(())
    }

    /// Climbs `PendingCreation -> Provisioning -> Configuring -> Running`
    /// (spec §4.1 algorithm 1), re-entering at whichever stage the
    /// workspace's current status implies so a crashed/retried attempt
    /// resumes instead of restarting.
    async fn run_create(&self, workspace_id: WorkspaceId, task: &Task) -> Result<(), OrchestratorError> {
        let ws = self.get_workspace(workspace_id).await?;
        if matches!(ws.status, WorkspaceStatus::Deleting | WorkspaceStatus::Deleted) {
            return Ok(());
        }

        let result = self.run_create_stages(&ws, task).await;
        if result.is_err() && task.attempt + 1 >= task.max_attempts {
            let failing_status = self.get_workspace(workspace_id).await.map(|w| w.status).unwrap_or(ws.status);
            if matches!(failing_status, WorkspaceStatus::Provisioning | WorkspaceStatus::Configuring) {
                let _ = self
                    .workspaces
                    .update_status(workspace_id, failing_status, WorkspaceStatus::FailedCreation)
                    .await;
            }
        }
        result
    }

    async fn run_create_stages(&self, ws: &Workspace, task: &Task) -> Result<(), OrchestratorError> {
        if ws.status == WorkspaceStatus::PendingCreation {
            self.workspaces
                .update_status(ws.id, WorkspaceStatus::PendingCreation, WorkspaceStatus::Provisioning)
                .await?;
        }

        self.report_stage(task.id, ProvisioningStage::CreateVCluster).await?;
        self.host.ensure_namespace(&ws.vcluster_namespace).await?;
        self.host
            .apply_vcluster(&ws.vcluster_namespace, &ws.vcluster_instance_name, &json!({}))
            .await?;

        self.wait_ready(task, ws).await?;

        // Idempotent: a resumed attempt that crashed just after this CAS
        // finds `expected_status` no longer matches and just moves on.
        let _ = self
            .workspaces
            .update_status(ws.id, WorkspaceStatus::Provisioning, WorkspaceStatus::Configuring)
            .await?;

        self.report_stage(task.id, ProvisioningStage::ApplyOidc).await?;
        self.host
            .apply_oidc_config(
                &ws.vcluster_namespace,
                &ws.vcluster_instance_name,
                &OidcConfig {
                    issuer_url: format!("https://identity.hexabase.internal/workspaces/{}", ws.id),
                    client_id: ws.oidc_client_id.clone(),
                },
            )
            .await?;

        self.report_stage(task.id, ProvisioningStage::InstallHnc).await?;
        self.host.install_hnc(&ws.vcluster_namespace).await?;

        self.report_stage(task.id, ProvisioningStage::ApplyResourceQuota).await?;
        let plan = self
            .plans
            .get(ws.plan_id)
            .await?
            .ok_or_else(|| OrchestratorError::PlanNotFound(ws.plan_id.to_string()))?;
        self.host
            .apply_resource_quota(&ws.vcluster_namespace, &plan.resource_quota)
            .await?;

        self.report_stage(task.id, ProvisioningStage::SeedGroupsAndRoles).await?;
        self.report_stage(task.id, ProvisioningStage::ApplyDefaultBindings).await?;
        self.apply_bindings(ws).await?;

        self.workspaces
            .update_status(ws.id, WorkspaceStatus::Configuring, WorkspaceStatus::Running)
            .await?;
        Ok(())
    }

    async fn run_start(&self, workspace_id: WorkspaceId) -> Result<(), OrchestratorError> {
        let ws = self.get_workspace(workspace_id).await?;
        if ws.status == WorkspaceStatus::Running {
            return Ok(());
        }
        if ws.status != WorkspaceStatus::Stopped {
            return Err(OrchestratorError::InvalidTransition {
                workspace_id: workspace_id.to_string(),
                actual: ws.status.to_string(),
                requested: WorkspaceStatus::Running.to_string(),
            });
        }
        self.host.scale_control_plane(&ws.vcluster_namespace, &ws.vcluster_instance_name, 1).await?;
        self.workspaces
            .update_status(workspace_id, WorkspaceStatus::Stopped, WorkspaceStatus::Running)
            .await?;
        Ok(())
    }

    async fn run_stop(&self, workspace_id: WorkspaceId) -> Result<(), OrchestratorError> {
        let ws = self.get_workspace(workspace_id).await?;
        if ws.status == WorkspaceStatus::Stopped {
            return Ok(());
        }
        if ws.status != WorkspaceStatus::Running {
            return Err(OrchestratorError::InvalidTransition {
                workspace_id: workspace_id.to_string(),
                actual: ws.status.to_string(),
                requested: WorkspaceStatus::Stopped.to_string(),
            });
        }
        self.workspaces
            .update_status(workspace_id, WorkspaceStatus::Running, WorkspaceStatus::Stopping)
            .await?;
        self.host.scale_control_plane(&ws.vcluster_namespace, &ws.vcluster_instance_name, 0).await?;
        self.workspaces
            .update_status(workspace_id, WorkspaceStatus::Stopping, WorkspaceStatus::Stopped)
            .await?;
        Ok(())
    }

    async fn run_upgrade(&self, workspace_id: WorkspaceId, target_version: &str, task: &Task) -> Result<(), OrchestratorError> {
        let ws = self.get_workspace(workspace_id).await?;
        if ws.status == WorkspaceStatus::Running {
            self.workspaces
                .update_status(workspace_id, WorkspaceStatus::Running, WorkspaceStatus::Upgrading)
                .await?;
        } else if ws.status != WorkspaceStatus::Upgrading {
            return Err(OrchestratorError::InvalidTransition {
                workspace_id: workspace_id.to_string(),
                actual: ws.status.to_string(),
                requested: WorkspaceStatus::Upgrading.to_string(),
            });
        }

        self.host
            .upgrade_vcluster(&ws.vcluster_namespace, &ws.vcluster_instance_name, &json!({"version": target_version}))
            .await?;

        match self.wait_ready(task, &ws).await {
            Ok(()) => {
                self.workspaces
                    .update_status(workspace_id, WorkspaceStatus::Upgrading, WorkspaceStatus::Running)
                    .await?;
                Ok(())
            }
            Err(err) => {
                if task.attempt + 1 >= task.max_attempts {
                    let _ = self
                        .workspaces
                        .update_status(workspace_id, WorkspaceStatus::Upgrading, WorkspaceStatus::FailedUpgrade)
                        .await;
                }
                Err(err)
            }
        }
    }

    async fn run_backup(&self, workspace_id: WorkspaceId) -> Result<(), OrchestratorError> {
        let ws = self.get_workspace(workspace_id).await?;
        if ws.status != WorkspaceStatus::Running {
            return Err(OrchestratorError::InvalidTransition {
                workspace_id: workspace_id.to_string(),
                actual: ws.status.to_string(),
                requested: WorkspaceStatus::BackingUp.to_string(),
            });
        }
        self.workspaces
            .update_status(workspace_id, WorkspaceStatus::Running, WorkspaceStatus::BackingUp)
            .await?;
        let result = self.host.backup_vcluster(&ws.vcluster_namespace, &ws.vcluster_instance_name).await;
        self.workspaces
            .update_status(workspace_id, WorkspaceStatus::BackingUp, WorkspaceStatus::Running)
            .await?;
        result.map(|_| ()).map_err(OrchestratorError::from)
    }

    async fn run_restore(&self, workspace_id: WorkspaceId, snapshot_ref: &str) -> Result<(), OrchestratorError> {
        let ws = self.get_workspace(workspace_id).await?;
        if ws.status != WorkspaceStatus::Running {
            return Err(OrchestratorError::InvalidTransition {
                workspace_id: workspace_id.to_string(),
                actual: ws.status.to_string(),
                requested: WorkspaceStatus::BackingUp.to_string(),
            });
        }
        self.workspaces
            .update_status(workspace_id, WorkspaceStatus::Running, WorkspaceStatus::BackingUp)
            .await?;
        let result = self
            .host
            .restore_vcluster(&ws.vcluster_namespace, &ws.vcluster_instance_name, snapshot_ref)
            .await;
        self.workspaces
            .update_status(workspace_id, WorkspaceStatus::BackingUp, WorkspaceStatus::Running)
            .await?;
        result.map_err(OrchestratorError::from)
    }

    /// Best-effort and idempotent (spec §4.1): a Workspace that's already
    /// gone, or a host namespace that's already absent, are both success.
    async fn run_delete(&self, workspace_id: WorkspaceId) -> Result<(), OrchestratorError> {
        let ws = match self.get_workspace(workspace_id).await {
            Ok(ws) => ws,
            Err(OrchestratorError::WorkspaceNotFound(_)) => return Ok(()),
            Err(err) => return Err(err),
        };
        if ws.status == WorkspaceStatus::Deleted {
            return Ok(());
        }
        if ws.status != WorkspaceStatus::Deleting {
            let _ = self.workspaces.update_status(workspace_id, ws.status, WorkspaceStatus::Deleting).await;
        }
        self.host.delete_vcluster(&ws.vcluster_namespace).await?;
        self.workspaces
            .update_status(workspace_id, WorkspaceStatus::Deleting, WorkspaceStatus::Deleted)
            .await?;
        Ok(())
    }

    async fn run_allocate_dedicated_node(&self, request: &DedicatedNodeRequest) -> Result<(), OrchestratorError> {
        let ws = self.get_workspace(request.workspace_id).await?;
        let plan = self
            .plans
            .get(ws.plan_id)
            .await?
            .ok_or_else(|| OrchestratorError::PlanNotFound(ws.plan_id.to_string()))?;
        if !plan.allow_dedicated_nodes {
            return Err(OrchestratorError::DedicatedNodesNotAllowed);
        }

        let node = self.virtualization.provision_node(request).await?;
        self.host.taint_and_label_node(&node.node_name, request.workspace_id).await?;
        self.host
            .pin_vcluster_to_node_pool(&ws.vcluster_namespace, &ws.vcluster_instance_name, request.workspace_id)
            .await?;
        // First dedicated node for this workspace flips the plan tier;
        // re-allocating a second node re-applies the same value, which is
        // harmless (spec §4.1 "atomic shared -> dedicated transition").
        self.workspaces.set_plan_tier(request.workspace_id, PlanTier::Dedicated).await?;
        Ok(())
    }
}

#[async_trait]
impl OrchestratorService for OrchestratorServiceDefault {
    async fn request_create(&self, workspace_id: WorkspaceId) -> Result<TaskId, OrchestratorError> {
        Ok(self
            .tasks
            .enqueue(TaskPayload::WorkspaceCreate { workspace_id }, workspace_id.to_string(), None)
            .await?)
    }

    async fn request_start(&self, workspace_id: WorkspaceId) -> Result<TaskId, OrchestratorError> {
        Ok(self
            .tasks
            .enqueue(TaskPayload::WorkspaceStart { workspace_id }, workspace_id.to_string(), None)
            .await?)
    }

    async fn request_stop(&self, workspace_id: WorkspaceId) -> Result<TaskId, OrchestratorError> {
        Ok(self
            .tasks
            .enqueue(TaskPayload::WorkspaceStop { workspace_id }, workspace_id.to_string(), None)
            .await?)
    }

    async fn request_upgrade(&self, workspace_id: WorkspaceId, target_version: String) -> Result<TaskId, OrchestratorError> {
        Ok(self
            .tasks
            .enqueue(
                TaskPayload::WorkspaceUpgrade { workspace_id, target_version },
                workspace_id.to_string(),
                None,
            )
            .await?)
    }

    async fn request_backup(&self, workspace_id: WorkspaceId, backup_config_json: String) -> Result<TaskId, OrchestratorError> {
        Ok(self
            .tasks
            .enqueue(
                TaskPayload::WorkspaceBackup { workspace_id, backup_config_json },
                workspace_id.to_string(),
                None,
            )
            .await?)
    }

    async fn request_restore(&self, workspace_id: WorkspaceId, snapshot_ref: String) -> Result<TaskId, OrchestratorError> {
        Ok(self
            .tasks
            .enqueue(
                TaskPayload::WorkspaceRestore { workspace_id, snapshot_ref },
                workspace_id.to_string(),
                None,
            )
            .await?)
    }

    async fn request_delete(&self, workspace_id: WorkspaceId) -> Result<TaskId, OrchestratorError> {
        let correlation_id = workspace_id.to_string();
        let pending = self
            .tasks
            .list(TaskFilter {
                correlation_id: Some(correlation_id.clone()),
                ..Default::default()
            })
            .await?;
        for task in pending.into_iter().filter(|t| !t.status.is_terminal()) {
            if let Err(err) = self.tasks.cancel(task.id).await {
                tracing::warn!(task_id = %task.id, error = %err, "failed to cancel superseded task ahead of delete");
            }
        }
        Ok(self
            .tasks
            .enqueue(TaskPayload::WorkspaceDelete { workspace_id }, correlation_id, None)
            .await?)
    }

    async fn request_allocate_dedicated_node(&self, request: DedicatedNodeRequest) -> Result<TaskId, OrchestratorError> {
        let ws = self.get_workspace(request.workspace_id).await?;
        if ws.status != WorkspaceStatus::Running {
            return Err(OrchestratorError::InvalidTransition {
                workspace_id: request.workspace_id.to_string(),
                actual: ws.status.to_string(),
                requested: "dedicated-node-allocation".to_string(),
            });
        }
        Ok(self
            .tasks
            .enqueue(
                TaskPayload::AllocateDedicatedNode {
                    workspace_id: request.workspace_id,
                    instance_type: request.instance_type,
                    region: request.region,
                    ssh_key: request.ssh_key,
                },
                request.workspace_id.to_string(),
                None,
            )
            .await?)
    }

    async fn get_health(&self, workspace_id: WorkspaceId) -> Result<HealthReport, OrchestratorError> {
        let ws = self.get_workspace(workspace_id).await?;
        let mut report = self.host.get_health(&ws.vcluster_namespace, &ws.vcluster_instance_name).await?;
        report.workspace_id = workspace_id;
        Ok(report)
    }

    async fn get_kubeconfig(&self, workspace_id: WorkspaceId) -> Result<String, OrchestratorError> {
        let ws = self.get_workspace(workspace_id).await?;
        if ws.status != WorkspaceStatus::Running {
            return Err(OrchestratorError::WorkspaceNotReady(workspace_id.to_string()));
        }
        Ok(self.host.get_kubeconfig(&ws.vcluster_namespace, &ws.vcluster_instance_name).await?)
    }

    async fn execute(&self, task: &Task) -> Result<(), OrchestratorError> {
        let workspace_id = match &task.payload {
            TaskPayload::WorkspaceCreate { workspace_id }
            | TaskPayload::WorkspaceStart { workspace_id }
            | TaskPayload::WorkspaceStop { workspace_id }
            | TaskPayload::WorkspaceUpgrade { workspace_id, .. }
            | TaskPayload::WorkspaceBackup { workspace_id, .. }
            | TaskPayload::WorkspaceRestore { workspace_id, .. }
            | TaskPayload::WorkspaceDelete { workspace_id }
            | TaskPayload::AllocateDedicatedNode { workspace_id, .. } => *workspace_id,
            other => {
                return Err(OrchestratorError::Host(HostClusterError::Upstream(format!(
                    "orchestrator cannot execute task kind {}",
                    other.kind()
                ))))
            }
        };

        let lease = self.acquire_lease(workspace_id).await?;
        let result = match &task.payload {
            TaskPayload::WorkspaceCreate { workspace_id } => self.run_create(*workspace_id, task).await,
            TaskPayload::WorkspaceStart { workspace_id } => self.run_start(*workspace_id).await,
            TaskPayload::WorkspaceStop { workspace_id } => self.run_stop(*workspace_id).await,
            TaskPayload::WorkspaceUpgrade { workspace_id, target_version } => {
                self.run_upgrade(*workspace_id, target_version, task).await
            }
            TaskPayload::WorkspaceBackup { workspace_id, .. } => self.run_backup(*workspace_id).await,
            TaskPayload::WorkspaceRestore { workspace_id, snapshot_ref } => {
                self.run_restore(*workspace_id, snapshot_ref).await
            }
            TaskPayload::WorkspaceDelete { workspace_id } => self.run_delete(*workspace_id).await,
            TaskPayload::AllocateDedicatedNode {
                workspace_id,
                instance_type,
                region,
                ssh_key,
            } => {
                self.run_allocate_dedicated_node(&DedicatedNodeRequest {
                    workspace_id: *workspace_id,
                    instance_type: instance_type.clone(),
                    region: region.clone(),
                    ssh_key: ssh_key.clone(),
                })
                .await
            }
            _ => unreachable!("filtered above"),
        };
        self.release_lease(&lease).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InMemoryHostClusterApi;
    use crate::virtualization::InMemoryVirtualizationApi;
    use hexabase_bus::InMemoryBus;
    use hexabase_cache::{Cache, InMemoryCache};
    use hexabase_common::ids::{OrgId, PlanId, UserId};
    use hexabase_hierarchy::model::{Plan, ResourceQuota};
    use hexabase_hierarchy::repo::{
        InMemoryGroupRepo, InMemoryOrganizationRepo, InMemoryOrganizationUserRepo, InMemoryPlanRepo,
        InMemoryProjectRepo, InMemoryRoleAssignmentRepo, InMemoryRoleRepo, InMemoryUserRepo, InMemoryWorkspaceRepo,
    };
    use hexabase_hierarchy::HierarchyServiceDefault;
    use hexabase_tasks::repo::InMemoryTaskRepo;
    use hexabase_tasks::TaskEngineDefault;
    use test_r::test;

    fn plan(allow_dedicated: bool) -> Plan {
        Plan {
            id: PlanId::generate(),
            name: "standard".to_string(),
            resource_quota: ResourceQuota {
                cpu_millicores: 4000,
                memory_mb: 8192,
                storage_gb: 100,
                max_pods: 50,
            },
            allow_dedicated_nodes: allow_dedicated,
            price_tier: "standard".to_string(),
        }
    }

    async fn harness(allow_dedicated: bool) -> (Arc<HierarchyServiceDefault>, OrchestratorServiceDefault, Plan) {
        let orgs = Arc::new(InMemoryOrganizationRepo::new());
        let users = Arc::new(InMemoryUserRepo::new());
        let org_users = Arc::new(InMemoryOrganizationUserRepo::new());
        let workspaces = Arc::new(InMemoryWorkspaceRepo::new());
        let plans = Arc::new(InMemoryPlanRepo::new());
        let projects = Arc::new(InMemoryProjectRepo::new());
        let groups = Arc::new(InMemoryGroupRepo::new());
        let roles = Arc::new(InMemoryRoleRepo::new());
        let role_assignments = Arc::new(InMemoryRoleAssignmentRepo::new());
        let audit = Arc::new(hexabase_hierarchy::audit::InMemoryAuditSink::new());
        let bus = Arc::new(InMemoryBus::new());

        let the_plan = plan(allow_dedicated);
        plans.seed(the_plan.clone());

        let hierarchy = Arc::new(HierarchyServiceDefault::new(
            orgs,
            users,
            org_users,
            workspaces.clone(),
            plans.clone(),
            projects,
            groups,
            roles,
            role_assignments,
            audit,
            bus.clone(),
        ));

        let task_engine: Arc<dyn TaskEngine> = Arc::new(TaskEngineDefault::new(Arc::new(InMemoryTaskRepo::new()), bus));
        let host = Arc::new(InMemoryHostClusterApi::new());
        let virtualization = Arc::new(InMemoryVirtualizationApi::new());
        let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
        let leases = LeaseManager::new(cache);

        let orchestrator = OrchestratorServiceDefault::new(
            workspaces,
            plans,
            hierarchy.clone(),
            task_engine,
            host,
            virtualization,
            leases,
        )
        .with_ready_poll_interval(Duration::from_millis(1));

        (hierarchy, orchestrator, the_plan)
    }

    #[test]
    async fn create_workspace_climbs_all_the_way_to_running() {
        let (hierarchy, orchestrator, the_plan) = harness(true).await;
        let owner = UserId::generate();
        let org = hierarchy.create_organization("acme".to_string(), owner).await.unwrap();
        let ws = hierarchy
            .create_workspace(org.id, "team-a".to_string(), the_plan.id, owner)
            .await
            .unwrap();

        let task_id = orchestrator.request_create(ws.id).await.unwrap();
        let mut task = hexabase_tasks::model::Task::new(
            TaskPayload::WorkspaceCreate { workspace_id: ws.id },
            ws.id.to_string(),
            None,
        );
        task.id = task_id;

        // `InMemoryHostClusterApi::vcluster_is_ready` only answers `true`
        // on its second poll; `wait_ready` loops internally until then,
        // so a single `execute` call carries the workspace all the way
        // to `Running`.
        orchestrator.execute(&task).await.unwrap();

        let final_status = orchestrator.workspaces.get(ws.id).await.unwrap().unwrap().status;
        assert_eq!(final_status, WorkspaceStatus::Running);
    }

    #[test]
    async fn start_requires_stopped_and_is_rejected_from_pending_creation() {
        let (hierarchy, orchestrator, the_plan) = harness(true).await;
        let owner = UserId::generate();
        let org = hierarchy.create_organization("acme".to_string(), owner).await.unwrap();
        let ws = hierarchy
            .create_workspace(org.id, "team-a".to_string(), the_plan.id, owner)
            .await
            .unwrap();

        let result = orchestrator.run_start(ws.id).await;
        assert!(matches!(result, Err(OrchestratorError::InvalidTransition { .. })));
    }

    #[test]
    async fn delete_cancels_other_non_terminal_tasks_for_the_same_workspace() {
        let (hierarchy, orchestrator, the_plan) = harness(true).await;
        let owner = UserId::generate();
        let org = hierarchy.create_organization("acme".to_string(), owner).await.unwrap();
        let ws = hierarchy
            .create_workspace(org.id, "team-a".to_string(), the_plan.id, owner)
            .await
            .unwrap();

        let stale_task_id = orchestrator.request_create(ws.id).await.unwrap();
        orchestrator.request_delete(ws.id).await.unwrap();

        let stale = orchestrator.tasks.get(stale_task_id).await.unwrap();
        assert_eq!(stale.status, hexabase_tasks::model::TaskStatus::Cancelled);
    }

    #[test]
    async fn allocate_dedicated_node_rejects_plans_that_disallow_it() {
        let (hierarchy, orchestrator, the_plan) = harness(false).await;
        let owner = UserId::generate();
        let org = hierarchy.create_organization("acme".to_string(), owner).await.unwrap();
        let ws = hierarchy
            .create_workspace(org.id, "team-a".to_string(), the_plan.id, owner)
            .await
            .unwrap();
        orchestrator
            .workspaces
            .update_status(ws.id, WorkspaceStatus::PendingCreation, WorkspaceStatus::Running)
            .await
            .unwrap();

        let result = orchestrator
            .request_allocate_dedicated_node(DedicatedNodeRequest {
                workspace_id: ws.id,
                instance_type: "m5.large".to_string(),
                region: "us-east-1".to_string(),
                ssh_key: None,
            })
            .await;
        assert!(result.is_ok());

        let task = hexabase_tasks::model::Task::new(
            TaskPayload::AllocateDedicatedNode {
                workspace_id: ws.id,
                instance_type: "m5.large".to_string(),
                region: "us-east-1".to_string(),
                ssh_key: None,
            },
            ws.id.to_string(),
            None,
        );
        let err = orchestrator.execute(&task).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::DedicatedNodesNotAllowed));
    }

    #[test]
    async fn get_kubeconfig_is_rejected_before_the_workspace_is_running() {
        let (hierarchy, orchestrator, the_plan) = harness(true).await;
        let owner = UserId::generate();
        let org = hierarchy.create_organization("acme".to_string(), owner).await.unwrap();
        let ws = hierarchy
            .create_workspace(org.id, "team-a".to_string(), the_plan.id, owner)
            .await
            .unwrap();

        let err = orchestrator.get_kubeconfig(ws.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::WorkspaceNotReady(_)));
    }
}
