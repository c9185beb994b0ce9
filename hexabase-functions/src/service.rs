//! The Function/Application façade itself (spec §4.5): composes the
//! repos, a [`Provider`], and the hierarchy's `WorkspaceRepo` (read-only,
//! for the dedicated-plan scheduling lookup) behind one trait, same
//! composition idiom as `cloud-service::service::project`.

use crate::error::FunctionsError;
use crate::model::{
    Application, ApplicationKind, BuildStatus, Function, FunctionEvent, FunctionTrigger, FunctionVersion, InitiatedBy, TriggerKind,
    VersionSource,
};
use crate::provider::{FunctionMetrics, Instance, Provider, SchedulingOverlay};
use crate::repo::{ApplicationRepo, FunctionRepo, FunctionTriggerRepo, FunctionVersionRepo};
use async_trait::async_trait;
use chrono::Utc;
use hexabase_bus::{Bus, Envelope, Topic};
use hexabase_common::ids::{ApplicationId, FunctionId, FunctionTriggerId, FunctionVersionId, ProjectId, WorkspaceId};
use hexabase_hierarchy::model::PlanTier;
use hexabase_hierarchy::repo::WorkspaceRepo;
use std::sync::Arc;

#[async_trait]
pub trait FunctionsService: Send + Sync {
    async fn create_function(
        &self,
        workspace_id: WorkspaceId,
        project_id: ProjectId,
        name: String,
        runtime: String,
        memory_mb: i32,
        timeout_s: i32,
        env: Vec<(String, String)>,
        initiated_by: InitiatedBy,
    ) -> Result<Function, FunctionsError>;

    async fn deploy_version(&self, function_id: FunctionId, source: VersionSource, initiated_by: InitiatedBy) -> Result<FunctionVersion, FunctionsError>;

    async fn set_active_version(&self, function_id: FunctionId, version_id: FunctionVersionId, initiated_by: InitiatedBy) -> Result<(), FunctionsError>;

    /// `Rollback = SetActiveVersion(previous)` (spec §4.5): picks the
    /// version deployed immediately before the function's current active
    /// one and repeats [`FunctionsService::set_active_version`] with it.
    async fn rollback(&self, function_id: FunctionId, initiated_by: InitiatedBy) -> Result<FunctionVersion, FunctionsError>;

    async fn invoke(&self, function_id: FunctionId, payload: Vec<u8>, is_async: bool, initiated_by: InitiatedBy) -> Result<crate::model::InvocationResult, FunctionsError>;

    async fn create_trigger(&self, function_id: FunctionId, kind: TriggerKind, config_json: String) -> Result<FunctionTrigger, FunctionsError>;

    async fn get_logs(&self, function_id: FunctionId, lines: usize) -> Result<Vec<String>, FunctionsError>;
    async fn get_metrics(&self, function_id: FunctionId) -> Result<FunctionMetrics, FunctionsError>;

    async fn create_application(
        &self,
        workspace_id: WorkspaceId,
        project_id: ProjectId,
        name: String,
        kind: ApplicationKind,
        image: String,
        replicas: i32,
        has_ingress: bool,
    ) -> Result<Application, FunctionsError>;

    async fn scale(&self, application_id: ApplicationId, replicas: i32) -> Result<(), FunctionsError>;
    async fn update_image(&self, application_id: ApplicationId, image: String) -> Result<(), FunctionsError>;
    async fn restart(&self, application_id: ApplicationId) -> Result<(), FunctionsError>;
    async fn get_instances(&self, application_id: ApplicationId) -> Result<Vec<Instance>, FunctionsError>;
}

pub struct FunctionsServiceDefault {
    functions: Arc<dyn FunctionRepo>,
    versions: Arc<dyn FunctionVersionRepo>,
    triggers: Arc<dyn FunctionTriggerRepo>,
    applications: Arc<dyn ApplicationRepo>,
    workspaces: Arc<dyn WorkspaceRepo>,
    provider: Arc<dyn Provider>,
    bus: Arc<dyn Bus>,
}

impl FunctionsServiceDefault {
    pub fn new(
        functions: Arc<dyn FunctionRepo>,
        versions: Arc<dyn FunctionVersionRepo>,
        triggers: Arc<dyn FunctionTriggerRepo>,
        applications: Arc<dyn ApplicationRepo>,
        workspaces: Arc<dyn WorkspaceRepo>,
        provider: Arc<dyn Provider>,
        bus: Arc<dyn Bus>,
    ) -> Self {
        Self { functions, versions, triggers, applications, workspaces, provider, bus }
    }

    async fn scheduling_for(&self, workspace_id: WorkspaceId) -> Result<SchedulingOverlay, FunctionsError> {
        let workspace = self
            .workspaces
            .get(workspace_id)
            .await?
            .ok_or_else(|| FunctionsError::WorkspaceNotFound(workspace_id.to_string()))?;
        Ok(match workspace.plan_tier {
            PlanTier::Dedicated => SchedulingOverlay::dedicated(workspace_id.to_string(), workspace_id.to_string()),
            PlanTier::Shared => SchedulingOverlay::none(),
        })
    }

    async fn publish(&self, event: FunctionEvent) -> Result<(), FunctionsError> {
        let envelope = Envelope::new("function_lifecycle", &event, Utc::now().timestamp());
        self.bus
            .publish(Topic::FunctionLifecycle, envelope)
            .await
            .map_err(|e| FunctionsError::Provider(crate::error::ProviderError::Upstream(e.to_string())))
    }

    async fn function_or_not_found(&self, function_id: FunctionId) -> Result<Function, FunctionsError> {
        self.functions.get(function_id).await?.ok_or_else(|| FunctionsError::FunctionNotFound(function_id.to_string()))
    }

    async fn application_or_not_found(&self, application_id: ApplicationId) -> Result<Application, FunctionsError> {
        self.applications
            .get(application_id)
            .await?
            .ok_or_else(|| FunctionsError::ApplicationNotFound(application_id.to_string()))
    }
}

#[async_trait]
impl FunctionsService for FunctionsServiceDefault {
    async fn create_function(
        &self,
        workspace_id: WorkspaceId,
        project_id: ProjectId,
        name: String,
        runtime: String,
        memory_mb: i32,
        timeout_s: i32,
        env: Vec<(String, String)>,
        initiated_by: InitiatedBy,
    ) -> Result<Function, FunctionsError> {
        if self.workspaces.get(workspace_id).await?.is_none() {
            return Err(FunctionsError::WorkspaceNotFound(workspace_id.to_string()));
        }
        let function = Function {
            id: FunctionId::generate(),
            workspace_id,
            project_id,
            name,
            runtime,
            memory_mb,
            timeout_s,
            env,
            active_version_id: None,
            created_at: Utc::now(),
        };
        self.functions.insert(&function).await?;
        self.publish(FunctionEvent::Created {
            workspace_id,
            project_id,
            function_id: function.id,
            initiated_by: initiated_by.tag(),
        })
        .await?;
        Ok(function)
    }

    async fn deploy_version(&self, function_id: FunctionId, source: VersionSource, initiated_by: InitiatedBy) -> Result<FunctionVersion, FunctionsError> {
        let function = self.function_or_not_found(function_id).await?;
        let mut version = FunctionVersion {
            id: FunctionVersionId::generate(),
            function_id,
            source,
            build_status: BuildStatus::Building,
            build_log: None,
            created_at: Utc::now(),
        };
        self.versions.insert(&version).await?;

        let scheduling = self.scheduling_for(function.workspace_id).await?;
        let started = Utc::now();
        match self.provider.deploy_version(&function, &version, &scheduling).await {
            Ok(()) => {
                self.versions.set_build_status(version.id, BuildStatus::Success, None).await?;
                version.build_status = BuildStatus::Success;
                let duration_ms = (Utc::now() - started).num_milliseconds();
                self.publish(FunctionEvent::Deployed {
                    workspace_id: function.workspace_id,
                    project_id: function.project_id,
                    function_id: function.id,
                    version_id: version.id,
                    duration_ms,
                    initiated_by: initiated_by.tag(),
                })
                .await?;
                Ok(version)
            }
            Err(err) => {
                self.versions
                    .set_build_status(version.id, BuildStatus::Failed, Some(err.to_string()))
                    .await?;
                self.publish(FunctionEvent::Failed {
                    workspace_id: function.workspace_id,
                    project_id: function.project_id,
                    function_id: function.id,
                    version_id: Some(version.id),
                    reason: err.to_string(),
                    initiated_by: initiated_by.tag(),
                })
                .await?;
                Err(FunctionsError::Provider(err))
            }
        }
    }

    async fn set_active_version(&self, function_id: FunctionId, version_id: FunctionVersionId, initiated_by: InitiatedBy) -> Result<(), FunctionsError> {
        let function = self.function_or_not_found(function_id).await?;
        let version = self
            .versions
            .get(version_id)
            .await?
            .ok_or_else(|| FunctionsError::VersionNotFound(version_id.to_string()))?;
        if version.function_id != function_id {
            return Err(FunctionsError::VersionNotFound(version_id.to_string()));
        }
        if version.build_status != BuildStatus::Success {
            return Err(FunctionsError::VersionNotDeployable(version_id.to_string()));
        }

        // Idempotent: re-pointing to the already-active version is a
        // no-op for the provider but still confirms the intent (spec §8
        // `SetActiveVersion(v) ∘ SetActiveVersion(v) ≡ SetActiveVersion(v)`).
        let scheduling = self.scheduling_for(function.workspace_id).await?;
        self.provider
            .set_active_version(&function, &version, &scheduling)
            .await
            .map_err(FunctionsError::Provider)?;
        self.functions.set_active_version(function_id, Some(version_id)).await?;
        self.publish(FunctionEvent::ActiveVersionChanged {
            workspace_id: function.workspace_id,
            project_id: function.project_id,
            function_id,
            version_id,
            initiated_by: initiated_by.tag(),
        })
        .await?;
        Ok(())
    }

    async fn rollback(&self, function_id: FunctionId, initiated_by: InitiatedBy) -> Result<FunctionVersion, FunctionsError> {
        let function = self.function_or_not_found(function_id).await?;
        let current_id = function.active_version_id.ok_or(FunctionsError::NoVersionDeployed)?;

        let mut versions = self.versions.list_for_function(function_id).await?;
        versions.sort_by_key(|v| v.created_at);
        let current_index = versions
            .iter()
            .position(|v| v.id == current_id)
            .ok_or_else(|| FunctionsError::VersionNotFound(current_id.to_string()))?;
        let previous = versions[..current_index]
            .iter()
            .rev()
            .find(|v| v.build_status == BuildStatus::Success)
            .cloned()
            .ok_or(FunctionsError::NoPriorVersion)?;

        let scheduling = self.scheduling_for(function.workspace_id).await?;
        self.provider
            .set_active_version(&function, &previous, &scheduling)
            .await
            .map_err(FunctionsError::Provider)?;
        self.functions.set_active_version(function_id, Some(previous.id)).await?;
        self.publish(FunctionEvent::RolledBack {
            workspace_id: function.workspace_id,
            project_id: function.project_id,
            function_id,
            version_id: previous.id,
            initiated_by: initiated_by.tag(),
        })
        .await?;
        Ok(previous)
    }

    async fn invoke(
        &self,
        function_id: FunctionId,
        payload: Vec<u8>,
        is_async: bool,
        initiated_by: InitiatedBy,
    ) -> Result<crate::model::InvocationResult, FunctionsError> {
        let function = self.function_or_not_found(function_id).await?;
        let active_version_id = function.active_version_id.ok_or(FunctionsError::NoVersionDeployed)?;
        let result = self.provider.invoke(&function, &payload, is_async).await.map_err(FunctionsError::Provider)?;
        self.publish(FunctionEvent::Invoked {
            workspace_id: function.workspace_id,
            project_id: function.project_id,
            function_id,
            version_id: active_version_id,
            invocation_id: result.invocation_id,
            duration_ms: result.duration_ms,
            cold_start: result.cold_start,
            initiated_by: initiated_by.tag(),
        })
        .await?;
        Ok(result)
    }

    async fn create_trigger(&self, function_id: FunctionId, kind: TriggerKind, config_json: String) -> Result<FunctionTrigger, FunctionsError> {
        let function = self.function_or_not_found(function_id).await?;
        let trigger = FunctionTrigger {
            id: FunctionTriggerId::generate(),
            function_id,
            kind,
            config_json,
            created_at: Utc::now(),
        };
        self.provider.create_trigger(&function, &trigger).await.map_err(FunctionsError::Provider)?;
        self.triggers.insert(&trigger).await?;
        Ok(trigger)
    }

    async fn get_logs(&self, function_id: FunctionId, lines: usize) -> Result<Vec<String>, FunctionsError> {
        let function = self.function_or_not_found(function_id).await?;
        self.provider.get_logs(&function, lines).await.map_err(FunctionsError::Provider)
    }

    async fn get_metrics(&self, function_id: FunctionId) -> Result<FunctionMetrics, FunctionsError> {
        let function = self.function_or_not_found(function_id).await?;
        self.provider.get_function_metrics(&function).await.map_err(FunctionsError::Provider)
    }

    async fn create_application(
        &self,
        workspace_id: WorkspaceId,
        project_id: ProjectId,
        name: String,
        kind: ApplicationKind,
        image: String,
        replicas: i32,
        has_ingress: bool,
    ) -> Result<Application, FunctionsError> {
        if self.workspaces.get(workspace_id).await?.is_none() {
            return Err(FunctionsError::WorkspaceNotFound(workspace_id.to_string()));
        }
        let application = Application {
            id: ApplicationId::generate(),
            workspace_id,
            project_id,
            name,
            kind,
            image,
            replicas,
            has_ingress,
            created_at: Utc::now(),
        };
        let scheduling = self.scheduling_for(workspace_id).await?;
        self.provider
            .create_application(&application, &scheduling)
            .await
            .map_err(FunctionsError::Provider)?;
        self.applications.insert(&application).await?;
        Ok(application)
    }

    async fn scale(&self, application_id: ApplicationId, replicas: i32) -> Result<(), FunctionsError> {
        let application = self.application_or_not_found(application_id).await?;
        self.provider.scale(&application, replicas).await.map_err(FunctionsError::Provider)?;
        self.applications.set_replicas(application_id, replicas).await?;
        Ok(())
    }

    async fn update_image(&self, application_id: ApplicationId, image: String) -> Result<(), FunctionsError> {
        let application = self.application_or_not_found(application_id).await?;
        self.provider.update_image(&application, &image).await.map_err(FunctionsError::Provider)?;
        self.applications.set_image(application_id, &image).await?;
        Ok(())
    }

    async fn restart(&self, application_id: ApplicationId) -> Result<(), FunctionsError> {
        let application = self.application_or_not_found(application_id).await?;
        self.provider.restart(&application).await.map_err(FunctionsError::Provider)
    }

    async fn get_instances(&self, application_id: ApplicationId) -> Result<Vec<Instance>, FunctionsError> {
        let application = self.application_or_not_found(application_id).await?;
        self.provider.get_instances(&application).await.map_err(FunctionsError::Provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::InMemoryProvider;
    use crate::repo::{InMemoryApplicationRepo, InMemoryFunctionRepo, InMemoryFunctionTriggerRepo, InMemoryFunctionVersionRepo};
    use hexabase_bus::InMemoryBus;
    use hexabase_hierarchy::model::{PlanTier, Workspace, WorkspaceStatus};
    use hexabase_hierarchy::repo::InMemoryWorkspaceRepo;
    use hexabase_common::ids::{OrgId, PlanId, UserId};
    use test_r::test;

    async fn harness() -> (FunctionsServiceDefault, Arc<InMemoryWorkspaceRepo>, Arc<InMemoryProvider>, WorkspaceId) {
        let workspaces = Arc::new(InMemoryWorkspaceRepo::new());
        let workspace_id = WorkspaceId::generate();
        let workspace = Workspace {
            id: workspace_id,
            org_id: OrgId::generate(),
            name: "acme".to_string(),
            plan_id: PlanId::generate(),
            plan_tier: PlanTier::Shared,
            status: WorkspaceStatus::Running,
            vcluster_instance_name: "vc-acme".to_string(),
            vcluster_namespace: "ws-acme".to_string(),
            api_endpoint: None,
            oidc_client_id: "acme".to_string(),
            created_at: Utc::now(),
        };
        workspaces.insert(&workspace).await.unwrap();

        let provider = Arc::new(InMemoryProvider::new());
        let service = FunctionsServiceDefault::new(
            Arc::new(InMemoryFunctionRepo::new()),
            Arc::new(InMemoryFunctionVersionRepo::new()),
            Arc::new(InMemoryFunctionTriggerRepo::new()),
            Arc::new(InMemoryApplicationRepo::new()),
            workspaces.clone(),
            provider.clone(),
            Arc::new(InMemoryBus::new()),
        );
        (service, workspaces, provider, workspace_id)
    }

    fn user() -> InitiatedBy {
        InitiatedBy::User(UserId::generate())
    }

    #[test]
    async fn deploying_then_activating_a_version_makes_invoke_succeed() {
        let (service, _workspaces, _provider, workspace_id) = harness().await;
        let function = service
            .create_function(workspace_id, ProjectId::generate(), "hello".to_string(), "nodejs".to_string(), 128, 30, Vec::new(), user())
            .await
            .unwrap();

        let version = service
            .deploy_version(function.id, VersionSource::Image { image_ref: "registry/hello:v1".to_string() }, user())
            .await
            .unwrap();
        service.set_active_version(function.id, version.id, user()).await.unwrap();

        let result = service.invoke(function.id, b"{}".to_vec(), false, user()).await.unwrap();
        assert_eq!(result.status_code, 200);
    }

    #[test]
    async fn invoking_without_a_deployed_version_fails() {
        let (service, _workspaces, _provider, workspace_id) = harness().await;
        let function = service
            .create_function(workspace_id, ProjectId::generate(), "hello".to_string(), "nodejs".to_string(), 128, 30, Vec::new(), user())
            .await
            .unwrap();
        let err = service.invoke(function.id, b"{}".to_vec(), false, user()).await.unwrap_err();
        assert!(matches!(err, FunctionsError::NoVersionDeployed));
    }

    #[test]
    async fn set_active_version_twice_is_idempotent() {
        let (service, _workspaces, _provider, workspace_id) = harness().await;
        let function = service
            .create_function(workspace_id, ProjectId::generate(), "hello".to_string(), "nodejs".to_string(), 128, 30, Vec::new(), user())
            .await
            .unwrap();
        let version = service
            .deploy_version(function.id, VersionSource::Image { image_ref: "registry/hello:v1".to_string() }, user())
            .await
            .unwrap();
        service.set_active_version(function.id, version.id, user()).await.unwrap();
        service.set_active_version(function.id, version.id, user()).await.unwrap();

        let stored = service.functions.get(function.id).await.unwrap().unwrap();
        assert_eq!(stored.active_version_id, Some(version.id));
    }

    #[test]
    async fn rollback_returns_to_the_previous_successful_version() {
        let (service, _workspaces, _provider, workspace_id) = harness().await;
        let function = service
            .create_function(workspace_id, ProjectId::generate(), "hello".to_string(), "nodejs".to_string(), 128, 30, Vec::new(), user())
            .await
            .unwrap();
        let v1 = service
            .deploy_version(function.id, VersionSource::Image { image_ref: "registry/hello:v1".to_string() }, user())
            .await
            .unwrap();
        service.set_active_version(function.id, v1.id, user()).await.unwrap();
        let v2 = service
            .deploy_version(function.id, VersionSource::Image { image_ref: "registry/hello:v2".to_string() }, user())
            .await
            .unwrap();
        service.set_active_version(function.id, v2.id, user()).await.unwrap();

        let rolled_back_to = service.rollback(function.id, user()).await.unwrap();
        assert_eq!(rolled_back_to.id, v1.id);

        let err = service.rollback(function.id, user()).await.unwrap_err();
        assert!(matches!(err, FunctionsError::NoPriorVersion));
    }

    #[test]
    async fn dedicated_plan_workspace_gets_a_scheduling_overlay() {
        let (service, workspaces, provider, workspace_id) = harness().await;
        workspaces.set_plan_tier(workspace_id, PlanTier::Dedicated).await.unwrap();

        let function = service
            .create_function(workspace_id, ProjectId::generate(), "hello".to_string(), "nodejs".to_string(), 128, 30, Vec::new(), user())
            .await
            .unwrap();
        let version = service
            .deploy_version(function.id, VersionSource::Image { image_ref: "registry/hello:v1".to_string() }, user())
            .await
            .unwrap();
        service.set_active_version(function.id, version.id, user()).await.unwrap();

        let overlay = provider.scheduling_for(&function.id.to_string()).await.unwrap();
        assert_eq!(overlay.node_selector, Some(("hexabase.ai/node-pool".to_string(), workspace_id.to_string())));
    }
}
