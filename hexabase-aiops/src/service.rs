//! AIOps Authorization Gateway (C9, spec §4.6): the only door the AIOps
//! subsystem has into the control plane. Every call runs the same five
//! steps — verify the internal JWT, re-read live memberships/roles, re-check
//! permission for the exact resource+verb, execute through the normal
//! service layer, emit an audit record — and never touches Kubernetes or
//! the state store directly.

use std::sync::Arc;

use async_trait::async_trait;
use hexabase_common::ids::{ApplicationId, FunctionId, UserId, WorkspaceId};
use hexabase_functions::model::{FunctionMetrics, Instance};
use hexabase_functions::repo::{ApplicationRepo, FunctionRepo};
use hexabase_functions::FunctionsService;
use hexabase_hierarchy::audit::{Actor, AuditEvent, AuditOutcome, AuditSink};
use hexabase_hierarchy::HierarchyServiceDefault;
use hexabase_identity::model::InternalClaims;
use hexabase_identity::IdentityService;
use serde_json::json;
use std::str::FromStr;

use crate::error::AiopsError;
use crate::model::{rules_grant, TargetResource, TargetVerb};

#[async_trait]
pub trait AiopsGateway: Send + Sync {
    async fn scale_deployment(&self, token: &str, application_id: ApplicationId, replicas: i32) -> Result<(), AiopsError>;
    async fn rollout_restart(&self, token: &str, application_id: ApplicationId) -> Result<(), AiopsError>;
    async fn get_logs(&self, token: &str, function_id: FunctionId, lines: usize) -> Result<Vec<String>, AiopsError>;
    async fn query_metrics(&self, token: &str, function_id: FunctionId) -> Result<FunctionMetrics, AiopsError>;
    async fn get_instances(&self, token: &str, application_id: ApplicationId) -> Result<Vec<Instance>, AiopsError>;
}

pub struct AiopsGatewayDefault {
    identity: Arc<dyn IdentityService>,
    hierarchy: Arc<HierarchyServiceDefault>,
    functions: Arc<dyn FunctionsService>,
    function_repo: Arc<dyn FunctionRepo>,
    application_repo: Arc<dyn ApplicationRepo>,
    audit: Arc<dyn AuditSink>,
}

impl AiopsGatewayDefault {
    pub fn new(
        identity: Arc<dyn IdentityService>,
        hierarchy: Arc<HierarchyServiceDefault>,
        functions: Arc<dyn FunctionsService>,
        function_repo: Arc<dyn FunctionRepo>,
        application_repo: Arc<dyn ApplicationRepo>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { identity, hierarchy, functions, function_repo, application_repo, audit }
    }

    /// Steps 1-3 of spec §4.6: verify the token, re-read live memberships,
    /// and check that `claims.acting_for` still holds `verb` on `resource`
    /// inside `workspace_id`. Returns the verified claims so callers can use
    /// `acting_for` for the audit record.
    async fn authorize(
        &self,
        token: &str,
        workspace_id: WorkspaceId,
        resource: TargetResource,
        verb: TargetVerb,
    ) -> Result<InternalClaims, AiopsError> {
        let claims = self
            .identity
            .verify_internal_jwt(token)
            .await
            .map_err(|e| match e {
                hexabase_identity::IdentityError::TokenExpired => AiopsError::TokenExpired,
                other => AiopsError::InvalidToken(other.to_string()),
            })?;
        let acting_for =
            UserId::from_str(&claims.acting_for).map_err(|e| AiopsError::InvalidToken(e.to_string()))?;

        let effective_groups = self.hierarchy.resolve_effective_groups(acting_for, workspace_id).await?;
        let bindings = self.hierarchy.resolve_bindings(workspace_id).await?;

        let mut authorized = false;
        for binding in bindings {
            if !effective_groups.contains(&binding.group_id) {
                continue;
            }
            let Some(role) = self.hierarchy.get_role(binding.role_id).await? else {
                continue;
            };
            if rules_grant(&role.rules_json, resource.as_str(), verb.as_str()) {
                authorized = true;
                break;
            }
        }

        if !authorized {
            self.record(
                Some(workspace_id),
                &claims,
                &format!("{}:{}", verb.as_str(), resource.as_str()),
                resource.as_str(),
                AuditOutcome::Denied,
                json!({}),
            )
            .await;
            return Err(AiopsError::PermissionDenied {
                acting_for: claims.acting_for.clone(),
                verb: verb.as_str().to_string(),
                resource: resource.as_str().to_string(),
            });
        }
        Ok(claims)
    }

    /// Step 5 of spec §4.6: `initiated_by=agent`, always logged regardless
    /// of outcome. Never fails the caller's operation — a dropped audit
    /// write is a thing to alert on, not a reason to roll back an already
    /// executed (or already denied) action.
    async fn record(
        &self,
        workspace_id: Option<WorkspaceId>,
        claims: &InternalClaims,
        action: &str,
        target: &str,
        outcome: AuditOutcome,
        detail: serde_json::Value,
    ) {
        let acting_for = match UserId::from_str(&claims.acting_for) {
            Ok(id) => id,
            Err(_) => return,
        };
        let event = AuditEvent {
            id: hexabase_common::ids::AuditEventId::generate(),
            org_id: None,
            workspace_id,
            actor: Actor::Agent { acting_for },
            action: action.to_string(),
            target: target.to_string(),
            outcome,
            detail_json: detail.to_string(),
            occurred_at: chrono::Utc::now(),
        };
        if let Err(err) = self.audit.record(event).await {
            tracing::warn!(error = %err, "failed to record AIOps audit event");
        }
    }

    async fn application_or_not_found(&self, application_id: ApplicationId) -> Result<hexabase_functions::model::Application, AiopsError> {
        self.application_repo
            .get(application_id)
            .await
            .map_err(hexabase_functions::FunctionsError::from)?
            .ok_or_else(|| AiopsError::NotFound(format!("application {application_id}")))
    }

    async fn function_or_not_found(&self, function_id: FunctionId) -> Result<hexabase_functions::model::Function, AiopsError> {
        self.function_repo
            .get(function_id)
            .await
            .map_err(hexabase_functions::FunctionsError::from)?
            .ok_or_else(|| AiopsError::NotFound(format!("function {function_id}")))
    }
}

#[async_trait]
impl AiopsGateway for AiopsGatewayDefault {
    async fn scale_deployment(&self, token: &str, application_id: ApplicationId, replicas: i32) -> Result<(), AiopsError> {
        let application = self.application_or_not_found(application_id).await?;
        let claims = self.authorize(token, application.workspace_id, TargetResource::Application, TargetVerb::Update).await?;
        let outcome = self.functions.scale(application_id, replicas).await;
        self.record(
            Some(application.workspace_id),
            &claims,
            "scale_deployment",
            &format!("application:{application_id}"),
            if outcome.is_ok() { AuditOutcome::Success } else { AuditOutcome::Failed },
            json!({ "replicas": replicas }),
        )
        .await;
        Ok(outcome?)
    }

    async fn rollout_restart(&self, token: &str, application_id: ApplicationId) -> Result<(), AiopsError> {
        let application = self.application_or_not_found(application_id).await?;
        let claims = self.authorize(token, application.workspace_id, TargetResource::Application, TargetVerb::Update).await?;
        let outcome = self.functions.restart(application_id).await;
        self.record(
            Some(application.workspace_id),
            &claims,
            "rollout_restart",
            &format!("application:{application_id}"),
            if outcome.is_ok() { AuditOutcome::Success } else { AuditOutcome::Failed },
            json!({}),
        )
        .await;
        Ok(outcome?)
    }

    async fn get_logs(&self, token: &str, function_id: FunctionId, lines: usize) -> Result<Vec<String>, AiopsError> {
        let function = self.function_or_not_found(function_id).await?;
        let claims = self.authorize(token, function.workspace_id, TargetResource::Function, TargetVerb::Get).await?;
        let outcome = self.functions.get_logs(function_id, lines).await;
        self.record(
            Some(function.workspace_id),
            &claims,
            "get_logs",
            &format!("function:{function_id}"),
            if outcome.is_ok() { AuditOutcome::Success } else { AuditOutcome::Failed },
            json!({ "lines": lines }),
        )
        .await;
        Ok(outcome?)
    }

    async fn query_metrics(&self, token: &str, function_id: FunctionId) -> Result<FunctionMetrics, AiopsError> {
        let function = self.function_or_not_found(function_id).await?;
        let claims = self.authorize(token, function.workspace_id, TargetResource::Function, TargetVerb::Get).await?;
        let outcome = self.functions.get_metrics(function_id).await;
        self.record(
            Some(function.workspace_id),
            &claims,
            "query_metrics",
            &format!("function:{function_id}"),
            if outcome.is_ok() { AuditOutcome::Success } else { AuditOutcome::Failed },
            json!({}),
        )
        .await;
        Ok(outcome?)
    }

    async fn get_instances(&self, token: &str, application_id: ApplicationId) -> Result<Vec<Instance>, AiopsError> {
        let application = self.application_or_not_found(application_id).await?;
        let claims = self.authorize(token, application.workspace_id, TargetResource::Application, TargetVerb::Get).await?;
        let outcome = self.functions.get_instances(application_id).await;
        self.record(
            Some(application.workspace_id),
            &claims,
            "get_instances",
            &format!("application:{application_id}"),
            if outcome.is_ok() { AuditOutcome::Success } else { AuditOutcome::Failed },
            json!({}),
        )
        .await;
        Ok(outcome?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexabase_functions::repo::{InMemoryApplicationRepo, InMemoryFunctionRepo, InMemoryFunctionTriggerRepo, InMemoryFunctionVersionRepo};
    use hexabase_functions::FunctionsServiceDefault;
    use hexabase_hierarchy::model::{Group, Plan, PlanTier, ResourceQuota, Role, RoleAssignment, RoleScope, User, Workspace, WorkspaceStatus};
    use hexabase_hierarchy::repo::{
        GroupRepo, InMemoryGroupRepo, InMemoryOrganizationRepo, InMemoryOrganizationUserRepo, InMemoryPlanRepo, InMemoryProjectRepo,
        InMemoryRoleAssignmentRepo, InMemoryRoleRepo, InMemoryUserRepo, InMemoryWorkspaceRepo, PlanRepo, RoleAssignmentRepo, RoleRepo, UserRepo,
        WorkspaceRepo,
    };
    use hexabase_identity::IdentityServiceDefault;
    use test_r::test;

    async fn harness(
        grant_verb: Option<&str>,
    ) -> (
        AiopsGatewayDefault,
        WorkspaceId,
        UserId,
        ApplicationId,
        FunctionId,
        String,
        Arc<hexabase_hierarchy::audit::InMemoryAuditSink>,
    ) {
        let user_id = UserId::generate();
        let workspace_id = WorkspaceId::generate();
        let org_id = hexabase_common::ids::OrgId::generate();
        let plan = Plan {
            id: hexabase_common::ids::PlanId::generate(),
            name: "pro".to_string(),
            resource_quota: ResourceQuota { cpu_millicores: 4000, memory_mb: 8192, storage_gb: 100, max_pods: 50 },
            allow_dedicated_nodes: false,
            price_tier: "shared".to_string(),
        };
        let plans = Arc::new(InMemoryPlanRepo::new());
        plans.insert(&plan).await.unwrap();

        let workspace = Workspace {
            id: workspace_id,
            org_id,
            name: "acme".to_string(),
            plan_id: plan.id,
            plan_tier: PlanTier::Shared,
            status: WorkspaceStatus::Running,
            vcluster_instance_name: "vc-acme".to_string(),
            vcluster_namespace: "vc-acme".to_string(),
            api_endpoint: Some("https://acme.example".to_string()),
            oidc_client_id: "acme".to_string(),
            created_at: chrono::Utc::now(),
        };
        let workspaces = Arc::new(InMemoryWorkspaceRepo::new());
        workspaces.insert(&workspace).await.unwrap();

        let group = Group {
            id: hexabase_common::ids::GroupId::generate(),
            workspace_id,
            name: "WSAdmins".to_string(),
            parent_group_id: None,
            is_seed: true,
        };
        let groups = Arc::new(InMemoryGroupRepo::new());
        groups.insert(&group).await.unwrap();
        groups.add_member(group.id, user_id).await.unwrap();

        let rules_json = match grant_verb {
            Some(verb) => json!([{ "apiGroups": [""], "resources": ["applications", "functions"], "verbs": [verb] }]).to_string(),
            None => json!([]).to_string(),
        };
        let role = Role {
            id: hexabase_common::ids::RoleId::generate(),
            scope: RoleScope::Workspace,
            workspace_id,
            project_id: None,
            name: "aiops-operator".to_string(),
            rules_json,
            preset: false,
        };
        let roles = Arc::new(InMemoryRoleRepo::new());
        roles.insert(&role).await.unwrap();

        let role_assignments = Arc::new(InMemoryRoleAssignmentRepo::new());
        role_assignments
            .insert(&RoleAssignment { id: hexabase_common::ids::RoleAssignmentId::generate(), role_id: role.id, group_id: group.id })
            .await
            .unwrap();

        let users = Arc::new(InMemoryUserRepo::new());
        users
            .insert(&User {
                id: user_id,
                external_subject: "sub".to_string(),
                provider: "test".to_string(),
                email: "a@example.com".to_string(),
                display_name: "A".to_string(),
                created_at: chrono::Utc::now(),
                last_login_at: None,
            })
            .await
            .unwrap();

        let hierarchy = Arc::new(HierarchyServiceDefault::new(
            Arc::new(InMemoryOrganizationRepo::new()),
            users,
            Arc::new(InMemoryOrganizationUserRepo::new()),
            workspaces,
            plans,
            Arc::new(InMemoryProjectRepo::new()),
            groups,
            roles,
            role_assignments,
            Arc::new(hexabase_hierarchy::audit::InMemoryAuditSink::new()),
            Arc::new(hexabase_bus::InMemoryBus::new()),
        ));

        let identity: Arc<dyn IdentityService> = Arc::new(IdentityServiceDefault::test_default());

        let functions_repo = Arc::new(InMemoryFunctionRepo::new());
        let application_repo = Arc::new(InMemoryApplicationRepo::new());
        let function = hexabase_functions::model::Function {
            id: FunctionId::generate(),
            workspace_id,
            project_id: hexabase_common::ids::ProjectId::generate(),
            name: "hello".to_string(),
            runtime: "nodejs".to_string(),
            memory_mb: 128,
            timeout_s: 30,
            env_json: "{}".to_string(),
            active_version_id: None,
            created_at: chrono::Utc::now(),
        };
        functions_repo.insert(&function).await.unwrap();
        let application = hexabase_functions::model::Application {
            id: ApplicationId::generate(),
            workspace_id,
            project_id: function.project_id,
            name: "web".to_string(),
            kind: hexabase_functions::model::ApplicationKind::Deployment,
            image: "acme/web:1".to_string(),
            replicas: 1,
            has_ingress: false,
            created_at: chrono::Utc::now(),
        };
        application_repo.insert(&application).await.unwrap();

        let functions_service: Arc<dyn FunctionsService> = Arc::new(FunctionsServiceDefault::new(
            functions_repo.clone(),
            Arc::new(InMemoryFunctionVersionRepo::new()),
            Arc::new(InMemoryFunctionTriggerRepo::new()),
            application_repo.clone(),
            Arc::new(InMemoryWorkspaceRepo::new()),
            Arc::new(hexabase_functions::provider::InMemoryProvider::new()),
            Arc::new(hexabase_bus::InMemoryBus::new()),
        ));

        let audit = Arc::new(hexabase_hierarchy::audit::InMemoryAuditSink::new());
        let gateway = AiopsGatewayDefault::new(identity.clone(), hierarchy, functions_service, functions_repo, application_repo, audit.clone());

        let token = identity
            .issue_internal_jwt(
                user_id,
                hexabase_identity::model::InternalScope { org_id: None, workspace_id: Some(workspace_id.to_string()), project_id: None },
                std::time::Duration::from_secs(5),
            )
            .await
            .unwrap();

        (gateway, workspace_id, user_id, application.id, function.id, token, audit)
    }

    #[test]
    async fn scale_deployment_succeeds_when_role_grants_update_on_applications() {
        let (gateway, _ws, _user, application_id, _function_id, token, _audit) = harness(Some("update")).await;
        gateway.scale_deployment(&token, application_id, 5).await.unwrap();
    }

    #[test]
    async fn scale_deployment_is_denied_without_a_granting_role() {
        let (gateway, _ws, _user, application_id, _function_id, token, _audit) = harness(None).await;
        let err = gateway.scale_deployment(&token, application_id, 5).await.unwrap_err();
        assert!(matches!(err, AiopsError::PermissionDenied { .. }));
    }

    #[test]
    async fn a_role_scoped_to_update_does_not_grant_get_logs() {
        let (gateway, _ws, _user, _application_id, function_id, token, _audit) = harness(Some("update")).await;
        let err = gateway.get_logs(&token, function_id, 10).await.unwrap_err();
        assert!(matches!(err, AiopsError::PermissionDenied { .. }));
    }

    #[test]
    async fn get_logs_succeeds_and_is_audited_as_agent_initiated() {
        let (gateway, _ws, user_id, _application_id, function_id, token, audit) = harness(Some("get")).await;
        gateway.get_logs(&token, function_id, 10).await.unwrap();
        match audit.events().last().unwrap().actor.clone() {
            Actor::Agent { acting_for } => assert_eq!(acting_for, user_id),
            Actor::User(_) => panic!("expected an agent-initiated audit record"),
        }
    }

    #[test]
    async fn an_invalid_token_is_rejected_before_any_permission_check() {
        let (gateway, _ws, _user, application_id, _function_id, _token, _audit) = harness(Some("update")).await;
        let err = gateway.scale_deployment("not-a-real-token", application_id, 5).await.unwrap_err();
        assert!(matches!(err, AiopsError::InvalidToken(_)));
    }
}
