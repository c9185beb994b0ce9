//! Hierarchy & Policy Service (C5, spec §4.4): CRUD and invariant
//! enforcement over Organizations, Workspaces, Projects, Groups, Roles and
//! Memberships, plus the RBAC-material derivations the orchestrator
//! consumes (`ResolveEffectiveGroups`, `ResolveBindings`).

use crate::audit::{Actor, AuditEvent, AuditOutcome, AuditSink};
use crate::error::HierarchyError;
use crate::model::{
    Group, Organization, OrganizationUser, OrgRole, PlanTier, Project, Role, RoleAssignment,
    RoleScope, User, Workspace, WorkspaceStatus, PRESET_ROLE_WORKSPACE_ADMIN,
    PRESET_ROLE_WORKSPACE_VIEWER, SEED_GROUP_WORKSPACE_MEMBERS, SEED_GROUP_WS_ADMINS,
    SEED_GROUP_WS_USERS,
};
use crate::repo::{
    GroupRepo, OrganizationRepo, OrganizationUserRepo, PlanRepo, ProjectRepo, RoleAssignmentRepo, RoleRepo,
    UserRepo, WorkspaceRepo,
};
use async_trait::async_trait;
use hexabase_bus::{Bus, Envelope, Topic};
use hexabase_common::ids::{
    AuditEventId, GroupId, OrgId, PlanId, ProjectId, RoleAssignmentId, RoleId, UserId, WorkspaceId,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// A `(group, role, scope)` triple as returned by `ResolveBindings` —
/// exactly the material the orchestrator materializes into vCluster
/// (Cluster)RoleBindings (spec §4.1 `ApplyDefaultBindings`).
#[derive(Debug, Clone)]
pub struct Binding {
    pub group_id: GroupId,
    pub role_id: RoleId,
    pub scope: RoleScope,
}

#[async_trait]
pub trait HierarchyService: Send + Sync {
    async fn create_organization(&self, name: String, owner_user_id: UserId) -> Result<Organization, HierarchyError>;

    /// Creates the Workspace row plus its three seed groups, two preset
    /// ClusterRoles, and inserts the creator into `WSAdmins` (spec §3
    /// invariant, §8 test scenario).
    async fn create_workspace(
        &self,
        org_id: OrgId,
        name: String,
        plan_id: PlanId,
        creator: UserId,
    ) -> Result<Workspace, HierarchyError>;

    async fn create_project(
        &self,
        workspace_id: WorkspaceId,
        name: String,
        namespace_name: String,
        quota: crate::model::ResourceQuota,
    ) -> Result<Project, HierarchyError>;

    async fn create_sub_project(
        &self,
        parent_project_id: ProjectId,
        name: String,
        namespace_name: String,
        quota: crate::model::ResourceQuota,
    ) -> Result<Project, HierarchyError>;

    async fn set_project_quota(
        &self,
        project_id: ProjectId,
        quota: crate::model::ResourceQuota,
    ) -> Result<(), HierarchyError>;

    async fn delete_project(&self, project_id: ProjectId) -> Result<(), HierarchyError>;

    async fn create_group(
        &self,
        workspace_id: WorkspaceId,
        name: String,
        parent_group_id: Option<GroupId>,
    ) -> Result<Group, HierarchyError>;

    async fn add_member(&self, group_id: GroupId, user_id: UserId) -> Result<(), HierarchyError>;
    async fn remove_member(&self, group_id: GroupId, user_id: UserId) -> Result<(), HierarchyError>;

    /// Rejects with `CYCLE` if `new_parent == group` or `group` is an
    /// ancestor of `new_parent` (spec §4.4 key algorithm).
    async fn move_group(&self, group_id: GroupId, new_parent_id: Option<GroupId>) -> Result<(), HierarchyError>;
    async fn delete_group(&self, group_id: GroupId) -> Result<(), HierarchyError>;

    async fn create_custom_project_role(
        &self,
        workspace_id: WorkspaceId,
        project_id: ProjectId,
        name: String,
        rules_json: String,
    ) -> Result<Role, HierarchyError>;

    /// Preset ClusterRoles are immutable (SPEC_FULL.md §11.3): always
    /// returns `ROLE_PRESET_IMMUTABLE` for either preset role.
    async fn delete_role(&self, role_id: RoleId) -> Result<(), HierarchyError>;

    async fn assign_role_to_group(&self, role_id: RoleId, group_id: GroupId) -> Result<RoleAssignment, HierarchyError>;
    async fn unassign_role(&self, assignment_id: RoleAssignmentId) -> Result<(), HierarchyError>;

    /// DFS from the user's direct memberships, walking `parent_group_id`
    /// upward to the forest roots; the flat result is what the Identity
    /// Broker emits as the OIDC `groups` claim (spec §4.2/§4.4).
    async fn resolve_effective_groups(&self, user_id: UserId, workspace_id: WorkspaceId) -> Result<HashSet<GroupId>, HierarchyError>;

    async fn resolve_bindings(&self, workspace_id: WorkspaceId) -> Result<Vec<Binding>, HierarchyError>;
}

#[derive(Serialize)]
struct ProjectActivityEvent {
    workspace_id: WorkspaceId,
    project_id: ProjectId,
    action: &'static str,
}

pub struct HierarchyServiceDefault {
    orgs: Arc<dyn OrganizationRepo>,
    users: Arc<dyn UserRepo>,
    org_users: Arc<dyn OrganizationUserRepo>,
    workspaces: Arc<dyn WorkspaceRepo>,
    plans: Arc<dyn PlanRepo>,
    projects: Arc<dyn ProjectRepo>,
    groups: Arc<dyn GroupRepo>,
    roles: Arc<dyn RoleRepo>,
    role_assignments: Arc<dyn RoleAssignmentRepo>,
    audit: Arc<dyn AuditSink>,
    bus: Arc<dyn Bus>,
}

impl HierarchyServiceDefault {
    /// Called by the Identity Broker (C4) on every completed external
    /// login: the canonical [`User`] record lives here because Org/Workspace
    /// membership references `UserId`, and this is where those memberships
    /// are enforced.
    pub async fn get_or_create_user(
        &self,
        external_subject: String,
        provider: String,
        email: String,
        display_name: String,
    ) -> Result<User, HierarchyError> {
        if let Some(existing) = self
            .users
            .find_by_provider_subject(&provider, &external_subject)
            .await
            .map_err(HierarchyError::Repo)?
        {
            self.users.touch_last_login(existing.id).await.map_err(HierarchyError::Repo)?;
            return Ok(existing);
        }
        let user = User {
            id: UserId::generate(),
            external_subject,
            provider,
            email,
            display_name,
            created_at: chrono::Utc::now(),
            last_login_at: Some(chrono::Utc::now()),
        };
        self.users.insert(&user).await.map_err(HierarchyError::Repo)?;
        Ok(user)
    }

    /// Looked up by the Identity Broker when it re-mints an access token on
    /// refresh and only has the user id, not the original login claims.
    pub async fn get_user(&self, user_id: UserId) -> Result<Option<User>, HierarchyError> {
        self.users.get(user_id).await.map_err(HierarchyError::Repo)
    }

    /// Looked up by the orchestrator (C6) when materializing
    /// [`Binding`]s into actual RBAC objects inside a vCluster: it has the
    /// ids but needs the group's name and the role's `rules_json`.
    pub async fn get_group(&self, group_id: GroupId) -> Result<Option<Group>, HierarchyError> {
        self.groups.get(group_id).await.map_err(HierarchyError::Repo)
    }

    pub async fn get_role(&self, role_id: RoleId) -> Result<Option<Role>, HierarchyError> {
        self.roles.get(role_id).await.map_err(HierarchyError::Repo)
    }

    pub async fn add_organization_member(&self, org_id: OrgId, user_id: UserId, role: OrgRole) -> Result<(), HierarchyError> {
        self.orgs
            .get(org_id)
            .await
            .map_err(HierarchyError::Repo)?
            .ok_or_else(|| HierarchyError::NotFound(format!("organization {org_id}")))?;
        self.org_users.upsert(&OrganizationUser { org_id, user_id, role }).await.map_err(HierarchyError::Repo)?;
        Ok(())
    }

    /// Called by the Identity Broker right after `get_or_create_user` to
    /// decide whether this login is the user's first: an empty membership
    /// list means no private Organization has been created for them yet.
    pub async fn list_organizations_for_user(&self, user_id: UserId) -> Result<Vec<OrganizationUser>, HierarchyError> {
        self.org_users.list_for_user(user_id).await.map_err(HierarchyError::Repo)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orgs: Arc<dyn OrganizationRepo>,
        users: Arc<dyn UserRepo>,
        org_users: Arc<dyn OrganizationUserRepo>,
        workspaces: Arc<dyn WorkspaceRepo>,
        plans: Arc<dyn PlanRepo>,
        projects: Arc<dyn ProjectRepo>,
        groups: Arc<dyn GroupRepo>,
        roles: Arc<dyn RoleRepo>,
        role_assignments: Arc<dyn RoleAssignmentRepo>,
        audit: Arc<dyn AuditSink>,
        bus: Arc<dyn Bus>,
    ) -> Self {
        Self {
            orgs,
            users,
            org_users,
            workspaces,
            plans,
            projects,
            groups,
            roles,
            role_assignments,
            audit,
            bus,
        }
    }

    async fn announce_project_activity(&self, workspace_id: WorkspaceId, project_id: ProjectId, action: &'static str) {
        let event = ProjectActivityEvent { workspace_id, project_id, action };
        let envelope = Envelope::new("project_activity", &event, chrono::Utc::now().timestamp());
        let _ = self.bus.publish(Topic::ProjectActivity, envelope).await;
    }

    /// Ancestor chain of `group_id`, root-first would be backwards here —
    /// returned nearest-parent-first, which is all `move_group`'s cycle
    /// check needs.
    async fn ancestors_of(&self, group_id: GroupId) -> Result<Vec<GroupId>, HierarchyError> {
        let mut chain = Vec::new();
        let mut current = self
            .groups
            .get(group_id)
            .await
            .map_err(HierarchyError::Repo)?
            .ok_or_else(|| HierarchyError::NotFound(format!("group {group_id}")))?
            .parent_group_id;
        while let Some(parent_id) = current {
            chain.push(parent_id);
            current = self.groups.get(parent_id).await.map_err(HierarchyError::Repo)?.and_then(|g| g.parent_group_id);
        }
        Ok(chain)
    }

    fn validate_dns_label(name: &str) -> Result<(), HierarchyError> {
        let valid = !name.is_empty()
            && name.len() <= 63
            && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !name.starts_with('-')
            && !name.ends_with('-');
        if valid {
            Ok(())
        } else {
            Err(HierarchyError::InvalidName(name.to_string()))
        }
    }

    async fn project_siblings_quota_sum(
        &self,
        workspace_id: WorkspaceId,
        parent_project_id: Option<ProjectId>,
        exclude: Option<ProjectId>,
    ) -> Result<i64, HierarchyError> {
        let siblings = match parent_project_id {
            Some(parent_id) => self.projects.list_children(parent_id).await.map_err(HierarchyError::Repo)?,
            None => self
                .projects
                .list_for_workspace(workspace_id)
                .await
                .map_err(HierarchyError::Repo)?
                .into_iter()
                .filter(|p| p.parent_project_id.is_none())
                .collect(),
        };
        Ok(siblings
            .into_iter()
            .filter(|p| Some(p.id) != exclude)
            .map(|p| p.resource_quota.cpu_millicores)
            .sum())
    }

    async fn check_quota_headroom(
        &self,
        workspace_id: WorkspaceId,
        parent_project_id: Option<ProjectId>,
        exclude: Option<ProjectId>,
        requested_cpu_millicores: i64,
    ) -> Result<(), HierarchyError> {
        let workspace = self
            .workspaces
            .get(workspace_id)
            .await
            .map_err(HierarchyError::Repo)?
            .ok_or_else(|| HierarchyError::NotFound(format!("workspace {workspace_id}")))?;
        let plan = self
            .plans
            .get(workspace.plan_id)
            .await
            .map_err(HierarchyError::Repo)?
            .ok_or_else(|| HierarchyError::NotFound(format!("plan {}", workspace.plan_id)))?;
        let consumed = self.project_siblings_quota_sum(workspace_id, parent_project_id, exclude).await?;
        let headroom = plan.resource_quota.cpu_millicores - consumed;
        if requested_cpu_millicores > headroom {
            return Err(HierarchyError::QuotaExceeded { requested: requested_cpu_millicores, headroom });
        }
        Ok(())
    }
}

#[async_trait]
impl HierarchyService for HierarchyServiceDefault {
    async fn create_organization(&self, name: String, owner_user_id: UserId) -> Result<Organization, HierarchyError> {
        let org = Organization {
            id: OrgId::generate(),
            name,
            owner_user_id,
            created_at: chrono::Utc::now(),
        };
        self.orgs.insert(&org).await.map_err(HierarchyError::Repo)?;
        self.org_users
            .upsert(&OrganizationUser { org_id: org.id, user_id: owner_user_id, role: OrgRole::Owner })
            .await
            .map_err(HierarchyError::Repo)?;
        Ok(org)
    }

    async fn create_workspace(
        &self,
        org_id: OrgId,
        name: String,
        plan_id: PlanId,
        creator: UserId,
    ) -> Result<Workspace, HierarchyError> {
        let workspace = Workspace {
            id: WorkspaceId::generate(),
            org_id,
            name: name.clone(),
            plan_id,
            plan_tier: PlanTier::Shared,
            status: WorkspaceStatus::PendingCreation,
            vcluster_instance_name: format!("ws-{}", WorkspaceId::generate()),
            vcluster_namespace: format!("vc-{name}"),
            api_endpoint: None,
            oidc_client_id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
        };
        self.workspaces.insert(&workspace).await.map_err(HierarchyError::Repo)?;

        let root = Group {
            id: GroupId::generate(),
            workspace_id: workspace.id,
            name: SEED_GROUP_WORKSPACE_MEMBERS.to_string(),
            parent_group_id: None,
            is_seed: true,
        };
        self.groups.insert(&root).await.map_err(HierarchyError::Repo)?;

        let admins = Group {
            id: GroupId::generate(),
            workspace_id: workspace.id,
            name: SEED_GROUP_WS_ADMINS.to_string(),
            parent_group_id: Some(root.id),
            is_seed: true,
        };
        self.groups.insert(&admins).await.map_err(HierarchyError::Repo)?;

        let users_group = Group {
            id: GroupId::generate(),
            workspace_id: workspace.id,
            name: SEED_GROUP_WS_USERS.to_string(),
            parent_group_id: Some(root.id),
            is_seed: true,
        };
        self.groups.insert(&users_group).await.map_err(HierarchyError::Repo)?;

        self.groups.add_member(admins.id, creator).await.map_err(HierarchyError::Repo)?;

        let admin_role = Role {
            id: RoleId::generate(),
            scope: RoleScope::Workspace,
            workspace_id: workspace.id,
            project_id: None,
            name: PRESET_ROLE_WORKSPACE_ADMIN.to_string(),
            rules_json: "[{\"apiGroups\":[\"*\"],\"resources\":[\"*\"],\"verbs\":[\"*\"]}]".to_string(),
            preset: true,
        };
        self.roles.insert(&admin_role).await.map_err(HierarchyError::Repo)?;

        let viewer_role = Role {
            id: RoleId::generate(),
            scope: RoleScope::Workspace,
            workspace_id: workspace.id,
            project_id: None,
            name: PRESET_ROLE_WORKSPACE_VIEWER.to_string(),
            rules_json: "[{\"apiGroups\":[\"*\"],\"resources\":[\"*\"],\"verbs\":[\"get\",\"list\",\"watch\"]}]"
                .to_string(),
            preset: true,
        };
        self.roles.insert(&viewer_role).await.map_err(HierarchyError::Repo)?;

        self.role_assignments
            .insert(&RoleAssignment { id: RoleAssignmentId::generate(), role_id: admin_role.id, group_id: admins.id })
            .await
            .map_err(HierarchyError::Repo)?;
        self.role_assignments
            .insert(&RoleAssignment { id: RoleAssignmentId::generate(), role_id: viewer_role.id, group_id: users_group.id })
            .await
            .map_err(HierarchyError::Repo)?;

        self.audit
            .record(AuditEvent {
                id: AuditEventId::generate(),
                org_id: Some(org_id),
                workspace_id: Some(workspace.id),
                actor: Actor::User(creator),
                action: "workspace.create".to_string(),
                target: workspace.id.to_string(),
                outcome: AuditOutcome::Success,
                detail_json: "{}".to_string(),
                occurred_at: chrono::Utc::now(),
            })
            .await
            .map_err(HierarchyError::Repo)?;

        Ok(workspace)
    }

    async fn create_project(
        &self,
        workspace_id: WorkspaceId,
        name: String,
        namespace_name: String,
        quota: crate::model::ResourceQuota,
    ) -> Result<Project, HierarchyError> {
        Self::validate_dns_label(&namespace_name)?;
        if self
            .projects
            .find_by_namespace(workspace_id, &namespace_name)
            .await
            .map_err(HierarchyError::Repo)?
            .is_some()
        {
            return Err(HierarchyError::DuplicateNamespace(namespace_name));
        }
        self.check_quota_headroom(workspace_id, None, None, quota.cpu_millicores).await?;

        let project = Project {
            id: ProjectId::generate(),
            workspace_id,
            parent_project_id: None,
            name,
            namespace_name,
            resource_quota: quota,
            created_at: chrono::Utc::now(),
        };
        self.projects.insert(&project).await.map_err(HierarchyError::Repo)?;
        self.announce_project_activity(workspace_id, project.id, "created").await;
        Ok(project)
    }

    async fn create_sub_project(
        &self,
        parent_project_id: ProjectId,
        name: String,
        namespace_name: String,
        quota: crate::model::ResourceQuota,
    ) -> Result<Project, HierarchyError> {
        Self::validate_dns_label(&namespace_name)?;
        let parent = self
            .projects
            .get(parent_project_id)
            .await
            .map_err(HierarchyError::Repo)?
            .ok_or_else(|| HierarchyError::NotFound(format!("project {parent_project_id}")))?;
        if self
            .projects
            .find_by_namespace(parent.workspace_id, &namespace_name)
            .await
            .map_err(HierarchyError::Repo)?
            .is_some()
        {
            return Err(HierarchyError::DuplicateNamespace(namespace_name));
        }
        self.check_quota_headroom(parent.workspace_id, Some(parent_project_id), None, quota.cpu_millicores)
            .await?;

        let project = Project {
            id: ProjectId::generate(),
            workspace_id: parent.workspace_id,
            parent_project_id: Some(parent_project_id),
            name,
            namespace_name,
            resource_quota: quota,
            created_at: chrono::Utc::now(),
        };
        self.projects.insert(&project).await.map_err(HierarchyError::Repo)?;
        self.announce_project_activity(parent.workspace_id, project.id, "created").await;
        Ok(project)
    }

    async fn set_project_quota(&self, project_id: ProjectId, quota: crate::model::ResourceQuota) -> Result<(), HierarchyError> {
        let project = self
            .projects
            .get(project_id)
            .await
            .map_err(HierarchyError::Repo)?
            .ok_or_else(|| HierarchyError::NotFound(format!("project {project_id}")))?;
        self.check_quota_headroom(
            project.workspace_id,
            project.parent_project_id,
            Some(project_id),
            quota.cpu_millicores,
        )
        .await?;
        self.projects.set_quota(project_id, &quota).await.map_err(HierarchyError::Repo)?;
        Ok(())
    }

    async fn delete_project(&self, project_id: ProjectId) -> Result<(), HierarchyError> {
        let project = self
            .projects
            .get(project_id)
            .await
            .map_err(HierarchyError::Repo)?
            .ok_or_else(|| HierarchyError::NotFound(format!("project {project_id}")))?;
        if !self.projects.list_children(project_id).await.map_err(HierarchyError::Repo)?.is_empty() {
            return Err(HierarchyError::InvalidName("project has sub-projects; delete children first".to_string()));
        }
        self.projects.delete(project_id).await.map_err(HierarchyError::Repo)?;
        self.announce_project_activity(project.workspace_id, project_id, "deleted").await;
        Ok(())
    }

    async fn create_group(
        &self,
        workspace_id: WorkspaceId,
        name: String,
        parent_group_id: Option<GroupId>,
    ) -> Result<Group, HierarchyError> {
        if matches!(name.as_str(), SEED_GROUP_WORKSPACE_MEMBERS | SEED_GROUP_WS_ADMINS | SEED_GROUP_WS_USERS) {
            return Err(HierarchyError::InvalidName(format!("{name} is a reserved seed group name")));
        }
        if let Some(parent_id) = parent_group_id {
            self.groups
                .get(parent_id)
                .await
                .map_err(HierarchyError::Repo)?
                .ok_or_else(|| HierarchyError::NotFound(format!("group {parent_id}")))?;
        }
        let group = Group { id: GroupId::generate(), workspace_id, name, parent_group_id, is_seed: false };
        self.groups.insert(&group).await.map_err(HierarchyError::Repo)?;
        Ok(group)
    }

    async fn add_member(&self, group_id: GroupId, user_id: UserId) -> Result<(), HierarchyError> {
        self.groups
            .get(group_id)
            .await
            .map_err(HierarchyError::Repo)?
            .ok_or_else(|| HierarchyError::NotFound(format!("group {group_id}")))?;
        self.groups.add_member(group_id, user_id).await.map_err(HierarchyError::Repo)?;
        Ok(())
    }

    async fn remove_member(&self, group_id: GroupId, user_id: UserId) -> Result<(), HierarchyError> {
        self.groups.remove_member(group_id, user_id).await.map_err(HierarchyError::Repo)?;
        Ok(())
    }

    async fn move_group(&self, group_id: GroupId, new_parent_id: Option<GroupId>) -> Result<(), HierarchyError> {
        let group = self
            .groups
            .get(group_id)
            .await
            .map_err(HierarchyError::Repo)?
            .ok_or_else(|| HierarchyError::NotFound(format!("group {group_id}")))?;
        if group.is_seed {
            return Err(HierarchyError::PresetImmutable(format!("seed group {}", group.name)));
        }
        if let Some(new_parent_id) = new_parent_id {
            if new_parent_id == group_id {
                return Err(HierarchyError::Cycle);
            }
            let ancestors = self.ancestors_of(new_parent_id).await?;
            if ancestors.contains(&group_id) {
                return Err(HierarchyError::Cycle);
            }
        }
        self.groups.set_parent(group_id, new_parent_id).await.map_err(HierarchyError::Repo)?;
        Ok(())
    }

    async fn delete_group(&self, group_id: GroupId) -> Result<(), HierarchyError> {
        let group = self
            .groups
            .get(group_id)
            .await
            .map_err(HierarchyError::Repo)?
            .ok_or_else(|| HierarchyError::NotFound(format!("group {group_id}")))?;
        if group.is_seed {
            return Err(HierarchyError::PresetImmutable(format!("seed group {}", group.name)));
        }
        self.groups.delete(group_id).await.map_err(HierarchyError::Repo)?;
        Ok(())
    }

    async fn create_custom_project_role(
        &self,
        workspace_id: WorkspaceId,
        project_id: ProjectId,
        name: String,
        rules_json: String,
    ) -> Result<Role, HierarchyError> {
        self.projects
            .get(project_id)
            .await
            .map_err(HierarchyError::Repo)?
            .ok_or_else(|| HierarchyError::NotFound(format!("project {project_id}")))?;
        let role = Role {
            id: RoleId::generate(),
            scope: RoleScope::Project,
            workspace_id,
            project_id: Some(project_id),
            name,
            rules_json,
            preset: false,
        };
        self.roles.insert(&role).await.map_err(HierarchyError::Repo)?;
        Ok(role)
    }

    async fn delete_role(&self, role_id: RoleId) -> Result<(), HierarchyError> {
        let role = self
            .roles
            .get(role_id)
            .await
            .map_err(HierarchyError::Repo)?
            .ok_or_else(|| HierarchyError::NotFound(format!("role {role_id}")))?;
        if role.preset {
            return Err(HierarchyError::PresetImmutable(role.name));
        }
        self.roles.delete(role_id).await.map_err(HierarchyError::Repo)?;
        Ok(())
    }

    async fn assign_role_to_group(&self, role_id: RoleId, group_id: GroupId) -> Result<RoleAssignment, HierarchyError> {
        let role = self
            .roles
            .get(role_id)
            .await
            .map_err(HierarchyError::Repo)?
            .ok_or_else(|| HierarchyError::NotFound(format!("role {role_id}")))?;
        let group = self
            .groups
            .get(group_id)
            .await
            .map_err(HierarchyError::Repo)?
            .ok_or_else(|| HierarchyError::NotFound(format!("group {group_id}")))?;
        if role.workspace_id != group.workspace_id {
            return Err(HierarchyError::RoleScopeMismatch(format!(
                "role {role_id} belongs to a different workspace than group {group_id}"
            )));
        }
        if role.scope == RoleScope::Project && role.project_id.is_none() {
            return Err(HierarchyError::RoleScopeMismatch(format!("project-scope role {role_id} has no project_id")));
        }
        let assignment = RoleAssignment { id: RoleAssignmentId::generate(), role_id, group_id };
        self.role_assignments.insert(&assignment).await.map_err(HierarchyError::Repo)?;
        Ok(assignment)
    }

    async fn unassign_role(&self, assignment_id: RoleAssignmentId) -> Result<(), HierarchyError> {
        self.role_assignments.delete(assignment_id).await.map_err(HierarchyError::Repo)?;
        Ok(())
    }

    async fn resolve_effective_groups(&self, user_id: UserId, workspace_id: WorkspaceId) -> Result<HashSet<GroupId>, HierarchyError> {
        let direct = self.groups.list_groups_for_user(workspace_id, user_id).await.map_err(HierarchyError::Repo)?;
        let mut effective: HashSet<GroupId> = HashSet::new();
        for group_id in direct {
            effective.insert(group_id);
            for ancestor in self.ancestors_of(group_id).await? {
                effective.insert(ancestor);
            }
        }
        Ok(effective)
    }

    async fn resolve_bindings(&self, workspace_id: WorkspaceId) -> Result<Vec<Binding>, HierarchyError> {
        let groups = self.groups.list_for_workspace(workspace_id).await.map_err(HierarchyError::Repo)?;
        let group_ids: Vec<GroupId> = groups.iter().map(|g| g.id).collect();
        let assignments = self.role_assignments.list_for_groups(&group_ids).await.map_err(HierarchyError::Repo)?;
        let mut bindings = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let role = self
                .roles
                .get(assignment.role_id)
                .await
                .map_err(HierarchyError::Repo)?
                .ok_or_else(|| HierarchyError::NotFound(format!("role {}", assignment.role_id)))?;
            bindings.push(Binding { group_id: assignment.group_id, role_id: role.id, scope: role.scope });
        }
        Ok(bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::model::{Plan, ResourceQuota};
    use crate::repo::{
        InMemoryGroupRepo, InMemoryOrganizationRepo, InMemoryOrganizationUserRepo, InMemoryPlanRepo,
        InMemoryProjectRepo, InMemoryRoleAssignmentRepo, InMemoryRoleRepo, InMemoryUserRepo,
        InMemoryWorkspaceRepo,
    };
    use hexabase_bus::InMemoryBus;
    use test_r::test;

    fn quota(cpu_millicores: i64) -> ResourceQuota {
        ResourceQuota { cpu_millicores, memory_mb: 1024, storage_gb: 10, max_pods: 20 }
    }

    async fn service_with_plan(plan_cpu_millicores: i64) -> (HierarchyServiceDefault, PlanId, OrgId, UserId) {
        let plans = Arc::new(InMemoryPlanRepo::new());
        let plan = Plan {
            id: PlanId::generate(),
            name: "standard".to_string(),
            resource_quota: quota(plan_cpu_millicores),
            allow_dedicated_nodes: false,
            price_tier: "standard".to_string(),
        };
        plans.seed(plan.clone());

        let svc = HierarchyServiceDefault::new(
            Arc::new(InMemoryOrganizationRepo::new()),
            Arc::new(InMemoryUserRepo::new()),
            Arc::new(InMemoryOrganizationUserRepo::new()),
            Arc::new(InMemoryWorkspaceRepo::new()),
            plans,
            Arc::new(InMemoryProjectRepo::new()),
            Arc::new(InMemoryGroupRepo::new()),
            Arc::new(InMemoryRoleRepo::new()),
            Arc::new(InMemoryRoleAssignmentRepo::new()),
            Arc::new(InMemoryAuditSink::new()),
            Arc::new(InMemoryBus::new()),
        );

        let owner = UserId::generate();
        let org = svc.create_organization("acme".to_string(), owner).await.unwrap();
        (svc, plan.id, org.id, owner)
    }

    #[test]
    async fn create_workspace_seeds_groups_and_preset_roles() {
        let (svc, plan_id, org_id, creator) = service_with_plan(4000).await;
        let workspace = svc.create_workspace(org_id, "ws1".to_string(), plan_id, creator).await.unwrap();
        assert_eq!(workspace.status, WorkspaceStatus::PendingCreation);
        assert_eq!(workspace.plan_tier, PlanTier::Shared);

        let bindings = svc.resolve_bindings(workspace.id).await.unwrap();
        assert_eq!(bindings.len(), 2);

        let effective = svc.resolve_effective_groups(creator, workspace.id).await.unwrap();
        // creator is a member of WSAdmins, whose ancestor is the WorkspaceMembers root.
        assert_eq!(effective.len(), 2);
    }

    #[test]
    async fn create_project_rejects_quota_over_plan_headroom() {
        let (svc, plan_id, org_id, creator) = service_with_plan(1000).await;
        let workspace = svc.create_workspace(org_id, "ws1".to_string(), plan_id, creator).await.unwrap();

        let ok = svc.create_project(workspace.id, "p1".to_string(), "p1".to_string(), quota(600)).await;
        assert!(ok.is_ok());

        let too_much = svc.create_project(workspace.id, "p2".to_string(), "p2".to_string(), quota(600)).await;
        assert!(matches!(too_much, Err(HierarchyError::QuotaExceeded { .. })));
    }

    #[test]
    async fn create_project_rejects_duplicate_namespace() {
        let (svc, plan_id, org_id, creator) = service_with_plan(4000).await;
        let workspace = svc.create_workspace(org_id, "ws1".to_string(), plan_id, creator).await.unwrap();
        svc.create_project(workspace.id, "p1".to_string(), "shared".to_string(), quota(100)).await.unwrap();
        let dup = svc.create_project(workspace.id, "p2".to_string(), "shared".to_string(), quota(100)).await;
        assert!(matches!(dup, Err(HierarchyError::DuplicateNamespace(_))));
    }

    #[test]
    async fn move_group_rejects_cycle() {
        let (svc, plan_id, org_id, creator) = service_with_plan(4000).await;
        let workspace = svc.create_workspace(org_id, "ws1".to_string(), plan_id, creator).await.unwrap();

        let parent = svc.create_group(workspace.id, "team-a".to_string(), None).await.unwrap();
        let child = svc.create_group(workspace.id, "team-a-subteam".to_string(), Some(parent.id)).await.unwrap();

        // parent -> itself
        assert!(matches!(svc.move_group(parent.id, Some(parent.id)).await, Err(HierarchyError::Cycle)));
        // parent -> child (its own descendant) would create a cycle
        assert!(matches!(svc.move_group(parent.id, Some(child.id)).await, Err(HierarchyError::Cycle)));

        // moving the child under a sibling grandparent is fine
        let sibling = svc.create_group(workspace.id, "team-b".to_string(), None).await.unwrap();
        assert!(svc.move_group(child.id, Some(sibling.id)).await.is_ok());
    }

    #[test]
    async fn move_group_rejects_seed_group() {
        let (svc, plan_id, org_id, creator) = service_with_plan(4000).await;
        let workspace = svc.create_workspace(org_id, "ws1".to_string(), plan_id, creator).await.unwrap();
        let admins = svc
            .resolve_bindings(workspace.id)
            .await
            .unwrap()
            .into_iter()
            .next()
            .map(|b| b.group_id)
            .unwrap();
        let other = svc.create_group(workspace.id, "other".to_string(), None).await.unwrap();
        assert!(matches!(svc.move_group(admins, Some(other.id)).await, Err(HierarchyError::PresetImmutable(_))));
    }

    #[test]
    async fn delete_role_rejects_preset() {
        let (svc, plan_id, org_id, creator) = service_with_plan(4000).await;
        let workspace = svc.create_workspace(org_id, "ws1".to_string(), plan_id, creator).await.unwrap();
        let bindings = svc.resolve_bindings(workspace.id).await.unwrap();
        let preset_role_id = bindings[0].role_id;
        assert!(matches!(svc.delete_role(preset_role_id).await, Err(HierarchyError::PresetImmutable(_))));
    }

    #[test]
    async fn custom_project_role_can_be_deleted() {
        let (svc, plan_id, org_id, creator) = service_with_plan(4000).await;
        let workspace = svc.create_workspace(org_id, "ws1".to_string(), plan_id, creator).await.unwrap();
        let project = svc.create_project(workspace.id, "p1".to_string(), "p1".to_string(), quota(100)).await.unwrap();
        let role = svc
            .create_custom_project_role(workspace.id, project.id, "viewer".to_string(), "[]".to_string())
            .await
            .unwrap();
        assert!(svc.delete_role(role.id).await.is_ok());
    }

    #[test]
    async fn assign_role_to_group_rejects_cross_workspace_mismatch() {
        let (svc, plan_id, org_id, creator) = service_with_plan(4000).await;
        let ws_a = svc.create_workspace(org_id, "ws-a".to_string(), plan_id, creator).await.unwrap();
        let ws_b = svc.create_workspace(org_id, "ws-b".to_string(), plan_id, creator).await.unwrap();

        let role_in_a = svc.resolve_bindings(ws_a.id).await.unwrap()[0].role_id;
        let group_in_b = svc.create_group(ws_b.id, "other".to_string(), None).await.unwrap();

        let result = svc.assign_role_to_group(role_in_a, group_in_b.id).await;
        assert!(matches!(result, Err(HierarchyError::RoleScopeMismatch(_))));
    }
}
