mod alert;
mod group;
mod org;
mod project;
mod role;
mod workspace;

pub use alert::{AlertRepo, DbAlertRepo, InMemoryAlertRepo};
pub use group::{DbGroupRepo, GroupRepo, InMemoryGroupRepo};
pub use org::{
    DbOrganizationRepo, DbOrganizationUserRepo, DbUserRepo, InMemoryOrganizationRepo,
    InMemoryOrganizationUserRepo, InMemoryUserRepo, OrganizationRepo, OrganizationUserRepo, UserRepo,
};
pub use project::{DbProjectRepo, InMemoryProjectRepo, ProjectRepo};
pub use role::{DbRoleAssignmentRepo, DbRoleRepo, InMemoryRoleAssignmentRepo, InMemoryRoleRepo, RoleAssignmentRepo, RoleRepo};
pub use workspace::{DbPlanRepo, DbWorkspaceRepo, InMemoryPlanRepo, InMemoryWorkspaceRepo, PlanRepo, WorkspaceRepo};
