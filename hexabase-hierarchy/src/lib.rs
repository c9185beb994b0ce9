//! Tenant Hierarchy & Policy Service (C5, spec §4.4): the Organization →
//! Workspace(vCluster) → Project(Namespace) data model, the Group forest,
//! custom/preset Roles and RoleAssignments, and the invariant enforcement
//! (quota headroom, namespace uniqueness, cycle prevention, role scope
//! matching) the orchestrator and identity broker rely on.

pub mod audit;
pub mod error;
pub mod model;
pub mod repo;
pub mod service;

#[cfg(test)]
test_r::enable!();

pub use error::HierarchyError;
pub use service::{Binding, HierarchyService, HierarchyServiceDefault};
