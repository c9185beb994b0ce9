//! vCluster Orchestrator (C6, spec §4.1): drives the host-cluster
//! reconciliation stages behind workspace create/start/stop/upgrade/
//! backup/restore/delete and dedicated-node allocation, under a
//! per-workspace lease (spec §5) so two task-engine workers never race
//! the same vCluster.

pub mod error;
pub mod host;
pub mod model;
pub mod service;
pub mod virtualization;

#[cfg(test)]
test_r::enable!();

pub use error::OrchestratorError;
pub use service::{OrchestratorService, OrchestratorServiceDefault};
