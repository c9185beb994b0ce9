//! Function/Application facade (C8, spec §4.5): a provider-agnostic
//! lifecycle for user-facing workloads inside a Workspace — functions
//! (Fission by default, Knative as the legacy engine) and long-running
//! Applications — with active-version switching, rollback, and a
//! structured observability surface the rest of the control plane can
//! subscribe to without knowing which engine is underneath.

pub mod error;
pub mod model;
pub mod provider;
pub mod repo;
pub mod service;

#[cfg(test)]
test_r::enable!();

pub use error::FunctionsError;
pub use service::{FunctionsService, FunctionsServiceDefault};
