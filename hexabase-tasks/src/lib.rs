//! Durable, at-least-once task engine (spec §4.3, component C7): the
//! queue every long-running control-plane operation — vCluster
//! provisioning, dedicated-node allocation, function deploys — runs
//! through, with idempotent enqueue, leased claims, cooperative
//! cancellation, and exponential backoff retry.

pub mod engine;
pub mod error;
pub mod model;
pub mod repo;

#[cfg(test)]
test_r::enable!();

pub use engine::{TaskEngine, TaskEngineDefault};
pub use error::TaskError;
pub use model::{Task, TaskFilter, TaskKind, TaskPayload, TaskStatus};
