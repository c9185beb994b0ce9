//! Durable publish/subscribe between control-plane components (spec §6):
//! the orchestrator announces workspace lifecycle progress, billing
//! announces plan changes, the task engine fans stage completions out to
//! whoever cares. Every subscriber belongs to a named queue group so a
//! topic can have several independent consumer groups (e.g. both the
//! notifier and the audit indexer read `project.activity.*`) while each
//! group still load-balances across its own replicas.

pub mod envelope;
pub mod in_memory;
pub mod redis_streams;
pub mod topic;

#[cfg(test)]
test_r::enable!();

use async_trait::async_trait;
pub use envelope::Envelope;
use hexabase_common::error::HexabaseError;
pub use in_memory::InMemoryBus;
pub use redis_streams::RedisBus;
pub use topic::Topic;

/// Durable publish/subscribe port every producer and consumer in the
/// workspace depends on, never a concrete transport.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, topic: Topic, envelope: Envelope) -> Result<(), HexabaseError>;

    /// Registers `group` as a consumer group on `topic` if it doesn't
    /// already exist. Idempotent — safe to call on every subscriber
    /// startup.
    async fn ensure_group(&self, topic: Topic, group: &str) -> Result<(), HexabaseError>;

    /// Blocks (bounded by `block_timeout` inside the implementation) for
    /// up to `max_messages` not-yet-acknowledged entries for `group` on
    /// `topic`. Returns an empty vec on timeout, never an error, so
    /// callers can loop without special-casing "nothing arrived".
    async fn poll(
        &self,
        topic: Topic,
        group: &str,
        consumer: &str,
        max_messages: usize,
    ) -> Result<Vec<(String, Envelope)>, HexabaseError>;

    /// Acknowledges delivery ids returned by [`Bus::poll`], removing them
    /// from the group's pending entries list.
    async fn ack(&self, topic: Topic, group: &str, ids: &[String]) -> Result<(), HexabaseError>;
}
