use crate::envelope::Envelope;
use crate::topic::Topic;
use crate::Bus;
use async_trait::async_trait;
use hexabase_common::error::HexabaseError;
use std::collections::HashMap;
use std::sync::Mutex;

struct GroupState {
    pending: Vec<(String, Envelope)>,
    next_id: u64,
}

/// In-process [`Bus`] fake used by tests across the workspace. A single
/// `(topic, group)` pair keeps its own queue of undelivered entries;
/// `poll` drains and hands them out, `ack` is a no-op since nothing is
/// re-delivered after the in-memory queue already removed it on poll.
#[derive(Default)]
pub struct InMemoryBus {
    groups: Mutex<HashMap<(&'static str, String), GroupState>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, topic: Topic, envelope: Envelope) -> Result<(), HexabaseError> {
        let mut groups = self.groups.lock().expect("bus lock poisoned");
        for ((t, _group), state) in groups.iter_mut() {
            if *t == topic.stream_key() {
                let id = state.next_id.to_string();
                state.next_id += 1;
                state.pending.push((id, envelope.clone()));
            }
        }
        Ok(())
    }

    async fn ensure_group(&self, topic: Topic, group: &str) -> Result<(), HexabaseError> {
        let mut groups = self.groups.lock().expect("bus lock poisoned");
        groups
            .entry((topic.stream_key(), group.to_string()))
            .or_insert_with(|| GroupState {
                pending: Vec::new(),
                next_id: 0,
            });
        Ok(())
    }

    async fn poll(
        &self,
        topic: Topic,
        group: &str,
        _consumer: &str,
        max_messages: usize,
    ) -> Result<Vec<(String, Envelope)>, HexabaseError> {
        let mut groups = self.groups.lock().expect("bus lock poisoned");
        let Some(state) = groups.get_mut(&(topic.stream_key(), group.to_string())) else {
            return Ok(Vec::new());
        };
        let take = max_messages.min(state.pending.len());
        Ok(state.pending.drain(0..take).collect())
    }

    async fn ack(&self, _topic: Topic, _group: &str, _ids: &[String]) -> Result<(), HexabaseError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    async fn subscriber_sees_messages_published_after_group_registration() {
        let bus = InMemoryBus::new();
        bus.ensure_group(Topic::ProjectActivity, "audit-indexer")
            .await
            .unwrap();

        let envelope = Envelope::new("project.created", &serde_json::json!({"id": "p-1"}), 0);
        bus.publish(Topic::ProjectActivity, envelope).await.unwrap();

        let received = bus
            .poll(Topic::ProjectActivity, "audit-indexer", "c-1", 10)
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].1.kind, "project.created");
    }

    #[test]
    async fn independent_groups_each_receive_the_message() {
        let bus = InMemoryBus::new();
        bus.ensure_group(Topic::ProjectActivity, "audit-indexer")
            .await
            .unwrap();
        bus.ensure_group(Topic::ProjectActivity, "notifier")
            .await
            .unwrap();

        bus.publish(
            Topic::ProjectActivity,
            Envelope::new("project.created", &serde_json::json!({}), 0),
        )
        .await
        .unwrap();

        assert_eq!(
            bus.poll(Topic::ProjectActivity, "audit-indexer", "c-1", 10)
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            bus.poll(Topic::ProjectActivity, "notifier", "c-1", 10)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
