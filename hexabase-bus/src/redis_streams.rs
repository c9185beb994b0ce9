use crate::envelope::Envelope;
use crate::topic::Topic;
use crate::Bus;
use async_trait::async_trait;
use hexabase_common::config::RemoteServiceConfig;
use hexabase_common::error::{ErrorKind, HexabaseError};
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

const FIELD: &str = "envelope";
const BLOCK_MS: usize = 5_000;

/// Redis Streams-backed [`Bus`]. Each [`Topic`] is one stream; each
/// subscriber belongs to a consumer group via `XGROUP CREATE`, reads new
/// entries with `XREADGROUP`, and acknowledges with `XACK` — the standard
/// durable, at-least-once delivery pattern streams are built for.
#[derive(Clone)]
pub struct RedisBus {
    manager: ConnectionManager,
}

impl RedisBus {
    pub async fn configured(config: &RemoteServiceConfig) -> Result<Self, HexabaseError> {
        let url = format!("redis://{}:{}", config.host, config.port);
        let client = redis::Client::open(url)
            .map_err(|e| HexabaseError::new(ErrorKind::Internal, "BUS_CONFIG_INVALID", e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(map_redis_err)?;
        Ok(Self { manager })
    }
}

fn map_redis_err(err: redis::RedisError) -> HexabaseError {
    HexabaseError::new(ErrorKind::UpstreamRetryable, "BUS_BACKEND_ERROR", err.to_string())
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, topic: Topic, envelope: Envelope) -> Result<(), HexabaseError> {
        let mut conn = self.manager.clone();
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| HexabaseError::new(ErrorKind::Internal, "BUS_ENCODE_ERROR", e.to_string()))?;
        let _: String = conn
            .xadd(topic.stream_key(), "*", &[(FIELD, payload)])
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn ensure_group(&self, topic: Topic, group: &str) -> Result<(), HexabaseError> {
        let mut conn = self.manager.clone();
        let result: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(topic.stream_key(), group, "$")
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(map_redis_err(e)),
        }
    }

    async fn poll(
        &self,
        topic: Topic,
        group: &str,
        consumer: &str,
        max_messages: usize,
    ) -> Result<Vec<(String, Envelope)>, HexabaseError> {
        let mut conn = self.manager.clone();
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(max_messages)
            .block(BLOCK_MS);

        let reply: StreamReadReply = conn
            .xread_options(&[topic.stream_key()], &[">"], &options)
            .await
            .map_err(map_redis_err)?;

        let mut out = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let Some(raw) = entry.map.get(FIELD) else {
                    continue;
                };
                let redis::Value::BulkString(bytes) = raw else {
                    continue;
                };
                let payload = String::from_utf8_lossy(bytes);
                match serde_json::from_str::<Envelope>(&payload) {
                    Ok(envelope) => out.push((entry.id.clone(), envelope)),
                    Err(e) => {
                        tracing::warn!(id = %entry.id, error = %e, "dropping malformed bus entry");
                    }
                }
            }
        }
        Ok(out)
    }

    async fn ack(&self, topic: Topic, group: &str, ids: &[String]) -> Result<(), HexabaseError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .xack(topic.stream_key(), group, ids)
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }
}
