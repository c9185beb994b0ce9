use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wraps every message crossing the bus with the metadata consumers need
/// regardless of payload shape: a stable id for dedup/logging, when it was
/// produced, and a free-form `kind` a consumer switches on before
/// deserializing `payload_json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: Uuid,
    pub kind: String,
    pub produced_at_unix: i64,
    pub payload_json: String,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: &impl Serialize, produced_at_unix: i64) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            kind: kind.into(),
            produced_at_unix,
            payload_json: serde_json::to_string(payload).expect("payload must serialize"),
        }
    }

    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.payload_json)
    }
}
