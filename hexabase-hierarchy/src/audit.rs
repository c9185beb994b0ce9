//! Structured audit trail (SPEC_FULL.md §10). Both this crate and
//! `hexabase-aiops` write through the same [`AuditSink`] so every mutating
//! operation — human or agent-initiated — lands in one `audit_events` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hexabase_common::ids::{AuditEventId, OrgId, UserId, WorkspaceId};
use hexabase_service_base::db::PostgresPool;
use hexabase_service_base::RepoError;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// `initiated_by` per §4.5's observability surface: either a human user or
/// an AIOps agent acting on their behalf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Actor {
    User(UserId),
    Agent { acting_for: UserId },
}

impl Actor {
    fn to_db_fields(&self) -> (String, uuid::Uuid) {
        match self {
            Actor::User(id) => ("user".to_string(), id.0),
            Actor::Agent { acting_for } => ("agent".to_string(), acting_for.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: AuditEventId,
    pub org_id: Option<OrgId>,
    pub workspace_id: Option<WorkspaceId>,
    pub actor: Actor,
    pub action: String,
    pub target: String,
    pub outcome: AuditOutcome,
    pub detail_json: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
    Failed,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), RepoError>;
}

pub struct DbAuditSink {
    pool: PostgresPool,
}

impl DbAuditSink {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for DbAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), RepoError> {
        let (actor_kind, actor_user_id) = event.actor.to_db_fields();
        sqlx::query(
            "INSERT INTO audit_events (id, org_id, workspace_id, actor_kind, actor_user_id, \
             action, target, outcome, detail_json, occurred_at) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
        )
        .bind(event.id.0)
        .bind(event.org_id.map(|id| id.0))
        .bind(event.workspace_id.map(|id| id.0))
        .bind(actor_kind)
        .bind(actor_user_id)
        .bind(&event.action)
        .bind(&event.target)
        .bind(event.outcome.to_string())
        .bind(&event.detail_json)
        .bind(event.occurred_at)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }
}

/// Test fake; also useful for callers that want to assert on emitted events.
#[derive(Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), RepoError> {
        self.events.lock().expect("lock poisoned").push(event);
        Ok(())
    }
}
