use crate::model::{Alert, AlertKind, AlertSeverity, AlertStatus};
use async_trait::async_trait;
use hexabase_common::ids::{AlertId, WorkspaceId};
use hexabase_service_base::db::PostgresPool;
use hexabase_service_base::RepoError;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait AlertRepo: Send + Sync {
    async fn insert(&self, alert: &Alert) -> Result<(), RepoError>;
    async fn get(&self, id: AlertId) -> Result<Option<Alert>, RepoError>;
    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<Alert>, RepoError>;
    async fn set_status(&self, id: AlertId, status: AlertStatus) -> Result<(), RepoError>;
}

pub struct DbAlertRepo {
    pool: PostgresPool,
}

impl DbAlertRepo {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: uuid::Uuid,
    workspace_id: uuid::Uuid,
    kind: String,
    severity: String,
    status: String,
    threshold: f64,
    value: f64,
    created_at: chrono::DateTime<chrono::Utc>,
    resolved_at: Option<chrono::DateTime<chrono::Utc>>,
}

fn kind_to_str(kind: AlertKind) -> String {
    kind.to_string()
}

fn str_to_kind(s: &str) -> Result<AlertKind, RepoError> {
    Ok(match s {
        "quota_exceeded" => AlertKind::QuotaExceeded,
        "workspace_unhealthy" => AlertKind::WorkspaceUnhealthy,
        "node_unreachable" => AlertKind::NodeUnreachable,
        "certificate_expiring" => AlertKind::CertificateExpiring,
        other => return Err(RepoError::QueryError(format!("unknown alert kind: {other}"))),
    })
}

fn severity_to_str(severity: AlertSeverity) -> String {
    severity.to_string()
}

fn str_to_severity(s: &str) -> Result<AlertSeverity, RepoError> {
    Ok(match s {
        "info" => AlertSeverity::Info,
        "warning" => AlertSeverity::Warning,
        "critical" => AlertSeverity::Critical,
        other => return Err(RepoError::QueryError(format!("unknown alert severity: {other}"))),
    })
}

fn status_to_str(status: AlertStatus) -> String {
    status.to_string()
}

fn str_to_status(s: &str) -> Result<AlertStatus, RepoError> {
    Ok(match s {
        "active" => AlertStatus::Active,
        "acknowledged" => AlertStatus::Acknowledged,
        "resolved" => AlertStatus::Resolved,
        other => return Err(RepoError::QueryError(format!("unknown alert status: {other}"))),
    })
}

impl TryFrom<AlertRow> for Alert {
    type Error = RepoError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(Alert {
            id: AlertId(row.id),
            workspace_id: WorkspaceId(row.workspace_id),
            kind: str_to_kind(&row.kind)?,
            severity: str_to_severity(&row.severity)?,
            status: str_to_status(&row.status)?,
            threshold: row.threshold,
            value: row.value,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
        })
    }
}

#[async_trait]
impl AlertRepo for DbAlertRepo {
    async fn insert(&self, alert: &Alert) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO alerts (id, workspace_id, kind, severity, status, threshold, value, \
             created_at, resolved_at) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
        )
        .bind(alert.id.0)
        .bind(alert.workspace_id.0)
        .bind(kind_to_str(alert.kind))
        .bind(severity_to_str(alert.severity))
        .bind(status_to_str(alert.status))
        .bind(alert.threshold)
        .bind(alert.value)
        .bind(alert.created_at)
        .bind(alert.resolved_at)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn get(&self, id: AlertId) -> Result<Option<Alert>, RepoError> {
        let row: Option<AlertRow> = sqlx::query_as("SELECT * FROM alerts WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool.inner())
            .await?;
        row.map(Alert::try_from).transpose()
    }

    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<Alert>, RepoError> {
        let rows: Vec<AlertRow> = sqlx::query_as("SELECT * FROM alerts WHERE workspace_id = $1")
            .bind(workspace_id.0)
            .fetch_all(self.pool.inner())
            .await?;
        rows.into_iter().map(Alert::try_from).collect()
    }

    async fn set_status(&self, id: AlertId, status: AlertStatus) -> Result<(), RepoError> {
        let resolved_at = matches!(status, AlertStatus::Resolved).then(chrono::Utc::now);
        sqlx::query("UPDATE alerts SET status = $1, resolved_at = COALESCE($2, resolved_at) WHERE id = $3")
            .bind(status_to_str(status))
            .bind(resolved_at)
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAlertRepo {
    alerts: Mutex<HashMap<AlertId, Alert>>,
}

impl InMemoryAlertRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertRepo for InMemoryAlertRepo {
    async fn insert(&self, alert: &Alert) -> Result<(), RepoError> {
        self.alerts.lock().expect("lock poisoned").insert(alert.id, alert.clone());
        Ok(())
    }

    async fn get(&self, id: AlertId) -> Result<Option<Alert>, RepoError> {
        Ok(self.alerts.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<Alert>, RepoError> {
        Ok(self
            .alerts
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|a| a.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn set_status(&self, id: AlertId, status: AlertStatus) -> Result<(), RepoError> {
        if let Some(a) = self.alerts.lock().expect("lock poisoned").get_mut(&id) {
            a.status = status;
            if status == AlertStatus::Resolved {
                a.resolved_at = Some(chrono::Utc::now());
            }
        }
        Ok(())
    }
}
