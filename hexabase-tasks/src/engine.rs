//! Async Task Engine (C7, spec §4.3): enqueue/claim/progress/complete/
//! retry/cancel over [`crate::repo::TaskRepo`], announcing lifecycle
//! transitions on [`hexabase_bus::Bus`] so interested subscribers (spec
//! §6 event topics) don't have to poll the store.

use crate::error::TaskError;
use crate::model::{Task, TaskFilter, TaskKind, TaskPayload, TaskStatus};
use crate::repo::TaskRepo;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use hexabase_bus::{Bus, Envelope, Topic};
use hexabase_common::ids::TaskId;
use hexabase_common::retry::RetryConfig;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TASK_LEASE: Duration = Duration::from_secs(60);
/// Window within which a repeated `dedupKey` collapses user-triggered
/// duplicate enqueues (spec §4.3).
const DEDUP_WINDOW: ChronoDuration = ChronoDuration::seconds(30);

#[async_trait]
pub trait TaskEngine: Send + Sync {
    async fn enqueue(
        &self,
        payload: TaskPayload,
        correlation_id: String,
        dedup_key: Option<String>,
    ) -> Result<TaskId, TaskError>;
    async fn claim(&self, kind: TaskKind, worker_id: &str) -> Result<Option<Task>, TaskError>;
    async fn report_progress(
        &self,
        task_id: TaskId,
        stage: &str,
        progress_pct: u8,
    ) -> Result<(), TaskError>;
    async fn heartbeat(&self, task_id: TaskId, worker_id: &str) -> Result<(), TaskError>;
    async fn complete(&self, task_id: TaskId) -> Result<(), TaskError>;
    /// `retryable` selects whether the task returns to `pending` behind a
    /// backoff delay or terminates as `failed` (spec §4.3/§7).
    async fn fail(&self, task_id: TaskId, error: String, retryable: bool) -> Result<(), TaskError>;
    async fn cancel(&self, task_id: TaskId) -> Result<(), TaskError>;
    /// Cooperative check a worker makes at stage boundaries and between
    /// external calls (spec §5 suspension points).
    async fn is_cancelled(&self, task_id: TaskId) -> Result<bool, TaskError>;
    async fn get(&self, task_id: TaskId) -> Result<Task, TaskError>;
    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>, TaskError>;
}

fn topic_for(kind: TaskKind) -> Topic {
    match kind {
        TaskKind::WorkspaceCreate
        | TaskKind::WorkspaceUpgrade
        | TaskKind::WorkspaceBackup
        | TaskKind::WorkspaceRestore => Topic::VClusterProvisioning,
        TaskKind::WorkspaceStart | TaskKind::WorkspaceStop | TaskKind::WorkspaceDelete => {
            Topic::VClusterLifecycle
        }
        TaskKind::AllocateDedicatedNode => Topic::VClusterHnc,
        TaskKind::FunctionDeployVersion | TaskKind::FunctionInvokeAsync => Topic::FunctionLifecycle,
        TaskKind::NotifyUser => Topic::UserNotification,
        TaskKind::MaintenanceSweep => Topic::SystemMaintenance,
    }
}

#[derive(serde::Serialize)]
struct TaskProgressEvent<'a> {
    task_id: TaskId,
    status: &'a str,
    stage: Option<&'a str>,
    progress_pct: u8,
}

pub struct TaskEngineDefault {
    repo: Arc<dyn TaskRepo>,
    bus: Arc<dyn Bus>,
    retry: RetryConfig,
}

impl TaskEngineDefault {
    pub fn new(repo: Arc<dyn TaskRepo>, bus: Arc<dyn Bus>) -> Self {
        Self {
            repo,
            bus,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn announce(&self, task: &Task) {
        let event = TaskProgressEvent {
            task_id: task.id,
            status: &task.status.to_string(),
            stage: task.stage.as_deref(),
            progress_pct: task.progress_pct,
        };
        let envelope = Envelope::new(
            format!("{}.progress", task.kind),
            &event,
            Utc::now().timestamp(),
        );
        if let Err(err) = self.bus.publish(topic_for(task.kind), envelope).await {
            tracing::warn!(task_id = %task.id, error = %err, "failed to announce task progress");
        }
    }
}

#[async_trait]
impl TaskEngine for TaskEngineDefault {
    async fn enqueue(
        &self,
        payload: TaskPayload,
        correlation_id: String,
        dedup_key: Option<String>,
    ) -> Result<TaskId, TaskError> {
        let kind = payload.kind();

        // spec §3 invariant: a second enqueue of the same logical
        // operation is coalesced, not duplicated.
        if let Some(existing) = self
            .repo
            .find_non_terminal_by_correlation(kind, &correlation_id)
            .await?
        {
            return Ok(existing.id);
        }

        if let Some(key) = &dedup_key {
            let since = Utc::now() - DEDUP_WINDOW;
            if let Some(existing) = self.repo.find_recent_by_dedup_key(kind, key, since).await? {
                return Ok(existing.id);
            }
        }

        let task = Task::new(payload, correlation_id, dedup_key);
        let id = task.id;
        self.repo.insert(&task).await?;
        self.announce(&task).await;
        Ok(id)
    }

    async fn claim(&self, kind: TaskKind, worker_id: &str) -> Result<Option<Task>, TaskError> {
        let lease_until = Utc::now() + ChronoDuration::from_std(DEFAULT_TASK_LEASE).unwrap();
        let task = self.repo.claim_one(kind, worker_id, lease_until).await?;
        if let Some(task) = &task {
            self.announce(task).await;
        }
        Ok(task)
    }

    async fn report_progress(
        &self,
        task_id: TaskId,
        stage: &str,
        progress_pct: u8,
    ) -> Result<(), TaskError> {
        self.repo
            .update_progress(task_id, Some(stage), progress_pct.min(100))
            .await?;
        let task = self.get(task_id).await?;
        self.announce(&task).await;
        Ok(())
    }

    async fn heartbeat(&self, task_id: TaskId, worker_id: &str) -> Result<(), TaskError> {
        let lease_until = Utc::now() + ChronoDuration::from_std(DEFAULT_TASK_LEASE).unwrap();
        let renewed = self.repo.renew_lease(task_id, worker_id, lease_until).await?;
        if renewed {
            Ok(())
        } else {
            Err(TaskError::LeaseLost)
        }
    }

    async fn complete(&self, task_id: TaskId) -> Result<(), TaskError> {
        self.repo.complete(task_id).await?;
        let task = self.get(task_id).await?;
        self.announce(&task).await;
        Ok(())
    }

    async fn fail(&self, task_id: TaskId, error: String, retryable: bool) -> Result<(), TaskError> {
        let task = self.get(task_id).await?;
        let next_attempt = task.attempt + 1;
        let retryable = retryable && self.retry.should_retry(task.attempt);
        let retry_not_before = if retryable {
            Some(Utc::now() + ChronoDuration::from_std(self.retry.delay_for_attempt(task.attempt)).unwrap())
        } else {
            None
        };
        self.repo
            .fail(task_id, &error, retryable, next_attempt, retry_not_before)
            .await?;
        let task = self.get(task_id).await?;
        self.announce(&task).await;
        Ok(())
    }

    async fn cancel(&self, task_id: TaskId) -> Result<(), TaskError> {
        let task = self.get(task_id).await?;
        if task.status.is_terminal() {
            return Err(TaskError::AlreadyTerminal);
        }
        self.repo.request_cancel(task_id).await?;
        let task = self.get(task_id).await?;
        self.announce(&task).await;
        Ok(())
    }

    async fn is_cancelled(&self, task_id: TaskId) -> Result<bool, TaskError> {
        Ok(self.repo.is_cancel_requested(task_id).await?)
    }

    async fn get(&self, task_id: TaskId) -> Result<Task, TaskError> {
        self.repo
            .get(task_id)
            .await?
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>, TaskError> {
        Ok(self.repo.list(&filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;
    use crate::repo::InMemoryTaskRepo;
    use hexabase_bus::in_memory::InMemoryBus;
    use hexabase_common::ids::WorkspaceId;
    use test_r::test;

    fn engine() -> TaskEngineDefault {
        TaskEngineDefault::new(Arc::new(InMemoryTaskRepo::new()), Arc::new(InMemoryBus::new()))
    }

    fn create_payload(ws: WorkspaceId) -> TaskPayload {
        TaskPayload::WorkspaceCreate { workspace_id: ws }
    }

    #[test]
    async fn enqueue_twice_with_same_correlation_id_coalesces() {
        let engine = engine();
        let ws = WorkspaceId::generate();
        let id1 = engine
            .enqueue(create_payload(ws), "corr-1".to_string(), None)
            .await
            .unwrap();
        let id2 = engine
            .enqueue(create_payload(ws), "corr-1".to_string(), None)
            .await
            .unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    async fn enqueue_after_completion_creates_a_new_task() {
        let engine = engine();
        let ws = WorkspaceId::generate();
        let id1 = engine
            .enqueue(create_payload(ws), "corr-2".to_string(), None)
            .await
            .unwrap();
        engine.complete(id1).await.unwrap();

        let id2 = engine
            .enqueue(create_payload(ws), "corr-2".to_string(), None)
            .await
            .unwrap();
        assert_ne!(id1, id2);
    }

    #[test]
    async fn claim_then_heartbeat_then_complete() {
        let engine = engine();
        let ws = WorkspaceId::generate();
        engine
            .enqueue(create_payload(ws), "corr-3".to_string(), None)
            .await
            .unwrap();

        let claimed = engine
            .claim(TaskKind::WorkspaceCreate, "worker-1")
            .await
            .unwrap()
            .expect("task available");
        assert_eq!(claimed.status, TaskStatus::Running);

        engine.heartbeat(claimed.id, "worker-1").await.unwrap();
        engine.complete(claimed.id).await.unwrap();

        let task = engine.get(claimed.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.progress_pct, 100);
    }

    #[test]
    async fn heartbeat_from_wrong_worker_fails() {
        let engine = engine();
        let ws = WorkspaceId::generate();
        engine
            .enqueue(create_payload(ws), "corr-4".to_string(), None)
            .await
            .unwrap();
        let claimed = engine
            .claim(TaskKind::WorkspaceCreate, "worker-1")
            .await
            .unwrap()
            .unwrap();

        let result = engine.heartbeat(claimed.id, "worker-2").await;
        assert!(matches!(result, Err(TaskError::LeaseLost)));
    }

    #[test]
    async fn cancel_before_claim_is_immediate() {
        let engine = engine();
        let ws = WorkspaceId::generate();
        let id = engine
            .enqueue(create_payload(ws), "corr-5".to_string(), None)
            .await
            .unwrap();
        engine.cancel(id).await.unwrap();

        let task = engine.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);

        assert!(matches!(
            engine.cancel(id).await,
            Err(TaskError::AlreadyTerminal)
        ));
    }

    #[test]
    async fn cancel_after_claim_sets_cooperative_flag() {
        let engine = engine();
        let ws = WorkspaceId::generate();
        let id = engine
            .enqueue(create_payload(ws), "corr-6".to_string(), None)
            .await
            .unwrap();
        engine.claim(TaskKind::WorkspaceCreate, "worker-1").await.unwrap();
        engine.cancel(id).await.unwrap();

        assert!(engine.is_cancelled(id).await.unwrap());
        let task = engine.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[test]
    async fn retryable_failure_returns_to_pending_with_incremented_attempt() {
        let engine = engine();
        let ws = WorkspaceId::generate();
        let id = engine
            .enqueue(create_payload(ws), "corr-7".to_string(), None)
            .await
            .unwrap();
        let claimed = engine.claim(TaskKind::WorkspaceCreate, "worker-1").await.unwrap().unwrap();

        engine
            .fail(claimed.id, "transient k8s error".to_string(), true)
            .await
            .unwrap();

        let task = engine.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt, 1);
        assert!(task.retry_not_before.is_some());
    }

    #[test]
    async fn fatal_failure_terminates_the_task() {
        let engine = engine();
        let ws = WorkspaceId::generate();
        let id = engine
            .enqueue(create_payload(ws), "corr-8".to_string(), None)
            .await
            .unwrap();
        let claimed = engine.claim(TaskKind::WorkspaceCreate, "worker-1").await.unwrap().unwrap();

        engine
            .fail(claimed.id, "validation error".to_string(), false)
            .await
            .unwrap();

        let task = engine.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[test]
    async fn dedup_key_collapses_within_window() {
        let engine = engine();
        let ws = WorkspaceId::generate();
        let id1 = engine
            .enqueue(
                create_payload(ws),
                "corr-9a".to_string(),
                Some("user-click-1".to_string()),
            )
            .await
            .unwrap();
        let id2 = engine
            .enqueue(
                create_payload(ws),
                "corr-9b".to_string(),
                Some("user-click-1".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(id1, id2);
    }
}
