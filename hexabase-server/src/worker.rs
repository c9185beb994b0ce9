//! Task worker runtime (spec §4.3/§5): the loop that claims tasks off
//! [`hexabase_tasks::TaskEngine`] and dispatches each one to the service
//! that actually performs the work, the way `golem-worker-executor`'s
//! shard-processing loop claims and drives work items — generalized here
//! from one shard-claim loop into one claim-and-dispatch loop per
//! `TaskKind`, since every kind routes to a different collaborator.

use crate::config::WorkerConfig;
use hexabase_common::ids::{FunctionId, FunctionVersionId, UserId};
use hexabase_common::SafeDisplay;
use hexabase_functions::model::InitiatedBy;
use hexabase_functions::FunctionsService;
use hexabase_orchestrator::{OrchestratorError, OrchestratorService};
use hexabase_tasks::model::{Task, TaskKind, TaskPayload};
use hexabase_tasks::TaskEngine;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;

/// Every kind the worker loop claims, one `TaskEngine::claim` call each
/// pass. A closed list mirroring [`TaskKind`]'s own variants so adding a
/// kind there is a compile-time reminder to add it here too.
const ALL_KINDS: [TaskKind; 12] = [
    TaskKind::WorkspaceCreate,
    TaskKind::WorkspaceStart,
    TaskKind::WorkspaceStop,
    TaskKind::WorkspaceUpgrade,
    TaskKind::WorkspaceBackup,
    TaskKind::WorkspaceRestore,
    TaskKind::WorkspaceDelete,
    TaskKind::AllocateDedicatedNode,
    TaskKind::FunctionDeployVersion,
    TaskKind::FunctionInvokeAsync,
    TaskKind::NotifyUser,
    TaskKind::MaintenanceSweep,
];

/// No Hexabase user originates a worker-driven call; the nil UUID is the
/// same "no specific actor" sentinel `hexabase_common::ids` documents for
/// every id newtype's `nil()`.
fn system_actor() -> InitiatedBy {
    InitiatedBy::Agent { acting_for: UserId::nil() }
}

#[derive(Debug, PartialEq)]
enum DispatchOutcome {
    Completed,
    /// Already terminal via `TaskEngine::cancel`; must not also call
    /// `complete`/`fail` (spec §5 cooperative cancellation).
    Cancelled,
    Failed { message: String, retryable: bool },
}

/// The subset of [`crate::bootstrap::Services`] the worker loop actually
/// calls. Kept separate from the full `Services` struct (rather than
/// borrowing it directly) so a test can assemble one from in-memory
/// fakes without also standing up a `PostgresPool`.
#[derive(Clone)]
pub struct WorkerDeps {
    pub orchestrator: Arc<dyn OrchestratorService>,
    pub functions: Arc<dyn FunctionsService>,
    pub tasks: Arc<dyn TaskEngine>,
}

pub struct TaskWorker {
    deps: WorkerDeps,
    config: WorkerConfig,
}

impl TaskWorker {
    pub fn new(deps: WorkerDeps, config: WorkerConfig) -> Self {
        Self { deps, config }
    }

    /// Runs `config.concurrency` identical claim loops until `shutdown`
    /// reports `true`, then lets in-flight tasks finish before returning.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut slots = tokio::task::JoinSet::new();
        for slot in 0..self.config.concurrency.max(1) {
            let worker = self.clone();
            let mut slot_shutdown = shutdown.clone();
            slots.spawn(async move {
                worker.run_slot(slot, &mut slot_shutdown).await;
            });
        }
        let _ = shutdown.changed().await;
        while slots.join_next().await.is_some() {}
    }

    async fn run_slot(&self, slot: usize, shutdown: &mut watch::Receiver<bool>) {
        let worker_id = format!("{}-{slot}", self.config.worker_id);
        loop {
            if *shutdown.borrow() {
                return;
            }
            let mut claimed_any = false;
            for kind in ALL_KINDS {
                if *shutdown.borrow() {
                    return;
                }
                match self.deps.tasks.claim(kind, &worker_id).await {
                    Ok(Some(task)) => {
                        claimed_any = true;
                        self.handle(task, &worker_id).await;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(worker_id, kind = %kind, error = %err.to_safe_string(), "claim failed");
                    }
                }
            }
            if !claimed_any {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    async fn handle(&self, task: Task, worker_id: &str) {
        let task_id = task.id;
        let heartbeat = self.spawn_heartbeat(task_id, worker_id.to_string());

        let outcome = self.dispatch(&task).await;
        heartbeat.abort();

        match outcome {
            DispatchOutcome::Completed => {
                if let Err(err) = self.deps.tasks.complete(task_id).await {
                    tracing::error!(%task_id, error = %err.to_safe_string(), "failed to mark task complete");
                }
            }
            DispatchOutcome::Cancelled => {
                tracing::info!(%task_id, "task was cancelled mid-flight, leaving terminal state as-is");
            }
            DispatchOutcome::Failed { message, retryable } => {
                if let Err(err) = self.deps.tasks.fail(task_id, message, retryable).await {
                    tracing::error!(%task_id, error = %err.to_safe_string(), "failed to mark task failed");
                }
            }
        }
    }

    fn spawn_heartbeat(&self, task_id: hexabase_common::ids::TaskId, worker_id: String) -> tokio::task::JoinHandle<()> {
        let tasks = self.deps.tasks.clone();
        let interval = self.config.heartbeat_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if tasks.heartbeat(task_id, &worker_id).await.is_err() {
                    return;
                }
            }
        })
    }

    async fn dispatch(&self, task: &Task) -> DispatchOutcome {
        match &task.payload {
            TaskPayload::WorkspaceCreate { .. }
            | TaskPayload::WorkspaceStart { .. }
            | TaskPayload::WorkspaceStop { .. }
            | TaskPayload::WorkspaceUpgrade { .. }
            | TaskPayload::WorkspaceBackup { .. }
            | TaskPayload::WorkspaceRestore { .. }
            | TaskPayload::WorkspaceDelete { .. }
            | TaskPayload::AllocateDedicatedNode { .. } => match self.deps.orchestrator.execute(task).await {
                Ok(()) => DispatchOutcome::Completed,
                Err(OrchestratorError::Cancelled) => DispatchOutcome::Cancelled,
                Err(err) => DispatchOutcome::Failed { retryable: err.is_retryable(), message: err.to_safe_string() },
            },

            TaskPayload::FunctionDeployVersion { function_id, version_id, .. } => {
                self.activate_function_version(function_id, version_id, task).await
            }

            TaskPayload::FunctionInvokeAsync { function_id, request_json, .. } => {
                self.invoke_function_async(function_id, request_json, task).await
            }

            TaskPayload::NotifyUser { user_id, message, .. } => {
                // Notification storage/delivery is out of scope (spec §1):
                // this is the hook a future delivery integration attaches to.
                tracing::info!(user_id = %user_id, message = %message, "user notification (delivery not implemented)");
                DispatchOutcome::Completed
            }

            TaskPayload::MaintenanceSweep { reason } => {
                tracing::info!(reason = %reason, "maintenance sweep (no concrete sweep actions defined)");
                DispatchOutcome::Completed
            }
        }
    }

    async fn activate_function_version(&self, function_id: &str, version_id: &str, task: &Task) -> DispatchOutcome {
        let (function_id, version_id) = match (FunctionId::from_str(function_id), FunctionVersionId::from_str(version_id)) {
            (Ok(f), Ok(v)) => (f, v),
            _ => {
                return DispatchOutcome::Failed {
                    message: format!("task {} carries a malformed function/version id", task.id),
                    retryable: false,
                }
            }
        };
        match self.deps.functions.set_active_version(function_id, version_id, system_actor()).await {
            Ok(()) => DispatchOutcome::Completed,
            Err(err) => DispatchOutcome::Failed { retryable: err.is_retryable(), message: err.to_safe_string() },
        }
    }

    async fn invoke_function_async(&self, function_id: &str, request_json: &str, task: &Task) -> DispatchOutcome {
        let function_id = match FunctionId::from_str(function_id) {
            Ok(id) => id,
            Err(_) => {
                return DispatchOutcome::Failed {
                    message: format!("task {} carries a malformed function id", task.id),
                    retryable: false,
                }
            }
        };
        match self
            .deps
            .functions
            .invoke(function_id, request_json.as_bytes().to_vec(), true, system_actor())
            .await
        {
            Ok(_) => DispatchOutcome::Completed,
            Err(err) => DispatchOutcome::Failed { retryable: err.is_retryable(), message: err.to_safe_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hexabase_functions::error::FunctionsError;
    use hexabase_functions::model::{
        Application, ApplicationKind, Function, FunctionTrigger, FunctionVersion, Instance, InvocationResult, TriggerKind, VersionSource,
    };
    use hexabase_functions::provider::FunctionMetrics;
    use hexabase_common::ids::{ApplicationId, FunctionId, FunctionTriggerId, FunctionVersionId, ProjectId, WorkspaceId};
    use hexabase_orchestrator::error::{HostClusterError, OrchestratorError};
    use hexabase_orchestrator::model::{DedicatedNodeRequest, HealthReport};
    use hexabase_tasks::error::TaskError;
    use test_r::test;

    /// Lets each test script exactly one `execute` outcome without pulling
    /// in a real host cluster or hierarchy stack.
    struct StubOrchestrator(std::sync::Mutex<Option<Result<(), OrchestratorError>>>);

    impl StubOrchestrator {
        fn once(result: Result<(), OrchestratorError>) -> Arc<Self> {
            Arc::new(Self(std::sync::Mutex::new(Some(result))))
        }
    }

    #[async_trait]
    impl OrchestratorService for StubOrchestrator {
        async fn request_create(&self, _workspace_id: WorkspaceId) -> Result<hexabase_common::ids::TaskId, OrchestratorError> {
            unimplemented!("not exercised by worker dispatch tests")
        }
        async fn request_start(&self, _workspace_id: WorkspaceId) -> Result<hexabase_common::ids::TaskId, OrchestratorError> {
            unimplemented!()
        }
        async fn request_stop(&self, _workspace_id: WorkspaceId) -> Result<hexabase_common::ids::TaskId, OrchestratorError> {
            unimplemented!()
        }
        async fn request_upgrade(&self, _workspace_id: WorkspaceId, _target_version: String) -> Result<hexabase_common::ids::TaskId, OrchestratorError> {
            unimplemented!()
        }
        async fn request_backup(&self, _workspace_id: WorkspaceId, _backup_config_json: String) -> Result<hexabase_common::ids::TaskId, OrchestratorError> {
            unimplemented!()
        }
        async fn request_restore(&self, _workspace_id: WorkspaceId, _snapshot_ref: String) -> Result<hexabase_common::ids::TaskId, OrchestratorError> {
            unimplemented!()
        }
        async fn request_delete(&self, _workspace_id: WorkspaceId) -> Result<hexabase_common::ids::TaskId, OrchestratorError> {
            unimplemented!()
        }
        async fn request_allocate_dedicated_node(&self, _request: DedicatedNodeRequest) -> Result<hexabase_common::ids::TaskId, OrchestratorError> {
            unimplemented!()
        }
        async fn get_health(&self, _workspace_id: WorkspaceId) -> Result<HealthReport, OrchestratorError> {
            unimplemented!()
        }
        async fn get_kubeconfig(&self, _workspace_id: WorkspaceId) -> Result<String, OrchestratorError> {
            unimplemented!()
        }
        async fn execute(&self, _task: &Task) -> Result<(), OrchestratorError> {
            self.0.lock().unwrap().take().expect("execute called more than once")
        }
    }

    /// Only `set_active_version`/`invoke` are exercised by the worker;
    /// everything else panics if reached so a wiring mistake fails loudly.
    struct StubFunctions(std::sync::Mutex<Option<Result<(), FunctionsError>>>);

    impl StubFunctions {
        fn once(result: Result<(), FunctionsError>) -> Arc<Self> {
            Arc::new(Self(std::sync::Mutex::new(Some(result))))
        }
    }

    #[async_trait]
    impl FunctionsService for StubFunctions {
        async fn create_function(
            &self,
            _workspace_id: WorkspaceId,
            _project_id: ProjectId,
            _name: String,
            _runtime: String,
            _memory_mb: i32,
            _timeout_s: i32,
            _env: Vec<(String, String)>,
            _initiated_by: InitiatedBy,
        ) -> Result<Function, FunctionsError> {
            unimplemented!()
        }
        async fn deploy_version(&self, _function_id: FunctionId, _source: VersionSource, _initiated_by: InitiatedBy) -> Result<FunctionVersion, FunctionsError> {
            unimplemented!()
        }
        async fn set_active_version(&self, _function_id: FunctionId, _version_id: FunctionVersionId, _initiated_by: InitiatedBy) -> Result<(), FunctionsError> {
            self.0.lock().unwrap().take().expect("set_active_version called more than once")
        }
        async fn rollback(&self, _function_id: FunctionId, _initiated_by: InitiatedBy) -> Result<FunctionVersion, FunctionsError> {
            unimplemented!()
        }
        async fn invoke(&self, _function_id: FunctionId, _payload: Vec<u8>, _is_async: bool, _initiated_by: InitiatedBy) -> Result<InvocationResult, FunctionsError> {
            self.0.lock().unwrap().take().expect("invoke called more than once").map(|()| InvocationResult {
                invocation_id: hexabase_common::ids::InvocationId::generate(),
                status_code: 200,
                duration_ms: 0,
                cold_start: false,
                output: Vec::new(),
            })
        }
        async fn create_trigger(&self, _function_id: FunctionId, _kind: TriggerKind, _config_json: String) -> Result<FunctionTrigger, FunctionsError> {
            unimplemented!()
        }
        async fn get_logs(&self, _function_id: FunctionId, _lines: usize) -> Result<Vec<String>, FunctionsError> {
            unimplemented!()
        }
        async fn get_metrics(&self, _function_id: FunctionId) -> Result<FunctionMetrics, FunctionsError> {
            unimplemented!()
        }
        async fn create_application(
            &self,
            _workspace_id: WorkspaceId,
            _project_id: ProjectId,
            _name: String,
            _kind: ApplicationKind,
            _image: String,
            _replicas: i32,
            _has_ingress: bool,
        ) -> Result<Application, FunctionsError> {
            unimplemented!()
        }
        async fn scale(&self, _application_id: ApplicationId, _replicas: i32) -> Result<(), FunctionsError> {
            unimplemented!()
        }
        async fn update_image(&self, _application_id: ApplicationId, _image: String) -> Result<(), FunctionsError> {
            unimplemented!()
        }
        async fn restart(&self, _application_id: ApplicationId) -> Result<(), FunctionsError> {
            unimplemented!()
        }
        async fn get_instances(&self, _application_id: ApplicationId) -> Result<Vec<Instance>, FunctionsError> {
            unimplemented!()
        }
    }

    struct NeverCalledTasks;

    #[async_trait]
    impl TaskEngine for NeverCalledTasks {
        async fn enqueue(&self, _payload: TaskPayload, _correlation_id: String, _dedup_key: Option<String>) -> Result<hexabase_common::ids::TaskId, TaskError> {
            unimplemented!()
        }
        async fn claim(&self, _kind: TaskKind, _worker_id: &str) -> Result<Option<Task>, TaskError> {
            unimplemented!()
        }
        async fn report_progress(&self, _task_id: hexabase_common::ids::TaskId, _stage: &str, _progress_pct: u8) -> Result<(), TaskError> {
            unimplemented!()
        }
        async fn heartbeat(&self, _task_id: hexabase_common::ids::TaskId, _worker_id: &str) -> Result<(), TaskError> {
            unimplemented!()
        }
        async fn complete(&self, _task_id: hexabase_common::ids::TaskId) -> Result<(), TaskError> {
            unimplemented!()
        }
        async fn fail(&self, _task_id: hexabase_common::ids::TaskId, _error: String, _retryable: bool) -> Result<(), TaskError> {
            unimplemented!()
        }
        async fn cancel(&self, _task_id: hexabase_common::ids::TaskId) -> Result<(), TaskError> {
            unimplemented!()
        }
        async fn is_cancelled(&self, _task_id: hexabase_common::ids::TaskId) -> Result<bool, TaskError> {
            unimplemented!()
        }
        async fn get(&self, _task_id: hexabase_common::ids::TaskId) -> Result<Task, TaskError> {
            unimplemented!()
        }
        async fn list(&self, _filter: hexabase_tasks::model::TaskFilter) -> Result<Vec<Task>, TaskError> {
            unimplemented!()
        }
    }

    fn worker_with(orchestrator: Arc<dyn OrchestratorService>, functions: Arc<dyn FunctionsService>) -> TaskWorker {
        let deps = WorkerDeps { orchestrator, functions, tasks: Arc::new(NeverCalledTasks) };
        TaskWorker::new(deps, WorkerConfig::default())
    }

    fn workspace_task(payload: TaskPayload) -> Task {
        Task::new(payload, "corr-1".to_string(), None)
    }

    #[test]
    async fn workspace_task_completes_when_orchestrator_succeeds() {
        let worker = worker_with(
            StubOrchestrator::once(Ok(())),
            StubFunctions::once(Ok(())),
        );
        let task = workspace_task(TaskPayload::WorkspaceCreate { workspace_id: WorkspaceId::generate() });
        assert_eq!(worker.dispatch(&task).await, DispatchOutcome::Completed);
    }

    #[test]
    async fn orchestrator_cancelled_does_not_become_a_failure() {
        let worker = worker_with(
            StubOrchestrator::once(Err(OrchestratorError::Cancelled)),
            StubFunctions::once(Ok(())),
        );
        let task = workspace_task(TaskPayload::WorkspaceDelete { workspace_id: WorkspaceId::generate() });
        assert_eq!(worker.dispatch(&task).await, DispatchOutcome::Cancelled);
    }

    #[test]
    async fn retryable_orchestrator_error_surfaces_as_retryable_failure() {
        let worker = worker_with(
            StubOrchestrator::once(Err(OrchestratorError::Host(HostClusterError::Upstream("timeout".to_string())))),
            StubFunctions::once(Ok(())),
        );
        let task = workspace_task(TaskPayload::WorkspaceStart { workspace_id: WorkspaceId::generate() });
        match worker.dispatch(&task).await {
            DispatchOutcome::Failed { retryable, .. } => assert!(retryable),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    async fn function_deploy_version_activates_the_given_version() {
        let worker = worker_with(StubOrchestrator::once(Ok(())), StubFunctions::once(Ok(())));
        let task = workspace_task(TaskPayload::FunctionDeployVersion {
            workspace_id: WorkspaceId::generate(),
            function_id: FunctionId::generate().to_string(),
            version_id: FunctionVersionId::generate().to_string(),
        });
        assert_eq!(worker.dispatch(&task).await, DispatchOutcome::Completed);
    }

    #[test]
    async fn function_deploy_version_with_malformed_id_fails_without_retry() {
        let worker = worker_with(StubOrchestrator::once(Ok(())), StubFunctions::once(Ok(())));
        let task = workspace_task(TaskPayload::FunctionDeployVersion {
            workspace_id: WorkspaceId::generate(),
            function_id: "not-a-uuid".to_string(),
            version_id: FunctionVersionId::generate().to_string(),
        });
        match worker.dispatch(&task).await {
            DispatchOutcome::Failed { retryable, .. } => assert!(!retryable),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    async fn function_invoke_async_invokes_synchronously() {
        let worker = worker_with(StubOrchestrator::once(Ok(())), StubFunctions::once(Ok(())));
        let task = workspace_task(TaskPayload::FunctionInvokeAsync {
            workspace_id: WorkspaceId::generate(),
            function_id: FunctionId::generate().to_string(),
            invocation_id: hexabase_common::ids::InvocationId::generate().to_string(),
            request_json: "{}".to_string(),
        });
        assert_eq!(worker.dispatch(&task).await, DispatchOutcome::Completed);
    }

    #[test]
    async fn notify_user_and_maintenance_sweep_complete_without_touching_other_services() {
        let worker = worker_with(StubOrchestrator::once(Ok(())), StubFunctions::once(Ok(())));
        let notify = workspace_task(TaskPayload::NotifyUser {
            workspace_id: None,
            user_id: "user-1".to_string(),
            message: "hello".to_string(),
        });
        assert_eq!(worker.dispatch(&notify).await, DispatchOutcome::Completed);

        let sweep = workspace_task(TaskPayload::MaintenanceSweep { reason: "nightly".to_string() });
        assert_eq!(worker.dispatch(&sweep).await, DispatchOutcome::Completed);
    }
}
