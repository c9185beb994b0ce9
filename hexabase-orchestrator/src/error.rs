use hexabase_common::error::{ErrorKind, HexabaseError};
use hexabase_common::SafeDisplay;
use hexabase_hierarchy::HierarchyError;
use hexabase_service_base::RepoError;
use hexabase_tasks::TaskError;

#[derive(Debug, thiserror::Error)]
pub enum HostClusterError {
    #[error("host cluster API call failed: {0}")]
    Upstream(String),
    #[error("vCluster not found: {0}")]
    NotFound(String),
}

#[derive(Debug, thiserror::Error)]
pub enum VirtualizationError {
    #[error("virtualization backend call failed: {0}")]
    Upstream(String),
    #[error("node not found: {0}")]
    NotFound(String),
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),
    #[error("workspace {workspace_id} is {actual}, which cannot transition to {requested}")]
    InvalidTransition {
        workspace_id: String,
        actual: String,
        requested: String,
    },
    /// Another worker already holds the per-workspace lease (spec §5) —
    /// always safe to retry once it expires.
    #[error("workspace {0} is already being reconciled")]
    WorkspaceLeaseHeld(String),
    #[error("plan does not allow dedicated nodes")]
    DedicatedNodesNotAllowed,
    #[error("plan not found: {0}")]
    PlanNotFound(String),
    #[error("workspace {0} is not in a state that can serve a kubeconfig")]
    WorkspaceNotReady(String),
    /// Not a failure: the worker noticed `cancel_requested` at a stage
    /// boundary and stopped (spec §5). The task itself was already moved
    /// to `Cancelled` by [`hexabase_tasks::TaskEngine::cancel`], so the
    /// caller must not also call `fail`/`complete` on it.
    #[error("task was cancelled")]
    Cancelled,
    #[error(transparent)]
    Host(#[from] HostClusterError),
    #[error(transparent)]
    Virtualization(#[from] VirtualizationError),
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Cache(#[from] hexabase_cache::CacheError),
}

impl OrchestratorError {
    /// Whether the task engine should retry the enclosing task (spec
    /// §4.1 "retryable vs fatal"): upstream/lease contention is
    /// transient, everything else (bad input, policy violation, a
    /// vCluster that genuinely doesn't exist) is not worth re-attempting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Host(_)
                | OrchestratorError::Virtualization(_)
                | OrchestratorError::WorkspaceLeaseHeld(_)
                | OrchestratorError::Cache(_)
        )
    }
}

impl SafeDisplay for OrchestratorError {
    fn to_safe_string(&self) -> String {
        self.to_string()
    }
}

impl From<OrchestratorError> for HexabaseError {
    fn from(err: OrchestratorError) -> Self {
        let kind = if err.is_retryable() {
            ErrorKind::UpstreamRetryable
        } else {
            match &err {
                OrchestratorError::WorkspaceNotFound(_) | OrchestratorError::PlanNotFound(_) => ErrorKind::NotFound,
                OrchestratorError::InvalidTransition { .. } | OrchestratorError::WorkspaceNotReady(_) => {
                    ErrorKind::Conflict
                }
                OrchestratorError::DedicatedNodesNotAllowed => ErrorKind::Authorization,
                OrchestratorError::Cancelled => ErrorKind::Conflict,
                OrchestratorError::Hierarchy(_) | OrchestratorError::Repo(_) => ErrorKind::Internal,
                _ => ErrorKind::UpstreamFatal,
            }
        };
        HexabaseError::new(kind, "ORCHESTRATOR_ERROR", err.to_string())
    }
}
