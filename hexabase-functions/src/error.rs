use hexabase_common::error::{ErrorKind, HexabaseError};
use hexabase_common::SafeDisplay;
use hexabase_hierarchy::HierarchyError;
use hexabase_service_base::RepoError;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider call failed: {0}")]
    Upstream(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("runtime {0} is not supported by this provider")]
    UnsupportedRuntime(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FunctionsError {
    #[error("function not found: {0}")]
    FunctionNotFound(String),
    #[error("function version not found: {0}")]
    VersionNotFound(String),
    #[error("application not found: {0}")]
    ApplicationNotFound(String),
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("version {0} did not build successfully and cannot be activated")]
    VersionNotDeployable(String),
    #[error("no version has been deployed yet")]
    NoVersionDeployed,
    #[error("no prior active version to roll back to")]
    NoPriorVersion,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl FunctionsError {
    /// spec §7 "retryable upstream errors feed backoff/retry": a transient
    /// provider call is worth another attempt, everything else (missing
    /// resource, a version that never built) is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FunctionsError::Provider(ProviderError::Upstream(_)))
    }
}

impl SafeDisplay for FunctionsError {
    fn to_safe_string(&self) -> String {
        self.to_string()
    }
}

impl From<FunctionsError> for HexabaseError {
    fn from(err: FunctionsError) -> Self {
        let kind = if err.is_retryable() {
            ErrorKind::UpstreamRetryable
        } else {
            match &err {
                FunctionsError::FunctionNotFound(_)
                | FunctionsError::VersionNotFound(_)
                | FunctionsError::ApplicationNotFound(_)
                | FunctionsError::WorkspaceNotFound(_)
                | FunctionsError::ProjectNotFound(_) => ErrorKind::NotFound,
                FunctionsError::VersionNotDeployable(_) | FunctionsError::NoVersionDeployed | FunctionsError::NoPriorVersion => {
                    ErrorKind::Conflict
                }
                FunctionsError::Provider(ProviderError::UnsupportedRuntime(_)) => ErrorKind::Validation,
                FunctionsError::Hierarchy(_) | FunctionsError::Repo(_) => ErrorKind::Internal,
                FunctionsError::Provider(_) => ErrorKind::UpstreamFatal,
            }
        };
        HexabaseError::new(kind, "FUNCTIONS_ERROR", err.to_string())
    }
}
