use hexabase_common::error::{ErrorKind, HexabaseError};
use hexabase_common::SafeDisplay;
use hexabase_service_base::RepoError;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("task lease expired or held by another worker")]
    LeaseLost,
    #[error("task is already in a terminal state")]
    AlreadyTerminal,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl SafeDisplay for TaskError {
    fn to_safe_string(&self) -> String {
        match self {
            TaskError::NotFound(_) => self.to_string(),
            TaskError::LeaseLost => self.to_string(),
            TaskError::AlreadyTerminal => self.to_string(),
            TaskError::Repo(inner) => inner.to_safe_string(),
        }
    }
}

impl From<TaskError> for HexabaseError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::NotFound(msg) => HexabaseError::new(ErrorKind::NotFound, "TASK_NOT_FOUND", msg),
            TaskError::LeaseLost => {
                HexabaseError::new(ErrorKind::Conflict, "TASK_LEASE_LOST", err.to_string())
            }
            TaskError::AlreadyTerminal => {
                HexabaseError::new(ErrorKind::Conflict, "TASK_ALREADY_TERMINAL", err.to_string())
            }
            TaskError::Repo(inner) => inner.into(),
        }
    }
}
