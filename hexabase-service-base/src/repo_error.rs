use hexabase_common::error::{ErrorKind, HexabaseError};
use hexabase_common::SafeDisplay;

/// Error surfaced by every `hexabase-*` repo implementation. Kept distinct
/// from `HexabaseError` (the service-level error) so a repo never leaks a
/// raw `sqlx::Error` into business logic — callers translate it into a
/// domain error at the service boundary.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("row was concurrently modified")]
    ConcurrentModification,
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("query error: {0}")]
    QueryError(String),
}

impl RepoError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepoError::ConnectionError(_))
    }
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    RepoError::UniqueViolation(db_err.message().to_string())
                } else {
                    RepoError::QueryError(db_err.message().to_string())
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                RepoError::ConnectionError(err.to_string())
            }
            other => RepoError::QueryError(other.to_string()),
        }
    }
}

impl SafeDisplay for RepoError {
    fn to_safe_string(&self) -> String {
        match self {
            RepoError::UniqueViolation(_) => "a unique constraint was violated".to_string(),
            RepoError::ConcurrentModification => self.to_string(),
            RepoError::ConnectionError(_) => "database connection error".to_string(),
            RepoError::QueryError(_) => "database query error".to_string(),
        }
    }
}

impl From<RepoError> for HexabaseError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::UniqueViolation(msg) => {
                HexabaseError::new(ErrorKind::Conflict, "REPO_UNIQUE_VIOLATION", msg)
            }
            RepoError::ConcurrentModification => HexabaseError::new(
                ErrorKind::Conflict,
                "REPO_CONCURRENT_MODIFICATION",
                "row was concurrently modified".to_string(),
            ),
            RepoError::ConnectionError(msg) => {
                HexabaseError::new(ErrorKind::UpstreamRetryable, "REPO_CONNECTION_ERROR", msg)
            }
            RepoError::QueryError(msg) => {
                HexabaseError::new(ErrorKind::Internal, "REPO_QUERY_ERROR", msg)
            }
        }
    }
}
