use hexabase_common::error::{ErrorKind, HexabaseError};
use hexabase_common::SafeDisplay;
use hexabase_service_base::RepoError;

#[derive(Debug, thiserror::Error)]
pub enum HierarchyError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("would create a cycle in the group hierarchy")]
    Cycle,
    #[error("quota exceeded: requested {requested}, headroom {headroom}")]
    QuotaExceeded { requested: i64, headroom: i64 },
    #[error("namespace name already in use within this workspace: {0}")]
    DuplicateNamespace(String),
    #[error("role scope mismatch: {0}")]
    RoleScopeMismatch(String),
    #[error("preset role or seed group cannot be modified: {0}")]
    PresetImmutable(String),
    #[error("invalid DNS-label name: {0}")]
    InvalidName(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl SafeDisplay for HierarchyError {
    fn to_safe_string(&self) -> String {
        match self {
            HierarchyError::Repo(inner) => inner.to_safe_string(),
            _ => self.to_string(),
        }
    }
}

impl From<HierarchyError> for HexabaseError {
    fn from(err: HierarchyError) -> Self {
        match err {
            HierarchyError::NotFound(msg) => HexabaseError::new(ErrorKind::NotFound, "HIERARCHY_NOT_FOUND", msg),
            HierarchyError::Cycle => HexabaseError::new(ErrorKind::Conflict, "CYCLE", err.to_string()),
            HierarchyError::QuotaExceeded { .. } => {
                HexabaseError::new(ErrorKind::Validation, "QUOTA_EXCEEDED", err.to_string())
            }
            HierarchyError::DuplicateNamespace(_) => {
                HexabaseError::new(ErrorKind::Conflict, "PROJECT_NAMESPACE_TAKEN", err.to_string())
            }
            HierarchyError::RoleScopeMismatch(_) => {
                HexabaseError::new(ErrorKind::Validation, "ROLE_SCOPE_MISMATCH", err.to_string())
            }
            HierarchyError::PresetImmutable(_) => {
                HexabaseError::new(ErrorKind::Conflict, "ROLE_PRESET_IMMUTABLE", err.to_string())
            }
            HierarchyError::InvalidName(_) => {
                HexabaseError::new(ErrorKind::Validation, "VALIDATION_INVALID_NAME", err.to_string())
            }
            HierarchyError::Repo(inner) => inner.into(),
        }
    }
}
