use hexabase_common::error::{ErrorKind, HexabaseError};
use hexabase_common::SafeDisplay;
use hexabase_functions::FunctionsError;
use hexabase_hierarchy::HierarchyError;
use hexabase_identity::IdentityError;

#[derive(Debug, thiserror::Error)]
pub enum AiopsError {
    #[error("internal JWT rejected: {0}")]
    InvalidToken(String),
    #[error("internal JWT expired")]
    TokenExpired,
    #[error("{acting_for} is not permitted to {verb} {resource}")]
    PermissionDenied { acting_for: String, verb: String, resource: String },
    #[error("target not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
    #[error(transparent)]
    Functions(#[from] FunctionsError),
}

impl AiopsError {
    /// spec §7: a rejected/expired token or a denied permission is never
    /// worth retrying; everything bubbled up from a downstream service
    /// keeps that service's own retry classification.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiopsError::Identity(IdentityError::ProviderError(_)) => true,
            AiopsError::Functions(inner) => inner.is_retryable(),
            _ => false,
        }
    }
}

impl SafeDisplay for AiopsError {
    fn to_safe_string(&self) -> String {
        match self {
            AiopsError::Identity(inner) => inner.to_safe_string(),
            AiopsError::Hierarchy(inner) => inner.to_safe_string(),
            AiopsError::Functions(inner) => inner.to_safe_string(),
            _ => self.to_string(),
        }
    }
}

impl From<AiopsError> for HexabaseError {
    fn from(err: AiopsError) -> Self {
        let kind = match &err {
            AiopsError::InvalidToken(_) | AiopsError::TokenExpired => ErrorKind::Authentication,
            AiopsError::PermissionDenied { .. } => ErrorKind::Authorization,
            AiopsError::NotFound(_) => ErrorKind::NotFound,
            AiopsError::Identity(_) => ErrorKind::Internal,
            AiopsError::Hierarchy(_) => ErrorKind::Internal,
            AiopsError::Functions(_) => {
                if err.is_retryable() {
                    ErrorKind::UpstreamRetryable
                } else {
                    ErrorKind::Internal
                }
            }
        };
        HexabaseError::new(kind, "AIOPS_ERROR", err.to_string())
    }
}
