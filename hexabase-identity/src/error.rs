use hexabase_cache::CacheError;
use hexabase_common::error::{ErrorKind, HexabaseError};
use hexabase_common::SafeDisplay;
use hexabase_hierarchy::HierarchyError;
use hexabase_service_base::RepoError;

/// Failure codes from spec §4.2's "Failures" list, plus the few this
/// implementation needs to report a rejection the distilled list didn't
/// separately name (`fingerprint_mismatch`, validation, not-found).
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid grant")]
    InvalidGrant(String),
    #[error("token expired")]
    TokenExpired,
    #[error("token revoked")]
    TokenRevoked,
    #[error("mfa required")]
    MfaRequired,
    #[error("rate limit exceeded")]
    RateLimitExceeded,
    #[error("upstream identity provider error")]
    ProviderError(String),
    #[error("fingerprint mismatch")]
    FingerprintMismatch,
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("jwt error")]
    Jwt(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
}

impl IdentityError {
    /// Stable machine code (spec §4.2 "Failures" / §7 error responses).
    pub fn code(&self) -> &'static str {
        match self {
            IdentityError::InvalidGrant(_) => "invalid_grant",
            IdentityError::TokenExpired => "token_expired",
            IdentityError::TokenRevoked => "token_revoked",
            IdentityError::MfaRequired => "mfa_required",
            IdentityError::RateLimitExceeded => "rate_limit_exceeded",
            IdentityError::ProviderError(_) => "provider_error",
            IdentityError::FingerprintMismatch => "AUTH_FINGERPRINT_MISMATCH",
            IdentityError::Validation(_) => "VALIDATION_ERROR",
            IdentityError::NotFound(_) => "AUTH_NOT_FOUND",
            IdentityError::Jwt(_) => "SYSTEM_JWT_ERROR",
            IdentityError::Repo(_) => "SYSTEM_REPO_ERROR",
            IdentityError::Cache(_) => "SYSTEM_CACHE_ERROR",
            IdentityError::Hierarchy(_) => "SYSTEM_HIERARCHY_ERROR",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IdentityError::InvalidGrant(_)
            | IdentityError::TokenExpired
            | IdentityError::TokenRevoked
            | IdentityError::MfaRequired
            | IdentityError::FingerprintMismatch => ErrorKind::Authentication,
            IdentityError::RateLimitExceeded => ErrorKind::RateLimited,
            IdentityError::ProviderError(_) => ErrorKind::UpstreamRetryable,
            IdentityError::Validation(_) => ErrorKind::Validation,
            IdentityError::NotFound(_) => ErrorKind::NotFound,
            IdentityError::Jwt(_) => ErrorKind::Internal,
            IdentityError::Repo(inner) => repo_error_kind(inner),
            IdentityError::Cache(_) => ErrorKind::Internal,
            IdentityError::Hierarchy(inner) => hierarchy_error_kind(inner),
        }
    }
}

fn repo_error_kind(err: &RepoError) -> ErrorKind {
    match err {
        RepoError::UniqueViolation(_) | RepoError::ConcurrentModification => ErrorKind::Conflict,
        RepoError::ConnectionError(_) => ErrorKind::UpstreamRetryable,
        RepoError::QueryError(_) => ErrorKind::Internal,
    }
}

fn hierarchy_error_kind(err: &HierarchyError) -> ErrorKind {
    match err {
        HierarchyError::NotFound(_) => ErrorKind::NotFound,
        HierarchyError::Cycle
        | HierarchyError::DuplicateNamespace(_)
        | HierarchyError::PresetImmutable(_) => ErrorKind::Conflict,
        HierarchyError::QuotaExceeded { .. }
        | HierarchyError::RoleScopeMismatch(_)
        | HierarchyError::InvalidName(_) => ErrorKind::Validation,
        HierarchyError::Repo(inner) => repo_error_kind(inner),
    }
}

impl SafeDisplay for IdentityError {
    fn to_safe_string(&self) -> String {
        match self {
            IdentityError::Repo(inner) => inner.to_safe_string(),
            IdentityError::Hierarchy(inner) => inner.to_safe_string(),
            _ => format!("{} ({})", self.code(), self.kind()),
        }
    }
}

impl From<IdentityError> for HexabaseError {
    fn from(err: IdentityError) -> Self {
        let kind = err.kind();
        let code = err.code();
        HexabaseError::new(kind, code, err.to_safe_string())
    }
}
