use crate::safe_display::SafeDisplay;
use std::fmt;

/// The error taxonomy from spec §7. Every leaf error type in every crate
/// exposes `kind()` returning one of these, so a (currently out-of-scope)
/// edge layer has one place to map errors to transport status codes instead
/// of each service re-deriving its own category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    Conflict,
    NotFound,
    RateLimited,
    UpstreamRetryable,
    UpstreamFatal,
    Internal,
}

impl ErrorKind {
    /// Whether an operation carrying this kind should be retried by the task
    /// engine's backoff policy (spec §4.3/§7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::UpstreamRetryable | ErrorKind::Conflict)
    }
}

/// A generic, stable, machine-readable error envelope. Individual services
/// define their own `thiserror` enums (e.g. `AccountError`, `TaskError`) for
/// rich `match`-ability, and convert into this shape only at the boundary
/// that needs uniform reporting (audit log, task `last_error`, metrics).
#[derive(Debug, Clone)]
pub struct HexabaseError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
}

impl HexabaseError {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for HexabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.code, self.message)
    }
}

impl std::error::Error for HexabaseError {}

impl SafeDisplay for HexabaseError {
    fn to_safe_string(&self) -> String {
        format!("{} ({})", self.code, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn upstream_retryable_and_conflict_are_retryable() {
        assert!(ErrorKind::UpstreamRetryable.is_retryable());
        assert!(ErrorKind::Conflict.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::UpstreamFatal.is_retryable());
    }

    #[test]
    fn safe_string_never_contains_message() {
        let err = HexabaseError::new(ErrorKind::Authentication, "AUTH_TOKEN_EXPIRED", "secret-details-abc");
        assert!(!err.to_safe_string().contains("secret-details-abc"));
    }
}
