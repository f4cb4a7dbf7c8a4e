//! Error types for the access engine

use thiserror::Error;

/// Access engine errors
///
/// `Clone` so that a single resolution result can be handed to every caller
/// waiting on the same cache key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// Missing team, member, role, department, or request
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Explicit deny or insufficient grant. Deliberately carries no detail.
    #[error("permission denied")]
    PermissionDenied,

    /// Stale version or stage on a concurrent mutation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Transition not allowed from the current state
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Amount above a hard cap or a member limit
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Ledger or notification collaborator failure
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Audit sink write failure
    #[error("Audit error: {0}")]
    Audit(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AccessError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Only conflicts are worth retrying; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Result type for access operations
pub type Result<T> = std::result::Result<T, AccessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_is_generic() {
        assert_eq!(AccessError::PermissionDenied.to_string(), "permission denied");
    }

    #[test]
    fn test_not_found_message() {
        let err = AccessError::not_found("request", "req-1");
        assert_eq!(err.to_string(), "request not found: req-1");
    }

    #[test]
    fn test_only_conflict_is_retryable() {
        assert!(AccessError::Conflict("stage moved".into()).is_retryable());
        assert!(!AccessError::PermissionDenied.is_retryable());
        assert!(!AccessError::Upstream("ledger down".into()).is_retryable());
    }
}
