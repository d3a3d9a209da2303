use std::time::Duration;

use thiserror::Error;

/// Failures reported by a [`crate::LockStateStore`].
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store answered, but with data that violates the schema
    /// (missing singleton row, unknown audit action, ...).
    #[error("store returned invalid data: {0}")]
    Corrupt(String),
}

/// Outcome taxonomy for every kill switch operation.
///
/// All variants are terminal for the request; the service never retries.
#[derive(Debug, Clone, Error)]
pub enum KillSwitchError {
    /// No valid caller identity.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Authenticated, but not the operator.
    #[error("forbidden: principal is not the authorized operator")]
    Forbidden,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Wrong phase for the requested transition, including a lost race.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unavailable: {0}")]
    Unavailable(#[from] StoreError),
}

impl KillSwitchError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            KillSwitchError::Unauthenticated => "UNAUTHENTICATED",
            KillSwitchError::Forbidden => "FORBIDDEN",
            KillSwitchError::InvalidArgument(_) => "INVALID_ARGUMENT",
            KillSwitchError::Conflict(_) => "CONFLICT",
            KillSwitchError::Unavailable(_) => "UNAVAILABLE",
        }
    }

    /// Unauthenticated and Forbidden are indistinguishable to callers.
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            KillSwitchError::Unauthenticated | KillSwitchError::Forbidden
        )
    }
}
