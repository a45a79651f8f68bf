//! Engine error taxonomy.

use storyfork_config::types::PullRequestStatus;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Missing, or not visible to the caller
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{entity} '{key}' already exists")]
    AlreadyExists { entity: &'static str, key: String },

    /// Stale frontier or a request that does not fit the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: PullRequestStatus,
        to: PullRequestStatus,
    },

    #[error("not authorized: {0}")]
    Unauthorized(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// AI provider failure; safe to retry
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    /// Stable machine-readable code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists { .. } => "already_exists",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::Unauthorized(_) => "unauthorized",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::UpstreamFailure(_) => "upstream_failure",
            EngineError::Storage(_) => "storage_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::UpstreamFailure(_))
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        EngineError::InvalidInput(message.into())
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        EngineError::InvalidState(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_upstream_failures_are_retryable() {
        assert!(EngineError::UpstreamFailure("timeout".into()).is_retryable());
        assert!(!EngineError::NotFound("fork").is_retryable());
        assert!(!EngineError::Storage(anyhow::anyhow!("disk")).is_retryable());
    }

    #[test]
    fn test_messages() {
        let err = EngineError::InvalidTransition {
            from: PullRequestStatus::Merged,
            to: PullRequestStatus::Closed,
        };
        assert_eq!(err.to_string(), "invalid status transition from merged to closed");
        assert_eq!(err.code(), "invalid_transition");
        assert_eq!(EngineError::NotFound("fork").to_string(), "fork not found");
    }
}
