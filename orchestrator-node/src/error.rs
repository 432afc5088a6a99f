//! Error taxonomy for the control plane.
//!
//! Every fallible leaf (store, probes, balancer) returns an [`OrchestratorError`]
//! tagged with a [`Kind`] so callers can match on *behavior* — retry, reject,
//! escalate — rather than on the specific variant.

use thiserror::Error;

/// Behavioral classification used by C3/C4/C7 to decide what to do with an
/// error, independent of which variant produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Reject the call outright. No retry.
    Validation,
    /// Reject; caller chooses to rename/retry (duplicate host:port, duplicate ID).
    Conflict,
    /// Retry inside the component with small bounded backoff.
    Transient,
    /// Every node was filtered out; retry per retry-policy, then mark failed.
    NoCandidates,
    /// Deadline exceeded (task or probe).
    Timeout,
    /// An invariant would be violated (counter underflow, illegal transition).
    /// Log, skip the update, emit an error event; never crash the loop.
    Fatal,
    /// Context was cancelled; abort the current step cleanly.
    Shutdown,
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient store error: {0}")]
    Transient(String),

    #[error("no eligible candidate nodes")]
    NoCandidates,

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("invariant violation: {0}")]
    Fatal(String),

    #[error("shutdown in progress")]
    Shutdown,

    #[error("unknown node: {0}")]
    UnknownNode(uuid::Uuid),

    #[error("unknown task: {0}")]
    UnknownTask(uuid::Uuid),

    #[error("illegal state transition: {0:?} -> {1:?}")]
    IllegalTransition(crate::types::NodeStatus, crate::types::NodeStatus),

    #[error("queue is full")]
    QueueFull,

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn kind(&self) -> Kind {
        use OrchestratorError::*;
        match self {
            Validation(_) => Kind::Validation,
            Conflict(_) | UnknownNode(_) | UnknownTask(_) => Kind::Conflict,
            Transient(_) | Io(_) => Kind::Transient,
            NoCandidates | QueueFull => Kind::NoCandidates,
            Timeout(_) => Kind::Timeout,
            Fatal(_) | IllegalTransition(_, _) => Kind::Fatal,
            Shutdown => Kind::Shutdown,
            Config(_) | Serialization(_) | Other(_) => Kind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), Kind::Transient | Kind::NoCandidates)
    }
}

impl From<String> for OrchestratorError {
    fn from(s: String) -> Self {
        OrchestratorError::Other(s)
    }
}

impl From<&str> for OrchestratorError {
    fn from(s: &str) -> Self {
        OrchestratorError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_no_candidates_as_retryable() {
        let err = OrchestratorError::NoCandidates;
        assert_eq!(err.kind(), Kind::NoCandidates);
        assert!(err.is_retryable());
    }

    #[test]
    fn kind_maps_validation_as_not_retryable() {
        let err = OrchestratorError::Validation("bad host".into());
        assert_eq!(err.kind(), Kind::Validation);
        assert!(!err.is_retryable());
    }

    #[test]
    fn display_matches_expected_text() {
        let err = OrchestratorError::Conflict("duplicate host:port".to_string());
        assert_eq!(err.to_string(), "conflict: duplicate host:port");
    }
}
