use thiserror::Error;

/// Errors from the registration/heartbeat/task-report client.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Registration with the control plane failed
    #[error("Registration error: {0}")]
    Registration(String),

    /// Heartbeat delivery failed
    #[error("Heartbeat error: {0}")]
    Heartbeat(String),

    /// Task report/completion call failed
    #[error("Task report error: {0}")]
    TaskReport(String),

    /// Network I/O error
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error talking to the control plane
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid state error
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

impl From<String> for ExecutorError {
    fn from(s: String) -> Self {
        ExecutorError::Other(s)
    }
}

impl From<&str> for ExecutorError {
    fn from(s: &str) -> Self {
        ExecutorError::Other(s.to_string())
    }
}
