//! Executor Agent
//!
//! Reference client implementing the fleet's registration, heartbeat, and
//! task-completion contract. It carries none of the actual scan logic; it
//! exists so the control plane's registration and heartbeat ingestion paths
//! have a real caller.

pub mod client;
pub mod config;
pub mod error;

pub use client::{NodeStatus, OrchestratorClient, TaskStatus, Telemetry};
pub use config::ExecutorConfig;
pub use error::{ExecutorError, Result};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_imports() {
        let _ = std::any::type_name::<ExecutorConfig>();
        let _ = std::any::type_name::<OrchestratorClient>();
    }
}
