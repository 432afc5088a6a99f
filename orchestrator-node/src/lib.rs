//! Orchestrator Node Library
//!
//! Control plane for the fleet: node registry, health monitoring, a
//! priority task queue, pluggable load-balancing policies, task
//! distribution, and timeout supervision.

pub mod api;
pub mod balancer;
pub mod config;
pub mod distributor;
pub mod error;
pub mod events;
pub mod health;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod store;
pub mod supervisor;
pub mod types;

pub use balancer::{LoadBalancer, Strategy};
pub use config::{ConfigManager, OrchestratorConfig};
pub use distributor::TaskDistributor;
pub use error::{OrchestratorError, Result};
pub use events::EventBus;
pub use health::HealthMonitor;
pub use queue::PriorityTaskQueue;
pub use registry::{HeartbeatRequest, NodeRegistry, RegistrationRequest};
pub use store::{InMemoryStore, Store};
pub use supervisor::TimeoutSupervisor;
pub use types::{Alert, AlertLevel, Node, NodeEvent, NodeStatus, NodeType, Task, TaskStatus};
