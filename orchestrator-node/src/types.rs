//! Shared data model: nodes, tasks, alerts, events, and the small config
//! structs (retry policy, affinity rule, resource requirement) that
//! parameterize the distributor and balancer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use uuid::Uuid;

/// A registered fleet node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub name: String,
    pub host: IpAddr,
    pub port: u16,
    pub node_type: NodeType,
    pub region: Option<String>,
    pub zone: Option<String>,
    pub group: Option<String>,
    pub tags: Vec<String>,
    pub capabilities: HashSet<String>,
    /// Secret token minted at registration; never returned by `List`/`Get`.
    #[serde(skip_serializing)]
    pub secret: String,
    pub status: NodeStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub telemetry: NodeTelemetry,
    pub active_tasks: u32,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub trusted: bool,
    pub registered_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl Node {
    /// A node can accept a task only while online.
    pub fn can_accept_tasks(&self) -> bool {
        matches!(self.status, NodeStatus::Online)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Worker,
    Master,
    Gateway,
}

impl Default for NodeType {
    fn default() -> Self {
        NodeType::Worker
    }
}

/// Node state machine. Transitions are validated by
/// [`NodeStatus::can_transition_to`] — never mutate `Node::status` directly
/// without going through that check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Registering,
    Online,
    Offline,
    Failed,
    Maintenance,
    Draining,
    Removed,
}

impl NodeStatus {
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        matches!(
            (self, next),
            (Registering, Online)
                | (Online, Offline)
                | (Online, Maintenance)
                | (Online, Draining)
                | (Online, Failed)
                | (Offline, Online)
                | (Offline, Removed)
                | (Failed, Online)
                | (Maintenance, Online)
                | (Draining, Offline)
                | (Draining, Removed)
        )
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NodeTelemetry {
    pub cpu: f32,
    pub memory: f32,
    pub disk: f32,
    pub network: f32,
    pub load: f32,
}

/// A unit of scan work routed through the queue to a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: String,
    pub required_capability: Option<String>,
    pub priority: i32,
    pub assigned_node: Option<Uuid>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub payload: HashMap<String, serde_json::Value>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(task_type: String, payload: HashMap<String, serde_json::Value>, priority: i32) -> Self {
        let now = Utc::now();
        let required_capability = payload
            .get("required_capability")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Self {
            id: Uuid::new_v4(),
            task_type,
            required_capability,
            priority,
            assigned_node: None,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            timeout_at: None,
            completed_at: None,
            retry_count: 0,
            payload,
            error: None,
        }
    }

    /// Once terminal, no further transitions are valid.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Timeout,
    Cancelled,
}

/// Alert. Dedup invariant: at most one unresolved alert per (node_id, type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub node_id: Uuid,
    pub alert_type: String,
    pub level: AlertLevel,
    pub message: String,
    pub details: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

/// Node event — fire-and-forget, lost on event-bus overflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEvent {
    pub id: Uuid,
    pub node_id: Option<Uuid>,
    pub kind: NodeEventKind,
    pub level: AlertLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeEventKind {
    Registered,
    Unregistered,
    Heartbeat,
    Online,
    Offline,
    StatusChanged,
    ConfigUpdated,
    TaskAssigned,
    TaskDistributionFailed,
    TaskTimedOut,
}

/// Retry policy (config, not state).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// `delay(retry_count) = min(initial · factor^(retry_count-1), max_delay)`.
    pub fn delay_for(&self, retry_count: u32) -> std::time::Duration {
        let exponent = retry_count.saturating_sub(1) as i32;
        let scaled = self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = scaled.min(self.max_delay_ms as f64).max(0.0);
        std::time::Duration::from_millis(capped as u64)
    }
}

/// Affinity rule: task-type match pattern -> node selector + weight + required flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffinityRule {
    pub task_type_pattern: String,
    pub selector: HashMap<String, String>,
    pub weight: f64,
    pub required: bool,
}

impl AffinityRule {
    pub fn matches_task_type(&self, task_type: &str) -> bool {
        if self.task_type_pattern == "*" {
            return true;
        }
        if let Some(prefix) = self.task_type_pattern.strip_suffix('*') {
            return task_type.starts_with(prefix);
        }
        self.task_type_pattern == task_type
    }

    /// Checks the node's (region, zone, type, metadata) against the selector.
    pub fn node_matches(&self, node: &Node) -> bool {
        self.selector.iter().all(|(key, value)| match key.as_str() {
            "region" => node.region.as_deref() == Some(value.as_str()),
            "zone" => node.zone.as_deref() == Some(value.as_str()),
            "type" => format!("{:?}", node.node_type).to_lowercase() == value.to_lowercase(),
            other => node.metadata.get(other) == Some(value),
        })
    }
}

/// Global resource requirement floor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceRequirement {
    pub min_cpu: f32,
    pub min_memory: f32,
    pub min_disk: f32,
}

impl Default for ResourceRequirement {
    fn default() -> Self {
        Self {
            min_cpu: 0.0,
            min_memory: 0.0,
            min_disk: 0.0,
        }
    }
}

impl ResourceRequirement {
    pub fn node_satisfies(&self, node: &Node) -> bool {
        node.telemetry.cpu <= 100.0 - self.min_cpu
            && node.telemetry.memory <= 100.0 - self.min_memory
            && node.telemetry.disk <= 100.0 - self.min_disk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_allows_documented_edges() {
        assert!(NodeStatus::Registering.can_transition_to(NodeStatus::Online));
        assert!(NodeStatus::Online.can_transition_to(NodeStatus::Offline));
        assert!(NodeStatus::Offline.can_transition_to(NodeStatus::Online));
        assert!(NodeStatus::Draining.can_transition_to(NodeStatus::Removed));
    }

    #[test]
    fn state_machine_rejects_unlisted_edges() {
        assert!(!NodeStatus::Registering.can_transition_to(NodeStatus::Failed));
        assert!(!NodeStatus::Removed.can_transition_to(NodeStatus::Online));
        assert!(!NodeStatus::Maintenance.can_transition_to(NodeStatus::Failed));
    }

    #[test]
    fn retry_delay_backs_off_exponentially_and_caps() {
        let policy = RetryPolicy {
            max: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
        };
        assert_eq!(policy.delay_for(1).as_millis(), 1_000);
        assert_eq!(policy.delay_for(2).as_millis(), 2_000);
        assert_eq!(policy.delay_for(3).as_millis(), 4_000);
        assert_eq!(policy.delay_for(10).as_millis(), 10_000); // capped
    }

    #[test]
    fn affinity_rule_prefix_match() {
        let rule = AffinityRule {
            task_type_pattern: "vuln_*".to_string(),
            selector: HashMap::new(),
            weight: 1.0,
            required: true,
        };
        assert!(rule.matches_task_type("vuln_scan"));
        assert!(!rule.matches_task_type("port_scan"));
    }
}
