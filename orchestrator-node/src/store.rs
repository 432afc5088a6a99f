//! C2 — Persistent store.
//!
//! Authoritative record of nodes, tasks, alerts and events. The trait is the
//! seam a real backend (Postgres, etcd, whatever) would implement; the
//! in-memory version here gives the rest of the crate something real to run
//! against and is what the test suite exercises.
//!
//! The store is the one place that must honor the two-phase assignment
//! invariant from §9: a task is never visible as `running`/`pending` with a
//! node attached unless that node's `active_tasks` counter was incremented in
//! the same call.

use crate::error::{OrchestratorError, Result};
use crate::types::{Alert, Node, NodeEvent, Task, TaskStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait Store: Send + Sync {
    async fn put_node(&self, node: Node) -> Result<()>;
    async fn get_node(&self, id: Uuid) -> Result<Option<Node>>;
    async fn delete_node(&self, id: Uuid) -> Result<bool>;
    async fn list_nodes(&self) -> Result<Vec<Node>>;
    async fn find_node_by_host_port(&self, host: std::net::IpAddr, port: u16) -> Result<Option<Node>>;
    async fn find_node_by_name(&self, name: &str) -> Result<Option<Node>>;

    async fn put_task(&self, task: Task) -> Result<()>;
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>>;
    async fn list_tasks_by_node(&self, node_id: Uuid) -> Result<Vec<Task>>;
    async fn list_running_tasks_past_deadline(&self, now: chrono::DateTime<Utc>, limit: usize) -> Result<Vec<Task>>;

    /// Atomically inserts `task` with `node_id` set and increments the node's
    /// `active_tasks` counter, provided it is still below `cap`. On failure
    /// neither the task nor the counter change is visible to callers.
    async fn assign_task(&self, task: Task, node_id: Uuid, cap: u32) -> Result<Task>;

    /// The executor's acknowledgement that it has picked up an assigned task.
    /// Transitions `pending` -> `running` for `node_id`'s own task; this is
    /// the only path that ever produces a `running` task, so the timeout
    /// supervisor has nothing to sweep until an executor calls it.
    async fn start_task(&self, task_id: Uuid, node_id: Uuid) -> Result<Task>;

    /// Atomically decrements a node's `active_tasks` counter, floored at 0,
    /// and stores `task` with its terminal status.
    async fn complete_task(&self, task: Task) -> Result<()>;

    async fn put_alert(&self, alert: Alert) -> Result<()>;
    async fn find_unresolved_alert(&self, node_id: Uuid, alert_type: &str) -> Result<Option<Alert>>;
    async fn list_alerts_by_node(&self, node_id: Uuid) -> Result<Vec<Alert>>;
    async fn resolve_alert(&self, id: Uuid) -> Result<()>;

    async fn append_event(&self, event: NodeEvent) -> Result<()>;
    async fn list_events(&self, limit: usize) -> Result<Vec<NodeEvent>>;
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<Uuid, Node>,
    tasks: HashMap<Uuid, Task>,
    alerts: HashMap<Uuid, Alert>,
    events: Vec<NodeEvent>,
}

/// In-memory store. Single `RwLock` stands in for "multi-document
/// atomicity" — every method that needs to touch more than one collection
/// takes the write lock for its whole duration so there is no window where a
/// reader observes a half-applied assignment.
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put_node(&self, node: Node) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.nodes.insert(node.id, node);
        Ok(())
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>> {
        Ok(self.inner.read().await.nodes.get(&id).cloned())
    }

    async fn delete_node(&self, id: Uuid) -> Result<bool> {
        Ok(self.inner.write().await.nodes.remove(&id).is_some())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.inner.read().await.nodes.values().cloned().collect())
    }

    async fn find_node_by_host_port(&self, host: std::net::IpAddr, port: u16) -> Result<Option<Node>> {
        Ok(self
            .inner
            .read()
            .await
            .nodes
            .values()
            .find(|n| n.host == host && n.port == port)
            .cloned())
    }

    async fn find_node_by_name(&self, name: &str) -> Result<Option<Node>> {
        Ok(self.inner.read().await.nodes.values().find(|n| n.name == name).cloned())
    }

    async fn put_task(&self, task: Task) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.tasks.insert(task.id, task);
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.inner.read().await.tasks.get(&id).cloned())
    }

    async fn list_tasks_by_node(&self, node_id: Uuid) -> Result<Vec<Task>> {
        Ok(self
            .inner
            .read()
            .await
            .tasks
            .values()
            .filter(|t| t.assigned_node == Some(node_id))
            .cloned()
            .collect())
    }

    async fn list_running_tasks_past_deadline(&self, now: chrono::DateTime<Utc>, limit: usize) -> Result<Vec<Task>> {
        let inner = self.inner.read().await;
        let mut due: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .filter(|t| t.timeout_at.map(|deadline| deadline < now).unwrap_or(false))
            .cloned()
            .collect();
        due.sort_by_key(|t| t.timeout_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn assign_task(&self, mut task: Task, node_id: Uuid, cap: u32) -> Result<Task> {
        let mut inner = self.inner.write().await;
        let node = inner
            .nodes
            .get_mut(&node_id)
            .ok_or(OrchestratorError::UnknownNode(node_id))?;
        if node.active_tasks >= cap {
            return Err(OrchestratorError::Conflict(format!(
                "node {node_id} at capacity ({cap})"
            )));
        }
        node.active_tasks += 1;
        task.assigned_node = Some(node_id);
        task.status = TaskStatus::Pending;
        task.updated_at = Utc::now();
        inner.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn start_task(&self, task_id: Uuid, node_id: Uuid) -> Result<Task> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::UnknownTask(task_id))?;
        if task.assigned_node != Some(node_id) {
            return Err(OrchestratorError::Conflict(format!(
                "task {task_id} is not assigned to node {node_id}"
            )));
        }
        if task.status != TaskStatus::Pending {
            return Err(OrchestratorError::Conflict(format!(
                "task {task_id} is not pending (status: {:?})",
                task.status
            )));
        }
        task.status = TaskStatus::Running;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn complete_task(&self, mut task: Task) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(node_id) = task.assigned_node {
            if let Some(node) = inner.nodes.get_mut(&node_id) {
                node.active_tasks = node.active_tasks.saturating_sub(1);
                match task.status {
                    TaskStatus::Succeeded => node.completed_tasks += 1,
                    TaskStatus::Failed | TaskStatus::Timeout => node.failed_tasks += 1,
                    _ => {}
                }
            }
        }
        task.updated_at = Utc::now();
        inner.tasks.insert(task.id, task);
        Ok(())
    }

    async fn put_alert(&self, alert: Alert) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.alerts.insert(alert.id, alert);
        Ok(())
    }

    async fn find_unresolved_alert(&self, node_id: Uuid, alert_type: &str) -> Result<Option<Alert>> {
        Ok(self
            .inner
            .read()
            .await
            .alerts
            .values()
            .find(|a| a.node_id == node_id && a.alert_type == alert_type && !a.resolved)
            .cloned())
    }

    async fn list_alerts_by_node(&self, node_id: Uuid) -> Result<Vec<Alert>> {
        Ok(self
            .inner
            .read()
            .await
            .alerts
            .values()
            .filter(|a| a.node_id == node_id)
            .cloned()
            .collect())
    }

    async fn resolve_alert(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(alert) = inner.alerts.get_mut(&id) {
            alert.resolved = true;
            alert.resolved_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn append_event(&self, event: NodeEvent) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.events.push(event);
        Ok(())
    }

    async fn list_events(&self, limit: usize) -> Result<Vec<NodeEvent>> {
        let inner = self.inner.read().await;
        let start = inner.events.len().saturating_sub(limit);
        Ok(inner.events[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeStatus, NodeTelemetry, NodeType};
    use std::collections::{HashMap as StdHashMap, HashSet};
    use std::net::{IpAddr, Ipv4Addr};

    fn sample_node() -> Node {
        let now = Utc::now();
        Node {
            id: Uuid::new_v4(),
            name: "n1".to_string(),
            host: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 9000,
            node_type: NodeType::Worker,
            region: None,
            zone: None,
            group: None,
            tags: vec![],
            capabilities: HashSet::new(),
            secret: "secret".to_string(),
            status: NodeStatus::Online,
            last_heartbeat: now,
            last_update: now,
            telemetry: NodeTelemetry::default(),
            active_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            trusted: false,
            registered_at: now,
            metadata: StdHashMap::new(),
        }
    }

    #[tokio::test]
    async fn assign_task_increments_counter_and_caps() {
        let store = InMemoryStore::new();
        let node = sample_node();
        let node_id = node.id;
        store.put_node(node).await.unwrap();

        let task = Task::new("vuln_scan".to_string(), StdHashMap::new(), 0);
        let assigned = store.assign_task(task, node_id, 1).await.unwrap();
        assert_eq!(assigned.assigned_node, Some(node_id));

        let node_after = store.get_node(node_id).await.unwrap().unwrap();
        assert_eq!(node_after.active_tasks, 1);

        let second = Task::new("vuln_scan".to_string(), StdHashMap::new(), 0);
        let result = store.assign_task(second, node_id, 1).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn start_task_transitions_pending_to_running() {
        let store = InMemoryStore::new();
        let node = sample_node();
        let node_id = node.id;
        store.put_node(node).await.unwrap();

        let task = Task::new("vuln_scan".to_string(), StdHashMap::new(), 0);
        let assigned = store.assign_task(task, node_id, 1).await.unwrap();

        let started = store.start_task(assigned.id, node_id).await.unwrap();
        assert_eq!(started.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn start_task_rejects_wrong_node() {
        let store = InMemoryStore::new();
        let node = sample_node();
        let node_id = node.id;
        store.put_node(node).await.unwrap();

        let task = Task::new("vuln_scan".to_string(), StdHashMap::new(), 0);
        let assigned = store.assign_task(task, node_id, 1).await.unwrap();

        let result = store.start_task(assigned.id, Uuid::new_v4()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn start_task_rejects_already_running() {
        let store = InMemoryStore::new();
        let node = sample_node();
        let node_id = node.id;
        store.put_node(node).await.unwrap();

        let task = Task::new("vuln_scan".to_string(), StdHashMap::new(), 0);
        let assigned = store.assign_task(task, node_id, 1).await.unwrap();
        store.start_task(assigned.id, node_id).await.unwrap();

        let result = store.start_task(assigned.id, node_id).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn complete_task_decrements_with_floor_zero() {
        let store = InMemoryStore::new();
        let mut node = sample_node();
        node.active_tasks = 0;
        let node_id = node.id;
        store.put_node(node).await.unwrap();

        let mut task = Task::new("vuln_scan".to_string(), StdHashMap::new(), 0);
        task.assigned_node = Some(node_id);
        task.status = TaskStatus::Timeout;
        store.complete_task(task).await.unwrap();

        let node_after = store.get_node(node_id).await.unwrap().unwrap();
        assert_eq!(node_after.active_tasks, 0);
    }

    #[tokio::test]
    async fn unresolved_alert_dedup_lookup() {
        let store = InMemoryStore::new();
        let node_id = Uuid::new_v4();
        let alert = Alert {
            id: Uuid::new_v4(),
            node_id,
            alert_type: "cpu_high".to_string(),
            level: crate::types::AlertLevel::Warning,
            message: "cpu high".to_string(),
            details: StdHashMap::new(),
            created_at: Utc::now(),
            resolved: false,
            resolved_at: None,
        };
        store.put_alert(alert.clone()).await.unwrap();

        let found = store.find_unresolved_alert(node_id, "cpu_high").await.unwrap();
        assert!(found.is_some());

        store.resolve_alert(alert.id).await.unwrap();
        let found_after = store.find_unresolved_alert(node_id, "cpu_high").await.unwrap();
        assert!(found_after.is_none());
    }
}
