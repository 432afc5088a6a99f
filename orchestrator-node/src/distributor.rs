//! C7 — Task Distributor.
//!
//! The orchestrator's distribution loop: dequeue a task, filter nodes to an
//! eligible candidate set, ask the balancer to choose one, assign atomically,
//! and retry with exponential backoff on failure. Submission is a separate
//! entry point (`submit`) used by the API layer.

use crate::balancer::LoadBalancer;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::events::EventBus;
use crate::queue::PriorityTaskQueue;
use crate::registry::NodeRegistry;
use crate::store::Store;
use crate::types::{Node, Task, TaskStatus};
use chrono::Utc;
use metrics::{counter, gauge};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

pub struct TaskDistributor {
    queue: Arc<PriorityTaskQueue>,
    registry: Arc<NodeRegistry>,
    store: Arc<dyn Store>,
    balancer: Arc<LoadBalancer>,
    events: Arc<EventBus>,
    config: Arc<RwLock<OrchestratorConfig>>,
}

impl TaskDistributor {
    pub fn new(
        queue: Arc<PriorityTaskQueue>,
        registry: Arc<NodeRegistry>,
        store: Arc<dyn Store>,
        balancer: Arc<LoadBalancer>,
        events: Arc<EventBus>,
        config: Arc<RwLock<OrchestratorConfig>>,
    ) -> Self {
        Self {
            queue,
            registry,
            store,
            balancer,
            events,
            config,
        }
    }

    /// Accepts a new task submission and places it on the queue (§6 task
    /// submission payload). The distributor stamps ID, created-at and
    /// timeout-at; the assigned node is visible only after assignment.
    #[instrument(skip(self, task))]
    pub async fn submit(&self, task: Task) -> Result<Task> {
        let priority_enabled = self.config.read().await.priority_enabled;
        if priority_enabled && task.priority > 0 {
            self.queue.enqueue_priority(task.clone()).await?;
        } else {
            self.queue.enqueue(task.clone()).await?;
        }
        gauge!("orchestrator_queue_depth", self.queue.size().await as f64);
        counter!("orchestrator_tasks_submitted_total", 1);
        Ok(task)
    }

    /// Runs until `shutdown` fires: repeatedly dequeues a task (blocking
    /// with a short poll interval via the queue's notify) and distributes it.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        loop {
            let mut shutdown_for_dequeue = shutdown.resubscribe();
            let task = self.queue.dequeue(&mut shutdown_for_dequeue).await;
            match task {
                Some(task) => self.distribute(task).await,
                None => {
                    info!("task distributor shutting down");
                    break;
                }
            }
            if shutdown.try_recv().is_ok() {
                break;
            }
        }
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, task_type = %task.task_type))]
    async fn distribute(&self, mut task: Task) {
        let healthy = self.registry.healthy().await;
        let config = self.config.read().await.clone();
        let eligible = filter_eligible(&healthy, &task, &config);

        gauge!("orchestrator_candidate_set_size", eligible.len() as f64);

        if eligible.is_empty() {
            self.handle_distribution_failure(task, OrchestratorError::NoCandidates, &config).await;
            return;
        }

        let chosen = match self.balancer.select(&eligible, &task) {
            Ok(node) => node.clone(),
            Err(err) => {
                self.handle_distribution_failure(task, err, &config).await;
                return;
            }
        };

        task.timeout_at = Some(Utc::now() + chrono::Duration::seconds(config.task_timeout_secs as i64));

        match self.store.assign_task(task.clone(), chosen.id, config.max_tasks_per_node).await {
            Ok(assigned) => {
                if let Ok(updated_node) = self.registry.get(chosen.id).await {
                    self.registry.refresh_cached_node(updated_node);
                }
                counter!("orchestrator_tasks_distributed_total", 1);
                self.events.task_assigned(chosen.id, assigned.id).await;
                info!(node_id = %chosen.id, "task distributed");
            }
            Err(err) => {
                self.handle_distribution_failure(task, err, &config).await;
            }
        }
    }

    async fn handle_distribution_failure(&self, mut task: Task, err: OrchestratorError, config: &OrchestratorConfig) {
        if task.retry_count < config.retry_policy.max {
            task.retry_count += 1;
            let delay = config.retry_policy.delay_for(task.retry_count);
            counter!("orchestrator_tasks_retried_total", 1);
            warn!(task_id = %task.id, retry_count = task.retry_count, delay_ms = delay.as_millis() as u64, error = %err, "distribution failed, scheduling retry");

            let queue = self.queue.clone();
            let task_for_retry = task.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(enqueue_err) = queue.enqueue_priority(task_for_retry).await {
                    warn!(error = %enqueue_err, "failed to re-enqueue task after retry backoff");
                }
            });
        } else {
            task.status = TaskStatus::Failed;
            task.error = Some(err.to_string());
            task.updated_at = Utc::now();
            task.completed_at = Some(Utc::now());
            if let Err(store_err) = self.store.put_task(task.clone()).await {
                warn!(task_id = %task.id, error = %store_err, "failed to persist terminally-failed task");
            }
            counter!("orchestrator_tasks_failed_total", 1);
            self.events.task_distribution_failed(task.id, err.to_string()).await;
        }
    }
}

/// §4.7 step 2 — filters the healthy set down to nodes that can actually
/// take this task: online and not draining, under their per-node cap,
/// matching the required capability, clearing the resource floor, and
/// satisfying every *required* affinity rule whose pattern matches the task
/// type. Non-required rules influence balancer weighting only and are out of
/// this filter's scope.
fn filter_eligible<'a>(healthy: &'a [Node], task: &Task, config: &OrchestratorConfig) -> Vec<Node> {
    healthy
        .iter()
        .filter(|n| n.can_accept_tasks())
        .filter(|n| n.active_tasks < config.max_tasks_per_node)
        .filter(|n| match &task.required_capability {
            Some(cap) => n.capabilities.contains(cap),
            None => true,
        })
        .filter(|n| config.resource_requirements.node_satisfies(n))
        .filter(|n| {
            config
                .affinity_rules
                .iter()
                .filter(|rule| rule.required && rule.matches_task_type(&task.task_type))
                .all(|rule| rule.node_matches(n))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeStatus, NodeTelemetry, NodeType};
    use std::collections::{HashMap, HashSet};
    use std::net::{IpAddr, Ipv4Addr};

    fn node_with_capability(cap: &str) -> Node {
        let now = Utc::now();
        let mut capabilities = HashSet::new();
        capabilities.insert(cap.to_string());
        Node {
            id: uuid::Uuid::new_v4(),
            name: format!("n-{cap}"),
            host: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 9400,
            node_type: NodeType::Worker,
            region: None,
            zone: None,
            group: None,
            tags: vec![],
            capabilities,
            secret: "s".to_string(),
            status: NodeStatus::Online,
            last_heartbeat: now,
            last_update: now,
            telemetry: NodeTelemetry::default(),
            active_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            trusted: false,
            registered_at: now,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn filter_eligible_respects_capability_requirement() {
        let config = OrchestratorConfig::default();
        let port_scan_node = node_with_capability("port_scan");
        let vuln_scan_node = node_with_capability("vuln_scan");
        let mut task = Task::new("vuln_scan".to_string(), HashMap::new(), 0);
        task.required_capability = Some("vuln_scan".to_string());

        let eligible = filter_eligible(&[port_scan_node, vuln_scan_node.clone()], &task, &config);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, vuln_scan_node.id);
    }

    #[test]
    fn filter_eligible_excludes_nodes_at_capacity() {
        let mut config = OrchestratorConfig::default();
        config.max_tasks_per_node = 1;
        let mut node = node_with_capability("vuln_scan");
        node.active_tasks = 1;
        let task = Task::new("vuln_scan".to_string(), HashMap::new(), 0);

        let eligible = filter_eligible(&[node], &task, &config);
        assert!(eligible.is_empty());
    }

    #[test]
    fn filter_eligible_excludes_draining_and_offline_nodes() {
        let config = OrchestratorConfig::default();
        let mut draining = node_with_capability("vuln_scan");
        draining.status = NodeStatus::Draining;
        let task = Task::new("vuln_scan".to_string(), HashMap::new(), 0);

        let eligible = filter_eligible(&[draining], &task, &config);
        assert!(eligible.is_empty());
    }
}
