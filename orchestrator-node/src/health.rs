//! C4 — Health Monitor.
//!
//! A single scheduler runs at a configured interval. Each tick, it fans out
//! the enabled probes for every known node concurrently, aggregates a
//! [`NodeHealth`] record, and drives the node's status between `online` and
//! `failed` based on a consecutive-failure count. Threshold breaches and
//! status transitions feed the alert pipeline.

use crate::config::{AlertThresholds, OrchestratorConfig};
use crate::events::EventBus;
use crate::registry::NodeRegistry;
use crate::store::Store;
use crate::types::{Alert, AlertLevel, Node, NodeStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub name: &'static str,
    pub verdict: ProbeVerdict,
    pub latency: Duration,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NodeHealth {
    pub node_id: Uuid,
    pub probes: Vec<ProbeResult>,
}

impl NodeHealth {
    pub fn failing_probes(&self) -> Vec<&'static str> {
        self.probes
            .iter()
            .filter(|p| p.verdict == ProbeVerdict::Unhealthy)
            .map(|p| p.name)
            .collect()
    }

    pub fn is_healthy(&self) -> bool {
        self.probes.iter().all(|p| p.verdict == ProbeVerdict::Healthy)
    }
}

/// Per-node consecutive-failure bookkeeping.
#[derive(Default)]
struct MonitorState {
    consecutive_failures: HashMap<Uuid, u32>,
}

pub struct HealthMonitor {
    registry: Arc<NodeRegistry>,
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
    config: Arc<RwLock<OrchestratorConfig>>,
    state: RwLock<MonitorState>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        store: Arc<dyn Store>,
        events: Arc<EventBus>,
        config: Arc<RwLock<OrchestratorConfig>>,
    ) -> Self {
        Self {
            registry,
            store,
            events,
            config,
            state: RwLock::new(MonitorState::default()),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        loop {
            let interval = self.config.read().await.health.check_interval_secs;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(interval)) => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    info!("health monitor shutting down");
                    break;
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn tick(&self) {
        let nodes = self.registry.list(&Default::default());
        let config = self.config.read().await.clone();

        let checks = nodes.into_iter().map(|node| {
            let config = config.clone();
            async move { check_node(&node, &config).await }
        });

        let results = futures::future::join_all(checks).await;
        for health in results {
            self.apply_result(health).await;
        }
    }

    async fn apply_result(&self, health: NodeHealth) {
        let node = match self.registry.get(health.node_id).await {
            Ok(n) => n,
            Err(_) => return,
        };

        self.raise_resource_alerts(&node, &health).await;

        let config = self.config.read().await;
        let max_failures = config.health.max_failures;
        drop(config);

        let mut state = self.state.write().await;
        let counter = state.consecutive_failures.entry(health.node_id).or_insert(0);

        if health.is_healthy() {
            *counter = 0;
            if node.status == NodeStatus::Failed {
                drop(state);
                if let Err(err) = self.registry.update_status(health.node_id, NodeStatus::Online).await {
                    warn!(node_id = %health.node_id, error = %err, "failed to recover node to online");
                }
            }
        } else {
            *counter += 1;
            let failures = *counter;
            drop(state);
            if failures >= max_failures && node.status != NodeStatus::Failed {
                let failing = health.failing_probes();
                warn!(node_id = %health.node_id, ?failing, failures, "node exceeded max consecutive health failures");
                if let Err(err) = self.registry.update_status(health.node_id, NodeStatus::Failed).await {
                    warn!(node_id = %health.node_id, error = %err, "failed to mark node failed");
                }
            }
        }
    }

    async fn raise_resource_alerts(&self, node: &Node, health: &NodeHealth) {
        let thresholds = self.config.read().await.health.alert_thresholds;
        let breaches = resource_breaches(node, &thresholds);
        for (alert_type, level, message) in breaches {
            self.raise_alert(node.id, alert_type, level, message).await;
        }
        if let Some(http_probe) = health.probes.iter().find(|p| p.name == "http") {
            if http_probe.verdict == ProbeVerdict::Unhealthy {
                self.raise_alert(node.id, "http_probe_failed", AlertLevel::Warning, "http health probe failed".to_string())
                    .await;
            }
        }
    }

    async fn raise_alert(&self, node_id: Uuid, alert_type: &str, level: AlertLevel, message: String) {
        if let Ok(Some(_)) = self.store.find_unresolved_alert(node_id, alert_type).await {
            return; // dedup: an unresolved alert of this type already exists
        }
        let alert = Alert {
            id: Uuid::new_v4(),
            node_id,
            alert_type: alert_type.to_string(),
            level,
            message: message.clone(),
            details: HashMap::new(),
            created_at: Utc::now(),
            resolved: false,
            resolved_at: None,
        };
        if let Err(err) = self.store.put_alert(alert).await {
            warn!(node_id = %node_id, error = %err, "failed to persist alert");
        }
        self.events.emit(Some(node_id), crate::types::NodeEventKind::StatusChanged, level, message).await;
    }
}

fn resource_breaches(node: &Node, thresholds: &AlertThresholds) -> Vec<(&'static str, AlertLevel, String)> {
    let mut breaches = Vec::new();
    let t = node.telemetry;
    if t.disk > thresholds.disk {
        breaches.push(("disk_high", AlertLevel::Error, format!("disk usage {:.1}% exceeds threshold", t.disk)));
    }
    if t.cpu > thresholds.cpu {
        breaches.push(("cpu_high", AlertLevel::Warning, format!("cpu usage {:.1}% exceeds threshold", t.cpu)));
    }
    if t.memory > thresholds.memory {
        breaches.push(("memory_high", AlertLevel::Warning, format!("memory usage {:.1}% exceeds threshold", t.memory)));
    }
    if t.load > thresholds.load {
        breaches.push(("load_high", AlertLevel::Warning, format!("load {:.2} exceeds threshold", t.load)));
    }
    breaches
}

async fn check_node(node: &Node, config: &OrchestratorConfig) -> NodeHealth {
    let timeout = Duration::from_secs(config.health.probe_timeout_secs);
    let mut probes = Vec::new();

    if config.health.enabled_checks.contains("ping") {
        probes.push(ping_probe(node, timeout).await);
    }
    if config.health.enabled_checks.contains("http") {
        probes.push(http_probe(node, &config.health.http_health_path, timeout).await);
    }
    if config.health.enabled_checks.contains("resource") {
        probes.push(resource_probe(node, &config.health.alert_thresholds));
    }

    NodeHealth {
        node_id: node.id,
        probes,
    }
}

async fn ping_probe(node: &Node, timeout: Duration) -> ProbeResult {
    let start = std::time::Instant::now();
    let addr = (node.host, node.port);
    let result = tokio::time::timeout(timeout, TcpStream::connect(addr)).await;
    let latency = start.elapsed();
    match result {
        Ok(Ok(_)) => ProbeResult {
            name: "ping",
            verdict: ProbeVerdict::Healthy,
            latency,
            detail: None,
        },
        Ok(Err(err)) => ProbeResult {
            name: "ping",
            verdict: ProbeVerdict::Unhealthy,
            latency,
            detail: Some(err.to_string()),
        },
        Err(_) => ProbeResult {
            name: "ping",
            verdict: ProbeVerdict::Unhealthy,
            latency,
            detail: Some("timed out".to_string()),
        },
    }
}

async fn http_probe(node: &Node, path: &str, timeout: Duration) -> ProbeResult {
    let start = std::time::Instant::now();
    let url = format!("http://{}:{}{}", node.host, node.port, path);
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(c) => c,
        Err(err) => {
            return ProbeResult {
                name: "http",
                verdict: ProbeVerdict::Unhealthy,
                latency: start.elapsed(),
                detail: Some(err.to_string()),
            }
        }
    };
    let result = client.get(&url).send().await;
    let latency = start.elapsed();
    match result {
        Ok(resp) if resp.status().is_success() => ProbeResult {
            name: "http",
            verdict: ProbeVerdict::Healthy,
            latency,
            detail: Some(resp.status().to_string()),
        },
        Ok(resp) => ProbeResult {
            name: "http",
            verdict: ProbeVerdict::Unhealthy,
            latency,
            detail: Some(resp.status().to_string()),
        },
        Err(err) => ProbeResult {
            name: "http",
            verdict: ProbeVerdict::Unhealthy,
            latency,
            detail: Some(err.to_string()),
        },
    }
}

fn resource_probe(node: &Node, thresholds: &AlertThresholds) -> ProbeResult {
    let t = node.telemetry;
    let unhealthy = t.cpu > thresholds.cpu || t.memory > thresholds.memory || t.disk > thresholds.disk || t.load > thresholds.load;
    ProbeResult {
        name: "resource",
        verdict: if unhealthy { ProbeVerdict::Unhealthy } else { ProbeVerdict::Healthy },
        latency: Duration::ZERO,
        detail: None,
    }
}
