//! C3 — Node Registry.
//!
//! In-memory authoritative cache of nodes, backed by the persistent store.
//! Owns registration, heartbeat ingestion, status transitions, and lookup by
//! ID/capability/tag. The cache is a [`DashMap`] — internally sharded
//! reader-writer locks — so reads (lookups, filter queries) and writes
//! (register/unregister/heartbeat/status transition) never block each other
//! across unrelated node IDs, and no lock is ever held across store I/O.

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::events::EventBus;
use crate::store::Store;
use crate::types::{Alert, AlertLevel, Node, NodeEventKind, NodeStatus, NodeTelemetry, NodeType};
use chrono::Utc;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Inbound registration payload (§6).
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub name: String,
    pub host: IpAddr,
    pub port: u16,
    pub node_type: NodeType,
    pub version: String,
    pub capabilities: HashSet<String>,
    pub region: Option<String>,
    pub zone: Option<String>,
    pub group: Option<String>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, String>,
}

/// Result of a successful registration — the secret is returned exactly once.
#[derive(Debug, Clone)]
pub struct Registered {
    pub node: Node,
    pub secret: String,
}

/// Inbound heartbeat payload (§6).
#[derive(Debug, Clone)]
pub struct HeartbeatRequest {
    pub node_id: Uuid,
    pub status: Option<NodeStatus>,
    pub cpu: f32,
    pub memory: f32,
    pub disk: f32,
    pub network: f32,
    pub load: f32,
    pub active_tasks: u32,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub status: Option<NodeStatus>,
    pub node_type: Option<NodeType>,
    pub region: Option<String>,
}

pub struct NodeRegistry {
    cache: DashMap<Uuid, Node>,
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
    config: Arc<RwLock<OrchestratorConfig>>,
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn Store>, events: Arc<EventBus>, config: Arc<RwLock<OrchestratorConfig>>) -> Self {
        Self {
            cache: DashMap::new(),
            store,
            events,
            config,
        }
    }

    /// Loads every node from the store into the cache. Call once at startup.
    #[instrument(skip(self))]
    pub async fn warm_cache(&self) -> Result<usize> {
        let nodes = self.store.list_nodes().await?;
        let count = nodes.len();
        for node in nodes {
            self.cache.insert(node.id, node);
        }
        info!(count, "node registry cache warmed from store");
        Ok(count)
    }

    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn register(&self, req: RegistrationRequest) -> Result<Registered> {
        if req.name.trim().is_empty() {
            return Err(OrchestratorError::Validation("name must not be empty".into()));
        }
        if req.port == 0 {
            return Err(OrchestratorError::Validation("port must not be 0".into()));
        }
        if self.store.find_node_by_host_port(req.host, req.port).await?.is_some() {
            return Err(OrchestratorError::Conflict(format!(
                "a node is already registered at {}:{}",
                req.host, req.port
            )));
        }
        if self.store.find_node_by_name(&req.name).await?.is_some() {
            return Err(OrchestratorError::Conflict(format!(
                "a node named {} is already registered",
                req.name
            )));
        }

        let secret = mint_secret();
        let now = Utc::now();
        let node = Node {
            id: Uuid::new_v4(),
            name: req.name,
            host: req.host,
            port: req.port,
            node_type: req.node_type,
            region: req.region,
            zone: req.zone,
            group: req.group,
            tags: req.tags,
            capabilities: req.capabilities,
            secret: secret.clone(),
            status: NodeStatus::Online,
            last_heartbeat: now,
            last_update: now,
            telemetry: NodeTelemetry::default(),
            active_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            trusted: false,
            registered_at: now,
            metadata: req.metadata,
        };

        self.store.put_node(node.clone()).await?;
        self.cache.insert(node.id, node.clone());
        self.events.node_registered(node.id, &node.name).await;

        Ok(Registered { node, secret })
    }

    #[instrument(skip(self))]
    pub async fn unregister(&self, node_id: Uuid) -> Result<()> {
        let removed = self.store.delete_node(node_id).await?;
        self.cache.remove(&node_id);
        if removed {
            self.events.node_unregistered(node_id).await;
        }
        // Idempotent: unregistering an unknown ID is a no-op, not an error
        // (see DESIGN.md open-question decision).
        Ok(())
    }

    #[instrument(skip(self, hb), fields(node_id = %hb.node_id))]
    pub async fn ingest_heartbeat(&self, hb: HeartbeatRequest) -> Result<()> {
        let mut entry = self
            .cache
            .get_mut(&hb.node_id)
            .ok_or(OrchestratorError::UnknownNode(hb.node_id))?;

        let now = Utc::now();
        // Heartbeat monotonicity: never move last_heartbeat backwards.
        if now > entry.last_heartbeat {
            entry.last_heartbeat = now;
        }
        entry.last_update = now;
        entry.telemetry = NodeTelemetry {
            cpu: hb.cpu,
            memory: hb.memory,
            disk: hb.disk,
            network: hb.network,
            load: hb.load,
        };
        entry.active_tasks = hb.active_tasks;
        if let Some(extra) = hb.metadata {
            for (key, value) in extra {
                entry.metadata.insert(key, value);
            }
        }

        let mut transitioned = None;
        if let Some(requested) = hb.status {
            if requested != entry.status {
                if !entry.status.can_transition_to(requested) {
                    warn!(node_id = %hb.node_id, from = ?entry.status, to = ?requested, "heartbeat requested illegal transition");
                    return Err(OrchestratorError::IllegalTransition(entry.status, requested));
                }
                let from = entry.status;
                entry.status = requested;
                transitioned = Some((from, requested));
            }
        }

        let snapshot = entry.clone();
        drop(entry);

        self.store.put_node(snapshot).await?;

        if let Some((from, to)) = transitioned {
            let level = status_change_alert_level(to);
            self.events.status_changed(hb.node_id, from, to, level).await;
            self.raise_status_change_alert(hb.node_id, from, to, level).await;
        }

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get(&self, node_id: Uuid) -> Result<Node> {
        if let Some(node) = self.cache.get(&node_id) {
            return Ok(node.clone());
        }
        let node = self
            .store
            .get_node(node_id)
            .await?
            .ok_or(OrchestratorError::UnknownNode(node_id))?;
        self.cache.insert(node_id, node.clone());
        Ok(node)
    }

    pub fn list(&self, filter: &NodeFilter) -> Vec<Node> {
        self.cache
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|node| filter.status.map(|s| s == node.status).unwrap_or(true))
            .filter(|node| filter.node_type.map(|t| t == node.node_type).unwrap_or(true))
            .filter(|node| {
                filter
                    .region
                    .as_ref()
                    .map(|r| node.region.as_deref() == Some(r.as_str()))
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Nodes that are `online` and within the heartbeat window.
    pub async fn healthy(&self) -> Vec<Node> {
        let heartbeat_timeout = chrono::Duration::seconds(self.config.read().await.heartbeat_timeout_secs as i64);
        let now = Utc::now();
        self.cache
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|node| node.status == NodeStatus::Online)
            .filter(|node| now - node.last_heartbeat <= heartbeat_timeout)
            .collect()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<Node> {
        self.cache
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|node| node.capabilities.contains(capability))
            .collect()
    }

    pub fn by_tag(&self, tag: &str) -> Vec<Node> {
        self.cache
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|node| node.tags.iter().any(|t| t == tag))
            .collect()
    }

    #[instrument(skip(self))]
    pub async fn update_status(&self, node_id: Uuid, new_status: NodeStatus) -> Result<()> {
        let mut entry = self
            .cache
            .get_mut(&node_id)
            .ok_or(OrchestratorError::UnknownNode(node_id))?;
        if entry.status == new_status {
            return Ok(());
        }
        if !entry.status.can_transition_to(new_status) {
            return Err(OrchestratorError::IllegalTransition(entry.status, new_status));
        }
        let from = entry.status;
        entry.status = new_status;
        entry.last_update = Utc::now();
        let snapshot = entry.clone();
        drop(entry);

        self.store.put_node(snapshot).await?;
        let level = status_change_alert_level(new_status);
        self.events.status_changed(node_id, from, new_status, level).await;
        self.raise_status_change_alert(node_id, from, new_status, level).await;
        Ok(())
    }

    /// Records a `status_change` alert for a node transition, deduplicated
    /// against any already-unresolved alert of the same type for this node
    /// (§4.2's dedup invariant, same key the health monitor uses for
    /// resource-breach alerts).
    async fn raise_status_change_alert(&self, node_id: Uuid, from: NodeStatus, to: NodeStatus, level: AlertLevel) {
        if let Ok(Some(_)) = self.store.find_unresolved_alert(node_id, "status_change").await {
            return;
        }
        let alert = Alert {
            id: Uuid::new_v4(),
            node_id,
            alert_type: "status_change".to_string(),
            level,
            message: format!("status changed: {from:?} -> {to:?}"),
            details: HashMap::new(),
            created_at: Utc::now(),
            resolved: false,
            resolved_at: None,
        };
        if let Err(err) = self.store.put_alert(alert).await {
            warn!(node_id = %node_id, error = %err, "failed to persist status-change alert");
        }
    }

    /// Applies a freshly-assigned task's counter bump to the cache so reads
    /// immediately reflect what the store now holds.
    pub fn refresh_cached_node(&self, node: Node) {
        self.cache.insert(node.id, node);
    }

    /// Background job: every `registry_sweep_interval_secs`, mark nodes
    /// offline when `now - last_heartbeat > heartbeat_timeout`, and delete
    /// nodes that have been offline longer than `auto_remove_after_secs`
    /// (0 disables auto-removal).
    pub async fn run_sweep_loop(self: Arc<Self>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        loop {
            let interval_secs = self.config.read().await.registry_sweep_interval_secs;
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(interval_secs)) => {
                    self.sweep_once().await;
                }
                _ = shutdown.recv() => {
                    info!("node registry sweep loop shutting down");
                    break;
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn sweep_once(&self) {
        let config = self.config.read().await.clone();
        let heartbeat_timeout = chrono::Duration::seconds(config.heartbeat_timeout_secs as i64);
        let now = Utc::now();

        let stale: Vec<Uuid> = self
            .cache
            .iter()
            .filter(|entry| entry.value().status == NodeStatus::Online)
            .filter(|entry| now - entry.value().last_heartbeat > heartbeat_timeout)
            .map(|entry| *entry.key())
            .collect();

        for node_id in stale {
            if let Err(err) = self.update_status(node_id, NodeStatus::Offline).await {
                warn!(node_id = %node_id, error = %err, "sweep failed to mark node offline");
            }
        }

        if config.auto_remove_after_secs == 0 {
            return;
        }
        let auto_remove_after = chrono::Duration::seconds(config.auto_remove_after_secs as i64);
        let removable: Vec<Uuid> = self
            .cache
            .iter()
            .filter(|entry| entry.value().status == NodeStatus::Offline)
            .filter(|entry| now - entry.value().last_update > auto_remove_after)
            .map(|entry| *entry.key())
            .collect();
        for node_id in removable {
            if let Err(err) = self.unregister(node_id).await {
                warn!(node_id = %node_id, error = %err, "sweep failed to auto-remove node");
            }
        }
    }
}

/// Severity table for status-transition alerts (§4.2): the more the fleet
/// loses, the louder the alert.
fn status_change_alert_level(new_status: NodeStatus) -> AlertLevel {
    match new_status {
        NodeStatus::Failed => AlertLevel::Critical,
        NodeStatus::Offline => AlertLevel::Error,
        NodeStatus::Maintenance | NodeStatus::Draining => AlertLevel::Warning,
        _ => AlertLevel::Info,
    }
}

fn mint_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
