//! C1 — Event bus.
//!
//! Bounded, drop-on-full fan-out of lifecycle events to subscribers, with a
//! best-effort mirror into the durable `node_events` store collection. Drop
//! on full is intentional: events are telemetry, not a transaction log — the
//! store is the audit trail, subscribers may lag.

use crate::store::Store;
use crate::types::{AlertLevel, NodeEvent, NodeEventKind};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 4_096;

pub struct EventBus {
    sender: broadcast::Sender<NodeEvent>,
    store: Arc<dyn Store>,
}

impl EventBus {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender, store }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.sender.subscribe()
    }

    /// Publishes `event` to subscribers (non-blocking, drop-on-full) and
    /// appends it to the durable event log. Persistence failures are logged,
    /// never propagated — event emission must not be able to fail a caller's
    /// mutation.
    pub async fn publish(&self, event: NodeEvent) {
        match self.sender.send(event.clone()) {
            Ok(count) => debug!(subscribers = count, kind = ?event.kind, "event dispatched"),
            Err(_) => debug!(kind = ?event.kind, "event dispatched with no subscribers"),
        }
        if let Err(err) = self.store.append_event(event).await {
            warn!(error = %err, "failed to persist event to durable log");
        }
    }

    pub async fn emit(&self, node_id: Option<Uuid>, kind: NodeEventKind, level: AlertLevel, message: impl Into<String>) {
        let event = NodeEvent {
            id: Uuid::new_v4(),
            node_id,
            kind,
            level,
            message: message.into(),
            at: Utc::now(),
        };
        self.publish(event).await;
    }

    pub async fn node_registered(&self, node_id: Uuid, name: &str) {
        self.emit(
            Some(node_id),
            NodeEventKind::Registered,
            AlertLevel::Info,
            format!("node {name} registered"),
        )
        .await;
    }

    pub async fn node_unregistered(&self, node_id: Uuid) {
        self.emit(
            Some(node_id),
            NodeEventKind::Unregistered,
            AlertLevel::Info,
            "node unregistered",
        )
        .await;
    }

    pub async fn status_changed(&self, node_id: Uuid, from: impl std::fmt::Debug, to: impl std::fmt::Debug, level: AlertLevel) {
        self.emit(
            Some(node_id),
            NodeEventKind::StatusChanged,
            level,
            format!("status changed: {from:?} -> {to:?}"),
        )
        .await;
    }

    pub async fn task_assigned(&self, node_id: Uuid, task_id: Uuid) {
        self.emit(
            Some(node_id),
            NodeEventKind::TaskAssigned,
            AlertLevel::Info,
            format!("task {task_id} assigned"),
        )
        .await;
    }

    pub async fn task_distribution_failed(&self, task_id: Uuid, reason: impl Into<String>) {
        self.emit(
            None,
            NodeEventKind::TaskDistributionFailed,
            AlertLevel::Error,
            format!("task {task_id} distribution failed: {}", reason.into()),
        )
        .await;
    }

    pub async fn task_timed_out(&self, node_id: Uuid, task_id: Uuid) {
        self.emit(
            Some(node_id),
            NodeEventKind::TaskTimedOut,
            AlertLevel::Warning,
            format!("task {task_id} timed out"),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let store = Arc::new(InMemoryStore::new());
        let bus = EventBus::new(store);
        let mut rx = bus.subscribe();

        bus.node_registered(Uuid::new_v4(), "n1").await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, NodeEventKind::Registered);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let store = Arc::new(InMemoryStore::new());
        let bus = EventBus::new(store);
        bus.node_unregistered(Uuid::new_v4()).await;
    }
}
