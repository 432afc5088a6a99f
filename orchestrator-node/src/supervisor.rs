//! C8 — Timeout Supervisor.
//!
//! Runs every minute: queries the store for running tasks past their
//! deadline, marks each timed out, and releases the assigned node's
//! active-task counter (atomic, floored at 0). A single sweep is bounded by
//! `BATCH_SIZE` so one slow sweep never blocks the next tick's latency.

use crate::events::EventBus;
use crate::store::Store;
use crate::types::TaskStatus;
use chrono::Utc;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const BATCH_SIZE: usize = 500;

pub struct TimeoutSupervisor {
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
}

impl TimeoutSupervisor {
    pub fn new(store: Arc<dyn Store>, events: Arc<EventBus>) -> Self {
        Self { store, events }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                    self.sweep().await;
                }
                _ = shutdown.recv() => {
                    info!("timeout supervisor shutting down");
                    break;
                }
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn sweep(&self) {
        let now = Utc::now();
        let due = match self.store.list_running_tasks_past_deadline(now, BATCH_SIZE).await {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(error = %err, "failed to query tasks past deadline");
                return;
            }
        };

        for mut task in due {
            let node_id = task.assigned_node;
            task.status = TaskStatus::Timeout;
            task.completed_at = Some(now);
            task.updated_at = now;

            if let Err(err) = self.store.complete_task(task.clone()).await {
                warn!(task_id = %task.id, error = %err, "failed to mark task timed out");
                continue;
            }

            counter!("orchestrator_tasks_timed_out_total", 1);
            if let Some(node_id) = node_id {
                self.events.task_timed_out(node_id, task.id).await;
            }
        }
    }
}
