//! Control-plane client: registration, the heartbeat loop, and task
//! completion reporting against the orchestrator's HTTP contract.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
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

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Timeout,
    Cancelled,
}

/// Snapshot of telemetry gathered locally before each heartbeat.
#[derive(Debug, Clone, Copy, Default)]
pub struct Telemetry {
    pub cpu: f32,
    pub memory: f32,
    pub disk: f32,
    pub network: f32,
    pub load: f32,
}

#[derive(Debug, Serialize)]
struct RegisterRequest {
    name: String,
    host: IpAddr,
    port: u16,
    node_type: String,
    version: String,
    capabilities: HashSet<String>,
    region: Option<String>,
    zone: Option<String>,
    group: Option<String>,
    tags: Vec<String>,
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    node_id: Uuid,
    secret: String,
    heartbeat_interval_secs: u64,
}

#[derive(Debug, Serialize)]
struct HeartbeatRequest {
    node_id: Uuid,
    status: Option<NodeStatus>,
    cpu: f32,
    memory: f32,
    disk: f32,
    network: f32,
    load: f32,
    active_tasks: u32,
    metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
struct StartTaskRequest {
    node_id: Uuid,
}

#[derive(Debug, Serialize)]
struct CompleteTaskRequest {
    status: TaskStatus,
    error: Option<String>,
}

/// Client for the fleet's registration/heartbeat/task-report contract.
pub struct OrchestratorClient {
    config: ExecutorConfig,
    http: Client,
    node_id: RwLock<Option<Uuid>>,
    secret: RwLock<Option<String>>,
    status: RwLock<NodeStatus>,
    heartbeat_interval: RwLock<Duration>,
}

impl OrchestratorClient {
    pub fn new(config: ExecutorConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                error!(error = %e, "failed to build HTTP client, falling back to default");
                Client::new()
            });
        let heartbeat_interval = Duration::from_secs(config.heartbeat_interval_secs);

        Self {
            config,
            http,
            node_id: RwLock::new(None),
            secret: RwLock::new(None),
            status: RwLock::new(NodeStatus::Registering),
            heartbeat_interval: RwLock::new(heartbeat_interval),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.orchestrator_url.trim_end_matches('/'), path)
    }

    /// Registers with the control plane, retrying with exponential backoff
    /// up to `registration_retry.max_attempts` times.
    pub async fn register(&self) -> Result<Uuid> {
        let retry = &self.config.registration_retry;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.try_register_once().await {
                Ok(node_id) => return Ok(node_id),
                Err(e) if attempt >= retry.max_attempts => {
                    return Err(ExecutorError::Registration(format!(
                        "giving up after {attempt} attempts: {e}"
                    )));
                }
                Err(e) => {
                    let exponent = (attempt.saturating_sub(1)) as i32;
                    let delay_ms = (retry.initial_delay_ms as f64 * retry.backoff_factor.powi(exponent))
                        .min(retry.max_delay_ms as f64) as u64;
                    warn!(attempt, error = %e, delay_ms, "registration attempt failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    async fn try_register_once(&self) -> Result<Uuid> {
        let request = RegisterRequest {
            name: self.config.name.clone(),
            host: self.config.host,
            port: self.config.port,
            node_type: self.config.node_type.clone(),
            version: self.config.version.clone(),
            capabilities: self.config.capabilities.clone(),
            region: self.config.region.clone(),
            zone: self.config.zone.clone(),
            group: self.config.group.clone(),
            tags: self.config.tags.clone(),
            metadata: self.config.metadata.clone(),
        };

        let response = self.http.post(self.url("/api/v1/nodes/register")).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Registration(format!("status {status}: {body}")));
        }

        let body: RegisterResponse = response.json().await?;

        *self.node_id.write().await = Some(body.node_id);
        *self.secret.write().await = Some(body.secret);
        *self.status.write().await = NodeStatus::Online;
        if body.heartbeat_interval_secs > 0 {
            *self.heartbeat_interval.write().await = Duration::from_secs(body.heartbeat_interval_secs);
        }

        info!(node_id = %body.node_id, "registered with control plane");
        Ok(body.node_id)
    }

    pub async fn node_id(&self) -> Option<Uuid> {
        *self.node_id.read().await
    }

    pub async fn set_status(&self, status: NodeStatus) {
        let mut current = self.status.write().await;
        if *current != status {
            info!(old_status = ?*current, new_status = ?status, "node status changed locally");
            *current = status;
        }
    }

    pub async fn heartbeat_interval(&self) -> Duration {
        *self.heartbeat_interval.read().await
    }

    pub async fn send_heartbeat(&self, telemetry: Telemetry, active_tasks: u32) -> Result<()> {
        let node_id = self.node_id().await.ok_or_else(|| ExecutorError::Heartbeat("not registered".to_string()))?;
        let status = *self.status.read().await;

        let request = HeartbeatRequest {
            node_id,
            status: Some(status),
            cpu: telemetry.cpu,
            memory: telemetry.memory,
            disk: telemetry.disk,
            network: telemetry.network,
            load: telemetry.load,
            active_tasks,
            metadata: None,
        };

        let response = self.http.post(self.url("/api/v1/nodes/heartbeat")).json(&request).send().await?;

        if !response.status().is_success() {
            let status_code = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Heartbeat(format!("status {status_code}: {body}")));
        }

        debug!(node_id = %node_id, "heartbeat delivered");
        Ok(())
    }

    /// Acks an assigned task, moving it from `pending` to `running`. Call
    /// this as soon as the task is picked up, before doing the work, so the
    /// control plane's timeout supervisor has an accurate start time to
    /// measure against.
    pub async fn start_task(&self, task_id: Uuid) -> Result<()> {
        let node_id = self.node_id().await.ok_or_else(|| ExecutorError::TaskReport("not registered".to_string()))?;
        let request = StartTaskRequest { node_id };
        let response = self
            .http
            .post(self.url(&format!("/api/v1/tasks/{task_id}/start")))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status_code = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::TaskReport(format!("status {status_code}: {body}")));
        }
        Ok(())
    }

    /// Reports a task's terminal status back to the control plane.
    pub async fn complete_task(&self, task_id: Uuid, status: TaskStatus, error: Option<String>) -> Result<()> {
        let request = CompleteTaskRequest { status, error };
        let response = self
            .http
            .post(self.url(&format!("/api/v1/tasks/{task_id}/complete")))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status_code = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::TaskReport(format!("status {status_code}: {body}")));
        }
        Ok(())
    }

    /// Runs the heartbeat loop until `shutdown` fires. `telemetry` is
    /// sampled fresh before each send; `active_tasks` likewise.
    pub async fn run_heartbeat_loop<F>(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>, telemetry: F)
    where
        F: Fn() -> (Telemetry, u32) + Send + Sync + 'static,
    {
        let mut missed = 0u32;
        const MAX_MISSED: u32 = 3;

        loop {
            let interval = self.heartbeat_interval().await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.recv() => {
                    info!("heartbeat loop shutting down");
                    return;
                }
            }

            let (sample, active_tasks) = telemetry();
            match self.send_heartbeat(sample, active_tasks).await {
                Ok(()) => missed = 0,
                Err(e) => {
                    missed += 1;
                    warn!(error = %e, missed, "heartbeat failed");
                    if missed >= MAX_MISSED {
                        error!("too many missed heartbeats, attempting re-registration");
                        if self.try_register_once().await.is_ok() {
                            missed = 0;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ExecutorConfig {
        let mut config = ExecutorConfig::default();
        config.orchestrator_url = "http://127.0.0.1:1".to_string();
        config.registration_retry.max_attempts = 1;
        config
    }

    #[tokio::test]
    async fn registration_fails_fast_with_one_attempt_against_unreachable_host() {
        let client = OrchestratorClient::new(test_config());
        assert!(client.register().await.is_err());
    }

    #[tokio::test]
    async fn heartbeat_without_registration_errors() {
        let client = OrchestratorClient::new(test_config());
        let result = client.send_heartbeat(Telemetry::default(), 0).await;
        assert!(matches!(result, Err(ExecutorError::Heartbeat(_))));
    }

    #[test]
    fn url_joins_base_and_path_without_double_slash() {
        let client = OrchestratorClient::new(test_config());
        assert_eq!(client.url("/api/v1/nodes/register"), "http://127.0.0.1:1/api/v1/nodes/register");
    }
}
