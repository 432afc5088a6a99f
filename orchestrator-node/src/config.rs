//! Orchestrator configuration, loading, validation and hot-reload.

use crate::types::{AffinityRule, ResourceRequirement, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub listen_addr: String,
    pub metrics_addr: String,
    pub strategy: BalancerStrategy,
    pub max_tasks_per_node: u32,
    pub task_timeout_secs: u64,
    pub retry_policy: RetryPolicy,
    pub priority_enabled: bool,
    pub affinity_rules: Vec<AffinityRule>,
    pub resource_requirements: ResourceRequirement,
    pub health: HealthConfig,
    pub heartbeat_timeout_secs: u64,
    pub registry_sweep_interval_secs: u64,
    pub auto_remove_after_secs: u64,
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancerStrategy {
    RoundRobin,
    LeastLoaded,
    Random,
    Weighted,
    Hash,
    Capability,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub check_interval_secs: u64,
    pub max_failures: u32,
    pub enabled_checks: HashSet<String>,
    pub alert_thresholds: AlertThresholds,
    pub probe_timeout_secs: u64,
    pub http_health_path: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub cpu: f32,
    pub memory: f32,
    pub disk: f32,
    pub load: f32,
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7700".to_string(),
            metrics_addr: "0.0.0.0:9700".to_string(),
            strategy: BalancerStrategy::LeastLoaded,
            max_tasks_per_node: 10,
            task_timeout_secs: 300,
            retry_policy: RetryPolicy::default(),
            priority_enabled: true,
            affinity_rules: Vec::new(),
            resource_requirements: ResourceRequirement::default(),
            health: HealthConfig {
                check_interval_secs: 30,
                max_failures: 3,
                enabled_checks: ["ping", "http", "resource"].iter().map(|s| s.to_string()).collect(),
                alert_thresholds: AlertThresholds {
                    cpu: 85.0,
                    memory: 85.0,
                    disk: 90.0,
                    load: 5.0,
                    response_time_ms: 2_000,
                },
                probe_timeout_secs: 5,
                http_health_path: "/health".to_string(),
            },
            heartbeat_timeout_secs: 90,
            registry_sweep_interval_secs: 30,
            auto_remove_after_secs: 0,
            queue: QueueConfig { max_size: 1_000 },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a file, layered with `ORCHESTRATOR_`-prefixed
    /// environment variable overrides.
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("ORCHESTRATOR").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    pub fn save_to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Reject structurally nonsensical values at startup rather than failing
    /// lazily deep inside the distribution loop.
    pub fn validate(&self) -> Result<(), String> {
        if self.queue.max_size == 0 {
            return Err("queue.max_size cannot be 0".to_string());
        }
        if self.max_tasks_per_node == 0 {
            return Err("max_tasks_per_node cannot be 0".to_string());
        }
        if self.task_timeout_secs == 0 {
            return Err("task_timeout_secs cannot be 0".to_string());
        }
        if self.retry_policy.backoff_factor < 1.0 {
            return Err("retry_policy.backoff_factor must be >= 1".to_string());
        }
        if self.health.check_interval_secs == 0 {
            return Err("health.check_interval_secs cannot be 0".to_string());
        }
        let known_checks: HashSet<&str> = ["ping", "http", "resource"].into_iter().collect();
        for check in &self.health.enabled_checks {
            if !known_checks.contains(check.as_str()) {
                return Err(format!("unknown health check: {check}"));
            }
        }
        for rule in &self.affinity_rules {
            if rule.task_type_pattern.is_empty() {
                return Err("affinity rule task_type_pattern cannot be empty".to_string());
            }
        }
        Ok(())
    }
}

/// Runtime configuration manager supporting hot-reload via subscription.
pub struct ConfigManager {
    current_config: Arc<RwLock<OrchestratorConfig>>,
    config_path: String,
    watchers: Vec<broadcast::Sender<OrchestratorConfig>>,
}

impl ConfigManager {
    pub fn new(config: OrchestratorConfig, config_path: String) -> Self {
        Self {
            current_config: Arc::new(RwLock::new(config)),
            config_path,
            watchers: Vec::new(),
        }
    }

    pub async fn get_config(&self) -> OrchestratorConfig {
        self.current_config.read().await.clone()
    }

    pub fn handle(&self) -> Arc<RwLock<OrchestratorConfig>> {
        self.current_config.clone()
    }

    pub async fn reload_config(&mut self) -> Result<(), String> {
        info!(path = %self.config_path, "reloading configuration");

        let new_config =
            OrchestratorConfig::from_file(&self.config_path).map_err(|e| format!("failed to load config: {e}"))?;
        new_config.validate().map_err(|e| format!("invalid config: {e}"))?;

        {
            let mut current = self.current_config.write().await;
            *current = new_config.clone();
        }

        for sender in &self.watchers {
            let _ = sender.send(new_config.clone());
        }

        info!("configuration reloaded successfully");
        Ok(())
    }

    pub fn subscribe(&mut self) -> broadcast::Receiver<OrchestratorConfig> {
        let (sender, receiver) = broadcast::channel(10);
        self.watchers.push(sender);
        receiver
    }
}
