//! Configuration for the reference fleet client: who it says it is when it
//! registers, and how often it phones home.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{ExecutorError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Base URL of the orchestrator API, e.g. "http://127.0.0.1:7700".
    pub orchestrator_url: String,
    pub name: String,
    pub host: std::net::IpAddr,
    pub port: u16,
    #[serde(default)]
    pub node_type: String,
    pub version: String,
    #[serde(default)]
    pub capabilities: HashSet<String>,
    pub region: Option<String>,
    pub zone: Option<String>,
    pub group: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Fallback heartbeat interval used before the first registration
    /// response tells us the control plane's preferred cadence.
    pub heartbeat_interval_secs: u64,
    pub registration_retry: RegistrationRetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RegistrationRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            orchestrator_url: "http://127.0.0.1:7700".to_string(),
            name: "executor-agent".to_string(),
            host: "127.0.0.1".parse().unwrap(),
            port: 9000,
            node_type: "worker".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: HashSet::new(),
            region: None,
            zone: None,
            group: None,
            tags: Vec::new(),
            metadata: HashMap::new(),
            heartbeat_interval_secs: 30,
            registration_retry: RegistrationRetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("EXECUTOR").separator("__"))
            .build()
            .map_err(|e| ExecutorError::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| ExecutorError::Config(e.to_string()))
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.port == 0 {
            return Err("port must be nonzero".to_string());
        }
        if self.heartbeat_interval_secs == 0 {
            return Err("heartbeat_interval_secs must be nonzero".to_string());
        }
        if self.registration_retry.backoff_factor < 1.0 {
            return Err("registration_retry.backoff_factor must be >= 1.0".to_string());
        }
        Ok(())
    }
}
