//! Registration -> heartbeat -> task-submission walkthrough against a live
//! orchestrator-node, using the real `executor-agent` client for the
//! registration and heartbeat legs and a plain HTTP call for the operator
//! side (task submission), the way an operator CLI would.
//!
//! Run an orchestrator-node first, then:
//!   cargo run --bin fleet-walkthrough

use executor_agent::client::{OrchestratorClient, Telemetry};
use executor_agent::config::ExecutorConfig;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let orchestrator_url =
        std::env::var("ORCHESTRATOR_URL").unwrap_or_else(|_| "http://127.0.0.1:7700".to_string());

    let mut config = ExecutorConfig::default();
    config.orchestrator_url = orchestrator_url.clone();
    config.name = "demo-walkthrough-node".to_string();
    config.capabilities.insert("vuln_scan".to_string());

    info!(node_name = %config.name, "registering with the control plane");
    let client = std::sync::Arc::new(OrchestratorClient::new(config));
    let node_id = client.register().await.map_err(|e| anyhow::anyhow!(e))?;
    info!(%node_id, "registered");

    info!("sending one heartbeat");
    client.send_heartbeat(Telemetry { cpu: 0.1, memory: 0.2, disk: 0.1, network: 0.0, load: 0.1 }, 0).await.map_err(|e| anyhow::anyhow!(e))?;

    info!("submitting a task for this node's capability");
    let http = reqwest::Client::new();
    let submit_resp: serde_json::Value = http
        .post(format!("{orchestrator_url}/api/v1/tasks"))
        .json(&serde_json::json!({
            "type": "vuln_scan",
            "required_capability": "vuln_scan",
            "priority": 0,
        }))
        .send()
        .await?
        .json()
        .await?;
    let task_id = submit_resp["task_id"].as_str().ok_or_else(|| anyhow::anyhow!("no task_id in response"))?;
    info!(task_id, "task submitted");

    tokio::time::sleep(Duration::from_secs(1)).await;

    let task: serde_json::Value =
        http.get(format!("{orchestrator_url}/api/v1/tasks/{task_id}")).send().await?.json().await?;
    info!(status = %task["status"], assigned_node = %task["assigned_node"], "task state after distribution");

    info!("acking the task as started");
    let task_uuid: uuid::Uuid = task_id.parse()?;
    client.start_task(task_uuid).await.map_err(|e| anyhow::anyhow!(e))?;

    info!("reporting task completion");
    client.complete_task(task_uuid, executor_agent::client::TaskStatus::Succeeded, None).await.map_err(|e| anyhow::anyhow!(e))?;

    info!("walkthrough complete");
    Ok(())
}
