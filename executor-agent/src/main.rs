use executor_agent::client::{OrchestratorClient, Telemetry};
use executor_agent::config::ExecutorConfig;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("starting executor-agent");

    let config_path = std::env::var("EXECUTOR_CONFIG").unwrap_or_else(|_| "executor.toml".to_string());
    let config = ExecutorConfig::from_file(&config_path).unwrap_or_else(|_| {
        info!(path = %config_path, "no config file found, falling back to defaults");
        ExecutorConfig::default()
    });
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let client = Arc::new(OrchestratorClient::new(config));
    client.register().await.map_err(|e| anyhow::anyhow!(e))?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let heartbeat_client = client.clone();
    let heartbeat_loop = tokio::spawn(heartbeat_client.run_heartbeat_loop(shutdown_tx.subscribe(), sample_telemetry));

    shutdown_signal().await;
    info!("shutdown signal received, draining heartbeat loop");
    let _ = shutdown_tx.send(());
    let _ = heartbeat_loop.await;

    info!("executor-agent stopped");
    Ok(())
}

/// Placeholder telemetry sampler. A real executor would report its own
/// resource usage and in-flight scan count here.
fn sample_telemetry() -> (Telemetry, u32) {
    (Telemetry::default(), 0)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
