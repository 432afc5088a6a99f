use orchestrator_node::api::{self, AppState};
use orchestrator_node::balancer::{LoadBalancer, Strategy};
use orchestrator_node::config::{ConfigManager, OrchestratorConfig};
use orchestrator_node::distributor::TaskDistributor;
use orchestrator_node::events::EventBus;
use orchestrator_node::health::HealthMonitor;
use orchestrator_node::metrics;
use orchestrator_node::queue::PriorityTaskQueue;
use orchestrator_node::registry::NodeRegistry;
use orchestrator_node::store::{InMemoryStore, Store};
use orchestrator_node::supervisor::TimeoutSupervisor;
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

    info!("starting orchestrator-node");

    let config_path = std::env::var("ORCHESTRATOR_CONFIG").unwrap_or_else(|_| "orchestrator.toml".to_string());
    let config = OrchestratorConfig::from_file(&config_path).unwrap_or_else(|_| {
        info!(path = %config_path, "no config file found, falling back to defaults");
        OrchestratorConfig::default()
    });
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let config_manager = ConfigManager::new(config.clone(), config_path);
    let config_handle = config_manager.handle();

    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let events = Arc::new(EventBus::new(store.clone()));
    let registry = Arc::new(NodeRegistry::new(store.clone(), events.clone(), config_handle.clone()));
    registry.warm_cache().await?;

    let strategy: Strategy = config.strategy.into();
    let balancer = Arc::new(LoadBalancer::new(strategy));

    let queue = Arc::new(PriorityTaskQueue::new(config.queue.max_size, config.priority_enabled));

    let distributor = Arc::new(TaskDistributor::new(
        queue.clone(),
        registry.clone(),
        store.clone(),
        balancer.clone(),
        events.clone(),
        config_handle.clone(),
    ));

    let health_monitor = Arc::new(HealthMonitor::new(
        registry.clone(),
        store.clone(),
        events.clone(),
        config_handle.clone(),
    ));

    let timeout_supervisor = Arc::new(TimeoutSupervisor::new(store.clone(), events.clone()));

    metrics::describe_metrics();
    metrics::start_metrics_server(config.metrics_addr.parse()?)?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let distributor_loop = tokio::spawn(distributor.clone().run(shutdown_tx.subscribe()));
    let health_loop = tokio::spawn(health_monitor.run(shutdown_tx.subscribe()));
    let supervisor_loop = tokio::spawn(timeout_supervisor.run(shutdown_tx.subscribe()));
    let sweep_loop = tokio::spawn(registry.clone().run_sweep_loop(shutdown_tx.subscribe()));

    let state = AppState {
        registry: registry.clone(),
        distributor: distributor.clone(),
        store: store.clone(),
        balancer: balancer.clone(),
        config: config_handle.clone(),
    };
    let app = api::router(state);

    let listen_addr = config.listen_addr.clone();
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!(addr = %listen_addr, "orchestrator API listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()));

    server.await?;

    let _ = distributor_loop.await;
    let _ = health_loop.await;
    let _ = supervisor_loop.await;
    let _ = sweep_loop.await;

    info!("orchestrator-node stopped");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
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

    info!("shutdown signal received, draining background loops");
    let _ = shutdown_tx.send(());
}
