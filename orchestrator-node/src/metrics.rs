//! Metrics initialization and Prometheus exporter wiring.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

pub fn describe_metrics() {
    metrics::describe_counter!("orchestrator_nodes_registered_total", "Total nodes registered");
    metrics::describe_counter!("orchestrator_nodes_unregistered_total", "Total nodes unregistered");
    metrics::describe_counter!("orchestrator_heartbeats_total", "Total heartbeats ingested");
    metrics::describe_counter!("orchestrator_tasks_submitted_total", "Total tasks submitted");
    metrics::describe_counter!("orchestrator_tasks_distributed_total", "Total tasks successfully distributed");
    metrics::describe_counter!("orchestrator_tasks_retried_total", "Total distribution retries");
    metrics::describe_counter!("orchestrator_tasks_failed_total", "Total tasks terminally failed");
    metrics::describe_counter!("orchestrator_tasks_timed_out_total", "Total tasks timed out by the supervisor");

    metrics::describe_gauge!("orchestrator_fleet_size", "Current number of registered nodes");
    metrics::describe_gauge!("orchestrator_healthy_nodes", "Current number of healthy/online nodes");
    metrics::describe_gauge!("orchestrator_queue_depth", "Current priority task queue depth");
    metrics::describe_gauge!("orchestrator_candidate_set_size", "Size of the eligible candidate set for the last distribution");
}

pub fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!(%addr, "metrics server listening");
    Ok(())
}
