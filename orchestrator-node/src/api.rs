//! HTTP surface: registration, heartbeat ingestion, task submission and the
//! executor completion contract, and read-only admin endpoints. The control
//! plane's *logic* lives in registry/distributor/health; this module is only
//! the dispatch contract (§1: "the HTTP/CLI that submits tasks" is an
//! external collaborator, but the control plane must have some way to
//! receive registrations, heartbeats and submissions).

use crate::balancer::LoadBalancer;
use crate::config::OrchestratorConfig;
use crate::distributor::TaskDistributor;
use crate::error::OrchestratorError;
use crate::registry::{HeartbeatRequest, NodeFilter, NodeRegistry, RegistrationRequest};
use crate::store::Store;
use crate::types::{Node, NodeStatus, NodeType, Task, TaskStatus};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<NodeRegistry>,
    pub distributor: Arc<TaskDistributor>,
    pub store: Arc<dyn Store>,
    pub balancer: Arc<LoadBalancer>,
    pub config: Arc<RwLock<OrchestratorConfig>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/nodes/register", post(register_node))
        .route("/api/v1/nodes/heartbeat", post(node_heartbeat))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/nodes/:node_id", get(get_node).delete(unregister_node))
        .route("/api/v1/nodes/:node_id/status", post(update_node_status))
        .route("/api/v1/tasks", post(submit_task))
        .route("/api/v1/tasks/:task_id", get(get_task))
        .route("/api/v1/tasks/:task_id/start", post(start_task))
        .route("/api/v1/tasks/:task_id/complete", post(complete_task))
        .route("/api/v1/balancer/metrics", post(report_balancer_metrics))
        .route("/api/v1/fleet/stats", get(fleet_stats))
        .route("/api/v1/health", get(health_check))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            crate::error::Kind::Validation => StatusCode::BAD_REQUEST,
            crate::error::Kind::Conflict => StatusCode::CONFLICT,
            crate::error::Kind::NoCandidates => StatusCode::SERVICE_UNAVAILABLE,
            crate::error::Kind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            crate::error::Kind::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            crate::error::Kind::Transient | crate::error::Kind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
pub struct RegisterNodeRequest {
    pub name: String,
    pub host: IpAddr,
    pub port: u16,
    #[serde(default)]
    pub node_type: NodeType,
    pub version: String,
    pub capabilities: HashSet<String>,
    pub region: Option<String>,
    pub zone: Option<String>,
    pub group: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Serialize)]
pub struct RegisterNodeResponse {
    pub node_id: Uuid,
    pub secret: String,
    pub heartbeat_interval_secs: u64,
}

#[instrument(skip(state, req))]
async fn register_node(
    State(state): State<AppState>,
    Json(req): Json<RegisterNodeRequest>,
) -> Result<Json<RegisterNodeResponse>, OrchestratorError> {
    let registration = RegistrationRequest {
        name: req.name,
        host: req.host,
        port: req.port,
        node_type: req.node_type,
        version: req.version,
        capabilities: req.capabilities,
        region: req.region,
        zone: req.zone,
        group: req.group,
        tags: req.tags,
        metadata: req.metadata,
    };
    let registered = state.registry.register(registration).await?;
    metrics::counter!("orchestrator_nodes_registered_total", 1);

    let heartbeat_interval_secs = state.config.read().await.heartbeat_timeout_secs / 3;
    Ok(Json(RegisterNodeResponse {
        node_id: registered.node.id,
        secret: registered.secret,
        heartbeat_interval_secs,
    }))
}

#[derive(Deserialize)]
pub struct HeartbeatPayload {
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

#[instrument(skip(state, payload))]
async fn node_heartbeat(State(state): State<AppState>, Json(payload): Json<HeartbeatPayload>) -> Result<StatusCode, OrchestratorError> {
    let hb = HeartbeatRequest {
        node_id: payload.node_id,
        status: payload.status,
        cpu: payload.cpu,
        memory: payload.memory,
        disk: payload.disk,
        network: payload.network,
        load: payload.load,
        active_tasks: payload.active_tasks,
        metadata: payload.metadata,
    };
    state.registry.ingest_heartbeat(hb).await?;
    metrics::counter!("orchestrator_heartbeats_total", 1);
    Ok(StatusCode::OK)
}

async fn list_nodes(State(state): State<AppState>) -> Json<Vec<Node>> {
    Json(state.registry.list(&NodeFilter::default()))
}

async fn get_node(State(state): State<AppState>, Path(node_id): Path<Uuid>) -> Result<Json<Node>, OrchestratorError> {
    Ok(Json(state.registry.get(node_id).await?))
}

async fn unregister_node(State(state): State<AppState>, Path(node_id): Path<Uuid>) -> Result<StatusCode, OrchestratorError> {
    state.registry.unregister(node_id).await?;
    metrics::counter!("orchestrator_nodes_unregistered_total", 1);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: NodeStatus,
}

async fn update_node_status(
    State(state): State<AppState>,
    Path(node_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<StatusCode, OrchestratorError> {
    state.registry.update_status(node_id, req.status).await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
pub struct SubmitTaskRequest {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub payload: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub priority: i32,
    pub required_capability: Option<String>,
}

#[derive(Serialize)]
pub struct SubmitTaskResponse {
    pub task_id: Uuid,
}

async fn submit_task(State(state): State<AppState>, Json(req): Json<SubmitTaskRequest>) -> Result<Json<SubmitTaskResponse>, OrchestratorError> {
    let mut task = Task::new(req.task_type, req.payload, req.priority);
    if req.required_capability.is_some() {
        task.required_capability = req.required_capability;
    }
    let submitted = state.distributor.submit(task).await?;
    Ok(Json(SubmitTaskResponse { task_id: submitted.id }))
}

async fn get_task(State(state): State<AppState>, Path(task_id): Path<Uuid>) -> Result<Json<Task>, OrchestratorError> {
    let task = state
        .store
        .get_task(task_id)
        .await?
        .ok_or(OrchestratorError::UnknownTask(task_id))?;
    Ok(Json(task))
}

#[derive(Deserialize)]
pub struct StartTaskRequest {
    pub node_id: Uuid,
}

/// The executor's ack that it has picked up an assigned task. This is the
/// only path that ever moves a task into `running`; without it the timeout
/// supervisor's sweep has nothing to find.
async fn start_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(req): Json<StartTaskRequest>,
) -> Result<StatusCode, OrchestratorError> {
    state.store.start_task(task_id, req.node_id).await?;
    Ok(StatusCode::OK)
}

/// The symmetric "complete" call referenced but not defined in the reviewed
/// spec slice (§9 open question): an executor reports terminal status back
/// here, which decrements the node's active-task counter and sets the
/// task's completion fields under the same invariants `assign_task` upheld.
#[derive(Deserialize)]
pub struct CompleteTaskRequest {
    pub status: TaskStatus,
    pub error: Option<String>,
}

async fn complete_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(req): Json<CompleteTaskRequest>,
) -> Result<StatusCode, OrchestratorError> {
    let mut task = state
        .store
        .get_task(task_id)
        .await?
        .ok_or(OrchestratorError::UnknownTask(task_id))?;

    if task.is_terminal() {
        return Err(OrchestratorError::Conflict(format!("task {task_id} is already terminal")));
    }
    if !matches!(req.status, TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled) {
        return Err(OrchestratorError::Validation(
            "complete accepts only succeeded, failed, or cancelled".to_string(),
        ));
    }

    task.status = req.status;
    task.error = req.error;
    task.completed_at = Some(Utc::now());
    task.updated_at = Utc::now();

    let node_id = task.assigned_node;
    state.store.complete_task(task).await?;

    if let Some(node_id) = node_id {
        if let Ok(node) = state.registry.get(node_id).await {
            state.registry.refresh_cached_node(node);
        }
        let success = matches!(req.status, TaskStatus::Succeeded);
        state.balancer.update_metrics(node_id, success, std::time::Duration::from_secs(0));
    }

    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
pub struct BalancerMetricsReport {
    pub node_id: Uuid,
    pub success: bool,
    pub duration_ms: u64,
}

async fn report_balancer_metrics(State(state): State<AppState>, Json(req): Json<BalancerMetricsReport>) -> StatusCode {
    state
        .balancer
        .update_metrics(req.node_id, req.success, std::time::Duration::from_millis(req.duration_ms));
    StatusCode::OK
}

#[derive(Serialize)]
pub struct FleetStats {
    pub total_nodes: usize,
    pub online_nodes: usize,
    pub total_active_tasks: u32,
    pub avg_cpu: f32,
    pub avg_memory: f32,
}

async fn fleet_stats(State(state): State<AppState>) -> Json<FleetStats> {
    let nodes = state.registry.list(&NodeFilter::default());
    let total_nodes = nodes.len();
    let online_nodes = nodes.iter().filter(|n| n.status == NodeStatus::Online).count();
    let total_active_tasks: u32 = nodes.iter().map(|n| n.active_tasks).sum();
    let (avg_cpu, avg_memory) = if total_nodes == 0 {
        (0.0, 0.0)
    } else {
        let cpu_sum: f32 = nodes.iter().map(|n| n.telemetry.cpu).sum();
        let mem_sum: f32 = nodes.iter().map(|n| n.telemetry.memory).sum();
        (cpu_sum / total_nodes as f32, mem_sum / total_nodes as f32)
    };

    Json(FleetStats {
        total_nodes,
        online_nodes,
        total_active_tasks,
        avg_cpu,
        avg_memory,
    })
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}
