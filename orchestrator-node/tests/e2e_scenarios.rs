//! End-to-end scenarios exercising the full registry -> queue -> balancer ->
//! distributor -> supervisor pipeline in-process, without an HTTP layer.
//!
//! Each test wires up a fresh set of components (store, registry, queue,
//! balancer, distributor, supervisor) the same way `main` does, then drives
//! the scenarios described for the control plane end to end.

use orchestrator_node::balancer::{LoadBalancer, Strategy};
use orchestrator_node::config::OrchestratorConfig;
use orchestrator_node::distributor::TaskDistributor;
use orchestrator_node::events::EventBus;
use orchestrator_node::queue::PriorityTaskQueue;
use orchestrator_node::registry::{NodeRegistry, RegistrationRequest};
use orchestrator_node::store::{InMemoryStore, Store};
use orchestrator_node::supervisor::TimeoutSupervisor;
use orchestrator_node::types::{NodeType, Task, TaskStatus};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

struct System {
    registry: Arc<NodeRegistry>,
    distributor: Arc<TaskDistributor>,
    supervisor: Arc<TimeoutSupervisor>,
    queue: Arc<PriorityTaskQueue>,
    balancer: Arc<LoadBalancer>,
    store: Arc<dyn Store>,
}

fn build_system(config: OrchestratorConfig) -> System {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let events = Arc::new(EventBus::new(store.clone()));
    let config_handle = Arc::new(RwLock::new(config.clone()));
    let registry = Arc::new(NodeRegistry::new(store.clone(), events.clone(), config_handle.clone()));
    let balancer = Arc::new(LoadBalancer::new(config.strategy.into()));
    let queue = Arc::new(PriorityTaskQueue::new(config.queue.max_size, config.priority_enabled));
    let distributor = Arc::new(TaskDistributor::new(
        queue.clone(),
        registry.clone(),
        store.clone(),
        balancer.clone(),
        events.clone(),
        config_handle,
    ));
    let supervisor = Arc::new(TimeoutSupervisor::new(store.clone(), events));

    System {
        registry,
        distributor,
        supervisor,
        queue,
        balancer,
        store,
    }
}

fn registration(name: &str, port: u16, capabilities: &[&str]) -> RegistrationRequest {
    RegistrationRequest {
        name: name.to_string(),
        host: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
        port,
        node_type: NodeType::Worker,
        version: "1.0".to_string(),
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        region: None,
        zone: None,
        group: None,
        tags: vec![],
        metadata: HashMap::new(),
    }
}

/// Runs the distributor's loop for one tick (`distribute` itself is
/// private): a task already sitting on the queue from `submit` is picked up
/// immediately, then the loop is told to shut down.
async fn distribute_one(system: &System) {
    let (tx, rx) = tokio::sync::broadcast::channel::<()>(1);
    let distributor = system.distributor.clone();
    let handle = tokio::spawn(distributor.run(rx));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn scenario_1_happy_path() {
    let system = build_system(OrchestratorConfig::default());
    let registered = system
        .registry
        .register(registration("n1", 9601, &["vuln_scan"]))
        .await
        .unwrap();

    let mut task = Task::new("vuln_scan".to_string(), HashMap::new(), 0);
    task.required_capability = Some("vuln_scan".to_string());
    let submitted = system.distributor.submit(task).await.unwrap();

    distribute_one(&system).await;

    let stored = system.store.get_task(submitted.id).await.unwrap().unwrap();
    assert_eq!(stored.assigned_node, Some(registered.node.id));
    assert!(stored.timeout_at.is_some());

    let node_after = system.registry.get(registered.node.id).await.unwrap();
    assert_eq!(node_after.active_tasks, 1);
}

#[tokio::test]
async fn scenario_2_capability_filter_routes_regardless_of_balancer() {
    for strategy in [Strategy::RoundRobin, Strategy::LeastLoaded, Strategy::Random, Strategy::Hash] {
        let mut config = OrchestratorConfig::default();
        config.strategy = match strategy {
            Strategy::RoundRobin => orchestrator_node::config::BalancerStrategy::RoundRobin,
            Strategy::LeastLoaded => orchestrator_node::config::BalancerStrategy::LeastLoaded,
            Strategy::Random => orchestrator_node::config::BalancerStrategy::Random,
            Strategy::Hash => orchestrator_node::config::BalancerStrategy::Hash,
            _ => unreachable!(),
        };
        let system = build_system(config);

        system.registry.register(registration("n1", 9602, &["port_scan"])).await.unwrap();
        let n2 = system.registry.register(registration("n2", 9603, &["vuln_scan"])).await.unwrap();

        let mut task = Task::new("vuln_scan".to_string(), HashMap::new(), 0);
        task.required_capability = Some("vuln_scan".to_string());
        let submitted = system.distributor.submit(task).await.unwrap();

        distribute_one(&system).await;

        let stored = system.store.get_task(submitted.id).await.unwrap().unwrap();
        assert_eq!(stored.assigned_node, Some(n2.node.id), "strategy {strategy:?} placed task on the wrong node");
    }
}

#[tokio::test]
async fn scenario_3_priority_ordering() {
    let queue = PriorityTaskQueue::new(10, true);
    let low = Task::new("vuln_scan".to_string(), HashMap::new(), 0);
    let high = Task::new("vuln_scan".to_string(), HashMap::new(), 10);
    let mid = Task::new("vuln_scan".to_string(), HashMap::new(), 5);

    queue.enqueue_priority(low).await.unwrap();
    queue.enqueue_priority(high).await.unwrap();
    queue.enqueue_priority(mid).await.unwrap();

    let first = queue.try_dequeue().await.unwrap();
    let second = queue.try_dequeue().await.unwrap();
    let third = queue.try_dequeue().await.unwrap();

    assert_eq!((first.priority, second.priority, third.priority), (10, 5, 0));
}

#[tokio::test]
async fn scenario_4_node_failure_during_execution() {
    let mut config = OrchestratorConfig::default();
    config.heartbeat_timeout_secs = 0; // any elapsed time counts as stale for this test
    config.auto_remove_after_secs = 1;
    let system = build_system(config);

    let registered = system.registry.register(registration("n1", 9604, &["vuln_scan"])).await.unwrap();

    let task = Task::new("vuln_scan".to_string(), HashMap::new(), 0);
    let assigned = system.store.assign_task(task, registered.node.id, 10).await.unwrap();
    system.registry.refresh_cached_node(system.store.get_node(registered.node.id).await.unwrap().unwrap());

    // The executor acks the task through the same start_task transition a
    // real executor-agent would call, then the test backdates the deadline
    // so the supervisor's sweep finds it already overdue.
    let running = system.store.start_task(assigned.id, registered.node.id).await.unwrap();
    let mut running = running;
    running.timeout_at = Some(chrono::Utc::now() - chrono::Duration::seconds(5));
    system.store.put_task(running.clone()).await.unwrap();

    // Heartbeat stops: with heartbeat_timeout_secs=0 a sweep would mark the
    // node offline immediately. `sweep_once` is private, so apply the same
    // transition the sweep would via the public status-update entry point.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let node = system.registry.get(registered.node.id).await.unwrap();
    if node.status == orchestrator_node::types::NodeStatus::Online {
        system
            .registry
            .update_status(registered.node.id, orchestrator_node::types::NodeStatus::Offline)
            .await
            .unwrap();
    }

    system.supervisor.sweep().await;

    let task_after = system.store.get_task(running.id).await.unwrap().unwrap();
    assert_eq!(task_after.status, TaskStatus::Timeout);

    let node_after = system.store.get_node(registered.node.id).await.unwrap().unwrap();
    assert_eq!(node_after.active_tasks, 0);
}

#[tokio::test]
async fn scenario_5_retry_on_no_candidates_eventually_fails() {
    let mut config = OrchestratorConfig::default();
    config.retry_policy.max = 3;
    config.retry_policy.initial_delay_ms = 5;
    config.retry_policy.max_delay_ms = 20;
    config.retry_policy.backoff_factor = 2.0;
    let system = build_system(config);

    // No node offers this capability.
    system.registry.register(registration("n1", 9605, &["port_scan"])).await.unwrap();

    let mut task = Task::new("vuln_scan".to_string(), HashMap::new(), 0);
    task.required_capability = Some("vuln_scan".to_string());
    let submitted = system.distributor.submit(task).await.unwrap();

    let (tx, rx) = tokio::sync::broadcast::channel::<()>(1);
    let distributor = system.distributor.clone();
    let handle = tokio::spawn(distributor.run(rx));

    // Give every retry (spawned sleeps: 5ms, 10ms, 20ms) time to exhaust.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let _ = tx.send(());
    let _ = handle.await;

    let stored = system.store.get_task(submitted.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert!(stored.error.as_deref().unwrap_or("").contains("no eligible candidate"));
    assert_eq!(stored.retry_count, 3);
}

#[tokio::test]
async fn scenario_6_weighted_learning_favors_the_reliable_node() {
    let mut config = OrchestratorConfig::default();
    config.strategy = orchestrator_node::config::BalancerStrategy::Weighted;
    let system = build_system(config);

    let n1 = system.registry.register(registration("n1", 9606, &["vuln_scan"])).await.unwrap();
    let n2 = system.registry.register(registration("n2", 9607, &["vuln_scan"])).await.unwrap();

    for _ in 0..10 {
        system.balancer.update_metrics(n1.node.id, true, Duration::from_millis(1));
    }
    for _ in 0..3 {
        system.balancer.update_metrics(n2.node.id, false, Duration::from_millis(1));
    }

    assert!(system.balancer.weight_of(n1.node.id) > system.balancer.weight_of(n2.node.id));
}
