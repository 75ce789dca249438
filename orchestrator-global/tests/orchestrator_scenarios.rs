//! Integration scenarios for the global orchestrator
//!
//! The orchestrator runs against an in-memory registry and a scripted health
//! probe, so no external services are needed.
//!
//! Usage:
//!   cargo test --test orchestrator_scenarios

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

use orchestrator_global::config::{FailoverGroupConfig, OrchestratorConfig};
use orchestrator_global::manager::OrchestratorEvent;
use orchestrator_global::services::{DiscoveryEvent, HealthEvent};
use orchestrator_global::types::{FailoverState, FailoverType, RoutingAlgorithm};
use orchestrator_global::{
    ConfigManager, ErrorCode, FailoverService, FederationId, GlobalNodeInfo, GlobalOrchestratorManager,
    HealthMonitoringService, HealthProbe, HealthStatus, IntelligentRoutingService, LoadMetrics,
    NodeDiscoveryService, NodeId, OrchestratorError, OrchestratorMessage, StaticNodeRegistry,
};

/// Probe whose answers are controlled by the test
#[derive(Default)]
struct ScriptedProbe {
    failing: Mutex<HashSet<NodeId>>,
}

impl ScriptedProbe {
    fn fail(&self, node_id: &str) {
        self.failing.lock().unwrap().insert(NodeId::new(node_id));
    }

    fn heal(&self, node_id: &str) {
        self.failing.lock().unwrap().remove(&NodeId::new(node_id));
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn check(&self, node: &GlobalNodeInfo) -> orchestrator_global::Result<()> {
        if self.failing.lock().unwrap().contains(&node.node_id) {
            Err(OrchestratorError::health_check("probe refused"))
        } else {
            Ok(())
        }
    }

    async fn collect_metrics(&self, _node: &GlobalNodeInfo) -> orchestrator_global::Result<LoadMetrics> {
        Ok(LoadMetrics {
            cpu_usage: 20.0,
            ..LoadMetrics::default()
        })
    }
}

fn node(id: &str, federation: &str, cpu: f64) -> GlobalNodeInfo {
    GlobalNodeInfo::new(id, federation, "10.0.0.1", 8080).with_load(LoadMetrics {
        cpu_usage: cpu,
        ..LoadMetrics::default()
    })
}

fn group(id: &str, primary: &str, backups: &[&str]) -> FailoverGroupConfig {
    FailoverGroupConfig {
        group_id: id.to_string(),
        primary_node_id: primary.to_string(),
        backup_node_ids: backups.iter().map(|b| b.to_string()).collect(),
        failover_strategy: Default::default(),
        health_check_interval_ms: 15_000,
    }
}

/// Helper: poll `condition` until it holds or five seconds pass
async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Helper: orchestrator with fast health checks over three nodes in one group
fn running_cluster_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.health_monitoring.check_interval_ms = 50;
    config.health_monitoring.timeout_ms = 200;
    config.health_monitoring.metrics_collection_interval_ms = 100;
    config.health_monitoring.unhealthy_threshold = 1;
    config.health_monitoring.healthy_threshold = 1;
    config.scaling.enabled = false;
    config.failover.groups = vec![group("g1", "p1", &["b1", "b2"])];
    config
}

fn build_manager(
    config: OrchestratorConfig,
    probe: Arc<ScriptedProbe>,
) -> Result<Arc<GlobalOrchestratorManager>> {
    let registry = Arc::new(StaticNodeRegistry::new(vec![
        node("p1", "f1", 20.0),
        node("b1", "f1", 20.0),
        node("b2", "f1", 20.0),
    ]));
    let config_manager = Arc::new(ConfigManager::new(config, None)?);
    let manager = GlobalOrchestratorManager::builder(config_manager)
        .node_registry(registry)
        .health_probe(probe)
        .build()?;
    Ok(Arc::new(manager))
}

// ==============================================================================
// Scenario 1: Routing algorithms
// ==============================================================================

#[test]
fn test_least_connections_prefers_least_loaded_node() -> Result<()> {
    let mut config = OrchestratorConfig::default();
    config.routing.algorithm = RoutingAlgorithm::LeastConnections;
    let routing = IntelligentRoutingService::new(config.routing, config.federation);
    routing.initialize(&[node("n2", "f1", 50.0), node("n1", "f1", 10.0), node("n3", "f1", 90.0)]);

    let message = OrchestratorMessage::new("m1", "sync", "client").to_federation("f1");
    for _ in 0..50 {
        let decision = routing.route_message(&message)?;
        assert_eq!(decision.target_node_id, NodeId::new("n1"));
        assert_eq!(decision.reason, "least_connections");
        assert_eq!(decision.alternatives.len(), 2);
    }
    Ok(())
}

#[test]
fn test_weighted_round_robin_follows_free_capacity() -> Result<()> {
    let mut config = OrchestratorConfig::default();
    config.routing.algorithm = RoutingAlgorithm::WeightedRoundRobin;
    let routing = IntelligentRoutingService::new(config.routing, config.federation);
    // weights 100 and 25
    routing.initialize(&[node("n1", "f1", 0.0), node("n2", "f1", 75.0)]);

    let message = OrchestratorMessage::new("m1", "sync", "client").to_federation("f1");
    let mut counts: HashMap<NodeId, usize> = HashMap::new();
    for _ in 0..10_000 {
        *counts.entry(routing.route_message(&message)?.target_node_id).or_default() += 1;
    }

    let share = counts[&NodeId::new("n1")] as f64 / 10_000.0;
    assert!((0.78..=0.82).contains(&share), "n1 share was {}", share);
    Ok(())
}

#[test]
fn test_unknown_federation_is_a_routing_failure() {
    let config = OrchestratorConfig::default();
    let routing = IntelligentRoutingService::new(config.routing, config.federation);
    routing.initialize(&[node("n1", "f1", 10.0)]);

    let message = OrchestratorMessage::new("m1", "sync", "client").to_federation("f2");
    let err = routing.route_message(&message).unwrap_err();
    assert_eq!(err.code, ErrorCode::RoutingFailed);
    assert_eq!(routing.get_routing_stats().routing_failures, 1);
}

// ==============================================================================
// Scenario 2: Failover state machine
// ==============================================================================

#[test]
fn test_failover_skips_unhealthy_backup() -> Result<()> {
    let config = OrchestratorConfig::default();
    let failover = FailoverService::new(config.failover)?;
    failover.create_failover_group(group("g1", "n1", &["n2", "n3"]))?;
    failover.update_node_health(&NodeId::new("n2"), HealthStatus::Unhealthy);
    failover.update_node_health(&NodeId::new("n3"), HealthStatus::Healthy);

    let events = failover.handle_node_failure(&NodeId::new("n1"), "crash")?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].backup_node_id, NodeId::new("n3"));

    let group = failover.get_group("g1").unwrap();
    assert_eq!(group.primary_node_id, NodeId::new("n3"));
    assert_eq!(group.state, FailoverState::FailedOver);
    assert!(group.backup_node_ids.contains(&NodeId::new("n1")));
    Ok(())
}

#[test]
fn test_failover_without_healthy_backup_leaves_group_unprotected() -> Result<()> {
    let config = OrchestratorConfig::default();
    let failover = FailoverService::new(config.failover)?;
    failover.create_failover_group(group("g1", "n1", &["n2", "n3"]))?;
    failover.update_node_health(&NodeId::new("n2"), HealthStatus::Unhealthy);
    failover.update_node_health(&NodeId::new("n3"), HealthStatus::Unhealthy);

    let err = failover.handle_node_failure(&NodeId::new("n1"), "crash").unwrap_err();
    assert_eq!(err.code, ErrorCode::FailoverFailed);
    assert_eq!(err.details.unwrap()["groupIds"][0], "g1");

    let group = failover.get_group("g1").unwrap();
    assert_eq!(group.primary_node_id, NodeId::new("n1"));
    assert_eq!(group.state, FailoverState::FailingOver);

    // a backup coming back promotes it
    let events = failover.recover_node(&NodeId::new("n3"));
    assert_eq!(events.len(), 1);
    assert_eq!(failover.get_group("g1").unwrap().primary_node_id, NodeId::new("n3"));
    Ok(())
}

#[test]
fn test_recovered_primary_fails_back() -> Result<()> {
    let config = OrchestratorConfig::default();
    let failover = FailoverService::new(config.failover)?;
    failover.create_failover_group(group("g1", "n1", &["n2"]))?;

    failover.handle_node_failure(&NodeId::new("n1"), "crash")?;
    assert_eq!(failover.get_group("g1").unwrap().primary_node_id, NodeId::new("n2"));

    let events = failover.recover_node(&NodeId::new("n1"));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, FailoverType::Recovery);

    let group = failover.get_group("g1").unwrap();
    assert_eq!(group.primary_node_id, NodeId::new("n1"));
    assert_eq!(group.state, FailoverState::Stable);
    assert_eq!(failover.total_failover_events(), 2);
    Ok(())
}

// ==============================================================================
// Scenario 3: Health hysteresis and node loss
// ==============================================================================

#[tokio::test]
async fn test_health_transitions_need_consecutive_results() -> Result<()> {
    let config = OrchestratorConfig::default();
    let health = HealthMonitoringService::with_probe(config.health_monitoring, Arc::new(ScriptedProbe::default()));
    let mut events = health.subscribe();
    let id = NodeId::new("n1");

    assert_eq!(health.record_probe_result(&id, true, None), HealthStatus::Healthy);
    assert!(matches!(events.try_recv()?, HealthEvent::NodeHealthy { .. }));

    // unhealthy_threshold = 3
    assert_eq!(health.record_probe_result(&id, false, None), HealthStatus::Degraded);
    assert_eq!(health.record_probe_result(&id, false, None), HealthStatus::Degraded);
    assert!(events.try_recv().is_err());
    assert_eq!(
        health.record_probe_result(&id, false, Some("timeout".to_string())),
        HealthStatus::Unhealthy
    );
    match events.try_recv()? {
        HealthEvent::NodeUnhealthy { reason, .. } => assert_eq!(reason, "timeout"),
        other => panic!("unexpected event {:?}", other),
    }

    // healthy_threshold = 2
    assert_eq!(health.record_probe_result(&id, true, None), HealthStatus::Unhealthy);
    assert_eq!(health.record_probe_result(&id, true, None), HealthStatus::Healthy);
    assert!(matches!(events.try_recv()?, HealthEvent::NodeHealthy { .. }));
    Ok(())
}

#[tokio::test]
async fn test_lost_node_is_reported_once() -> Result<()> {
    let mut config = OrchestratorConfig::default();
    config.discovery.node_timeout_ms = 50;
    let discovery = NodeDiscoveryService::with_registry(config.discovery, Arc::new(StaticNodeRegistry::new(vec![])));
    discovery.register_node(node("n1", "f1", 10.0))?;
    let mut events = discovery.subscribe();

    sleep(Duration::from_millis(120)).await;
    assert_eq!(discovery.sweep_lost_nodes().len(), 1);
    assert!(discovery.sweep_lost_nodes().is_empty());

    assert!(matches!(events.try_recv()?, DiscoveryEvent::NodeLost(_)));
    assert!(events.try_recv().is_err());
    assert_eq!(discovery.get_node_count(), 0);
    Ok(())
}

// ==============================================================================
// Scenario 4: Running orchestrator
// ==============================================================================

#[tokio::test]
async fn test_start_twice_is_a_noop() -> Result<()> {
    let manager = build_manager(running_cluster_config(), Arc::new(ScriptedProbe::default()))?;

    let mut events = manager.subscribe();

    manager.start().await?;
    manager.start().await?;
    assert!(manager.is_running().await);
    assert_eq!(manager.discovery().get_node_count(), 3);
    assert_eq!(manager.routing().get_routing_table().len(), 1);

    // one discovery announcement per node despite the second start
    let mut discovered: HashMap<NodeId, usize> = HashMap::new();
    let deadline = Instant::now() + Duration::from_millis(500);
    while Instant::now() < deadline {
        match timeout(Duration::from_millis(50), events.recv()).await {
            Ok(Ok(OrchestratorEvent::NodeDiscovered(node))) => {
                *discovered.entry(node.node_id).or_default() += 1;
            }
            Ok(Ok(_)) | Err(_) => {}
            Ok(Err(e)) => panic!("event stream failed: {}", e),
        }
    }
    assert_eq!(discovered.len(), 3);
    assert!(discovered.values().all(|count| *count == 1), "{:?}", discovered);

    manager.stop().await;
    assert!(!manager.is_running().await);
    manager.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_unhealthy_primary_fails_over_and_back() -> Result<()> {
    let probe = Arc::new(ScriptedProbe::default());
    let manager = build_manager(running_cluster_config(), Arc::clone(&probe))?;
    let mut events = manager.subscribe();
    manager.start().await?;

    let primary_of_g1 = |m: &GlobalOrchestratorManager| m.failover().get_group("g1").map(|g| g.primary_node_id);
    assert!(eventually(|| manager.health().get_healthy_nodes().len() == 3).await);

    probe.fail("p1");
    assert!(eventually(|| primary_of_g1(&manager) == Some(NodeId::new("b1"))).await);
    assert!(eventually(|| {
        manager.routing().get_routing_table()[&FederationId::new("f1")]
            .iter()
            .all(|d| d.target_node_id != NodeId::new("p1"))
    })
    .await);

    let mut saw_failover = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, OrchestratorEvent::FailoverCompleted(_)) {
            saw_failover = true;
        }
    }
    assert!(saw_failover);

    probe.heal("p1");
    assert!(eventually(|| primary_of_g1(&manager) == Some(NodeId::new("p1"))).await);
    assert!(eventually(|| manager.routing().get_routing_table()[&FederationId::new("f1")].len() == 3).await);

    manager.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected() -> Result<()> {
    let manager = build_manager(running_cluster_config(), Arc::new(ScriptedProbe::default()))?;
    manager.start().await?;
    let before = manager.get_configuration();

    let err = manager
        .update_configuration(serde_json::json!({ "scaling": { "scale_up_threshold": 10.0 } }))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ConfigurationError);
    assert_eq!(manager.get_configuration().scaling, before.scaling);

    let mut events = manager.subscribe();
    manager
        .update_configuration(serde_json::json!({ "health_monitoring": { "check_interval_ms": 75 } }))
        .await?;
    let applied = timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(OrchestratorEvent::ConfigUpdated(config)) => return Some(config),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await?;
    assert_eq!(applied.map(|c| c.health_monitoring.check_interval_ms), Some(75));

    manager.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_healthy_registered_node_outlives_node_timeout() -> Result<()> {
    let mut config = running_cluster_config();
    config.failover.groups.clear();
    config.discovery.node_timeout_ms = 200;
    config.discovery.heartbeat_interval_ms = 50;

    let config_manager = Arc::new(ConfigManager::new(config, None)?);
    let manager = Arc::new(
        GlobalOrchestratorManager::builder(config_manager)
            .health_probe(Arc::new(ScriptedProbe::default()))
            .build()?,
    );
    let mut events = manager.subscribe();
    manager.start().await?;
    manager.register_node(node("n1", "f1", 20.0))?;

    sleep(Duration::from_millis(600)).await;

    assert!(manager.discovery().get_node_by_id(&NodeId::new("n1")).is_some());
    let message = OrchestratorMessage::new("m1", "sync", "client").to_federation("f1");
    assert_eq!(manager.route_message(&message)?.target_node_id, NodeId::new("n1"));
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, OrchestratorEvent::NodeLost(_)), "n1 was reported lost");
    }

    manager.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_failover_groups_follow_configuration_updates() -> Result<()> {
    let manager = build_manager(running_cluster_config(), Arc::new(ScriptedProbe::default()))?;
    manager.start().await?;

    manager
        .update_configuration(serde_json::json!({
            "failover": { "groups": [
                { "group_id": "g1", "primary_node_id": "p1", "backup_node_ids": ["b2"] },
                { "group_id": "g2", "primary_node_id": "b1", "backup_node_ids": ["b2"] },
            ]}
        }))
        .await?;
    assert!(eventually(|| {
        manager.failover().get_group("g1").map(|g| g.backup_node_ids) == Some(vec![NodeId::new("b2")])
            && manager.failover().get_group("g2").is_some()
    })
    .await);

    // duplicate backups are rejected as a whole
    let before = manager.get_configuration();
    let err = manager
        .update_configuration(serde_json::json!({
            "failover": { "groups": [
                { "group_id": "g3", "primary_node_id": "p1", "backup_node_ids": ["b1", "b1"] },
            ]}
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ConfigurationError);
    assert_eq!(manager.get_configuration().failover, before.failover);
    assert!(manager.failover().get_group("g3").is_none());

    manager
        .update_configuration(serde_json::json!({ "failover": { "groups": [] } }))
        .await?;
    assert!(eventually(|| manager.failover().get_failover_groups().is_empty()).await);

    manager.stop().await;
    Ok(())
}
