//! Root of the orchestrator: owns the services, wires their events together
//! and keeps the aggregated topology snapshot.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ConfigEvent, ConfigManager, FailoverGroupConfig, OrchestratorConfig};
use crate::error::{OrchestratorError, Result};
use crate::services::{
    AutoScalingService, DiscoveryEvent, FailoverNotification, FailoverService, HealthEvent,
    HealthMonitoringService, HealthProbe, IntelligentRoutingService, NodeDiscoveryService,
    NodeRegistry, RoutingEvent, ScalingEvent,
};
use crate::types::{
    FailoverEvent, FailoverGroup, FederationId, FederationState, FederationStatus,
    GlobalCapability, GlobalMetrics, GlobalNodeInfo, GlobalTopology, HealthStatus, LoadMetrics, NodeId,
    NodeStatus, OrchestratorMessage, OrchestratorStatus, RoutingDecision, ScalingAction,
    ScalingDecision, ServiceHealth, ServiceStatus,
};

/// Events re-published by the orchestrator
#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum OrchestratorEvent {
    NodeDiscovered(GlobalNodeInfo),
    NodeLost(GlobalNodeInfo),
    NodeHealthy {
        node_id: NodeId,
    },
    NodeUnhealthy {
        node_id: NodeId,
        reason: String,
    },
    MessageRouted {
        message_id: String,
        decision: RoutingDecision,
    },
    ScalingExecuted(ScalingDecision),
    FailoverCompleted(FailoverEvent),
    FailoverFailed {
        group_id: String,
        failed_node_id: NodeId,
        reason: String,
    },
    ConfigUpdated(OrchestratorConfig),
    TopologyUpdated {
        federations: usize,
        total_nodes: usize,
        last_updated: DateTime<Utc>,
    },
}

impl OrchestratorEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorEvent::NodeDiscovered(_) => "nodeDiscovered",
            OrchestratorEvent::NodeLost(_) => "nodeLost",
            OrchestratorEvent::NodeHealthy { .. } => "nodeHealthy",
            OrchestratorEvent::NodeUnhealthy { .. } => "nodeUnhealthy",
            OrchestratorEvent::MessageRouted { .. } => "messageRouted",
            OrchestratorEvent::ScalingExecuted(_) => "scalingExecuted",
            OrchestratorEvent::FailoverCompleted(_) => "failoverCompleted",
            OrchestratorEvent::FailoverFailed { .. } => "failoverFailed",
            OrchestratorEvent::ConfigUpdated(_) => "configUpdated",
            OrchestratorEvent::TopologyUpdated { .. } => "topologyUpdated",
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    running: bool,
    shutdown: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

/// Builds a manager, optionally with custom registry and probe implementations
pub struct OrchestratorBuilder {
    config_manager: Arc<ConfigManager>,
    node_registry: Option<Arc<dyn NodeRegistry>>,
    health_probe: Option<Arc<dyn HealthProbe>>,
}

impl OrchestratorBuilder {
    pub fn node_registry(mut self, registry: Arc<dyn NodeRegistry>) -> Self {
        self.node_registry = Some(registry);
        self
    }

    pub fn health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.health_probe = Some(probe);
        self
    }

    pub fn build(self) -> Result<GlobalOrchestratorManager> {
        let config = self.config_manager.get_config();

        let discovery = match self.node_registry {
            Some(registry) => NodeDiscoveryService::with_registry(config.discovery.clone(), registry),
            None => NodeDiscoveryService::new(config.discovery.clone())?,
        };
        let health = match self.health_probe {
            Some(probe) => HealthMonitoringService::with_probe(config.health_monitoring.clone(), probe),
            None => HealthMonitoringService::new(config.health_monitoring.clone())?,
        }
        .with_liveness(discovery.registry());
        let routing = IntelligentRoutingService::new(config.routing.clone(), config.federation.clone());
        let scaling = AutoScalingService::new(config.scaling.clone(), discovery.registry())?;
        let failover = FailoverService::new(config.failover.clone())?;

        let (events, _) = broadcast::channel(1024);
        Ok(GlobalOrchestratorManager {
            config_manager: self.config_manager,
            discovery: Arc::new(discovery),
            health: Arc::new(health),
            routing: Arc::new(routing),
            scaling: Arc::new(scaling),
            failover: Arc::new(failover),
            topology: ArcSwap::from_pointee(GlobalTopology::empty()),
            events,
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
            started_at: Mutex::new(None),
        })
    }
}

/// Global orchestrator: lifecycle, event wiring and the public control surface
pub struct GlobalOrchestratorManager {
    config_manager: Arc<ConfigManager>,
    discovery: Arc<NodeDiscoveryService>,
    health: Arc<HealthMonitoringService>,
    routing: Arc<IntelligentRoutingService>,
    scaling: Arc<AutoScalingService>,
    failover: Arc<FailoverService>,
    topology: ArcSwap<GlobalTopology>,
    events: broadcast::Sender<OrchestratorEvent>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    started_at: Mutex<Option<Instant>>,
}

impl GlobalOrchestratorManager {
    pub fn builder(config_manager: Arc<ConfigManager>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config_manager,
            node_registry: None,
            health_probe: None,
        }
    }

    /// Manager with the HTTP registry and probe
    pub fn new(config_manager: Arc<ConfigManager>) -> Result<Self> {
        Self::builder(config_manager).build()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    pub fn discovery(&self) -> &Arc<NodeDiscoveryService> {
        &self.discovery
    }

    pub fn health(&self) -> &Arc<HealthMonitoringService> {
        &self.health
    }

    pub fn routing(&self) -> &Arc<IntelligentRoutingService> {
        &self.routing
    }

    pub fn scaling(&self) -> &Arc<AutoScalingService> {
        &self.scaling
    }

    pub fn failover(&self) -> &Arc<FailoverService> {
        &self.failover
    }

    pub async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.running
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.events.send(event);
    }

    /// Start every service and the event listener. Calling it again is a no-op.
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.running {
            debug!("Global orchestrator already running");
            return Ok(());
        }

        let config = self.config_manager.get_config();
        info!(orchestrator_id = %config.orchestrator_id, "Starting global orchestrator");
        self.apply_config(&config);

        // subscribe before starting so the initial discovery pass is not missed
        let discovery_rx = self.discovery.subscribe();
        let health_rx = self.health.subscribe();
        let routing_rx = self.routing.subscribe();
        let scaling_rx = self.scaling.subscribe();
        let failover_rx = self.failover.subscribe();
        let config_rx = self.config_manager.subscribe();

        if let Err(e) = self.discovery.start().await {
            error!(error = %e, "Failed to start node discovery");
            self.discovery.stop().await;
            return Err(e);
        }
        self.health.start();
        self.scaling.start();

        let nodes = self.discovery.get_discovered_nodes();
        self.routing.initialize(&nodes);
        for node in nodes {
            if let Some(metrics) = &node.load_metrics {
                self.failover.update_node_load(&node.node_id, metrics.load());
            }
            self.health.watch_node(node);
        }

        let token = CancellationToken::new();
        let listener = {
            let manager = Arc::clone(self);
            let token = token.clone();
            tokio::spawn(async move {
                manager
                    .run_event_listener(
                        token,
                        discovery_rx,
                        health_rx,
                        routing_rx,
                        scaling_rx,
                        failover_rx,
                        config_rx,
                    )
                    .await;
            })
        };
        lifecycle.tasks.push(listener);
        if let Some(watch) = Arc::clone(&self.config_manager).spawn_watch_task(token.clone()) {
            lifecycle.tasks.push(watch);
        }

        lifecycle.shutdown = Some(token);
        lifecycle.running = true;
        if let Ok(mut started_at) = self.started_at.lock() {
            *started_at = Some(Instant::now());
        }
        drop(lifecycle);

        self.refresh_topology();
        metrics::gauge!("orchestrator_running", 1.0);
        info!(
            nodes = self.discovery.get_node_count(),
            federations = self.routing.get_federation_ids().len(),
            "Global orchestrator started"
        );
        Ok(())
    }

    /// Stop listeners and services. Safe to call when not running.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if !lifecycle.running {
            return;
        }
        info!("Stopping global orchestrator");

        if let Some(token) = lifecycle.shutdown.take() {
            token.cancel();
        }
        for task in lifecycle.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Orchestrator task ended abnormally");
            }
        }

        tokio::join!(self.discovery.stop(), self.health.stop(), self.scaling.stop());

        lifecycle.running = false;
        if let Ok(mut started_at) = self.started_at.lock() {
            *started_at = None;
        }
        metrics::gauge!("orchestrator_running", 0.0);
        info!("Global orchestrator stopped");
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_event_listener(
        self: Arc<Self>,
        token: CancellationToken,
        mut discovery_rx: broadcast::Receiver<DiscoveryEvent>,
        mut health_rx: broadcast::Receiver<HealthEvent>,
        mut routing_rx: broadcast::Receiver<RoutingEvent>,
        mut scaling_rx: broadcast::Receiver<ScalingEvent>,
        mut failover_rx: broadcast::Receiver<FailoverNotification>,
        mut config_rx: broadcast::Receiver<ConfigEvent>,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = discovery_rx.recv() => {
                    if let Some(event) = self.received(event, "discovery") {
                        self.on_discovery_event(event);
                    }
                }
                event = health_rx.recv() => {
                    if let Some(event) = self.received(event, "health") {
                        self.on_health_event(event);
                    }
                }
                event = routing_rx.recv() => {
                    if let Some(RoutingEvent::MessageRouted { decision, message }) = self.received(event, "routing") {
                        self.emit(OrchestratorEvent::MessageRouted {
                            message_id: message.id,
                            decision,
                        });
                    }
                }
                event = scaling_rx.recv() => {
                    if let Some(ScalingEvent::ScalingExecuted(decision)) = self.received(event, "scaling") {
                        info!(
                            action = ?decision.action,
                            targets = decision.target_nodes.len(),
                            "Scaling executed"
                        );
                        self.emit(OrchestratorEvent::ScalingExecuted(decision));
                        self.refresh_topology();
                    }
                }
                event = failover_rx.recv() => {
                    if let Some(event) = self.received(event, "failover") {
                        self.on_failover_event(event);
                    }
                }
                event = config_rx.recv() => {
                    if let Some(event) = self.received(event, "config") {
                        self.on_config_event(event).await;
                    }
                }
            }
        }
        debug!("Orchestrator event listener stopped");
    }

    /// Unwrap a received event; a lagging receiver triggers a full resync
    fn received<E>(&self, result: std::result::Result<E, RecvError>, source: &str) -> Option<E> {
        match result {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(source = source, skipped = skipped, "Event listener lagged, resynchronizing");
                self.resync();
                None
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Rebuild routing and the probe set from the discovery registry
    fn resync(&self) {
        let nodes = self.discovery.get_discovered_nodes();
        let unhealthy: BTreeSet<NodeId> = self.health.get_unhealthy_nodes().into_iter().collect();
        let routable: Vec<GlobalNodeInfo> = nodes
            .iter()
            .filter(|n| !unhealthy.contains(&n.node_id))
            .cloned()
            .collect();
        self.routing.initialize(&routable);
        for node in nodes {
            self.health.watch_node(node);
        }
        self.refresh_topology();
    }

    fn on_discovery_event(&self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::NodeDiscovered(node) => {
                info!(node_id = %node.node_id, federation_id = %node.federation_id, "Node discovered");
                self.routing.add_node(&node);
                if let Some(metrics) = &node.load_metrics {
                    self.failover.update_node_load(&node.node_id, metrics.load());
                }
                self.health.watch_node(node.clone());
                self.emit(OrchestratorEvent::NodeDiscovered(node));
            }
            DiscoveryEvent::NodeLost(node) | DiscoveryEvent::NodeUnregistered(node) => {
                warn!(node_id = %node.node_id, federation_id = %node.federation_id, "Node lost");
                self.routing.remove_node(&node.node_id);
                self.health.unwatch_node(&node.node_id);
                if let Err(e) = self.failover.handle_node_failure(&node.node_id, "node lost") {
                    error!(node_id = %node.node_id, error = %e, "Failover for lost node failed");
                }
                self.emit(OrchestratorEvent::NodeLost(node));
            }
        }
        self.refresh_topology();
    }

    fn on_health_event(&self, event: HealthEvent) {
        match event {
            HealthEvent::NodeHealthy { node_id, previous } => {
                debug!(node_id = %node_id, previous = %previous, "Health listener: node healthy");
                self.recover_node(&node_id);
            }
            HealthEvent::NodeUnhealthy { node_id, reason, .. } => {
                if let Err(e) = self.handle_node_failure(&node_id, &reason) {
                    error!(node_id = %node_id, error = %e, "Failed to protect failover groups of unhealthy node");
                }
            }
            HealthEvent::LoadSampled { node_id, metrics } => {
                self.discovery.update_load_metrics(&node_id, metrics.clone());
                self.routing.update_node_load(&node_id, &metrics);
                self.failover.update_node_load(&node_id, metrics.load());
            }
        }
    }

    fn on_failover_event(&self, event: FailoverNotification) {
        match event {
            FailoverNotification::FailoverCompleted(event) => {
                info!(
                    group_id = %event.group_id,
                    from = %event.primary_node_id,
                    to = %event.backup_node_id,
                    "Failover completed"
                );
                self.emit(OrchestratorEvent::FailoverCompleted(event));
            }
            FailoverNotification::FailoverFailed {
                group_id,
                failed_node_id,
                reason,
            } => {
                self.emit(OrchestratorEvent::FailoverFailed {
                    group_id,
                    failed_node_id,
                    reason,
                });
            }
        }
        self.refresh_topology();
    }

    async fn on_config_event(&self, event: ConfigEvent) {
        let config = match event {
            ConfigEvent::ConfigUpdated(config) | ConfigEvent::ConfigReset(config) => config,
        };
        info!("Configuration updated");
        self.apply_config(&config);

        if config.scaling.enabled && !self.scaling.is_running() {
            self.scaling.start();
        } else if !config.scaling.enabled && self.scaling.is_running() {
            self.scaling.stop().await;
        }

        self.emit(OrchestratorEvent::ConfigUpdated(config.as_ref().clone()));
        self.refresh_topology();
    }

    /// Push a configuration snapshot to every service
    fn apply_config(&self, config: &OrchestratorConfig) {
        if let Err(e) = self.discovery.update_config(config.discovery.clone()) {
            error!(error = %e, "Failed to apply discovery configuration");
        }
        self.health.update_config(config.health_monitoring.clone());
        self.routing
            .update_config(config.routing.clone(), config.federation.clone());
        self.scaling.update_config(config.scaling.clone());
        if let Err(e) = self.failover.update_config(config.failover.clone()) {
            error!(error = %e, "Failed to apply failover configuration");
        }
    }

    /// Route a message through the routing service
    pub fn route_message(&self, message: &OrchestratorMessage) -> Result<RoutingDecision> {
        debug!(message_id = %message.id, message_type = %message.message_type, "Routing message");
        self.routing.route_message(message).map_err(|e| {
            if e.details.is_some() {
                e
            } else {
                let details = serde_json::json!({ "messageId": message.id });
                e.with_details(details)
            }
        })
    }

    /// Take a node out of service and fail over the groups it leads
    #[instrument(skip(self))]
    pub fn handle_node_failure(&self, node_id: &NodeId, reason: &str) -> Result<Vec<FailoverEvent>> {
        warn!(node_id = %node_id, reason = %reason, "Handling node failure");
        self.health.update_node_health(node_id, false);
        self.discovery.update_health_status(node_id, HealthStatus::Unhealthy);
        self.emit(OrchestratorEvent::NodeUnhealthy {
            node_id: node_id.clone(),
            reason: reason.to_string(),
        });

        let result = self.failover.handle_node_failure(node_id, reason);
        self.routing.remove_node(node_id);
        metrics::counter!("orchestrator_node_failures_total", 1);
        self.refresh_topology();
        result
    }

    /// Return a node to service and let its failover groups recover
    #[instrument(skip(self))]
    pub fn recover_node(&self, node_id: &NodeId) -> Vec<FailoverEvent> {
        info!(node_id = %node_id, "Recovering node");
        self.health.update_node_health(node_id, true);
        self.discovery.update_health_status(node_id, HealthStatus::Healthy);

        let events = self.failover.recover_node(node_id);
        if let Some(node) = self.discovery.get_node_by_id(node_id) {
            self.routing.add_node(&node);
        }

        self.emit(OrchestratorEvent::NodeHealthy {
            node_id: node_id.clone(),
        });
        self.refresh_topology();
        events
    }

    /// Register a node directly (also announced through discovery)
    pub fn register_node(&self, node: GlobalNodeInfo) -> Result<bool> {
        let is_new = self.discovery.register_node(node.clone())?;
        self.routing.add_node(&node);
        self.health.watch_node(node);
        self.refresh_topology();
        Ok(is_new)
    }

    /// Heartbeat from a registered node, optionally carrying a load sample
    pub fn node_heartbeat(&self, node_id: &NodeId, metrics: Option<LoadMetrics>) -> Result<()> {
        self.discovery.heartbeat(node_id)?;
        if let Some(metrics) = metrics {
            self.health.record_metrics(node_id, metrics);
        }
        debug!(node_id = %node_id, "Heartbeat received");
        Ok(())
    }

    /// Remove a node explicitly; its groups fail over as for a lost node
    pub fn unregister_node(&self, node_id: &NodeId) -> Result<GlobalNodeInfo> {
        self.discovery.unregister_node(node_id).ok_or_else(|| {
            OrchestratorError::discovery(format!("Node {} is not registered", node_id))
                .with_node(node_id.clone())
        })
    }

    pub async fn update_configuration(&self, partial: serde_json::Value) -> Result<Arc<OrchestratorConfig>> {
        self.config_manager.update_config(partial).await
    }

    /// Restore the default configuration, keeping the orchestrator id
    pub async fn reset_configuration(&self) -> Result<Arc<OrchestratorConfig>> {
        self.config_manager.reset_to_defaults().await
    }

    pub fn get_configuration(&self) -> Arc<OrchestratorConfig> {
        self.config_manager.get_config()
    }

    pub async fn manual_scaling(
        &self,
        action: ScalingAction,
        target_nodes: Vec<NodeId>,
        reason: &str,
        force: bool,
    ) -> Result<ScalingDecision> {
        self.scaling.manual_scale(action, target_nodes, reason, force).await
    }

    pub fn manual_failover(&self, group_id: &str, target: &NodeId, reason: &str) -> Result<FailoverEvent> {
        self.failover.manual_failover(group_id, target, reason)
    }

    pub fn create_failover_group(&self, definition: FailoverGroupConfig) -> Result<FailoverGroup> {
        let group = self.failover.create_failover_group(definition)?;
        self.refresh_topology();
        Ok(group)
    }

    /// Latest topology snapshot
    pub fn get_global_topology(&self) -> Arc<GlobalTopology> {
        self.topology.load_full()
    }

    /// Regenerate the topology snapshot from the services
    pub fn refresh_topology(&self) {
        let topology = self.build_topology();
        let federations = topology.federations.len();
        let total_nodes = topology.federations.iter().map(|f| f.nodes.len()).sum();
        let last_updated = topology.last_updated;

        self.topology.store(Arc::new(topology));
        metrics::gauge!("orchestrator_federations", federations as f64);
        self.emit(OrchestratorEvent::TopologyUpdated {
            federations,
            total_nodes,
            last_updated,
        });
    }

    fn build_topology(&self) -> GlobalTopology {
        let config = self.config_manager.get_config();
        let now = Utc::now();

        let mut by_federation: BTreeMap<FederationId, Vec<GlobalNodeInfo>> = config
            .federation
            .federation_managers
            .iter()
            .map(|m| (FederationId::new(m.federation_id.clone()), Vec::new()))
            .collect();

        for mut node in self.discovery.get_discovered_nodes() {
            if let Some(record) = self.health.get_node_health_record(&node.node_id) {
                node.health_status = record.status;
                node.last_health_check = record.last_check.or(node.last_health_check);
            }
            by_federation
                .entry(node.federation_id.clone())
                .or_default()
                .push(node);
        }

        let federations = by_federation
            .into_iter()
            .map(|(federation_id, nodes)| {
                let configured_capabilities = config
                    .federation
                    .federation_managers
                    .iter()
                    .filter(|m| m.federation_id == federation_id.as_str())
                    .flat_map(|m| m.capabilities.iter().cloned());
                let capabilities: BTreeSet<String> = nodes
                    .iter()
                    .flat_map(|n| n.capabilities.iter().cloned())
                    .chain(configured_capabilities)
                    .collect();

                FederationState {
                    leader_node_id: nodes
                        .iter()
                        .find(|n| n.has_capability(GlobalCapability::FederationCoordination))
                        .map(|n| n.node_id.clone()),
                    status: federation_status(&nodes),
                    capabilities: capabilities.into_iter().collect(),
                    last_sync: now,
                    federation_id,
                    nodes,
                }
            })
            .collect();

        GlobalTopology {
            federations,
            routing_table: self.routing.get_routing_table(),
            scaling_policies: self.scaling.scaling_policies(),
            failover_groups: self.failover.get_failover_groups(),
            last_updated: now,
        }
    }

    fn uptime_seconds(&self) -> u64 {
        self.started_at
            .lock()
            .ok()
            .and_then(|s| *s)
            .map(|s| s.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn get_global_metrics(&self) -> GlobalMetrics {
        let config = self.config_manager.get_config();
        let routing = self.routing.get_routing_stats();
        let total_nodes = self.discovery.get_node_count();
        let active_nodes = self
            .discovery
            .get_discovered_nodes()
            .iter()
            .filter(|n| self.health.get_node_health_status(&n.node_id) == HealthStatus::Healthy)
            .count();

        let attempts = routing.messages_routed + routing.routing_failures;
        GlobalMetrics {
            orchestrator_id: config.orchestrator_id.clone(),
            total_federations: self.topology.load().federations.len(),
            active_nodes,
            total_nodes,
            routing_decisions: routing.messages_routed,
            routing_failures: routing.routing_failures,
            scaling_events: self.scaling.total_scaling_events(),
            failover_events: self.failover.total_failover_events(),
            cross_federation_messages: routing.cross_federation_messages,
            average_latency_ms: routing.average_latency_ms,
            error_rate: if attempts == 0 {
                0.0
            } else {
                routing.routing_failures as f64 / attempts as f64
            },
            uptime_seconds: self.uptime_seconds(),
            uptime_percentage: if total_nodes == 0 {
                100.0
            } else {
                active_nodes as f64 / total_nodes as f64 * 100.0
            },
        }
    }

    pub async fn get_service_health(&self) -> ServiceHealth {
        let running = self.is_running().await;
        let config = self.config_manager.get_config();
        let loop_status = |enabled: bool, service_running: bool| match (enabled, service_running) {
            (false, _) => ServiceStatus::Disabled,
            (true, true) => ServiceStatus::Running,
            (true, false) => ServiceStatus::Stopped,
        };
        let passive_status = |enabled: bool| match (enabled, running) {
            (false, _) => ServiceStatus::Disabled,
            (true, true) => ServiceStatus::Running,
            (true, false) => ServiceStatus::Stopped,
        };

        let mut services = BTreeMap::new();
        services.insert(
            "discovery".to_string(),
            loop_status(config.discovery.enabled, self.discovery.is_running()),
        );
        services.insert(
            "health".to_string(),
            loop_status(config.health_monitoring.enabled, self.health.is_running()),
        );
        services.insert(
            "routing".to_string(),
            passive_status(config.federation.message_routing_enabled),
        );
        services.insert(
            "scaling".to_string(),
            loop_status(config.scaling.enabled, self.scaling.is_running()),
        );
        services.insert("failover".to_string(), passive_status(config.failover.enabled));
        services.insert("config".to_string(), passive_status(true));

        ServiceHealth {
            orchestrator: OrchestratorStatus {
                status: if running {
                    ServiceStatus::Running
                } else {
                    ServiceStatus::Stopped
                },
                uptime_seconds: self.uptime_seconds(),
            },
            services,
            last_updated: Utc::now(),
        }
    }
}

/// Classify a federation from its nodes
fn federation_status(nodes: &[GlobalNodeInfo]) -> FederationStatus {
    if nodes.is_empty() {
        return FederationStatus::Inactive;
    }
    if nodes.iter().all(|n| n.status == NodeStatus::Draining) {
        return FederationStatus::Maintenance;
    }
    if nodes.iter().all(|n| n.health_status == HealthStatus::Unhealthy) {
        return FederationStatus::Error;
    }
    let serving = nodes
        .iter()
        .any(|n| n.status == NodeStatus::Active && n.health_status != HealthStatus::Unhealthy);
    if serving {
        FederationStatus::Active
    } else {
        FederationStatus::Inactive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::types::LoadMetrics;

    fn manager() -> Arc<GlobalOrchestratorManager> {
        let config_manager = Arc::new(ConfigManager::new(OrchestratorConfig::default(), None).unwrap());
        Arc::new(GlobalOrchestratorManager::new(config_manager).unwrap())
    }

    fn node(id: &str, federation: &str) -> GlobalNodeInfo {
        GlobalNodeInfo::new(id, federation, "10.0.0.1", 8080)
    }

    #[test]
    fn test_federation_status_rules() {
        assert_eq!(federation_status(&[]), FederationStatus::Inactive);

        let mut draining = node("n1", "f1");
        draining.status = NodeStatus::Draining;
        assert_eq!(federation_status(&[draining.clone()]), FederationStatus::Maintenance);

        let mut unhealthy = node("n2", "f1");
        unhealthy.health_status = HealthStatus::Unhealthy;
        assert_eq!(federation_status(&[unhealthy.clone()]), FederationStatus::Error);

        assert_eq!(federation_status(&[unhealthy, node("n3", "f1")]), FederationStatus::Active);

        let mut offline = node("n4", "f1");
        offline.status = NodeStatus::Offline;
        assert_eq!(federation_status(&[offline, draining]), FederationStatus::Inactive);
    }

    #[test]
    fn test_event_names_and_wire_format() {
        let event = OrchestratorEvent::NodeUnhealthy {
            node_id: NodeId::new("n1"),
            reason: "timeout".to_string(),
        };
        assert_eq!(event.name(), "nodeUnhealthy");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "nodeUnhealthy");
        assert_eq!(json["data"]["nodeId"], "n1");
    }

    #[tokio::test]
    async fn test_register_node_builds_topology() {
        let manager = manager();
        manager
            .register_node(
                node("n2", "f1")
                    .with_capabilities(["routing", "federation_coordination"])
                    .with_load(LoadMetrics {
                        cpu_usage: 30.0,
                        ..LoadMetrics::default()
                    }),
            )
            .unwrap();
        manager.register_node(node("n1", "f1")).unwrap();
        manager.register_node(node("m1", "f2")).unwrap();

        let topology = manager.get_global_topology();
        assert_eq!(topology.federations.len(), 2);
        let f1 = &topology.federations[0];
        assert_eq!(f1.federation_id, FederationId::new("f1"));
        assert_eq!(f1.nodes.len(), 2);
        assert_eq!(f1.leader_node_id, Some(NodeId::new("n2")));
        assert_eq!(f1.status, FederationStatus::Active);
        assert_eq!(topology.routing_table[&FederationId::new("f1")].len(), 2);
        assert_eq!(topology.scaling_policies.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_removes_node_from_routing() {
        let manager = manager();
        manager.register_node(node("n1", "f1")).unwrap();
        manager.register_node(node("n2", "f1")).unwrap();
        let mut events = manager.subscribe();

        // no failover groups: nothing to protect
        assert!(manager.handle_node_failure(&NodeId::new("n1"), "crash").unwrap().is_empty());
        assert!(matches!(events.try_recv().unwrap(), OrchestratorEvent::NodeUnhealthy { .. }));

        let message = OrchestratorMessage::new("m1", "sync", "client").to_federation("f1");
        for _ in 0..10 {
            assert_eq!(manager.route_message(&message).unwrap().target_node_id, NodeId::new("n2"));
        }

        manager.recover_node(&NodeId::new("n1"));
        assert_eq!(manager.routing().get_routing_table()[&FederationId::new("f1")].len(), 2);
    }

    #[tokio::test]
    async fn test_route_error_carries_message_id() {
        let manager = manager();
        let message = OrchestratorMessage::new("m42", "sync", "client").to_federation("f9");
        let err = manager.route_message(&message).unwrap_err();
        assert_eq!(err.details.unwrap()["messageId"], "m42");
    }

    #[tokio::test]
    async fn test_metrics_and_service_health_before_start() {
        let manager = manager();
        manager.register_node(node("n1", "f1")).unwrap();
        manager.health().update_node_health(&NodeId::new("n1"), true);

        let metrics = manager.get_global_metrics();
        assert_eq!(metrics.total_nodes, 1);
        assert_eq!(metrics.active_nodes, 1);
        assert_eq!(metrics.uptime_percentage, 100.0);
        assert_eq!(metrics.uptime_seconds, 0);

        let health = manager.get_service_health().await;
        assert_eq!(health.orchestrator.status, ServiceStatus::Stopped);
        assert_eq!(health.services["failover"], ServiceStatus::Stopped);
    }
}
