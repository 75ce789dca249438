use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::DiscoveryConfig;
use crate::error::{OrchestratorError, Result};
use crate::types::{FederationId, GlobalNodeInfo, HealthStatus, LoadMetrics, NodeId};

/// Source of the authoritative node list
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    async fn fetch_nodes(&self) -> Result<Vec<GlobalNodeInfo>>;
}

#[derive(Debug, Deserialize)]
struct NodeListResponse {
    nodes: Vec<GlobalNodeInfo>,
}

/// Registry reached over HTTP: `GET {base_url}/nodes` returning `{"nodes": [...]}`
pub struct HttpNodeRegistry {
    client: Client,
    base_url: String,
}

impl HttpNodeRegistry {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OrchestratorError::discovery(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl NodeRegistry for HttpNodeRegistry {
    async fn fetch_nodes(&self) -> Result<Vec<GlobalNodeInfo>> {
        let url = format!("{}/nodes", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| OrchestratorError::discovery(format!("Registry request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(OrchestratorError::discovery(format!(
                "Registry returned status {}",
                response.status()
            )));
        }

        let body: NodeListResponse = response
            .json()
            .await
            .map_err(|e| OrchestratorError::discovery(format!("Invalid registry response: {}", e)))?;
        Ok(body.nodes)
    }
}

/// In-memory registry, replaced by callers (used for static deployments and tests)
#[derive(Default)]
pub struct StaticNodeRegistry {
    nodes: RwLock<Vec<GlobalNodeInfo>>,
}

impl StaticNodeRegistry {
    pub fn new(nodes: Vec<GlobalNodeInfo>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    pub fn set_nodes(&self, nodes: Vec<GlobalNodeInfo>) {
        if let Ok(mut current) = self.nodes.write() {
            *current = nodes;
        }
    }
}

#[async_trait]
impl NodeRegistry for StaticNodeRegistry {
    async fn fetch_nodes(&self) -> Result<Vec<GlobalNodeInfo>> {
        self.nodes
            .read()
            .map(|nodes| nodes.clone())
            .map_err(|_| OrchestratorError::discovery("Static registry lock poisoned"))
    }
}

/// Node set changes
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    NodeDiscovered(GlobalNodeInfo),
    /// Node stopped reporting within the node timeout
    NodeLost(GlobalNodeInfo),
    /// Node was removed explicitly
    NodeUnregistered(GlobalNodeInfo),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryStats {
    pub total_nodes: usize,
    pub nodes_by_federation: BTreeMap<FederationId, usize>,
    pub nodes_by_health: BTreeMap<String, usize>,
    pub discovery_runs: u64,
    pub discovery_failures: u64,
    pub last_discovery: Option<DateTime<Utc>>,
    pub running: bool,
}

/// Keeps the live node set per federation
pub struct NodeDiscoveryService {
    config: ArcSwap<DiscoveryConfig>,
    registry: RwLock<Option<Arc<dyn NodeRegistry>>>,
    /// Registry was supplied by the caller and survives config changes
    custom_registry: bool,
    nodes: Arc<DashMap<NodeId, GlobalNodeInfo>>,
    events: broadcast::Sender<DiscoveryEvent>,
    shutdown: Mutex<Option<CancellationToken>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    discovery_runs: AtomicU64,
    discovery_failures: AtomicU64,
    last_discovery: Mutex<Option<DateTime<Utc>>>,
}

impl NodeDiscoveryService {
    /// Create a service that uses the HTTP registry when `service_registry_url` is set
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        let registry = Self::http_registry(&config)?;
        Ok(Self::build(config, registry, false))
    }

    /// Create a service backed by a caller-provided registry
    pub fn with_registry(config: DiscoveryConfig, registry: Arc<dyn NodeRegistry>) -> Self {
        Self::build(config, Some(registry), true)
    }

    fn build(
        config: DiscoveryConfig,
        registry: Option<Arc<dyn NodeRegistry>>,
        custom_registry: bool,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            config: ArcSwap::from_pointee(config),
            registry: RwLock::new(registry),
            custom_registry,
            nodes: Arc::new(DashMap::new()),
            events,
            shutdown: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            discovery_runs: AtomicU64::new(0),
            discovery_failures: AtomicU64::new(0),
            last_discovery: Mutex::new(None),
        }
    }

    fn http_registry(config: &DiscoveryConfig) -> Result<Option<Arc<dyn NodeRegistry>>> {
        match &config.service_registry_url {
            Some(url) => {
                let registry = HttpNodeRegistry::new(
                    url.clone(),
                    Duration::from_millis(config.request_timeout_ms),
                )?;
                Ok(Some(Arc::new(registry)))
            }
            None => Ok(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    /// Shared handle on the node registry
    pub fn registry(&self) -> Arc<DashMap<NodeId, GlobalNodeInfo>> {
        Arc::clone(&self.nodes)
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Apply a new discovery configuration; intervals take effect on the next tick
    pub fn update_config(&self, config: DiscoveryConfig) -> Result<()> {
        let previous = self.config.load();
        if !self.custom_registry
            && (previous.service_registry_url != config.service_registry_url
                || previous.request_timeout_ms != config.request_timeout_ms)
        {
            let registry = Self::http_registry(&config)?;
            if let Ok(mut current) = self.registry.write() {
                *current = registry;
            }
        }
        self.config.store(Arc::new(config));
        Ok(())
    }

    /// Run an initial discovery pass and start the discovery and timeout loops
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let config = self.config.load_full();
        if !config.enabled {
            info!("Node discovery disabled");
            return Ok(());
        }

        let token = {
            let mut shutdown = self
                .shutdown
                .lock()
                .map_err(|_| OrchestratorError::discovery("Discovery state lock poisoned"))?;
            if shutdown.is_some() {
                debug!("Node discovery already running");
                return Ok(());
            }
            let token = CancellationToken::new();
            *shutdown = Some(token.clone());
            token
        };

        info!(
            interval_ms = config.discovery_interval_ms,
            heartbeat_interval_ms = config.heartbeat_interval_ms,
            node_timeout_ms = config.node_timeout_ms,
            registry = config.service_registry_url.as_deref().unwrap_or("none"),
            "Starting node discovery"
        );

        if let Err(e) = self.discover_nodes().await {
            error!(error = %e, "Initial node discovery failed");
        }

        let discovery_loop = {
            let service = Arc::clone(self);
            let token = token.clone();
            tokio::spawn(async move {
                loop {
                    let interval = service.config.load().discovery_interval_ms;
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(interval)) => {}
                    }
                    if let Err(e) = service.discover_nodes().await {
                        error!(error = %e, "Node discovery failed");
                    }
                }
                debug!("Discovery loop stopped");
            })
        };

        let sweep_loop = {
            let service = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    let interval = service.config.load().heartbeat_interval_ms;
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(interval)) => {}
                    }
                    service.sweep_lost_nodes();
                }
                debug!("Node timeout sweep stopped");
            })
        };

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(discovery_loop);
            tasks.push(sweep_loop);
        }
        Ok(())
    }

    /// Stop the loops, letting a tick in progress finish
    pub async fn stop(&self) {
        let token = self.shutdown.lock().ok().and_then(|mut s| s.take());
        let Some(token) = token else {
            return;
        };
        token.cancel();

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .map(|mut tasks| tasks.drain(..).collect())
            .unwrap_or_default();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Discovery task ended abnormally");
            }
        }
        info!("Node discovery stopped");
    }

    /// Fetch the node list and reconcile it with the local registry. Returns the number of new nodes.
    pub async fn discover_nodes(&self) -> Result<usize> {
        let registry = self.registry.read().ok().and_then(|r| r.clone());
        let Some(registry) = registry else {
            return Ok(0);
        };

        self.discovery_runs.fetch_add(1, Ordering::Relaxed);
        let nodes = match self.fetch_with_retry(registry.as_ref()).await {
            Ok(nodes) => nodes,
            Err(e) => {
                self.discovery_failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("orchestrator_discovery_failures_total", 1);
                return Err(e);
            }
        };

        let mut discovered = 0;
        for node in nodes {
            if self.upsert_node(node) {
                discovered += 1;
            }
        }
        if let Ok(mut last) = self.last_discovery.lock() {
            *last = Some(Utc::now());
        }

        metrics::gauge!("orchestrator_discovered_nodes", self.nodes.len() as f64);
        debug!(
            new_nodes = discovered,
            total_nodes = self.nodes.len(),
            "Discovery cycle completed"
        );
        Ok(discovered)
    }

    async fn fetch_with_retry(&self, registry: &dyn NodeRegistry) -> Result<Vec<GlobalNodeInfo>> {
        let config = self.config.load_full();
        let mut attempt = 0u32;
        loop {
            match registry.fetch_nodes().await {
                Ok(nodes) => return Ok(nodes),
                Err(e) if attempt < config.max_retries => {
                    attempt += 1;
                    warn!(attempt = attempt, error = %e, "Registry fetch failed, retrying");
                    let backoff = config.retry_backoff_ms.saturating_mul(attempt as u64);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => {
                    return Err(OrchestratorError::discovery(format!(
                        "Registry fetch failed after {} attempts: {}",
                        attempt + 1,
                        e.message
                    )))
                }
            }
        }
    }

    /// Insert a node or refresh a known one. Returns true for a newly seen node.
    fn upsert_node(&self, mut node: GlobalNodeInfo) -> bool {
        let now = Utc::now();
        node.last_seen = now;

        let mut moved_from = None;
        let is_new = match self.nodes.entry(node.node_id.clone()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if existing.federation_id != node.federation_id {
                    moved_from = Some(existing.clone());
                    // new federation, health history does not carry over
                    *existing = node.clone();
                } else {
                    // registry owns identity fields, health and load are ours
                    *existing = GlobalNodeInfo {
                        health_status: existing.health_status,
                        last_health_check: existing.last_health_check,
                        load_metrics: existing.load_metrics.take(),
                        ..node.clone()
                    };
                }
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(node.clone());
                true
            }
        };

        if let Some(previous) = moved_from {
            info!(
                node_id = %node.node_id,
                from = %previous.federation_id,
                to = %node.federation_id,
                "Node moved between federations"
            );
            let _ = self.events.send(DiscoveryEvent::NodeLost(previous));
            let _ = self.events.send(DiscoveryEvent::NodeDiscovered(node));
        } else if is_new {
            info!(
                node_id = %node.node_id,
                federation_id = %node.federation_id,
                address = %node.address,
                port = node.port,
                "Node discovered"
            );
            metrics::counter!("orchestrator_nodes_discovered_total", 1);
            let _ = self.events.send(DiscoveryEvent::NodeDiscovered(node));
        }
        is_new
    }

    /// Remove nodes unseen for longer than the node timeout and report each one once
    pub fn sweep_lost_nodes(&self) -> Vec<GlobalNodeInfo> {
        let timeout_ms = self.config.load().node_timeout_ms;
        let cutoff = Utc::now() - chrono::Duration::milliseconds(timeout_ms as i64);

        let stale: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|entry| entry.value().last_seen < cutoff)
            .map(|entry| entry.key().clone())
            .collect();

        let mut lost = Vec::new();
        for node_id in stale {
            // re-check under the shard lock in case a heartbeat raced the sweep
            if let Some((_, node)) = self.nodes.remove_if(&node_id, |_, n| n.last_seen < cutoff) {
                warn!(
                    node_id = %node.node_id,
                    federation_id = %node.federation_id,
                    last_seen = %node.last_seen,
                    "Node lost (heartbeat timeout)"
                );
                metrics::counter!("orchestrator_nodes_lost_total", 1);
                let _ = self.events.send(DiscoveryEvent::NodeLost(node.clone()));
                lost.push(node);
            }
        }

        if !lost.is_empty() {
            metrics::gauge!("orchestrator_discovered_nodes", self.nodes.len() as f64);
        }
        lost
    }

    /// Register a node directly, as if the registry had reported it
    pub fn register_node(&self, node: GlobalNodeInfo) -> Result<bool> {
        if node.node_id.as_str().is_empty() {
            return Err(OrchestratorError::discovery("Node id cannot be empty"));
        }
        if node.federation_id.as_str().is_empty() {
            return Err(OrchestratorError::discovery("Federation id cannot be empty")
                .with_node(node.node_id));
        }
        Ok(self.upsert_node(node))
    }

    pub fn unregister_node(&self, node_id: &NodeId) -> Option<GlobalNodeInfo> {
        let (_, node) = self.nodes.remove(node_id)?;
        info!(node_id = %node_id, "Node unregistered");
        let _ = self.events.send(DiscoveryEvent::NodeUnregistered(node.clone()));
        Some(node)
    }

    /// Refresh `last_seen` for a node that reported in
    pub fn heartbeat(&self, node_id: &NodeId) -> Result<()> {
        match self.nodes.get_mut(node_id) {
            Some(mut node) => {
                node.last_seen = Utc::now();
                metrics::counter!("orchestrator_heartbeats_received_total", 1);
                Ok(())
            }
            None => {
                warn!(node_id = %node_id, "Heartbeat from unknown node");
                Err(OrchestratorError::discovery("Heartbeat from unknown node")
                    .with_node(node_id.clone()))
            }
        }
    }

    pub fn update_load_metrics(&self, node_id: &NodeId, metrics: LoadMetrics) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(mut node) => {
                node.load_metrics = Some(metrics);
                true
            }
            None => false,
        }
    }

    pub fn update_health_status(&self, node_id: &NodeId, status: HealthStatus) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(mut node) => {
                node.health_status = status;
                node.last_health_check = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Snapshot of every known node
    pub fn get_discovered_nodes(&self) -> Vec<GlobalNodeInfo> {
        let mut nodes: Vec<_> = self.nodes.iter().map(|e| e.value().clone()).collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub fn get_nodes_by_federation(&self, federation_id: &FederationId) -> Vec<GlobalNodeInfo> {
        let mut nodes: Vec<_> = self
            .nodes
            .iter()
            .filter(|e| &e.value().federation_id == federation_id)
            .map(|e| e.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub fn get_node_by_id(&self, node_id: &NodeId) -> Option<GlobalNodeInfo> {
        self.nodes.get(node_id).map(|n| n.value().clone())
    }

    pub fn get_node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn get_discovery_stats(&self) -> DiscoveryStats {
        let mut nodes_by_federation = BTreeMap::new();
        let mut nodes_by_health = BTreeMap::new();
        for entry in self.nodes.iter() {
            let node = entry.value();
            *nodes_by_federation.entry(node.federation_id.clone()).or_insert(0) += 1;
            *nodes_by_health.entry(node.health_status.to_string()).or_insert(0) += 1;
        }

        DiscoveryStats {
            total_nodes: self.nodes.len(),
            nodes_by_federation,
            nodes_by_health,
            discovery_runs: self.discovery_runs.load(Ordering::Relaxed),
            discovery_failures: self.discovery_failures.load(Ordering::Relaxed),
            last_discovery: self.last_discovery.lock().ok().and_then(|l| *l),
            running: self.is_running(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FlakyRegistry {
        failures_left: AtomicU32,
        calls: AtomicU32,
        nodes: Vec<GlobalNodeInfo>,
    }

    #[async_trait]
    impl NodeRegistry for FlakyRegistry {
        async fn fetch_nodes(&self) -> Result<Vec<GlobalNodeInfo>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(OrchestratorError::discovery("connection refused"));
            }
            Ok(self.nodes.clone())
        }
    }

    fn test_config() -> DiscoveryConfig {
        DiscoveryConfig {
            retry_backoff_ms: 1,
            ..DiscoveryConfig::default()
        }
    }

    fn node(id: &str, federation: &str) -> GlobalNodeInfo {
        GlobalNodeInfo::new(id, federation, "10.0.0.1", 8080)
    }

    #[tokio::test]
    async fn test_discovery_emits_once_per_new_node() {
        let registry = Arc::new(StaticNodeRegistry::new(vec![node("n1", "f1"), node("n2", "f1")]));
        let service = NodeDiscoveryService::with_registry(test_config(), registry.clone());
        let mut events = service.subscribe();

        assert_eq!(service.discover_nodes().await.unwrap(), 2);
        assert_eq!(service.discover_nodes().await.unwrap(), 0);

        let mut discovered = 0;
        while let Ok(event) = events.try_recv() {
            assert!(matches!(event, DiscoveryEvent::NodeDiscovered(_)));
            discovered += 1;
        }
        assert_eq!(discovered, 2);
        assert_eq!(service.get_nodes_by_federation(&FederationId::new("f1")).len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_preserves_health_and_load() {
        let registry = Arc::new(StaticNodeRegistry::new(vec![node("n1", "f1")]));
        let service = NodeDiscoveryService::with_registry(test_config(), registry.clone());
        service.discover_nodes().await.unwrap();

        let id = NodeId::new("n1");
        service.update_health_status(&id, HealthStatus::Healthy);
        service.update_load_metrics(
            &id,
            LoadMetrics {
                cpu_usage: 42.0,
                ..LoadMetrics::default()
            },
        );

        registry.set_nodes(vec![GlobalNodeInfo::new("n1", "f1", "10.0.0.9", 9090)]);
        service.discover_nodes().await.unwrap();

        let refreshed = service.get_node_by_id(&id).unwrap();
        assert_eq!(refreshed.address, "10.0.0.9");
        assert_eq!(refreshed.health_status, HealthStatus::Healthy);
        assert_eq!(refreshed.current_load(), 42.0);
    }

    #[tokio::test]
    async fn test_fetch_retries_before_failing() {
        let registry = Arc::new(FlakyRegistry {
            failures_left: AtomicU32::new(2),
            calls: AtomicU32::new(0),
            nodes: vec![node("n1", "f1")],
        });
        let service = NodeDiscoveryService::with_registry(test_config(), registry.clone());

        assert_eq!(service.discover_nodes().await.unwrap(), 1);
        assert_eq!(registry.calls.load(Ordering::SeqCst), 3);

        let always_failing = Arc::new(FlakyRegistry {
            failures_left: AtomicU32::new(u32::MAX),
            calls: AtomicU32::new(0),
            nodes: Vec::new(),
        });
        let service = NodeDiscoveryService::with_registry(test_config(), always_failing.clone());
        let err = service.discover_nodes().await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::DiscoveryFailed);
        // one initial attempt plus max_retries
        assert_eq!(always_failing.calls.load(Ordering::SeqCst), 4);
        assert_eq!(service.get_discovery_stats().discovery_failures, 1);
    }

    #[tokio::test]
    async fn test_sweep_reports_lost_node_once() {
        let service = NodeDiscoveryService::new(test_config()).unwrap();
        service.register_node(node("n1", "f1")).unwrap();
        service.register_node(node("n2", "f1")).unwrap();
        let mut events = service.subscribe();

        let stale = Utc::now() - chrono::Duration::minutes(10);
        service.nodes.get_mut(&NodeId::new("n1")).unwrap().last_seen = stale;

        let lost = service.sweep_lost_nodes();
        assert_eq!(lost.len(), 1);
        assert!(service.sweep_lost_nodes().is_empty());

        match events.try_recv().unwrap() {
            DiscoveryEvent::NodeLost(node) => assert_eq!(node.node_id, NodeId::new("n1")),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(events.try_recv().is_err());
        assert!(service.get_node_by_id(&NodeId::new("n2")).is_some());
    }

    #[tokio::test]
    async fn test_federation_move_reported_as_lost_then_discovered() {
        let service = NodeDiscoveryService::new(test_config()).unwrap();
        service.register_node(node("n1", "f1")).unwrap();
        let mut events = service.subscribe();

        assert!(!service.register_node(node("n1", "f2")).unwrap());
        assert!(matches!(events.try_recv().unwrap(), DiscoveryEvent::NodeLost(n) if n.federation_id == FederationId::new("f1")));
        assert!(matches!(events.try_recv().unwrap(), DiscoveryEvent::NodeDiscovered(n) if n.federation_id == FederationId::new("f2")));
    }

    #[tokio::test]
    async fn test_heartbeat_and_unregister() {
        let service = NodeDiscoveryService::new(test_config()).unwrap();
        let id = NodeId::new("n1");
        assert!(service.heartbeat(&id).is_err());

        service.register_node(node("n1", "f1")).unwrap();
        assert!(service.heartbeat(&id).is_ok());

        let mut events = service.subscribe();
        assert!(service.unregister_node(&id).is_some());
        assert!(matches!(events.try_recv().unwrap(), DiscoveryEvent::NodeUnregistered(_)));
        assert!(service.get_node_by_id(&id).is_none());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let registry = Arc::new(StaticNodeRegistry::new(vec![node("n1", "f1")]));
        let service = Arc::new(NodeDiscoveryService::with_registry(test_config(), registry));

        service.start().await.unwrap();
        service.start().await.unwrap();
        assert!(service.is_running());
        assert_eq!(service.get_node_count(), 1);

        service.stop().await;
        service.stop().await;
        assert!(!service.is_running());
    }
}
