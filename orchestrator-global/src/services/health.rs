use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::HealthMonitoringConfig;
use crate::error::{OrchestratorError, Result};
use crate::types::{GlobalNodeInfo, HealthStatus, LoadMetrics, NodeId};

const MAX_METRICS_HISTORY: usize = 100;

/// Liveness and load probe for a single node
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Ok when the node reports itself healthy
    async fn check(&self, node: &GlobalNodeInfo) -> Result<()>;

    async fn collect_metrics(&self, node: &GlobalNodeInfo) -> Result<LoadMetrics>;
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

/// Probes `GET /health` and `GET /metrics` on the node's address
pub struct HttpHealthProbe {
    client: Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            OrchestratorError::health_check(format!("Failed to create HTTP client: {}", e))
        })?;
        Ok(Self { client })
    }

    fn url(node: &GlobalNodeInfo, path: &str) -> String {
        format!("http://{}:{}{}", node.address, node.port, path)
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, node: &GlobalNodeInfo) -> Result<()> {
        let response = self
            .client
            .get(Self::url(node, "/health"))
            .send()
            .await
            .map_err(|e| OrchestratorError::health_check(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(OrchestratorError::health_check(format!(
                "Health endpoint returned {}",
                response.status()
            )));
        }

        let body: HealthResponse = response
            .json()
            .await
            .map_err(|e| OrchestratorError::health_check(format!("Invalid health response: {}", e)))?;
        if body.status != "healthy" {
            return Err(OrchestratorError::health_check(format!(
                "Node reported status {}",
                body.status
            )));
        }
        Ok(())
    }

    async fn collect_metrics(&self, node: &GlobalNodeInfo) -> Result<LoadMetrics> {
        let response = self
            .client
            .get(Self::url(node, "/metrics"))
            .send()
            .await
            .map_err(|e| OrchestratorError::health_check(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OrchestratorError::health_check(format!(
                "Metrics endpoint returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| OrchestratorError::health_check(format!("Invalid metrics response: {}", e)))
    }
}

/// Health transitions and load samples
#[derive(Debug, Clone)]
pub enum HealthEvent {
    NodeHealthy {
        node_id: NodeId,
        previous: HealthStatus,
    },
    NodeUnhealthy {
        node_id: NodeId,
        previous: HealthStatus,
        reason: String,
    },
    LoadSampled {
        node_id: NodeId,
        metrics: LoadMetrics,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHealthRecord {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub response_time_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub total_nodes: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub unknown: usize,
    pub average_load: f64,
}

/// Probes watched nodes and classifies their health with hysteresis
pub struct HealthMonitoringService {
    config: ArcSwap<HealthMonitoringConfig>,
    probe: Arc<dyn HealthProbe>,
    watched: DashMap<NodeId, GlobalNodeInfo>,
    records: DashMap<NodeId, NodeHealthRecord>,
    metrics_history: DashMap<NodeId, VecDeque<LoadMetrics>>,
    /// Node registry whose `last_seen` a passing probe refreshes
    liveness: Option<Arc<DashMap<NodeId, GlobalNodeInfo>>>,
    events: broadcast::Sender<HealthEvent>,
    shutdown: Mutex<Option<CancellationToken>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthMonitoringService {
    /// Create a service probing nodes over HTTP
    pub fn new(config: HealthMonitoringConfig) -> Result<Self> {
        let probe = HttpHealthProbe::new(Duration::from_millis(config.timeout_ms))?;
        Ok(Self::with_probe(config, Arc::new(probe)))
    }

    pub fn with_probe(config: HealthMonitoringConfig, probe: Arc<dyn HealthProbe>) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            config: ArcSwap::from_pointee(config),
            probe,
            watched: DashMap::new(),
            records: DashMap::new(),
            metrics_history: DashMap::new(),
            liveness: None,
            events,
            shutdown: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Count passing probes as heartbeats for the nodes in `nodes`
    pub fn with_liveness(mut self, nodes: Arc<DashMap<NodeId, GlobalNodeInfo>>) -> Self {
        self.liveness = Some(nodes);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    pub fn update_config(&self, config: HealthMonitoringConfig) {
        self.config.store(Arc::new(config));
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Add a node to the probe set. Known nodes keep their health record.
    pub fn watch_node(&self, node: GlobalNodeInfo) {
        let node_id = node.node_id.clone();
        self.watched.insert(node_id.clone(), node);
        self.records.entry(node_id).or_default();
    }

    pub fn unwatch_node(&self, node_id: &NodeId) {
        self.watched.remove(node_id);
        self.records.remove(node_id);
        self.metrics_history.remove(node_id);
    }

    pub fn watched_nodes(&self) -> Vec<NodeId> {
        self.watched.iter().map(|e| e.key().clone()).collect()
    }

    /// Start the probe and metrics loops
    #[instrument(skip(self))]
    pub fn start(self: &Arc<Self>) {
        let config = self.config.load_full();
        if !config.enabled {
            info!("Health monitoring disabled");
            return;
        }

        let token = {
            let Ok(mut shutdown) = self.shutdown.lock() else {
                return;
            };
            if shutdown.is_some() {
                debug!("Health monitoring already running");
                return;
            }
            let token = CancellationToken::new();
            *shutdown = Some(token.clone());
            token
        };

        info!(
            check_interval_ms = config.check_interval_ms,
            timeout_ms = config.timeout_ms,
            unhealthy_threshold = config.unhealthy_threshold,
            healthy_threshold = config.healthy_threshold,
            "Starting health monitoring"
        );

        let probe_loop = {
            let service = Arc::clone(self);
            let token = token.clone();
            tokio::spawn(async move {
                loop {
                    let interval = service.config.load().check_interval_ms;
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(interval)) => {}
                    }
                    service.run_health_checks().await;
                }
                debug!("Health probe loop stopped");
            })
        };

        let metrics_loop = {
            let service = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    let interval = service.config.load().metrics_collection_interval_ms;
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(interval)) => {}
                    }
                    service.collect_all_metrics().await;
                }
                debug!("Metrics collection loop stopped");
            })
        };

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(probe_loop);
            tasks.push(metrics_loop);
        }
    }

    /// Stop the loops; probes already in flight complete or time out first
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
                warn!(error = %e, "Health task ended abnormally");
            }
        }
        info!("Health monitoring stopped");
    }

    /// Probe every watched node concurrently
    pub async fn run_health_checks(self: &Arc<Self>) {
        let nodes: Vec<GlobalNodeInfo> = self.watched.iter().map(|e| e.value().clone()).collect();
        let mut probes = JoinSet::new();
        for node in nodes {
            let service = Arc::clone(self);
            probes.spawn(async move { service.check_node_health(&node).await });
        }
        while let Some(result) = probes.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Health probe task failed");
            }
        }
    }

    /// Probe one node and feed the result through the state machine
    pub async fn check_node_health(&self, node: &GlobalNodeInfo) -> HealthStatus {
        let timeout = Duration::from_millis(self.config.load().timeout_ms);
        let started = Instant::now();

        let outcome = match tokio::time::timeout(timeout, self.probe.check(node)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.message),
            Err(_) => Err(format!("Health check timed out after {}ms", timeout.as_millis())),
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::counter!("orchestrator_health_checks_total", 1);

        // unwatched while the probe was in flight
        if !self.watched.contains_key(&node.node_id) {
            debug!(node_id = %node.node_id, "Dropping probe result for unwatched node");
            return HealthStatus::Unknown;
        }

        if let Some(mut record) = self.records.get_mut(&node.node_id) {
            record.response_time_ms = Some(elapsed_ms);
        }

        match outcome {
            Ok(()) => {
                if let Some(mut live) = self.liveness.as_ref().and_then(|n| n.get_mut(&node.node_id)) {
                    live.last_seen = Utc::now();
                }
                self.record_probe_result(&node.node_id, true, None)
            }
            Err(reason) => {
                debug!(node_id = %node.node_id, reason = %reason, "Health check failed");
                metrics::counter!("orchestrator_health_check_failures_total", 1);
                self.record_probe_result(&node.node_id, false, Some(reason))
            }
        }
    }

    /// Apply one probe outcome and emit an event on edges into HEALTHY or UNHEALTHY
    pub fn record_probe_result(
        &self,
        node_id: &NodeId,
        healthy: bool,
        reason: Option<String>,
    ) -> HealthStatus {
        let config = self.config.load();
        let (previous, current) = {
            let mut record = self.records.entry(node_id.clone()).or_default();
            let previous = record.status;
            record.last_check = Some(Utc::now());

            let current = if healthy {
                record.consecutive_successes += 1;
                record.consecutive_failures = 0;
                record.last_error = None;
                match previous {
                    HealthStatus::Unhealthy
                        if record.consecutive_successes < config.healthy_threshold =>
                    {
                        HealthStatus::Unhealthy
                    }
                    _ => HealthStatus::Healthy,
                }
            } else {
                record.consecutive_failures += 1;
                record.consecutive_successes = 0;
                record.last_error = reason.clone();
                if record.consecutive_failures >= config.unhealthy_threshold
                    || previous == HealthStatus::Unhealthy
                {
                    HealthStatus::Unhealthy
                } else {
                    HealthStatus::Degraded
                }
            };
            record.status = current;
            (previous, current)
        };

        if current == previous {
            return current;
        }

        match current {
            HealthStatus::Healthy => {
                info!(node_id = %node_id, previous = %previous, "Node became healthy");
                let _ = self.events.send(HealthEvent::NodeHealthy {
                    node_id: node_id.clone(),
                    previous,
                });
            }
            HealthStatus::Unhealthy => {
                let reason = reason.unwrap_or_else(|| "health check failed".to_string());
                warn!(node_id = %node_id, previous = %previous, reason = %reason, "Node became unhealthy");
                let _ = self.events.send(HealthEvent::NodeUnhealthy {
                    node_id: node_id.clone(),
                    previous,
                    reason,
                });
            }
            _ => debug!(node_id = %node_id, previous = %previous, current = %current, "Node health changed"),
        }
        current
    }

    /// Override a node's health without emitting an event
    pub fn update_node_health(&self, node_id: &NodeId, is_healthy: bool) {
        let mut record = self.records.entry(node_id.clone()).or_default();
        record.status = if is_healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        record.consecutive_failures = 0;
        record.consecutive_successes = 0;
        record.last_check = Some(Utc::now());
    }

    async fn collect_all_metrics(&self) {
        let timeout = Duration::from_millis(self.config.load().timeout_ms);
        let nodes: Vec<GlobalNodeInfo> = self.watched.iter().map(|e| e.value().clone()).collect();

        for node in nodes {
            match tokio::time::timeout(timeout, self.probe.collect_metrics(&node)).await {
                Ok(Ok(metrics)) if self.watched.contains_key(&node.node_id) => {
                    self.record_metrics(&node.node_id, metrics)
                }
                Ok(Ok(_)) => debug!(node_id = %node.node_id, "Dropping metrics for unwatched node"),
                Ok(Err(e)) => debug!(node_id = %node.node_id, error = %e, "Metrics collection failed"),
                Err(_) => debug!(node_id = %node.node_id, "Metrics collection timed out"),
            }
        }
    }

    /// Store a load sample and publish it
    pub fn record_metrics(&self, node_id: &NodeId, metrics: LoadMetrics) {
        {
            let mut history = self.metrics_history.entry(node_id.clone()).or_default();
            history.push_back(metrics.clone());
            while history.len() > MAX_METRICS_HISTORY {
                history.pop_front();
            }
        }
        let _ = self.events.send(HealthEvent::LoadSampled {
            node_id: node_id.clone(),
            metrics,
        });
    }

    pub fn get_node_health_status(&self, node_id: &NodeId) -> HealthStatus {
        self.records
            .get(node_id)
            .map(|r| r.status)
            .unwrap_or(HealthStatus::Unknown)
    }

    pub fn get_node_health_record(&self, node_id: &NodeId) -> Option<NodeHealthRecord> {
        self.records.get(node_id).map(|r| r.clone())
    }

    /// Most recent samples first, at most `limit`
    pub fn get_node_metrics(&self, node_id: &NodeId, limit: usize) -> Vec<LoadMetrics> {
        self.metrics_history
            .get(node_id)
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_healthy_nodes(&self) -> Vec<NodeId> {
        self.nodes_with_status(HealthStatus::Healthy)
    }

    pub fn get_unhealthy_nodes(&self) -> Vec<NodeId> {
        self.nodes_with_status(HealthStatus::Unhealthy)
    }

    fn nodes_with_status(&self, status: HealthStatus) -> Vec<NodeId> {
        let mut nodes: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.value().status == status)
            .map(|r| r.key().clone())
            .collect();
        nodes.sort();
        nodes
    }

    /// Mean CPU load from the latest sample of each node (all nodes when `node_ids` is None)
    pub fn calculate_average_load(&self, node_ids: Option<&[NodeId]>) -> f64 {
        let loads: Vec<f64> = match node_ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.metrics_history.get(id).and_then(|h| h.back().map(LoadMetrics::load)))
                .collect(),
            None => self
                .metrics_history
                .iter()
                .filter_map(|h| h.value().back().map(LoadMetrics::load))
                .collect(),
        };

        if loads.is_empty() {
            0.0
        } else {
            loads.iter().sum::<f64>() / loads.len() as f64
        }
    }

    pub fn get_health_summary(&self) -> HealthSummary {
        let mut summary = HealthSummary {
            total_nodes: self.records.len(),
            healthy: 0,
            degraded: 0,
            unhealthy: 0,
            unknown: 0,
            average_load: self.calculate_average_load(None),
        };
        for record in self.records.iter() {
            match record.status {
                HealthStatus::Healthy => summary.healthy += 1,
                HealthStatus::Degraded => summary.degraded += 1,
                HealthStatus::Unhealthy => summary.unhealthy += 1,
                HealthStatus::Unknown => summary.unknown += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct SwitchProbe {
        healthy: AtomicBool,
        delay: Duration,
    }

    #[async_trait]
    impl HealthProbe for SwitchProbe {
        async fn check(&self, _node: &GlobalNodeInfo) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(OrchestratorError::health_check("connection refused"))
            }
        }

        async fn collect_metrics(&self, _node: &GlobalNodeInfo) -> Result<LoadMetrics> {
            Ok(LoadMetrics {
                cpu_usage: 30.0,
                ..LoadMetrics::default()
            })
        }
    }

    fn service(delay: Duration) -> (HealthMonitoringService, Arc<SwitchProbe>) {
        let probe = Arc::new(SwitchProbe {
            healthy: AtomicBool::new(true),
            delay,
        });
        let config = HealthMonitoringConfig {
            unhealthy_threshold: 3,
            healthy_threshold: 2,
            timeout_ms: 50,
            ..HealthMonitoringConfig::default()
        };
        (HealthMonitoringService::with_probe(config, probe.clone()), probe)
    }

    fn drain(rx: &mut broadcast::Receiver<HealthEvent>) -> Vec<HealthEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_unhealthy_exactly_at_threshold() {
        let (service, _) = service(Duration::ZERO);
        let id = NodeId::new("n1");
        let mut events = service.subscribe();

        assert_eq!(service.record_probe_result(&id, false, None), HealthStatus::Degraded);
        assert_eq!(service.record_probe_result(&id, false, None), HealthStatus::Degraded);
        assert!(drain(&mut events).is_empty());

        assert_eq!(
            service.record_probe_result(&id, false, Some("timeout".into())),
            HealthStatus::Unhealthy
        );
        let emitted = drain(&mut events);
        assert_eq!(emitted.len(), 1);
        assert!(matches!(
            &emitted[0],
            HealthEvent::NodeUnhealthy { previous: HealthStatus::Degraded, reason, .. } if reason == "timeout"
        ));

        // further failures do not re-emit
        service.record_probe_result(&id, false, None);
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_recovery_needs_healthy_threshold() {
        let (service, _) = service(Duration::ZERO);
        let id = NodeId::new("n1");
        for _ in 0..3 {
            service.record_probe_result(&id, false, None);
        }
        let mut events = service.subscribe();

        assert_eq!(service.record_probe_result(&id, true, None), HealthStatus::Unhealthy);
        assert!(drain(&mut events).is_empty());
        assert_eq!(service.record_probe_result(&id, true, None), HealthStatus::Healthy);

        let emitted = drain(&mut events);
        assert_eq!(emitted.len(), 1);
        assert!(matches!(
            emitted[0],
            HealthEvent::NodeHealthy { previous: HealthStatus::Unhealthy, .. }
        ));
    }

    #[tokio::test]
    async fn test_interrupted_streak_resets() {
        let (service, _) = service(Duration::ZERO);
        let id = NodeId::new("n1");
        service.record_probe_result(&id, false, None);
        service.record_probe_result(&id, false, None);
        assert_eq!(service.record_probe_result(&id, true, None), HealthStatus::Healthy);
        service.record_probe_result(&id, false, None);
        assert_eq!(service.record_probe_result(&id, false, None), HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_override_does_not_emit() {
        let (service, _) = service(Duration::ZERO);
        let id = NodeId::new("n1");
        let mut events = service.subscribe();

        service.update_node_health(&id, false);
        assert_eq!(service.get_node_health_status(&id), HealthStatus::Unhealthy);
        service.update_node_health(&id, true);
        assert_eq!(service.get_node_health_status(&id), HealthStatus::Healthy);
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_failure() {
        let (service, _) = service(Duration::from_millis(500));
        let node = GlobalNodeInfo::new("n1", "f1", "10.0.0.1", 8080);
        service.watch_node(node.clone());

        assert_eq!(service.check_node_health(&node).await, HealthStatus::Degraded);
        let record = service.get_node_health_record(&node.node_id).unwrap();
        assert_eq!(record.consecutive_failures, 1);
        assert!(record.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_run_health_checks_probes_watched_nodes() {
        let (service, probe) = service(Duration::ZERO);
        let service = Arc::new(service);
        service.watch_node(GlobalNodeInfo::new("n1", "f1", "10.0.0.1", 8080));
        service.watch_node(GlobalNodeInfo::new("n2", "f1", "10.0.0.2", 8080));

        service.run_health_checks().await;
        assert_eq!(service.get_healthy_nodes().len(), 2);

        probe.healthy.store(false, Ordering::SeqCst);
        service.unwatch_node(&NodeId::new("n2"));
        service.run_health_checks().await;
        assert_eq!(service.get_node_health_status(&NodeId::new("n1")), HealthStatus::Degraded);
        assert_eq!(service.get_node_health_status(&NodeId::new("n2")), HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn test_result_for_node_unwatched_mid_check_is_dropped() {
        let (service, _) = service(Duration::from_millis(20));
        let service = Arc::new(service);
        let node = GlobalNodeInfo::new("n1", "f1", "10.0.0.1", 8080);
        service.watch_node(node.clone());

        let probing = {
            let service = Arc::clone(&service);
            let node = node.clone();
            tokio::spawn(async move { service.check_node_health(&node).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        service.unwatch_node(&node.node_id);

        assert_eq!(probing.await.unwrap(), HealthStatus::Unknown);
        assert!(service.get_node_health_record(&node.node_id).is_none());
        assert_eq!(service.get_health_summary().total_nodes, 0);
    }

    #[tokio::test]
    async fn test_passing_health_check_refreshes_last_seen() {
        let (service, probe) = service(Duration::ZERO);
        let registry = Arc::new(DashMap::new());
        let service = service.with_liveness(Arc::clone(&registry));

        let mut node = GlobalNodeInfo::new("n1", "f1", "10.0.0.1", 8080);
        let stale = Utc::now() - chrono::Duration::minutes(10);
        node.last_seen = stale;
        registry.insert(node.node_id.clone(), node.clone());
        service.watch_node(node.clone());

        service.check_node_health(&node).await;
        assert!(registry.get(&node.node_id).unwrap().last_seen > stale);

        let refreshed = registry.get(&node.node_id).unwrap().last_seen;
        probe.healthy.store(false, Ordering::SeqCst);
        service.check_node_health(&node).await;
        assert_eq!(registry.get(&node.node_id).unwrap().last_seen, refreshed);
    }

    #[tokio::test]
    async fn test_metrics_history_bounded_and_emitted() {
        let (service, _) = service(Duration::ZERO);
        let id = NodeId::new("n1");
        let mut events = service.subscribe();

        for i in 0..150 {
            service.record_metrics(
                &id,
                LoadMetrics {
                    cpu_usage: i as f64,
                    ..LoadMetrics::default()
                },
            );
        }

        assert_eq!(service.get_node_metrics(&id, usize::MAX).len(), MAX_METRICS_HISTORY);
        assert_eq!(service.get_node_metrics(&id, 1)[0].cpu_usage, 149.0);
        assert_eq!(service.calculate_average_load(Some(&[id.clone()])), 149.0);
        assert!(matches!(events.try_recv().unwrap(), HealthEvent::LoadSampled { .. }));
    }
}
