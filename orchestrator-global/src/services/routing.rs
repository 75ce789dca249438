use arc_swap::ArcSwap;
use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{FederationIntegrationConfig, FederationSelection, RoutingConfig};
use crate::error::{OrchestratorError, Result};
use crate::types::{
    FederationId, GlobalNodeInfo, LoadMetrics, NodeId, OrchestratorMessage, RoutingAlgorithm,
    RoutingDecision,
};

/// Score used by adaptive routing for nodes without samples
const DEFAULT_ADAPTIVE_SCORE: f64 = 0.5;
/// Sample recorded for a routed message when the node's error rate is unknown
const ASSUMED_SUCCESS_SCORE: f64 = 0.9;

#[derive(Debug, Clone)]
pub enum RoutingEvent {
    MessageRouted {
        decision: RoutingDecision,
        message: OrchestratorMessage,
    },
}

/// Where a routed node lives
#[derive(Debug, Clone)]
struct NodePlacement {
    federation_id: FederationId,
    region: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingStats {
    pub algorithm: RoutingAlgorithm,
    pub total_federations: usize,
    pub total_nodes: usize,
    pub total_regions: usize,
    pub messages_routed: u64,
    pub routing_failures: u64,
    pub cross_federation_messages: u64,
    pub average_latency_ms: f64,
    pub nodes_with_adaptive_samples: usize,
}

/// Picks a target node for each message
pub struct IntelligentRoutingService {
    config: ArcSwap<RoutingConfig>,
    federation_config: ArcSwap<FederationIntegrationConfig>,
    /// Per-federation candidates; values are replaced, never mutated in place
    routing_table: DashMap<FederationId, Arc<Vec<RoutingDecision>>>,
    region_table: DashMap<String, Arc<Vec<NodeId>>>,
    placements: DashMap<NodeId, NodePlacement>,
    load_cache: DashMap<NodeId, f64>,
    response_times: DashMap<NodeId, f64>,
    error_rates: DashMap<NodeId, f64>,
    adaptive_metrics: DashMap<NodeId, VecDeque<f64>>,
    cursors: DashMap<FederationId, usize>,
    events: broadcast::Sender<RoutingEvent>,
    messages_routed: AtomicU64,
    routing_failures: AtomicU64,
    cross_federation_messages: AtomicU64,
    total_latency_us: AtomicU64,
}

impl IntelligentRoutingService {
    pub fn new(config: RoutingConfig, federation_config: FederationIntegrationConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            config: ArcSwap::from_pointee(config),
            federation_config: ArcSwap::from_pointee(federation_config),
            routing_table: DashMap::new(),
            region_table: DashMap::new(),
            placements: DashMap::new(),
            load_cache: DashMap::new(),
            response_times: DashMap::new(),
            error_rates: DashMap::new(),
            adaptive_metrics: DashMap::new(),
            cursors: DashMap::new(),
            events,
            messages_routed: AtomicU64::new(0),
            routing_failures: AtomicU64::new(0),
            cross_federation_messages: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
        self.events.subscribe()
    }

    pub fn update_config(&self, config: RoutingConfig, federation_config: FederationIntegrationConfig) {
        if self.config.load().algorithm != config.algorithm {
            info!(algorithm = config.algorithm.as_str(), "Routing algorithm changed");
        }
        self.config.store(Arc::new(config));
        self.federation_config.store(Arc::new(federation_config));
    }

    /// Rebuild every table from scratch
    pub fn initialize(&self, nodes: &[GlobalNodeInfo]) {
        self.routing_table.clear();
        self.region_table.clear();
        self.placements.clear();
        self.load_cache.clear();
        self.response_times.clear();
        self.error_rates.clear();
        self.adaptive_metrics.clear();
        self.cursors.clear();

        let mut sorted: Vec<&GlobalNodeInfo> = nodes.iter().collect();
        sorted.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        for node in sorted {
            self.add_node(node);
        }

        info!(
            federations = self.routing_table.len(),
            nodes = self.placements.len(),
            "Routing tables initialized"
        );
    }

    /// Add a node to its federation and region tables. Adding a known node is a no-op.
    pub fn add_node(&self, node: &GlobalNodeInfo) {
        if let Some(existing) = self.placements.get(&node.node_id).map(|p| p.clone()) {
            if existing.federation_id == node.federation_id && existing.region == node.region {
                return;
            }
            self.remove_from_tables(&node.node_id, &existing);
        }

        let decision = RoutingDecision {
            target_node_id: node.node_id.clone(),
            federation_id: node.federation_id.clone(),
            reason: "node_added".to_string(),
            confidence: 1.0,
            alternatives: Vec::new(),
            timestamp: Utc::now(),
        };
        self.routing_table
            .entry(node.federation_id.clone())
            .and_modify(|decisions| {
                let mut updated = decisions.as_ref().clone();
                updated.push(decision.clone());
                *decisions = Arc::new(updated);
            })
            .or_insert_with(|| Arc::new(vec![decision]));

        if !node.region.is_empty() {
            self.region_table
                .entry(node.region.clone())
                .and_modify(|ids| {
                    let mut updated = ids.as_ref().clone();
                    updated.push(node.node_id.clone());
                    *ids = Arc::new(updated);
                })
                .or_insert_with(|| Arc::new(vec![node.node_id.clone()]));
        }

        self.placements.insert(
            node.node_id.clone(),
            NodePlacement {
                federation_id: node.federation_id.clone(),
                region: node.region.clone(),
            },
        );
        if let Some(metrics) = &node.load_metrics {
            self.update_node_load(&node.node_id, metrics);
        }

        debug!(node_id = %node.node_id, federation_id = %node.federation_id, "Node added to routing");
    }

    /// Remove a node and every cached value about it. Returns false for an unknown node.
    pub fn remove_node(&self, node_id: &NodeId) -> bool {
        let Some((_, placement)) = self.placements.remove(node_id) else {
            return false;
        };
        self.remove_from_tables(node_id, &placement);
        self.load_cache.remove(node_id);
        self.response_times.remove(node_id);
        self.error_rates.remove(node_id);
        self.adaptive_metrics.remove(node_id);

        debug!(node_id = %node_id, federation_id = %placement.federation_id, "Node removed from routing");
        true
    }

    fn remove_from_tables(&self, node_id: &NodeId, placement: &NodePlacement) {
        self.routing_table.alter(&placement.federation_id, |_, decisions| {
            Arc::new(
                decisions
                    .iter()
                    .filter(|d| &d.target_node_id != node_id)
                    .cloned()
                    .collect(),
            )
        });
        self.routing_table
            .remove_if(&placement.federation_id, |_, decisions| decisions.is_empty());

        if !placement.region.is_empty() {
            self.region_table.alter(&placement.region, |_, ids| {
                Arc::new(ids.iter().filter(|id| *id != node_id).cloned().collect())
            });
            self.region_table.remove_if(&placement.region, |_, ids| ids.is_empty());
        }
    }

    /// Refresh the cached load, response time and error rate of a node
    pub fn update_node_load(&self, node_id: &NodeId, metrics: &LoadMetrics) {
        self.load_cache.insert(node_id.clone(), metrics.load());
        self.error_rates.insert(node_id.clone(), metrics.error_rate);
        if metrics.response_time > 0.0 {
            self.response_times.insert(node_id.clone(), metrics.response_time);
        }
    }

    /// Report the observed outcome of a routed message, in [0, 1]
    pub fn record_outcome(&self, node_id: &NodeId, score: f64) {
        let window = self.config.load().adaptive_window.max(1);
        let mut samples = self.adaptive_metrics.entry(node_id.clone()).or_default();
        samples.push_back(score.clamp(0.0, 1.0));
        while samples.len() > window {
            samples.pop_front();
        }
    }

    /// Choose a target node for `message`
    pub fn route_message(&self, message: &OrchestratorMessage) -> Result<RoutingDecision> {
        let started = Instant::now();
        match self.select_target(message) {
            Ok(decision) => {
                let elapsed = started.elapsed();
                self.messages_routed.fetch_add(1, Ordering::Relaxed);
                self.total_latency_us
                    .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
                metrics::counter!("orchestrator_messages_routed_total", 1);
                metrics::histogram!("orchestrator_routing_latency_seconds", elapsed.as_secs_f64());

                if self.config.load().adaptive_routing {
                    let score = self
                        .error_rates
                        .get(&decision.target_node_id)
                        .map(|rate| 1.0 - *rate)
                        .unwrap_or(ASSUMED_SUCCESS_SCORE);
                    self.record_outcome(&decision.target_node_id, score);
                }

                debug!(
                    message_id = %message.id,
                    target_node = %decision.target_node_id,
                    federation_id = %decision.federation_id,
                    reason = %decision.reason,
                    "Message routed"
                );
                let _ = self.events.send(RoutingEvent::MessageRouted {
                    decision: decision.clone(),
                    message: message.clone(),
                });
                Ok(decision)
            }
            Err(e) => {
                self.routing_failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("orchestrator_routing_failures_total", 1);
                warn!(message_id = %message.id, error = %e, "Failed to route message");
                Err(e)
            }
        }
    }

    fn select_target(&self, message: &OrchestratorMessage) -> Result<RoutingDecision> {
        let federation_config = self.federation_config.load();
        if !federation_config.message_routing_enabled {
            return Err(OrchestratorError::routing("Message routing is disabled"));
        }

        let federation_id = match &message.target_federation_id {
            Some(id) => id.clone(),
            None => self.select_federation()?,
        };

        let candidates = self
            .routing_table
            .get(&federation_id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|decisions| !decisions.is_empty())
            .ok_or_else(|| {
                OrchestratorError::routing(format!(
                    "No routing decisions available for federation {}",
                    federation_id
                ))
                .with_federation(federation_id.clone())
            })?;

        let source_federation = self
            .placements
            .get(&message.source_node_id)
            .map(|p| p.federation_id.clone());
        if let Some(source_federation) = source_federation.filter(|f| f != &federation_id) {
            if !federation_config.cross_federation_communication {
                return Err(OrchestratorError::routing(format!(
                    "Cross-federation routing from {} to {} is disabled",
                    source_federation, federation_id
                ))
                .with_federation(federation_id)
                .with_node(message.source_node_id.clone()));
            }
            self.cross_federation_messages.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("orchestrator_cross_federation_messages_total", 1);
        }

        let ids: Vec<&NodeId> = candidates.iter().map(|d| &d.target_node_id).collect();
        let config = self.config.load();
        let (index, confidence, reason) = match config.algorithm {
            RoutingAlgorithm::RoundRobin => self.round_robin(&federation_id, &ids),
            RoutingAlgorithm::LeastConnections => self.least_connections(&ids),
            RoutingAlgorithm::LeastResponseTime => self.least_response_time(&ids),
            RoutingAlgorithm::Geographic => self.geographic(&federation_id, &ids, message, &config),
            RoutingAlgorithm::Adaptive => self.adaptive(&ids),
            RoutingAlgorithm::WeightedRoundRobin => self.weighted_round_robin(&ids),
        };

        let target = ids[index].clone();
        let alternatives = ids
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, id)| (*id).clone())
            .collect();

        Ok(RoutingDecision {
            target_node_id: target,
            federation_id,
            reason,
            confidence: confidence.clamp(0.0, 1.0),
            alternatives,
            timestamp: Utc::now(),
        })
    }

    /// Resolve a federation for messages without an explicit target
    fn select_federation(&self) -> Result<FederationId> {
        let config = self.config.load();
        if let Some(default) = &config.default_federation_id {
            return Ok(FederationId::new(default.clone()));
        }

        let no_federation = || OrchestratorError::routing("No federations available for routing");
        match config.federation_selection {
            FederationSelection::Reject => Err(OrchestratorError::routing(
                "Message has no target federation and no default is configured",
            )),
            FederationSelection::FirstKnown => self
                .routing_table
                .iter()
                .filter(|e| !e.value().is_empty())
                .map(|e| e.key().clone())
                .min()
                .ok_or_else(no_federation),
            FederationSelection::LeastLoaded => {
                let mut best: Option<(f64, FederationId)> = None;
                for entry in self.routing_table.iter() {
                    if entry.value().is_empty() {
                        continue;
                    }
                    let mean = entry
                        .value()
                        .iter()
                        .map(|d| self.cached_load(&d.target_node_id))
                        .sum::<f64>()
                        / entry.value().len() as f64;
                    let better = match &best {
                        None => true,
                        Some((load, id)) => mean < *load || (mean == *load && entry.key() < id),
                    };
                    if better {
                        best = Some((mean, entry.key().clone()));
                    }
                }
                best.map(|(_, id)| id).ok_or_else(no_federation)
            }
        }
    }

    fn cached_load(&self, node_id: &NodeId) -> f64 {
        self.load_cache.get(node_id).map(|l| *l).unwrap_or(0.0)
    }

    fn round_robin(&self, federation_id: &FederationId, ids: &[&NodeId]) -> (usize, f64, String) {
        let mut cursor = self.cursors.entry(federation_id.clone()).or_insert(0);
        let index = *cursor % ids.len();
        *cursor = cursor.wrapping_add(1);
        (index, 1.0 / ids.len() as f64, "round_robin".to_string())
    }

    fn least_connections(&self, ids: &[&NodeId]) -> (usize, f64, String) {
        let mut best = 0;
        let mut min_load = self.cached_load(ids[0]);
        for (i, id) in ids.iter().enumerate().skip(1) {
            let load = self.cached_load(id);
            if load < min_load {
                min_load = load;
                best = i;
            }
        }
        (best, 1.0 - min_load / 100.0, "least_connections".to_string())
    }

    fn least_response_time(&self, ids: &[&NodeId]) -> (usize, f64, String) {
        let times: Option<Vec<f64>> = ids
            .iter()
            .map(|id| self.response_times.get(*id).map(|t| *t))
            .collect();
        let Some(times) = times else {
            let (index, confidence, _) = self.least_connections(ids);
            return (index, confidence, "least_response_time:fallback_least_connections".to_string());
        };

        let mut best = 0;
        for (i, time) in times.iter().enumerate().skip(1) {
            if *time < times[best] {
                best = i;
            }
        }
        let slowest = times.iter().cloned().fold(f64::MIN, f64::max);
        let confidence = if slowest > 0.0 {
            1.0 - times[best] / slowest / 2.0
        } else {
            1.0
        };
        (best, confidence, "least_response_time".to_string())
    }

    fn geographic(
        &self,
        federation_id: &FederationId,
        ids: &[&NodeId],
        message: &OrchestratorMessage,
        config: &RoutingConfig,
    ) -> (usize, f64, String) {
        let region = message
            .routing_metadata
            .as_ref()
            .and_then(|m| m.hint("region"))
            .map(str::to_string)
            .or_else(|| {
                self.placements
                    .get(&message.source_node_id)
                    .map(|p| p.region.clone())
                    .filter(|r| !r.is_empty())
            });

        let Some(region) = region.filter(|_| config.geo_routing_enabled) else {
            let (index, confidence, _) = self.round_robin(federation_id, ids);
            return (index, confidence, "geographic:no_region_fallback_round_robin".to_string());
        };

        let nearby = std::iter::once(region.as_str()).chain(
            config
                .region_proximity
                .get(&region)
                .into_iter()
                .flatten()
                .map(String::as_str),
        );
        for (distance, candidate_region) in nearby.enumerate() {
            let Some(region_nodes) = self.region_table.get(candidate_region).map(|r| Arc::clone(r.value())) else {
                continue;
            };
            let local: Vec<usize> = ids
                .iter()
                .enumerate()
                .filter(|(_, id)| region_nodes.contains(id))
                .map(|(i, _)| i)
                .collect();
            if local.is_empty() {
                continue;
            }

            let mut cursor = self.cursors.entry(federation_id.clone()).or_insert(0);
            let index = local[*cursor % local.len()];
            *cursor = cursor.wrapping_add(1);
            let confidence = if distance == 0 { 0.9 } else { 0.7 };
            return (index, confidence, format!("geographic:{}", candidate_region));
        }

        let (index, _, _) = self.round_robin(federation_id, ids);
        (index, 0.5, "geographic:no_nearby_region_fallback_round_robin".to_string())
    }

    fn adaptive_score(&self, node_id: &NodeId) -> f64 {
        match self.adaptive_metrics.get(node_id) {
            Some(samples) if !samples.is_empty() => {
                (samples.iter().sum::<f64>() / samples.len() as f64).clamp(0.0, 1.0)
            }
            _ => DEFAULT_ADAPTIVE_SCORE,
        }
    }

    fn adaptive(&self, ids: &[&NodeId]) -> (usize, f64, String) {
        let mut best = 0;
        let mut best_score = self.adaptive_score(ids[0]);
        for (i, id) in ids.iter().enumerate().skip(1) {
            let score = self.adaptive_score(id);
            if score > best_score {
                best_score = score;
                best = i;
            }
        }
        (best, best_score, "adaptive".to_string())
    }

    fn weighted_round_robin(&self, ids: &[&NodeId]) -> (usize, f64, String) {
        let weights: Vec<f64> = ids
            .iter()
            .map(|id| (100.0 - self.cached_load(id)).max(1.0))
            .collect();
        let total: f64 = weights.iter().sum();

        let mut remaining = rand::thread_rng().gen::<f64>() * total;
        let mut index = weights.len() - 1;
        for (i, weight) in weights.iter().enumerate() {
            remaining -= weight;
            if remaining <= 0.0 {
                index = i;
                break;
            }
        }
        (index, weights[index] / total, "weighted_round_robin".to_string())
    }

    /// Snapshot of the routing table
    pub fn get_routing_table(&self) -> BTreeMap<FederationId, Vec<RoutingDecision>> {
        self.routing_table
            .iter()
            .map(|e| (e.key().clone(), e.value().as_ref().clone()))
            .collect()
    }

    pub fn get_federation_ids(&self) -> Vec<FederationId> {
        let mut ids: Vec<_> = self.routing_table.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn get_routing_stats(&self) -> RoutingStats {
        let routed = self.messages_routed.load(Ordering::Relaxed);
        let average_latency_ms = if routed == 0 {
            0.0
        } else {
            self.total_latency_us.load(Ordering::Relaxed) as f64 / routed as f64 / 1000.0
        };

        RoutingStats {
            algorithm: self.config.load().algorithm,
            total_federations: self.routing_table.len(),
            total_nodes: self.placements.len(),
            total_regions: self.region_table.len(),
            messages_routed: routed,
            routing_failures: self.routing_failures.load(Ordering::Relaxed),
            cross_federation_messages: self.cross_federation_messages.load(Ordering::Relaxed),
            average_latency_ms,
            nodes_with_adaptive_samples: self.adaptive_metrics.len(),
        }
    }
}
