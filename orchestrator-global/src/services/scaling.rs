use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::Client;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

// Machine Learning imports for predictive scaling
use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2};

use crate::config::ScalingConfig;
use crate::error::{ErrorCode, OrchestratorError, Result};
use crate::types::{
    ComparisonOperator, FederationId, GlobalNodeInfo, HealthStatus, NodeId, NodeStatus, ScalingAction,
    ScalingCondition, ScalingDecision, ScalingImpact, ScalingPolicy,
};

const MAX_SCALING_HISTORY: usize = 100;

/// Time-series data point for federation load history
#[derive(Debug, Clone)]
struct LoadDataPoint {
    timestamp: Instant,
    load: f64,
}

#[derive(Debug, Default)]
struct FederationScalingState {
    history: VecDeque<LoadDataPoint>,
    /// Consecutive evaluations that met the scale-up condition
    scale_up_checks: u32,
    /// Consecutive evaluations that met the scale-down condition
    scale_down_checks: u32,
}

impl FederationScalingState {
    fn reset_checks(&mut self) {
        self.scale_up_checks = 0;
        self.scale_down_checks = 0;
    }
}

/// Federation metrics calculated from its active nodes
#[derive(Debug, Clone)]
struct FederationMetrics {
    node_count: usize,
    avg_cpu_usage: f64,
    avg_memory_usage: f64,
    least_loaded_node: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub enum ScalingEvent {
    ScalingExecuted(ScalingDecision),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingStats {
    pub enabled: bool,
    pub running: bool,
    pub scale_up_events: u64,
    pub scale_down_events: u64,
    pub nodes_in_cooldown: usize,
    pub history_length: usize,
    pub last_decision: Option<ScalingDecision>,
}

/// Webhook payload for executed scaling decisions
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProvisioningWebhookPayload<'a> {
    decision: &'a ScalingDecision,
    predicted_load: Option<f64>,
    sent_at: DateTime<Utc>,
}

/// Evaluates federation load and scales up or down
pub struct AutoScalingService {
    config: ArcSwap<ScalingConfig>,
    /// Reference to the discovery node registry
    node_registry: Arc<DashMap<NodeId, GlobalNodeInfo>>,
    /// HTTP client for webhook calls
    http_client: Client,
    federations: Mutex<HashMap<FederationId, FederationScalingState>>,
    /// Last time each node was the target of a scaling action
    last_actions: DashMap<NodeId, DateTime<Utc>>,
    history: Mutex<VecDeque<ScalingDecision>>,
    events: broadcast::Sender<ScalingEvent>,
    shutdown: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
    scale_up_events: AtomicU64,
    scale_down_events: AtomicU64,
}

impl AutoScalingService {
    pub fn new(
        config: ScalingConfig,
        node_registry: Arc<DashMap<NodeId, GlobalNodeInfo>>,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| OrchestratorError::scaling(format!("Failed to create HTTP client: {}", e)))?;

        let (events, _) = broadcast::channel(256);
        Ok(Self {
            config: ArcSwap::from_pointee(config),
            node_registry,
            http_client,
            federations: Mutex::new(HashMap::new()),
            last_actions: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            events,
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
            scale_up_events: AtomicU64::new(0),
            scale_down_events: AtomicU64::new(0),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScalingEvent> {
        self.events.subscribe()
    }

    pub fn update_config(&self, config: ScalingConfig) {
        self.config.store(Arc::new(config));
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Start the evaluation loop
    #[instrument(skip(self))]
    pub fn start(self: &Arc<Self>) {
        let config = self.config.load_full();
        if !config.enabled {
            info!("Auto-scaling disabled");
            return;
        }

        let token = {
            let Ok(mut shutdown) = self.shutdown.lock() else {
                return;
            };
            if shutdown.is_some() {
                debug!("Auto-scaling already running");
                return;
            }
            let token = CancellationToken::new();
            *shutdown = Some(token.clone());
            token
        };

        info!(
            interval_ms = config.evaluation_interval_ms,
            min_nodes = config.min_nodes,
            max_nodes = config.max_nodes,
            scale_up_threshold = config.scale_up_threshold,
            scale_down_threshold = config.scale_down_threshold,
            predictive = config.predictive_scaling,
            "Starting auto-scaling"
        );

        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let interval = service.config.load().evaluation_interval_ms;
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(interval)) => {}
                }
                service.run_scaling_cycle().await;
            }
            debug!("Auto-scaling loop stopped");
        });

        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
    }

    pub async fn stop(&self) {
        let token = self.shutdown.lock().ok().and_then(|mut s| s.take());
        let Some(token) = token else {
            return;
        };
        token.cancel();

        let handle = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Auto-scaling task ended abnormally");
            }
        }
        info!("Auto-scaling stopped");
    }

    /// Evaluate every federation and execute the confirmed decisions
    pub async fn run_scaling_cycle(&self) {
        for (decision, predicted) in self.evaluate_scaling() {
            self.execute_decision(decision, predicted).await;
        }
    }

    /// Evaluate every federation once and return the decisions that passed confirmation and cooldown
    pub fn evaluate_scaling(&self) -> Vec<(ScalingDecision, Option<f64>)> {
        let config = self.config.load_full();
        let mut by_federation: BTreeMap<FederationId, Vec<GlobalNodeInfo>> = BTreeMap::new();
        for entry in self.node_registry.iter() {
            // unhealthy nodes carry stale load and are not scale-down candidates
            if entry.value().status == NodeStatus::Active
                && entry.value().health_status != HealthStatus::Unhealthy
            {
                by_federation
                    .entry(entry.value().federation_id.clone())
                    .or_default()
                    .push(entry.value().clone());
            }
        }

        let Ok(mut federations) = self.federations.lock() else {
            error!("Scaling state lock poisoned");
            return Vec::new();
        };
        federations.retain(|id, _| by_federation.contains_key(id));

        let mut decisions = Vec::new();
        for (federation_id, nodes) in by_federation {
            let state = federations.entry(federation_id.clone()).or_default();
            if let Some(decision) = self.evaluate_federation(&config, &federation_id, &nodes, state) {
                decisions.push(decision);
            }
        }
        decisions
    }

    fn evaluate_federation(
        &self,
        config: &ScalingConfig,
        federation_id: &FederationId,
        nodes: &[GlobalNodeInfo],
        state: &mut FederationScalingState,
    ) -> Option<(ScalingDecision, Option<f64>)> {
        let metrics = calculate_federation_metrics(nodes)?;
        add_load_data_point(
            &mut state.history,
            metrics.avg_cpu_usage,
            Duration::from_secs(config.metrics_window_secs),
        );

        let predicted = if config.predictive_scaling {
            predict_future_load(
                &state.history,
                config.min_prediction_samples,
                config.prediction_horizon_secs as f64 / 60.0,
            )
        } else {
            None
        };
        let effective_load = predicted.unwrap_or(metrics.avg_cpu_usage);

        debug!(
            federation_id = %federation_id,
            nodes = metrics.node_count,
            avg_cpu = metrics.avg_cpu_usage,
            predicted_cpu = ?predicted,
            history_points = state.history.len(),
            "Federation metrics calculated"
        );

        let decision = if effective_load > config.scale_up_threshold
            && metrics.node_count < config.max_nodes
        {
            state.scale_up_checks += 1;
            state.scale_down_checks = 0;
            if state.scale_up_checks < config.scale_up_confirmations {
                debug!(
                    federation_id = %federation_id,
                    checks = state.scale_up_checks,
                    "Scale-up condition met, waiting for confirmation"
                );
                return None;
            }
            state.reset_checks();

            let n = metrics.node_count as f64;
            ScalingDecision {
                action: ScalingAction::ScaleUp,
                federation_id: Some(federation_id.clone()),
                target_nodes: nodes.iter().map(|n| n.node_id.clone()).collect(),
                reason: match predicted {
                    Some(p) => format!(
                        "Predicted load {:.1}% exceeds scale-up threshold {:.1}%",
                        p, config.scale_up_threshold
                    ),
                    None => format!(
                        "Average load {:.1}% exceeds scale-up threshold {:.1}%",
                        metrics.avg_cpu_usage, config.scale_up_threshold
                    ),
                },
                expected_impact: ScalingImpact {
                    cpu_reduction: metrics.avg_cpu_usage / (n + 1.0),
                    memory_reduction: metrics.avg_memory_usage / (n + 1.0),
                    latency_improvement: 10.0,
                    cost_change: 100.0 / n,
                },
                timestamp: Utc::now(),
            }
        } else if metrics.avg_cpu_usage < config.scale_down_threshold
            && metrics.node_count > config.min_nodes
        {
            state.scale_down_checks += 1;
            state.scale_up_checks = 0;
            if state.scale_down_checks < config.scale_down_confirmations {
                debug!(
                    federation_id = %federation_id,
                    checks = state.scale_down_checks,
                    "Scale-down condition met, waiting for confirmation"
                );
                return None;
            }
            state.reset_checks();

            let Some(target) = metrics.least_loaded_node.clone() else {
                warn!(federation_id = %federation_id, "Scale-down condition met but no suitable target node found");
                return None;
            };
            let n = metrics.node_count as f64;
            let remaining = (n - 1.0).max(1.0);
            ScalingDecision {
                action: ScalingAction::ScaleDown,
                federation_id: Some(federation_id.clone()),
                target_nodes: vec![target],
                reason: format!(
                    "Average load {:.1}% below scale-down threshold {:.1}%",
                    metrics.avg_cpu_usage, config.scale_down_threshold
                ),
                expected_impact: ScalingImpact {
                    cpu_reduction: -(metrics.avg_cpu_usage / remaining),
                    memory_reduction: -(metrics.avg_memory_usage / remaining),
                    latency_improvement: -5.0,
                    cost_change: -100.0 / n,
                },
                timestamp: Utc::now(),
            }
        } else {
            if state.scale_up_checks > 0 || state.scale_down_checks > 0 {
                debug!(federation_id = %federation_id, "Scaling conditions no longer met, resetting counters");
            }
            state.reset_checks();
            return None;
        };

        if let Some(node) = decision.target_nodes.iter().find(|n| self.is_within_cooldown(n)) {
            info!(
                federation_id = %federation_id,
                node_id = %node,
                action = ?decision.action,
                "Scaling decision suppressed by cooldown"
            );
            return None;
        }

        Some((decision, predicted))
    }

    /// Record, announce and forward a decision
    #[instrument(skip(self, decision), fields(action = ?decision.action))]
    async fn execute_decision(&self, decision: ScalingDecision, predicted_load: Option<f64>) {
        let now = Utc::now();
        for node_id in &decision.target_nodes {
            self.last_actions.insert(node_id.clone(), now);
        }

        match decision.action {
            ScalingAction::ScaleUp => {
                self.scale_up_events.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("orchestrator_scale_up_events_total", 1);
            }
            ScalingAction::ScaleDown => {
                self.scale_down_events.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("orchestrator_scale_down_events_total", 1);
            }
            ScalingAction::NoAction => {}
        }

        if let Ok(mut history) = self.history.lock() {
            history.push_back(decision.clone());
            while history.len() > MAX_SCALING_HISTORY {
                history.pop_front();
            }
        }

        info!(
            federation_id = ?decision.federation_id,
            targets = decision.target_nodes.len(),
            reason = %decision.reason,
            "Scaling decision executed"
        );
        let _ = self.events.send(ScalingEvent::ScalingExecuted(decision.clone()));

        if let Err(e) = self.call_provisioning_webhook(&decision, predicted_load).await {
            error!(code = %e.code, error = %e.message, "Provisioning webhook failed");
        }
    }

    async fn call_provisioning_webhook(
        &self,
        decision: &ScalingDecision,
        predicted_load: Option<f64>,
    ) -> Result<()> {
        let Some(url) = self.config.load().provisioning_webhook_url.clone() else {
            return Ok(());
        };

        let payload = ProvisioningWebhookPayload {
            decision,
            predicted_load,
            sent_at: Utc::now(),
        };

        debug!(webhook_url = %url, "Sending provisioning webhook");
        let response = self
            .http_client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| OrchestratorError::scaling(format!("Failed to send provisioning webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(OrchestratorError::new(
                ErrorCode::ScalingFailed,
                format!("Provisioning webhook returned status {}", response.status()),
            ));
        }
        info!(status = %response.status(), "Provisioning webhook accepted");
        Ok(())
    }

    /// Apply an operator-requested action, bypassing thresholds
    pub async fn manual_scale(
        &self,
        action: ScalingAction,
        target_nodes: Vec<NodeId>,
        reason: impl Into<String>,
        force: bool,
    ) -> Result<ScalingDecision> {
        if action == ScalingAction::NoAction {
            return Err(OrchestratorError::scaling("Manual scaling requires scale_up or scale_down"));
        }
        if target_nodes.is_empty() {
            return Err(OrchestratorError::scaling("Manual scaling requires at least one target node"));
        }
        if !force {
            if let Some(node) = target_nodes.iter().find(|n| self.is_within_cooldown(n)) {
                return Err(OrchestratorError::scaling("Target node is within the cooldown period")
                    .with_node(node.clone()));
            }
        }

        let federation_id = target_nodes
            .iter()
            .find_map(|id| self.node_registry.get(id).map(|n| n.federation_id.clone()));
        let decision = ScalingDecision {
            action,
            federation_id,
            target_nodes,
            reason: format!("Manual: {}", reason.into()),
            expected_impact: ScalingImpact::default(),
            timestamp: Utc::now(),
        };

        self.execute_decision(decision.clone(), None).await;
        Ok(decision)
    }

    pub fn is_within_cooldown(&self, node_id: &NodeId) -> bool {
        let cooldown = chrono::Duration::seconds(self.config.load().cooldown_period_secs as i64);
        self.last_actions
            .get(node_id)
            .map(|last| Utc::now() - *last < cooldown)
            .unwrap_or(false)
    }

    /// Change thresholds at runtime
    pub fn update_thresholds(&self, scale_up: f64, scale_down: f64) -> Result<()> {
        if !(0.0..=100.0).contains(&scale_up) || !(0.0..=100.0).contains(&scale_down) {
            return Err(OrchestratorError::config("Scaling thresholds must be between 0 and 100"));
        }
        if scale_down >= scale_up {
            return Err(OrchestratorError::config(
                "Scale down threshold must be below scale up threshold",
            ));
        }

        let mut config = self.config.load().as_ref().clone();
        config.scale_up_threshold = scale_up;
        config.scale_down_threshold = scale_down;
        self.config.store(Arc::new(config));
        info!(scale_up = scale_up, scale_down = scale_down, "Scaling thresholds updated");
        Ok(())
    }

    /// Policy in effect for each known federation
    pub fn scaling_policies(&self) -> Vec<ScalingPolicy> {
        let config = self.config.load();
        let mut federation_ids: Vec<FederationId> = self
            .node_registry
            .iter()
            .map(|e| e.value().federation_id.clone())
            .collect();
        federation_ids.sort();
        federation_ids.dedup();

        let duration_secs = config.evaluation_interval_ms / 1000;
        federation_ids
            .into_iter()
            .map(|federation_id| ScalingPolicy {
                policy_id: format!("{}-cpu", federation_id),
                federation_id,
                conditions: vec![
                    ScalingCondition {
                        metric: "cpu_usage".to_string(),
                        operator: ComparisonOperator::Gt,
                        threshold: config.scale_up_threshold,
                        duration_secs: duration_secs * config.scale_up_confirmations as u64,
                    },
                    ScalingCondition {
                        metric: "cpu_usage".to_string(),
                        operator: ComparisonOperator::Lt,
                        threshold: config.scale_down_threshold,
                        duration_secs: duration_secs * config.scale_down_confirmations as u64,
                    },
                ],
                actions: vec![ScalingAction::ScaleUp, ScalingAction::ScaleDown],
                cooldown_period_secs: config.cooldown_period_secs,
                enabled: config.enabled,
            })
            .collect()
    }

    /// Most recent decisions first
    pub fn get_scaling_history(&self, limit: usize) -> Vec<ScalingDecision> {
        self.history
            .lock()
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn total_scaling_events(&self) -> u64 {
        self.scale_up_events.load(Ordering::Relaxed) + self.scale_down_events.load(Ordering::Relaxed)
    }

    pub fn get_scaling_stats(&self) -> ScalingStats {
        let (history_length, last_decision) = self
            .history
            .lock()
            .map(|h| (h.len(), h.back().cloned()))
            .unwrap_or((0, None));

        ScalingStats {
            enabled: self.config.load().enabled,
            running: self.is_running(),
            scale_up_events: self.scale_up_events.load(Ordering::Relaxed),
            scale_down_events: self.scale_down_events.load(Ordering::Relaxed),
            nodes_in_cooldown: self
                .last_actions
                .iter()
                .filter(|e| self.is_within_cooldown(e.key()))
                .count(),
            history_length,
            last_decision,
        }
    }
}

/// Mean load over the nodes that reported a sample; None when nobody has
fn calculate_federation_metrics(nodes: &[GlobalNodeInfo]) -> Option<FederationMetrics> {
    let sampled: Vec<(&NodeId, f64, f64)> = nodes
        .iter()
        .filter_map(|n| {
            n.load_metrics
                .as_ref()
                .map(|m| (&n.node_id, m.cpu_usage, m.memory_usage))
        })
        .collect();
    if sampled.is_empty() {
        return None;
    }

    let count = sampled.len() as f64;
    let least_loaded_node = sampled
        .iter()
        .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(id, _, _)| (*id).clone());

    Some(FederationMetrics {
        node_count: nodes.len(),
        avg_cpu_usage: sampled.iter().map(|s| s.1).sum::<f64>() / count,
        avg_memory_usage: sampled.iter().map(|s| s.2).sum::<f64>() / count,
        least_loaded_node,
    })
}

fn add_load_data_point(history: &mut VecDeque<LoadDataPoint>, load: f64, window: Duration) {
    let now = Instant::now();
    history.push_back(LoadDataPoint {
        timestamp: now,
        load,
    });

    while let Some(front) = history.front() {
        if now.duration_since(front.timestamp) > window {
            history.pop_front();
        } else {
            break;
        }
    }
}

fn predict_future_load(
    history: &VecDeque<LoadDataPoint>,
    min_samples: usize,
    horizon_minutes: f64,
) -> Option<f64> {
    let start_time = history.front()?.timestamp;
    let samples: Vec<(f64, f64)> = history
        .iter()
        .map(|point| {
            let elapsed = point.timestamp.duration_since(start_time).as_secs_f64() / 60.0;
            (elapsed, point.load)
        })
        .collect();
    predict_linear(&samples, min_samples, horizon_minutes)
}

/// Fit load against time (minutes) and extrapolate `horizon_minutes` past the last sample
fn predict_linear(samples: &[(f64, f64)], min_samples: usize, horizon_minutes: f64) -> Option<f64> {
    if samples.len() < min_samples.max(2) {
        debug!(data_points = samples.len(), "Insufficient data for load prediction");
        return None;
    }

    let first_time = samples.first()?.0;
    let last_time = samples.last()?.0;
    if last_time - first_time <= f64::EPSILON {
        return None;
    }

    let features: Vec<f64> = samples.iter().map(|s| s.0).collect();
    let targets: Vec<f64> = samples.iter().map(|s| s.1).collect();

    let feature_matrix = Array2::from_shape_vec((features.len(), 1), features).ok()?;
    let target_array = Array1::from_vec(targets);
    let dataset = Dataset::new(feature_matrix, target_array);

    let model = match LinearRegression::default().fit(&dataset) {
        Ok(model) => model,
        Err(e) => {
            warn!(error = %e, "Failed to train prediction model");
            return None;
        }
    };

    let future_features = Array2::from_shape_vec((1, 1), vec![last_time + horizon_minutes]).ok()?;
    let prediction = model.predict(&future_features);
    let predicted = *prediction.get(0)?;
    if !predicted.is_finite() {
        return None;
    }

    // Clamp prediction to reasonable bounds (0-100%)
    Some(predicted.clamp(0.0, 100.0))
}
