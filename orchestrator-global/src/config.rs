use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::types::{FailoverStrategy, NodeId, RoutingAlgorithm};

/// Main configuration document for the global orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Identifier reported in metrics and events
    pub orchestrator_id: String,
    /// How often the configuration file is checked for changes (0 disables watching)
    pub config_watch_interval_ms: u64,
    pub discovery: DiscoveryConfig,
    pub health_monitoring: HealthMonitoringConfig,
    pub routing: RoutingConfig,
    pub scaling: ScalingConfig,
    pub failover: FailoverConfig,
    pub federation: FederationIntegrationConfig,
    pub api: ApiConfig,
    pub telemetry: TelemetryConfig,
    pub nats: NatsConfig,
}

/// Node discovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    /// Registry base URL; `GET {url}/nodes` returns the node list
    pub service_registry_url: Option<String>,
    /// Period of the registry fetch
    pub discovery_interval_ms: u64,
    /// Period of the lost-node sweep
    pub heartbeat_interval_ms: u64,
    /// Nodes unseen for longer than this are reported lost
    pub node_timeout_ms: u64,
    /// Retries of a failed registry fetch within one tick
    pub max_retries: u32,
    /// Linear backoff step between retries
    pub retry_backoff_ms: u64,
    pub request_timeout_ms: u64,
}

/// Health probing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthMonitoringConfig {
    pub enabled: bool,
    pub check_interval_ms: u64,
    /// Upper bound of a single probe
    pub timeout_ms: u64,
    /// Consecutive failed probes before a node is UNHEALTHY
    pub unhealthy_threshold: u32,
    /// Consecutive successful probes before an UNHEALTHY node is HEALTHY again
    pub healthy_threshold: u32,
    pub metrics_collection_interval_ms: u64,
}

/// Policy applied when a message names no target federation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FederationSelection {
    /// Fail the request with ROUTING_FAILED
    #[default]
    Reject,
    /// Lexicographically smallest known federation
    FirstKnown,
    /// Federation with the lowest mean cached load
    LeastLoaded,
}

/// Message routing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub algorithm: RoutingAlgorithm,
    /// Record per-node outcome samples after each routed message
    pub adaptive_routing: bool,
    /// Maintain the per-region table used by geographic routing
    pub geo_routing_enabled: bool,
    pub federation_selection: FederationSelection,
    /// Takes precedence over `federation_selection` when set
    pub default_federation_id: Option<String>,
    /// Region -> regions ordered by proximity
    pub region_proximity: HashMap<String, Vec<String>>,
    /// Rolling window of adaptive samples per node
    pub adaptive_window: usize,
}

/// Auto-scaling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    pub enabled: bool,
    pub min_nodes: usize,
    pub max_nodes: usize,
    /// Mean CPU percentage above which a federation scales up
    pub scale_up_threshold: f64,
    /// Mean CPU percentage below which a federation scales down
    pub scale_down_threshold: f64,
    pub cooldown_period_secs: u64,
    pub predictive_scaling: bool,
    /// History kept per federation for trend analysis
    pub metrics_window_secs: u64,
    pub evaluation_interval_ms: u64,
    /// Consecutive evaluations that must agree before scaling up
    pub scale_up_confirmations: u32,
    /// Consecutive evaluations that must agree before scaling down
    pub scale_down_confirmations: u32,
    pub prediction_horizon_secs: u64,
    pub min_prediction_samples: usize,
    /// Receives executed scaling decisions as JSON
    pub provisioning_webhook_url: Option<String>,
}

/// Failover group definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverGroupConfig {
    pub group_id: String,
    pub primary_node_id: String,
    pub backup_node_ids: Vec<String>,
    #[serde(default)]
    pub failover_strategy: FailoverStrategy,
    #[serde(default = "default_group_check_interval")]
    pub health_check_interval_ms: u64,
}

pub(crate) fn default_group_check_interval() -> u64 {
    15_000
}

impl FailoverGroupConfig {
    /// Structural checks shared by configuration validation and group creation
    pub fn validate(&self) -> Result<()> {
        if self.group_id.is_empty() {
            return Err(OrchestratorError::config("Failover group id cannot be empty"));
        }
        if self.primary_node_id.is_empty() {
            return Err(OrchestratorError::config(format!(
                "Failover group {} has no primary",
                self.group_id
            )));
        }
        if self.backup_node_ids.contains(&self.primary_node_id) {
            return Err(OrchestratorError::config(format!(
                "Failover group {} lists its primary as a backup",
                self.group_id
            ))
            .with_node(NodeId::new(self.primary_node_id.clone())));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = self.backup_node_ids.iter().find(|id| !seen.insert(*id)) {
            return Err(OrchestratorError::config(format!(
                "Failover group {} lists backup {} twice",
                self.group_id, duplicate
            ))
            .with_node(NodeId::new(duplicate.clone())));
        }
        Ok(())
    }
}

/// Failover configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    pub enabled: bool,
    /// Fail back to the original primary once it recovers
    pub auto_recovery: bool,
    pub groups: Vec<FailoverGroupConfig>,
}

/// A federation known ahead of discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationManagerConfig {
    pub federation_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Federation integration configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationIntegrationConfig {
    pub federation_managers: Vec<FederationManagerConfig>,
    pub message_routing_enabled: bool,
    /// Allow messages whose source node lives in another federation
    pub cross_federation_communication: bool,
}

/// Admin API configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

/// Logging and metrics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub metrics_enabled: bool,
    pub metrics_addr: String,
    /// "text" or "json"
    pub log_format: String,
}

/// NATS event publication configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub enabled: bool,
    pub url: String,
    pub subject_prefix: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            orchestrator_id: format!("orchestrator-{}", uuid::Uuid::new_v4().simple()),
            config_watch_interval_ms: 5_000,
            discovery: DiscoveryConfig::default(),
            health_monitoring: HealthMonitoringConfig::default(),
            routing: RoutingConfig::default(),
            scaling: ScalingConfig::default(),
            failover: FailoverConfig::default(),
            federation: FederationIntegrationConfig::default(),
            api: ApiConfig::default(),
            telemetry: TelemetryConfig::default(),
            nats: NatsConfig::default(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_registry_url: None,
            discovery_interval_ms: 30_000,
            heartbeat_interval_ms: 10_000,
            node_timeout_ms: 60_000,
            max_retries: 3,
            retry_backoff_ms: 200,
            request_timeout_ms: 5_000,
        }
    }
}

impl Default for HealthMonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: 15_000,
            timeout_ms: 5_000,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
            metrics_collection_interval_ms: 30_000,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            algorithm: RoutingAlgorithm::WeightedRoundRobin,
            adaptive_routing: false,
            geo_routing_enabled: true,
            federation_selection: FederationSelection::Reject,
            default_federation_id: None,
            region_proximity: HashMap::new(),
            adaptive_window: 100,
        }
    }
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_nodes: 3,
            max_nodes: 50,
            scale_up_threshold: 75.0,
            scale_down_threshold: 25.0,
            cooldown_period_secs: 300, // 5 minutes
            predictive_scaling: false,
            metrics_window_secs: 300,
            evaluation_interval_ms: 30_000,
            scale_up_confirmations: 2,
            scale_down_confirmations: 5,
            prediction_horizon_secs: 600,
            min_prediction_samples: 10,
            provisioning_webhook_url: None,
        }
    }
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_recovery: true,
            groups: Vec::new(),
        }
    }
}

impl Default for FederationIntegrationConfig {
    fn default() -> Self {
        Self {
            federation_managers: Vec::new(),
            message_routing_enabled: true,
            cross_federation_communication: true,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:3030".to_string(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_addr: "127.0.0.1:9091".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "nats://127.0.0.1:4222".to_string(),
            subject_prefix: "orchestrator.events".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from file, with `ORCHESTRATOR__SECTION__KEY` environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("ORCHESTRATOR")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Save configuration to file as TOML
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                OrchestratorError::config(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        std::fs::write(path, toml_string).map_err(|e| {
            OrchestratorError::config(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let discovery = &self.discovery;
        if discovery.discovery_interval_ms == 0 || discovery.heartbeat_interval_ms == 0 {
            return Err(OrchestratorError::config("Discovery intervals must be greater than 0"));
        }
        if discovery.node_timeout_ms == 0 {
            return Err(OrchestratorError::config("Node timeout must be greater than 0"));
        }

        let health = &self.health_monitoring;
        if health.check_interval_ms == 0 || health.metrics_collection_interval_ms == 0 {
            return Err(OrchestratorError::config("Health check intervals must be greater than 0"));
        }
        if health.timeout_ms == 0 {
            return Err(OrchestratorError::config("Health check timeout must be greater than 0"));
        }
        if health.unhealthy_threshold == 0 || health.healthy_threshold == 0 {
            return Err(OrchestratorError::config("Health thresholds must be at least 1"));
        }

        if self.routing.adaptive_window == 0 {
            return Err(OrchestratorError::config("Adaptive window must be at least 1"));
        }

        let scaling = &self.scaling;
        if scaling.min_nodes > scaling.max_nodes {
            return Err(OrchestratorError::config(
                "Minimum nodes cannot be greater than maximum nodes",
            ));
        }
        if !(0.0..=100.0).contains(&scaling.scale_up_threshold) {
            return Err(OrchestratorError::config("Scale up threshold must be between 0 and 100"));
        }
        if !(0.0..=100.0).contains(&scaling.scale_down_threshold) {
            return Err(OrchestratorError::config(
                "Scale down threshold must be between 0 and 100",
            ));
        }
        if scaling.scale_down_threshold >= scaling.scale_up_threshold {
            return Err(OrchestratorError::config(
                "Scale down threshold must be below scale up threshold",
            ));
        }
        if scaling.evaluation_interval_ms == 0 {
            return Err(OrchestratorError::config("Scaling interval must be greater than 0"));
        }

        let mut group_ids = HashSet::new();
        for group in &self.failover.groups {
            group.validate()?;
            if !group_ids.insert(group.group_id.as_str()) {
                return Err(OrchestratorError::config(format!(
                    "Failover group {} is defined twice",
                    group.group_id
                )));
            }
        }

        if self.telemetry.log_format != "text" && self.telemetry.log_format != "json" {
            return Err(OrchestratorError::config("Log format must be \"text\" or \"json\""));
        }

        Ok(())
    }
}

/// Recursively merge `patch` into `target`. Objects merge key by key; any other value replaces.
pub fn deep_merge(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value)
                    }
                    _ => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

/// Configuration change notifications
#[derive(Debug, Clone)]
pub enum ConfigEvent {
    ConfigUpdated(Arc<OrchestratorConfig>),
    ConfigReset(Arc<OrchestratorConfig>),
}

/// Runtime configuration manager with partial updates and hot reload
pub struct ConfigManager {
    current_config: ArcSwap<OrchestratorConfig>,
    config_path: Option<PathBuf>,
    last_modified: Mutex<Option<SystemTime>>,
    update_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ConfigEvent>,
}

impl ConfigManager {
    /// Create a manager around an in-memory configuration
    pub fn new(config: OrchestratorConfig, config_path: Option<PathBuf>) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(16);
        let last_modified = config_path.as_deref().and_then(modified_time);

        Ok(Self {
            current_config: ArcSwap::from_pointee(config),
            config_path,
            last_modified: Mutex::new(last_modified),
            update_lock: tokio::sync::Mutex::new(()),
            events,
        })
    }

    /// Load from `path`, writing the defaults there when the file does not exist yet
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = if path.exists() {
            let config = OrchestratorConfig::from_file(&path)?;
            info!(path = %path.display(), "Configuration loaded");
            config
        } else {
            let config = OrchestratorConfig::default();
            config.save_to_file(&path)?;
            info!(path = %path.display(), "Default configuration created");
            config
        };

        Self::new(config, Some(path))
    }

    /// Get current configuration
    pub fn get_config(&self) -> Arc<OrchestratorConfig> {
        self.current_config.load_full()
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.events.subscribe()
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Merge a partial configuration document into the live configuration.
    /// Nothing is applied unless the merged result is valid.
    pub async fn update_config(&self, partial: serde_json::Value) -> Result<Arc<OrchestratorConfig>> {
        let _guard = self.update_lock.lock().await;

        if !partial.is_object() {
            return Err(OrchestratorError::config("Configuration update must be an object"));
        }

        let mut merged = serde_json::to_value(self.get_config().as_ref())?;
        deep_merge(&mut merged, partial);

        let candidate: OrchestratorConfig = serde_json::from_value(merged).map_err(|e| {
            OrchestratorError::config(format!("Invalid configuration update: {}", e))
        })?;
        candidate.validate()?;

        self.apply(candidate, true)
    }

    /// Reset to defaults, keeping the orchestrator id
    pub async fn reset_to_defaults(&self) -> Result<Arc<OrchestratorConfig>> {
        let _guard = self.update_lock.lock().await;
        let config = OrchestratorConfig {
            orchestrator_id: self.get_config().orchestrator_id.clone(),
            ..OrchestratorConfig::default()
        };
        self.persist(&config)?;

        let config = Arc::new(config);
        self.current_config.store(Arc::clone(&config));
        let _ = self.events.send(ConfigEvent::ConfigReset(Arc::clone(&config)));
        info!("Configuration reset to defaults");
        Ok(config)
    }

    /// Re-read the configuration file. Returns false when there is no file to read.
    pub async fn reload(&self) -> Result<bool> {
        let Some(path) = self.config_path.clone() else {
            return Ok(false);
        };
        let _guard = self.update_lock.lock().await;

        info!(path = %path.display(), "Reloading configuration");
        let new_config = OrchestratorConfig::from_file(&path)?;
        new_config.validate()?;

        self.apply(new_config, false)?;
        Ok(true)
    }

    fn apply(&self, config: OrchestratorConfig, persist: bool) -> Result<Arc<OrchestratorConfig>> {
        if persist {
            self.persist(&config)?;
        }

        let config = Arc::new(config);
        self.current_config.store(Arc::clone(&config));

        // Notify watchers
        let _ = self.events.send(ConfigEvent::ConfigUpdated(Arc::clone(&config)));
        metrics::counter!("orchestrator_config_updates_total", 1);
        info!("Configuration updated successfully");
        Ok(config)
    }

    fn persist(&self, config: &OrchestratorConfig) -> Result<()> {
        if let Some(path) = &self.config_path {
            config.save_to_file(path)?;
            if let Ok(mut last) = self.last_modified.lock() {
                *last = modified_time(path);
            }
            debug!(path = %path.display(), "Configuration saved to file");
        }
        Ok(())
    }

    /// Whether the file changed since it was last read or written
    fn file_changed(&self) -> bool {
        let Some(path) = &self.config_path else {
            return false;
        };
        let current = modified_time(path);
        match self.last_modified.lock() {
            Ok(mut last) => {
                if current.is_some() && current != *last {
                    *last = current;
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        }
    }

    /// Poll the configuration file and reload it when it changes
    pub fn spawn_watch_task(self: Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let interval_ms = self.get_config().config_watch_interval_ms;
        if interval_ms == 0 || self.config_path.is_none() {
            return None;
        }

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
                }

                if self.file_changed() {
                    info!("Configuration file changed, reloading");
                    if let Err(e) = self.reload().await {
                        error!(error = %e, "Failed to reload configuration");
                    }
                }
            }
            debug!("Configuration watch task stopped");
        }))
    }

    /// Look up a value by dotted path, e.g. `scaling.max_nodes`
    pub fn get_config_value(&self, path: &str) -> Option<serde_json::Value> {
        let root = match serde_json::to_value(self.get_config().as_ref()) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to serialize configuration");
                return None;
            }
        };
        path.split('.')
            .try_fold(&root, |current, key| current.get(key))
            .cloned()
    }

    pub fn get_config_summary(&self) -> serde_json::Value {
        let config = self.get_config();
        serde_json::json!({
            "orchestratorId": config.orchestrator_id,
            "discoveryEnabled": config.discovery.enabled,
            "healthMonitoringEnabled": config.health_monitoring.enabled,
            "routingAlgorithm": config.routing.algorithm.as_str(),
            "scalingEnabled": config.scaling.enabled,
            "failoverEnabled": config.failover.enabled,
            "federationManagersCount": config.federation.federation_managers.len(),
            "configFilePath": self.config_path.as_ref().map(|p| p.display().to_string()),
        })
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
