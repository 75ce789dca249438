//! Common types used across the orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Stable handle of a node, as announced by the registry
    NodeId
);
string_id!(
    /// Stable handle of a federation
    FederationId
);

/// Node lifecycle status as reported by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Node is accepting work
    #[default]
    Active,
    /// Node is draining connections (graceful shutdown)
    Draining,
    /// Node is offline/unreachable
    Offline,
}

/// Health classification produced by the health monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    /// No probe has completed yet
    #[default]
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Well-known node capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalCapability {
    Routing,
    Scaling,
    Failover,
    Monitoring,
    FederationCoordination,
    LoadBalancing,
}

impl GlobalCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            GlobalCapability::Routing => "routing",
            GlobalCapability::Scaling => "scaling",
            GlobalCapability::Failover => "failover",
            GlobalCapability::Monitoring => "monitoring",
            GlobalCapability::FederationCoordination => "federation_coordination",
            GlobalCapability::LoadBalancing => "load_balancing",
        }
    }
}

/// Point-in-time load snapshot of a node. Replaced wholesale on every sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadMetrics {
    /// CPU usage percentage (0.0 - 100.0)
    pub cpu_usage: f64,
    /// Memory usage percentage (0.0 - 100.0)
    pub memory_usage: f64,
    pub active_connections: u64,
    /// Requests per second
    pub request_rate: f64,
    /// Fraction of failed requests (0.0 - 1.0)
    pub error_rate: f64,
    /// Mean response time in milliseconds
    pub response_time: f64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl LoadMetrics {
    /// Load value used by the routing and failover caches
    pub fn load(&self) -> f64 {
        self.cpu_usage
    }
}

/// Node information stored in the discovery registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalNodeInfo {
    pub node_id: NodeId,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub federation_id: FederationId,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub load_metrics: Option<LoadMetrics>,
    #[serde(default)]
    pub health_status: HealthStatus,
    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl GlobalNodeInfo {
    pub fn new(
        node_id: impl Into<NodeId>,
        federation_id: impl Into<FederationId>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            address: address.into(),
            port,
            capabilities: Vec::new(),
            federation_id: federation_id.into(),
            region: String::new(),
            zone: String::new(),
            status: NodeStatus::Active,
            load_metrics: None,
            health_status: HealthStatus::Unknown,
            last_health_check: None,
            last_seen: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>, zone: impl Into<String>) -> Self {
        self.region = region.into();
        self.zone = zone.into();
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_load(mut self, metrics: LoadMetrics) -> Self {
        self.load_metrics = Some(metrics);
        self
    }

    pub fn has_capability(&self, capability: GlobalCapability) -> bool {
        self.capabilities.iter().any(|c| c == capability.as_str())
    }

    /// Current load (CPU percentage), 0 when no sample has arrived yet
    pub fn current_load(&self) -> f64 {
        self.load_metrics.as_ref().map(LoadMetrics::load).unwrap_or(0.0)
    }
}

/// Routing algorithm selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingAlgorithm {
    RoundRobin,
    LeastConnections,
    #[default]
    WeightedRoundRobin,
    LeastResponseTime,
    Geographic,
    Adaptive,
}

impl RoutingAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingAlgorithm::RoundRobin => "round_robin",
            RoutingAlgorithm::LeastConnections => "least_connections",
            RoutingAlgorithm::WeightedRoundRobin => "weighted_round_robin",
            RoutingAlgorithm::LeastResponseTime => "least_response_time",
            RoutingAlgorithm::Geographic => "geographic",
            RoutingAlgorithm::Adaptive => "adaptive",
        }
    }
}

/// Output of the routing algorithm. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub target_node_id: NodeId,
    pub federation_id: FederationId,
    pub reason: String,
    /// Confidence in the decision (0.0 - 1.0)
    pub confidence: f64,
    pub alternatives: Vec<NodeId>,
    pub timestamp: DateTime<Utc>,
}

/// Scaling action types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    NoAction,
}

/// Estimated effect of a scaling action, in percentage points
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingImpact {
    pub cpu_reduction: f64,
    pub memory_reduction: f64,
    pub latency_improvement: f64,
    pub cost_change: f64,
}

/// Transient output of one scaling evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingDecision {
    pub action: ScalingAction,
    pub federation_id: Option<FederationId>,
    pub target_nodes: Vec<NodeId>,
    pub reason: String,
    pub expected_impact: ScalingImpact,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingCondition {
    pub metric: String,
    pub operator: ComparisonOperator,
    pub threshold: f64,
    pub duration_secs: u64,
}

/// Scaling policy in effect for one federation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingPolicy {
    pub policy_id: String,
    pub federation_id: FederationId,
    pub conditions: Vec<ScalingCondition>,
    pub actions: Vec<ScalingAction>,
    pub cooldown_period_secs: u64,
    pub enabled: bool,
}

/// How a failover group promotes a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverStrategy {
    #[default]
    Automatic,
    /// Promotion only through an explicit manual failover
    Manual,
    LoadBalanced,
}

/// State machine of a failover group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverState {
    /// Primary healthy
    #[default]
    Stable,
    /// Primary confirmed down, no backup promoted yet
    FailingOver,
    /// A backup is acting as primary
    FailedOver,
    /// Original primary is healthy again, fail-back being decided
    Recovering,
}

/// A primary node plus its ordered backups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverGroup {
    pub group_id: String,
    pub primary_node_id: NodeId,
    pub backup_node_ids: Vec<NodeId>,
    #[serde(default)]
    pub failover_strategy: FailoverStrategy,
    pub health_check_interval_ms: u64,
    #[serde(default)]
    pub state: FailoverState,
    /// Primary before the last automatic failover, used for fail-back
    #[serde(default)]
    pub original_primary_node_id: Option<NodeId>,
}

impl FailoverGroup {
    pub fn contains(&self, node_id: &NodeId) -> bool {
        &self.primary_node_id == node_id || self.backup_node_ids.contains(node_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverType {
    Automatic,
    Manual,
    Recovery,
}

/// Append-only audit record of a failover group transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverEvent {
    #[serde(rename = "type")]
    pub event_type: FailoverType,
    pub group_id: String,
    pub primary_node_id: NodeId,
    pub backup_node_id: NodeId,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub recovery_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FederationStatus {
    Active,
    Inactive,
    Maintenance,
    Error,
}

/// Aggregated view of one federation, derived from the node registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationState {
    pub federation_id: FederationId,
    pub nodes: Vec<GlobalNodeInfo>,
    pub leader_node_id: Option<NodeId>,
    pub last_sync: DateTime<Utc>,
    pub capabilities: Vec<String>,
    pub status: FederationStatus,
}

/// Single aggregated snapshot exposed externally
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalTopology {
    pub federations: Vec<FederationState>,
    pub routing_table: BTreeMap<FederationId, Vec<RoutingDecision>>,
    pub scaling_policies: Vec<ScalingPolicy>,
    pub failover_groups: Vec<FailoverGroup>,
    pub last_updated: DateTime<Utc>,
}

impl GlobalTopology {
    pub fn empty() -> Self {
        Self {
            federations: Vec::new(),
            routing_table: BTreeMap::new(),
            scaling_policies: Vec::new(),
            failover_groups: Vec::new(),
            last_updated: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityOfService {
    #[default]
    BestEffort,
    Reliable,
    RealTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingMetadata {
    pub priority: u32,
    pub ttl: u64,
    #[serde(default)]
    pub routing_hints: Vec<String>,
    #[serde(default)]
    pub quality_of_service: QualityOfService,
}

impl RoutingMetadata {
    /// Value of a `key:value` routing hint
    pub fn hint(&self, key: &str) -> Option<&str> {
        self.routing_hints.iter().find_map(|hint| {
            hint.split_once(':')
                .filter(|(k, _)| k.trim() == key)
                .map(|(_, v)| v.trim())
        })
    }
}

/// The unit being routed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub source_node_id: NodeId,
    #[serde(default)]
    pub target_node_id: Option<NodeId>,
    pub priority: u32,
    #[serde(default)]
    pub ttl: Option<u64>,
    pub global_routing: bool,
    #[serde(default)]
    pub target_federation_id: Option<FederationId>,
    #[serde(default)]
    pub routing_metadata: Option<RoutingMetadata>,
}

impl OrchestratorMessage {
    pub fn new(id: impl Into<String>, message_type: impl Into<String>, source: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            message_type: message_type.into(),
            payload: serde_json::Value::Null,
            timestamp: Utc::now(),
            source_node_id: source.into(),
            target_node_id: None,
            priority: 0,
            ttl: None,
            global_routing: true,
            target_federation_id: None,
            routing_metadata: None,
        }
    }

    pub fn to_federation(mut self, federation_id: impl Into<FederationId>) -> Self {
        self.target_federation_id = Some(federation_id.into());
        self
    }

    pub fn with_hints<I, S>(mut self, hints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let metadata = self.routing_metadata.get_or_insert_with(RoutingMetadata::default);
        metadata.routing_hints = hints.into_iter().map(Into::into).collect();
        self
    }
}

/// Aggregated orchestrator metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalMetrics {
    pub orchestrator_id: String,
    pub total_federations: usize,
    /// Nodes currently classified healthy
    pub active_nodes: usize,
    pub total_nodes: usize,
    pub routing_decisions: u64,
    pub routing_failures: u64,
    pub scaling_events: u64,
    pub failover_events: u64,
    pub cross_federation_messages: u64,
    pub average_latency_ms: f64,
    /// Failed routing attempts over all attempts (0.0 - 1.0)
    pub error_rate: f64,
    pub uptime_seconds: u64,
    pub uptime_percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Running,
    Stopped,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub status: ServiceStatus,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub orchestrator: OrchestratorStatus,
    pub services: BTreeMap<String, ServiceStatus>,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_serialization_uses_wire_names() {
        let node = GlobalNodeInfo::new("n1", "f1", "10.0.0.1", 8080)
            .with_region("eu-west", "eu-west-1a")
            .with_capabilities(["routing", "federation_coordination"]);

        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["nodeId"], "n1");
        assert_eq!(json["federationId"], "f1");
        assert_eq!(json["healthStatus"], "unknown");
        assert!(node.has_capability(GlobalCapability::FederationCoordination));
        assert!(!node.has_capability(GlobalCapability::Scaling));
    }

    #[test]
    fn test_registry_payload_defaults() {
        let json = r#"{"nodeId":"n7","address":"10.1.1.7","port":9000,"federationId":"f2"}"#;
        let node: GlobalNodeInfo = serde_json::from_str(json).unwrap();
        assert_eq!(node.node_id, NodeId::new("n7"));
        assert_eq!(node.status, NodeStatus::Active);
        assert_eq!(node.health_status, HealthStatus::Unknown);
        assert_eq!(node.current_load(), 0.0);
    }

    #[test]
    fn test_message_envelope_round_trip() {
        let json = r#"{
            "id": "m1",
            "type": "sync",
            "payload": {"k": 1},
            "timestamp": "2024-01-01T00:00:00Z",
            "sourceNodeId": "n1",
            "priority": 2,
            "globalRouting": true,
            "routingMetadata": {
                "priority": 1,
                "ttl": 30,
                "routingHints": ["region: us-east"],
                "qualityOfService": "real_time"
            }
        }"#;
        let message: OrchestratorMessage = serde_json::from_str(json).unwrap();
        assert_eq!(message.message_type, "sync");
        assert!(message.target_federation_id.is_none());

        let metadata = message.routing_metadata.as_ref().unwrap();
        assert_eq!(metadata.quality_of_service, QualityOfService::RealTime);
        assert_eq!(metadata.hint("region"), Some("us-east"));
        assert_eq!(metadata.hint("zone"), None);
    }

    #[test]
    fn test_failover_event_type_field() {
        let event = FailoverEvent {
            event_type: FailoverType::Recovery,
            group_id: "g1".to_string(),
            primary_node_id: NodeId::new("n1"),
            backup_node_id: NodeId::new("n2"),
            reason: "primary recovered".to_string(),
            timestamp: Utc::now(),
            recovery_time_ms: Some(12),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "recovery");
        assert_eq!(json["recoveryTimeMs"], 12);
    }
}
