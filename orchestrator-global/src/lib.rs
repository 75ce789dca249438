//! Global Orchestrator Library
//!
//! Control plane for a fleet of nodes grouped into federations: node
//! discovery, health monitoring, message routing, auto-scaling, failover
//! and live configuration, tied together by [`GlobalOrchestratorManager`].

pub mod api;
pub mod config;
pub mod error;
pub mod manager;
pub mod publisher;
pub mod services;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigEvent, ConfigManager, OrchestratorConfig};
pub use error::{ErrorCode, OrchestratorError, Result};
pub use manager::{GlobalOrchestratorManager, OrchestratorBuilder, OrchestratorEvent};
pub use publisher::EventPublisher;
pub use services::{
    AutoScalingService, FailoverService, HealthMonitoringService, HealthProbe,
    IntelligentRoutingService, NodeDiscoveryService, NodeRegistry, StaticNodeRegistry,
};
pub use types::{
    FailoverEvent, FailoverGroup, FederationId, GlobalMetrics, GlobalNodeInfo, GlobalTopology,
    HealthStatus, LoadMetrics, NodeId, OrchestratorMessage, RoutingDecision, ScalingDecision,
};
