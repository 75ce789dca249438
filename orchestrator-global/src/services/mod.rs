//! Orchestrator services
//!
//! Discovery, health and scaling each own a background loop; routing and
//! failover are driven synchronously by the manager. Every service publishes
//! its own typed event stream.

pub mod discovery;
pub mod failover;
pub mod health;
pub mod routing;
pub mod scaling;

pub use discovery::{
    DiscoveryEvent, DiscoveryStats, HttpNodeRegistry, NodeDiscoveryService, NodeRegistry,
    StaticNodeRegistry,
};
pub use failover::{FailoverNotification, FailoverService, FailoverStats};
pub use health::{
    HealthEvent, HealthMonitoringService, HealthProbe, HealthSummary, HttpHealthProbe,
    NodeHealthRecord,
};
pub use routing::{IntelligentRoutingService, RoutingEvent, RoutingStats};
pub use scaling::{AutoScalingService, ScalingEvent, ScalingStats};
