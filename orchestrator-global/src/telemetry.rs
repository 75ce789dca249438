//! Logging and metrics setup

use metrics::{describe_counter, describe_gauge, describe_histogram};
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "orchestrator_global=info,tower_http=info".into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    // a subscriber may already be installed (tests, embedding)
    let _ = if config.log_format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Initialize metrics descriptions
pub fn initialize_metrics() {
    describe_gauge!("orchestrator_running", "1 while the orchestrator is running");
    describe_gauge!("orchestrator_discovered_nodes", "Current number of discovered nodes");
    describe_gauge!("orchestrator_federations", "Current number of known federations");
    describe_gauge!("orchestrator_failover_groups", "Current number of failover groups");
    describe_gauge!("orchestrator_total_nodes", "Current total number of nodes in registry");
    describe_gauge!("orchestrator_active_nodes", "Current number of healthy nodes");
    describe_gauge!(
        "orchestrator_uptime_percentage",
        "Share of registered nodes currently healthy"
    );

    describe_counter!(
        "orchestrator_nodes_discovered_total",
        "Total number of nodes discovered"
    );
    describe_counter!(
        "orchestrator_nodes_lost_total",
        "Total number of nodes lost after missing heartbeats"
    );
    describe_counter!(
        "orchestrator_heartbeats_received_total",
        "Total number of heartbeats received from known nodes"
    );
    describe_counter!(
        "orchestrator_discovery_failures_total",
        "Total number of failed discovery runs"
    );
    describe_counter!(
        "orchestrator_health_checks_total",
        "Total number of health probes executed"
    );
    describe_counter!(
        "orchestrator_health_check_failures_total",
        "Total number of failed health probes"
    );
    describe_counter!(
        "orchestrator_messages_routed_total",
        "Total number of messages routed"
    );
    describe_counter!(
        "orchestrator_routing_failures_total",
        "Total number of messages that could not be routed"
    );
    describe_counter!(
        "orchestrator_cross_federation_messages_total",
        "Total number of messages routed across federations"
    );
    describe_histogram!(
        "orchestrator_routing_latency_seconds",
        "Time spent selecting a route"
    );
    describe_counter!(
        "orchestrator_scale_up_events_total",
        "Total number of scale up decisions executed"
    );
    describe_counter!(
        "orchestrator_scale_down_events_total",
        "Total number of scale down decisions executed"
    );
    describe_counter!(
        "orchestrator_failover_events_total",
        "Total number of failover events recorded"
    );
    describe_counter!(
        "orchestrator_failover_failures_total",
        "Total number of failovers with no eligible backup"
    );
    describe_counter!(
        "orchestrator_node_failures_total",
        "Total number of node failures handled"
    );
    describe_counter!(
        "orchestrator_config_updates_total",
        "Total number of configuration changes applied"
    );
    describe_counter!(
        "orchestrator_events_published_total",
        "Total number of events published to NATS"
    );
}
