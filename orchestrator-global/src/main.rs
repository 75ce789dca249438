use anyhow::{Context, Result};
use metrics::gauge;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use orchestrator_global::api::create_api_router;
use orchestrator_global::telemetry::{init_tracing, initialize_metrics};
use orchestrator_global::{ConfigManager, EventPublisher, GlobalOrchestratorManager};

const DEFAULT_CONFIG_PATH: &str = "config/orchestrator.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var("ORCHESTRATOR_CONFIG")
        .ok()
        .or_else(|| std::env::args().nth(1))
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config_manager = Arc::new(
        ConfigManager::load(&config_path)
            .with_context(|| format!("Failed to load configuration from {}", config_path))?,
    );
    let config = config_manager.get_config();

    init_tracing(&config.telemetry);
    info!(
        orchestrator_id = %config.orchestrator_id,
        config_path = %config_path,
        "Starting Global Orchestrator v{}",
        env!("CARGO_PKG_VERSION")
    );

    initialize_metrics();

    let manager = Arc::new(
        GlobalOrchestratorManager::new(Arc::clone(&config_manager))
            .context("Failed to build orchestrator")?,
    );
    let shutdown = CancellationToken::new();

    if config.telemetry.metrics_enabled {
        let addr: SocketAddr = config
            .telemetry
            .metrics_addr
            .parse()
            .with_context(|| format!("Invalid metrics address {}", config.telemetry.metrics_addr))?;
        let metrics_manager = Arc::clone(&manager);
        let metrics_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(addr, metrics_manager, metrics_shutdown).await {
                error!(error = %e, "Failed to start metrics server");
            }
        });
    }

    let publisher_handle = if config.nats.enabled {
        match EventPublisher::connect(&config.nats).await {
            Ok(publisher) => Some(publisher.spawn(manager.subscribe(), shutdown.clone())),
            Err(e) => {
                warn!(error = %e, "Event publication disabled");
                None
            }
        }
    } else {
        None
    };

    manager.start().await.context("Failed to start orchestrator")?;

    if config.api.enabled {
        let app = create_api_router(Arc::clone(&manager));
        info!(listen_addr = %config.api.listen_addr, "Starting orchestrator API server");

        let listener = tokio::net::TcpListener::bind(&config.api.listen_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", config.api.listen_addr))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("API server error")?;
    } else {
        shutdown_signal().await;
    }

    info!("Shutdown signal received");
    shutdown.cancel();
    manager.stop().await;
    if let Some(handle) = publisher_handle {
        let _ = handle.await;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
}

/// Start Prometheus metrics server
async fn start_metrics_server(
    addr: SocketAddr,
    manager: Arc<GlobalOrchestratorManager>,
    shutdown: CancellationToken,
) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    info!(metrics_addr = %addr, "Starting Prometheus metrics server");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(metrics_addr = %addr, "Prometheus metrics server started");

    // Periodically update gauge metrics
    let mut interval = time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = interval.tick() => {}
        }

        let metrics = manager.get_global_metrics();
        gauge!("orchestrator_total_nodes", metrics.total_nodes as f64);
        gauge!("orchestrator_active_nodes", metrics.active_nodes as f64);
        gauge!("orchestrator_uptime_percentage", metrics.uptime_percentage);
    }
}
