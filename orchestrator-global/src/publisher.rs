//! Publishes orchestrator events to NATS

use async_nats::Client;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::NatsConfig;
use crate::error::{OrchestratorError, Result};
use crate::manager::OrchestratorEvent;

/// Subject an event is published on
pub fn subject_for(prefix: &str, event: &OrchestratorEvent) -> String {
    format!("{}.{}", prefix, event.name())
}

pub struct EventPublisher {
    nats_client: Client,
    subject_prefix: String,
}

impl EventPublisher {
    pub async fn connect(config: &NatsConfig) -> Result<Self> {
        info!(nats_url = %config.url, "Connecting event publisher to NATS");
        let nats_client = async_nats::connect(config.url.as_str()).await.map_err(|e| {
            OrchestratorError::federation(format!("Failed to connect to NATS server: {}", e))
        })?;
        info!(subject_prefix = %config.subject_prefix, "Event publisher connected");

        Ok(Self {
            nats_client,
            subject_prefix: config.subject_prefix.clone(),
        })
    }

    pub async fn publish(&self, event: &OrchestratorEvent) -> Result<()> {
        let subject = subject_for(&self.subject_prefix, event);
        let payload = serde_json::to_vec(event).map_err(|e| {
            OrchestratorError::federation(format!("Failed to serialize event: {}", e))
        })?;

        self.nats_client
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| OrchestratorError::federation(format!("Failed to publish to {}: {}", subject, e)))?;

        debug!(subject = %subject, "Event published");
        metrics::counter!("orchestrator_events_published_total", 1);
        Ok(())
    }

    /// Forward every event from `events` until shutdown
    pub fn spawn(
        self,
        mut events: broadcast::Receiver<OrchestratorEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => {
                            if let Err(e) = self.publish(&event).await {
                                error!(error = %e, event = event.name(), "Failed to publish event");
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped = skipped, "Event publisher lagged, events dropped");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }

            if let Err(e) = self.nats_client.flush().await {
                warn!(error = %e, "Failed to flush NATS client");
            }
            info!("Event publisher stopped");
        })
    }
}
