use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::types::{FederationId, NodeId};

/// Closed set of failure categories surfaced by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    DiscoveryFailed,
    HealthCheckFailed,
    RoutingFailed,
    ScalingFailed,
    FailoverFailed,
    ConfigurationError,
    FederationIntegrationError,
    RedisConnectionError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DiscoveryFailed => "DISCOVERY_FAILED",
            ErrorCode::HealthCheckFailed => "HEALTH_CHECK_FAILED",
            ErrorCode::RoutingFailed => "ROUTING_FAILED",
            ErrorCode::ScalingFailed => "SCALING_FAILED",
            ErrorCode::FailoverFailed => "FAILOVER_FAILED",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::FederationIntegrationError => "FEDERATION_INTEGRATION_ERROR",
            ErrorCode::RedisConnectionError => "REDIS_CONNECTION_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged error returned by every orchestrator service
#[derive(Error, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct OrchestratorError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub federation_id: Option<FederationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Result type alias using OrchestratorError
pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            node_id: None,
            federation_id: None,
            details: None,
        }
    }

    pub fn discovery(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DiscoveryFailed, message)
    }

    pub fn health_check(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::HealthCheckFailed, message)
    }

    pub fn routing(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RoutingFailed, message)
    }

    pub fn scaling(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ScalingFailed, message)
    }

    pub fn failover(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::FailoverFailed, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message)
    }

    pub fn federation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::FederationIntegrationError, message)
    }

    pub fn with_node(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_federation(mut self, federation_id: FederationId) -> Self {
        self.federation_id = Some(federation_id);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<config::ConfigError> for OrchestratorError {
    fn from(err: config::ConfigError) -> Self {
        OrchestratorError::config(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::config(format!("Invalid configuration document: {}", err))
    }
}

impl From<toml::ser::Error> for OrchestratorError {
    fn from(err: toml::ser::Error) -> Self {
        OrchestratorError::config(format!("Failed to serialize configuration: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::routing("No routing decisions available for federation f9");
        assert_eq!(
            err.to_string(),
            "ROUTING_FAILED: No routing decisions available for federation f9"
        );
    }

    #[test]
    fn test_error_serializes_code_and_context() {
        let err = OrchestratorError::failover("No healthy backup nodes available")
            .with_node(NodeId::new("n1"))
            .with_details(serde_json::json!({"groupId": "g1"}));

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "FAILOVER_FAILED");
        assert_eq!(json["nodeId"], "n1");
        assert_eq!(json["details"]["groupId"], "g1");
        assert!(json.get("federationId").is_none());
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: OrchestratorError = json_err.into();
        assert_eq!(err.code, ErrorCode::ConfigurationError);
    }
}
