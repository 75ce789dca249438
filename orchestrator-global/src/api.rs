//! Admin HTTP API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, instrument, warn};

use crate::config::{default_group_check_interval, FailoverGroupConfig, OrchestratorConfig};
use crate::error::{ErrorCode, OrchestratorError};
use crate::manager::GlobalOrchestratorManager;
use crate::types::{
    FailoverEvent, FailoverGroup, FailoverStrategy, GlobalMetrics, GlobalNodeInfo,
    GlobalTopology, LoadMetrics, NodeId, OrchestratorMessage, RoutingDecision, ScalingAction,
    ScalingDecision, ServiceHealth,
};

type ApiState = Arc<GlobalOrchestratorManager>;
type ApiResult<T> = std::result::Result<Json<T>, OrchestratorError>;

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let status = match self.code {
            ErrorCode::ConfigurationError => StatusCode::BAD_REQUEST,
            ErrorCode::DiscoveryFailed => StatusCode::NOT_FOUND,
            ErrorCode::RoutingFailed => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::ScalingFailed | ErrorCode::FailoverFailed => StatusCode::CONFLICT,
            ErrorCode::HealthCheckFailed | ErrorCode::FederationIntegrationError => StatusCode::BAD_GATEWAY,
            ErrorCode::RedisConnectionError => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    node_id: NodeId,
    registered: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatRequest {
    node_id: NodeId,
    #[serde(default)]
    metrics: Option<LoadMetrics>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NodeFailureRequest {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManualScalingRequest {
    action: ScalingAction,
    target_nodes: Vec<NodeId>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateFailoverGroupRequest {
    group_id: String,
    primary_node_id: String,
    backup_node_ids: Vec<String>,
    #[serde(default)]
    failover_strategy: FailoverStrategy,
    #[serde(default)]
    health_check_interval_ms: Option<u64>,
}

impl From<CreateFailoverGroupRequest> for FailoverGroupConfig {
    fn from(request: CreateFailoverGroupRequest) -> Self {
        FailoverGroupConfig {
            group_id: request.group_id,
            primary_node_id: request.primary_node_id,
            backup_node_ids: request.backup_node_ids,
            failover_strategy: request.failover_strategy,
            health_check_interval_ms: request
                .health_check_interval_ms
                .unwrap_or_else(default_group_check_interval),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManualFailoverRequest {
    target_node_id: NodeId,
    #[serde(default)]
    reason: Option<String>,
}

/// Create the API router with all endpoints
pub fn create_api_router(manager: ApiState) -> Router {
    Router::new()
        .route("/api/v1/health", get(service_health))
        .route("/api/v1/services", get(service_stats))
        .route("/api/v1/topology", get(topology))
        .route("/api/v1/metrics", get(global_metrics))
        .route("/api/v1/config", get(get_config).patch(update_config))
        .route("/api/v1/config/reset", post(reset_config))
        .route("/api/v1/route", post(route_message))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/nodes/register", post(register_node))
        .route("/api/v1/nodes/heartbeat", post(node_heartbeat))
        .route("/api/v1/nodes/:node_id", delete(unregister_node))
        .route("/api/v1/nodes/:node_id/failure", post(node_failure))
        .route("/api/v1/nodes/:node_id/recover", post(recover_node))
        .route("/api/v1/scaling", post(manual_scaling))
        .route("/api/v1/failover/groups", get(list_failover_groups).post(create_failover_group))
        .route("/api/v1/failover/groups/:group_id/failover", post(manual_failover))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

async fn service_health(State(manager): State<ApiState>) -> Json<ServiceHealth> {
    Json(manager.get_service_health().await)
}

async fn service_stats(State(manager): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "discovery": manager.discovery().get_discovery_stats(),
        "health": manager.health().get_health_summary(),
        "routing": manager.routing().get_routing_stats(),
        "scaling": manager.scaling().get_scaling_stats(),
        "failover": manager.failover().get_failover_stats(),
        "config": manager.config_manager().get_config_summary(),
    }))
}

async fn topology(State(manager): State<ApiState>) -> Json<GlobalTopology> {
    Json(manager.get_global_topology().as_ref().clone())
}

async fn global_metrics(State(manager): State<ApiState>) -> Json<GlobalMetrics> {
    Json(manager.get_global_metrics())
}

async fn get_config(State(manager): State<ApiState>) -> Json<OrchestratorConfig> {
    Json(manager.get_configuration().as_ref().clone())
}

#[instrument(skip(manager, partial))]
async fn update_config(
    State(manager): State<ApiState>,
    Json(partial): Json<serde_json::Value>,
) -> ApiResult<OrchestratorConfig> {
    let config = manager.update_configuration(partial).await.map_err(|e| {
        warn!(error = %e, "Rejected configuration update");
        e
    })?;
    Ok(Json(config.as_ref().clone()))
}

#[instrument(skip(manager))]
async fn reset_config(State(manager): State<ApiState>) -> ApiResult<OrchestratorConfig> {
    let config = manager.reset_configuration().await?;
    info!("Configuration reset through API");
    Ok(Json(config.as_ref().clone()))
}

#[instrument(skip(manager, message), fields(message_id = %message.id))]
async fn route_message(
    State(manager): State<ApiState>,
    Json(message): Json<OrchestratorMessage>,
) -> ApiResult<RoutingDecision> {
    Ok(Json(manager.route_message(&message)?))
}

async fn list_nodes(State(manager): State<ApiState>) -> Json<Vec<GlobalNodeInfo>> {
    Json(manager.discovery().get_discovered_nodes())
}

#[instrument(skip(manager, node), fields(node_id = %node.node_id))]
async fn register_node(
    State(manager): State<ApiState>,
    Json(node): Json<GlobalNodeInfo>,
) -> std::result::Result<(StatusCode, Json<RegisterResponse>), OrchestratorError> {
    let node_id = node.node_id.clone();
    let registered = manager.register_node(node)?;
    let status = if registered {
        info!(node_id = %node_id, "Node registered through API");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(RegisterResponse { node_id, registered })))
}

#[instrument(skip(manager, request), fields(node_id = %request.node_id))]
async fn node_heartbeat(
    State(manager): State<ApiState>,
    Json(request): Json<HeartbeatRequest>,
) -> std::result::Result<StatusCode, OrchestratorError> {
    manager.node_heartbeat(&request.node_id, request.metrics)?;
    Ok(StatusCode::OK)
}

#[instrument(skip(manager))]
async fn unregister_node(
    State(manager): State<ApiState>,
    Path(node_id): Path<String>,
) -> ApiResult<GlobalNodeInfo> {
    Ok(Json(manager.unregister_node(&NodeId::new(node_id))?))
}

#[instrument(skip(manager, request))]
async fn node_failure(
    State(manager): State<ApiState>,
    Path(node_id): Path<String>,
    request: Option<Json<NodeFailureRequest>>,
) -> ApiResult<Vec<FailoverEvent>> {
    let reason = request
        .and_then(|Json(r)| r.reason)
        .unwrap_or_else(|| "reported through admin API".to_string());
    Ok(Json(manager.handle_node_failure(&NodeId::new(node_id), &reason)?))
}

#[instrument(skip(manager))]
async fn recover_node(
    State(manager): State<ApiState>,
    Path(node_id): Path<String>,
) -> Json<Vec<FailoverEvent>> {
    Json(manager.recover_node(&NodeId::new(node_id)))
}

#[instrument(skip(manager, request))]
async fn manual_scaling(
    State(manager): State<ApiState>,
    Json(request): Json<ManualScalingRequest>,
) -> ApiResult<ScalingDecision> {
    let reason = request.reason.unwrap_or_else(|| "operator request".to_string());
    let decision = manager
        .manual_scaling(request.action, request.target_nodes, &reason, request.force)
        .await?;
    Ok(Json(decision))
}

async fn list_failover_groups(State(manager): State<ApiState>) -> Json<Vec<FailoverGroup>> {
    Json(manager.failover().get_failover_groups())
}

#[instrument(skip(manager, request), fields(group_id = %request.group_id))]
async fn create_failover_group(
    State(manager): State<ApiState>,
    Json(request): Json<CreateFailoverGroupRequest>,
) -> std::result::Result<(StatusCode, Json<FailoverGroup>), OrchestratorError> {
    let group = manager.create_failover_group(request.into())?;
    Ok((StatusCode::CREATED, Json(group)))
}

#[instrument(skip(manager, request))]
async fn manual_failover(
    State(manager): State<ApiState>,
    Path(group_id): Path<String>,
    Json(request): Json<ManualFailoverRequest>,
) -> ApiResult<FailoverEvent> {
    let reason = request.reason.unwrap_or_else(|| "operator request".to_string());
    Ok(Json(manager.manual_failover(&group_id, &request.target_node_id, &reason)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigManager;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    fn router() -> (Router, ApiState) {
        let config_manager = Arc::new(ConfigManager::new(OrchestratorConfig::default(), None).unwrap());
        let manager = Arc::new(GlobalOrchestratorManager::new(config_manager).unwrap());
        (create_api_router(Arc::clone(&manager)), manager)
    }

    fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _) = router();
        let response = app
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["orchestrator"]["status"], "stopped");
        assert!(body["services"]["routing"].is_string());
    }

    #[tokio::test]
    async fn test_register_then_route() {
        let (app, _) = router();
        let node = GlobalNodeInfo::new("n1", "f1", "10.0.0.1", 8080);

        let response = app
            .clone()
            .oneshot(json_request(Method::POST, "/api/v1/nodes/register", serde_json::to_value(&node).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let message = OrchestratorMessage::new("m1", "sync", "client").to_federation("f1");
        let response = app
            .oneshot(json_request(Method::POST, "/api/v1/route", serde_json::to_value(&message).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["targetNodeId"], "n1");
    }

    #[tokio::test]
    async fn test_routing_failure_maps_to_error_body() {
        let (app, _) = router();
        let message = OrchestratorMessage::new("m1", "sync", "client").to_federation("nowhere");
        let response = app
            .oneshot(json_request(Method::POST, "/api/v1/route", serde_json::to_value(&message).unwrap()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["code"], "ROUTING_FAILED");
        assert_eq!(body["federationId"], "nowhere");
    }

    #[tokio::test]
    async fn test_invalid_config_patch_is_rejected() {
        let (app, manager) = router();
        let patch = serde_json::json!({ "scaling": { "min_nodes": 100 } });
        let response = app
            .oneshot(json_request(Method::PATCH, "/api/v1/config", patch))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(manager.get_configuration().scaling.min_nodes, 3);
    }

    #[tokio::test]
    async fn test_heartbeat_and_unregister_endpoints() {
        let (app, manager) = router();
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/nodes/heartbeat",
                serde_json::json!({ "nodeId": "n1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        manager
            .register_node(GlobalNodeInfo::new("n1", "f1", "10.0.0.1", 8080))
            .unwrap();
        let before = manager.discovery().get_node_by_id(&NodeId::new("n1")).unwrap().last_seen;
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/nodes/heartbeat",
                serde_json::json!({ "nodeId": "n1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let after = manager.discovery().get_node_by_id(&NodeId::new("n1")).unwrap().last_seen;
        assert!(after >= before);

        let response = app
            .clone()
            .oneshot(Request::delete("/api/v1/nodes/n1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["nodeId"], "n1");
        assert!(manager.discovery().get_node_by_id(&NodeId::new("n1")).is_none());

        let response = app
            .oneshot(Request::delete("/api/v1/nodes/n1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_config_reset_restores_defaults() {
        let (app, manager) = router();
        manager
            .update_configuration(serde_json::json!({ "scaling": { "max_nodes": 7 } }))
            .await
            .unwrap();

        let response = app
            .oneshot(json_request(Method::POST, "/api/v1/config/reset", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["scaling"]["max_nodes"], 50);
        assert_eq!(manager.get_configuration().scaling.max_nodes, 50);
    }

    #[tokio::test]
    async fn test_failover_group_lifecycle() {
        let (app, manager) = router();
        let group = serde_json::json!({
            "groupId": "g1",
            "primaryNodeId": "p1",
            "backupNodeIds": ["b1", "b2"],
        });
        let response = app
            .clone()
            .oneshot(json_request(Method::POST, "/api/v1/failover/groups", group))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/failover/groups/g1/failover",
                serde_json::json!({ "targetNodeId": "b2" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(manager.failover().get_group("g1").unwrap().primary_node_id, NodeId::new("b2"));

        let response = app
            .oneshot(json_request(
                Method::POST,
                "/api/v1/failover/groups/missing/failover",
                serde_json::json!({ "targetNodeId": "b1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
