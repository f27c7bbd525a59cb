//! Thin HTTP adapter over the orchestration runtime.
//!
//! Routes map one-to-one onto the core's boundary operations; no business
//! logic lives here. Error kinds translate to HTTP status codes and every
//! route sits behind rate-limit, auth, trace and CORS layers.

use crate::{
    agents::AgentStatus,
    auth::{auth_middleware, create_auth_state},
    config::{ApiConfig, Config},
    error::ErrorKind,
    mcp::{McpClient, McpRequest, McpServerInfo},
    models::{AgentRequest, AgentResult, AgentType, Priority},
    orchestrator::Orchestrator,
    provider::{ModelClient, ModelInfo},
    rate_limit::{rate_limit_middleware, RateLimitState},
    scan::{ScanEngine, ScanReport},
    AssistError, Result,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use validator::Validate;

const SERVICE_NAME: &str = "assist-core";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

const ROUTE_HEALTH: &str = "/health";
const ROUTE_REQUESTS: &str = "/requests";
const ROUTE_REQUESTS_QUEUE: &str = "/requests/queue";
const ROUTE_REQUEST_BY_ID: &str = "/requests/{request_id}";
const ROUTE_SCAN_START: &str = "/scan/start";
const ROUTE_SCAN_STOP: &str = "/scan/stop";
const ROUTE_SCAN_REPORT: &str = "/scan/report";
const ROUTE_SCAN_RUNNING: &str = "/scan/running";
const ROUTE_MODELS: &str = "/models";
const ROUTE_MODEL_BY_ID: &str = "/models/{model_id}";
const ROUTE_MODEL_ACTIVATE: &str = "/models/{model_id}/activate";
const ROUTE_MODEL_TEST: &str = "/models/{model_id}/test";
const ROUTE_MODEL_ACTIVE: &str = "/models/active";
const ROUTE_MCP_SERVERS: &str = "/mcp/servers";
const ROUTE_MCP_SERVER_BY_ID: &str = "/mcp/servers/{server_id}";
const ROUTE_MCP_CONNECT: &str = "/mcp/servers/{server_id}/connect";
const ROUTE_MCP_DISCONNECT: &str = "/mcp/servers/{server_id}/disconnect";
const ROUTE_MCP_SEND: &str = "/mcp/send";
const ROUTE_AGENTS: &str = "/agents";
const ROUTE_SYSTEM_STATUS: &str = "/system/status";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub scan: Arc<ScanEngine>,
    pub models: Arc<ModelClient>,
    pub mcp: Arc<McpClient>,
}

pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRequestBody {
    #[validate(length(min = 1, max = 16384))]
    pub prompt: String,
    #[validate(length(min = 1, max = 200))]
    pub user_id: String,
    pub content: Option<String>,
    pub file_path: Option<String>,
    pub preferred_agent_type: Option<AgentType>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub priority: Option<Priority>,
}

impl CreateRequestBody {
    fn into_request(self) -> AgentRequest {
        let mut request = AgentRequest::new(self.prompt, self.user_id);
        request.content = self.content;
        request.file_path = self.file_path;
        request.preferred_agent_type = self.preferred_agent_type;
        request.context = self.context;
        request
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub request_id: uuid::Uuid,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ScanStartBody {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ScanControlResponse {
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct SystemStatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub queue: crate::orchestrator::QueueStats,
    pub governor_limit: usize,
    pub governor_available: usize,
    pub agents: Vec<AgentStatus>,
    pub breakers: HashMap<String, crate::orchestrator::breaker::BreakerMetrics>,
    pub scan_running: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(err: AssistError) -> ApiError {
    let kind = err.kind();
    let status = match kind {
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Transient => StatusCode::BAD_GATEWAY,
        ErrorKind::Cancelled => StatusCode::REQUEST_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            kind: Some(kind),
        }),
    )
}

fn bad_request(message: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message,
            kind: Some(ErrorKind::InvalidArgument),
        }),
    )
}

impl ApiServer {
    pub fn new(config: Config, state: AppState) -> Self {
        Self {
            config: config.api,
            state,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.build_router();
        let listener =
            tokio::net::TcpListener::bind(format!("{}:{}", self.config.host, self.config.port))
                .await
                .map_err(|e| AssistError::Internal(e.into()))?;

        info!(
            "API server listening on {}:{}",
            self.config.host, self.config.port
        );

        axum::serve(listener, app)
            .await
            .map_err(|e| AssistError::Internal(e.into()))?;
        Ok(())
    }

    /// Layer order: rate limit → auth → trace → CORS → routes.
    pub fn build_router(&self) -> Router {
        let auth_state = create_auth_state(self.config.clone());
        let rate_state = RateLimitState::new();

        let cors_layer = CorsLayer::new()
            .allow_origin(
                self.config
                    .allowed_origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::DELETE,
            ])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
                axum::http::HeaderName::from_static("x-api-key"),
            ]);

        Router::new()
            .route(ROUTE_HEALTH, get(health))
            .route(ROUTE_REQUESTS, post(process_request))
            .route(ROUTE_REQUESTS_QUEUE, post(submit_request))
            .route(ROUTE_REQUEST_BY_ID, get(get_request).delete(cancel_request))
            .route(ROUTE_SCAN_START, post(scan_start))
            .route(ROUTE_SCAN_STOP, post(scan_stop))
            .route(ROUTE_SCAN_REPORT, get(scan_report))
            .route(ROUTE_SCAN_RUNNING, get(scan_running))
            .route(ROUTE_MODEL_ACTIVE, get(get_active_model))
            .route(ROUTE_MODELS, get(list_models).post(add_model))
            .route(ROUTE_MODEL_BY_ID, delete(remove_model))
            .route(ROUTE_MODEL_ACTIVATE, post(activate_model))
            .route(ROUTE_MODEL_TEST, post(test_model))
            .route(ROUTE_MCP_SERVERS, get(list_servers).post(add_server))
            .route(ROUTE_MCP_SERVER_BY_ID, delete(remove_server))
            .route(ROUTE_MCP_CONNECT, post(connect_server))
            .route(ROUTE_MCP_DISCONNECT, post(disconnect_server))
            .route(ROUTE_MCP_SEND, post(mcp_send))
            .route(ROUTE_AGENTS, get(list_agents))
            .route(ROUTE_SYSTEM_STATUS, get(system_status))
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer)
            .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
            .layer(middleware::from_fn_with_state(
                rate_state,
                rate_limit_middleware,
            ))
            .with_state(self.state.clone())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
        "status": "ok",
    }))
}

async fn process_request(
    State(state): State<AppState>,
    Json(body): Json<CreateRequestBody>,
) -> std::result::Result<Json<AgentResult>, ApiError> {
    body.validate()
        .map_err(|e| bad_request(format!("invalid request: {e}")))?;
    let request = body.into_request();
    let cancel = tokio_util::sync::CancellationToken::new();
    let result = state
        .orchestrator
        .process_request(&request, &cancel)
        .await
        .map_err(error_response)?;
    Ok(Json(result))
}

async fn submit_request(
    State(state): State<AppState>,
    Json(body): Json<CreateRequestBody>,
) -> std::result::Result<Json<SubmitResponse>, ApiError> {
    body.validate()
        .map_err(|e| bad_request(format!("invalid request: {e}")))?;
    let priority = body.priority.unwrap_or(Priority::Normal);
    let request = body.into_request();
    let request_id = state
        .orchestrator
        .submit(request, priority)
        .await
        .map_err(error_response)?;
    Ok(Json(SubmitResponse {
        request_id,
        status: "queued".to_string(),
    }))
}

async fn get_request(
    State(state): State<AppState>,
    Path(request_id): Path<uuid::Uuid>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let execution = state
        .orchestrator
        .executions()
        .get(request_id)
        .await
        .ok_or_else(|| {
            error_response(AssistError::NotFound(format!(
                "request {request_id} is unknown"
            )))
        })?;
    Ok(Json(serde_json::json!({
        "request_id": execution.id,
        "status": execution.status,
        "priority": execution.priority,
        "start_time": execution.start_time,
        "end_time": execution.end_time,
        "result": execution.result,
    })))
}

async fn cancel_request(
    State(state): State<AppState>,
    Path(request_id): Path<uuid::Uuid>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let cancelled = state.orchestrator.cancel_request(request_id).await;
    Ok(Json(serde_json::json!({"cancelled": cancelled})))
}

async fn scan_start(
    State(state): State<AppState>,
    Json(body): Json<ScanStartBody>,
) -> std::result::Result<Json<ScanControlResponse>, ApiError> {
    let accepted = state
        .scan
        .start(std::path::Path::new(&body.path))
        .await
        .map_err(error_response)?;
    Ok(Json(ScanControlResponse { accepted }))
}

async fn scan_stop(State(state): State<AppState>) -> Json<ScanControlResponse> {
    Json(ScanControlResponse {
        accepted: state.scan.stop().await,
    })
}

async fn scan_report(State(state): State<AppState>) -> Json<ScanReport> {
    Json(state.scan.report().await)
}

async fn scan_running(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({"running": state.scan.is_running()}))
}

async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelInfo>> {
    Json(state.models.list_models().await)
}

async fn add_model(
    State(state): State<AppState>,
    Json(model): Json<ModelInfo>,
) -> std::result::Result<StatusCode, ApiError> {
    state.models.add_model(model).await.map_err(error_response)?;
    Ok(StatusCode::CREATED)
}

async fn remove_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    state
        .models
        .remove_model(&model_id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn activate_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    state
        .models
        .set_active(&model_id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn test_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let alive = state
        .models
        .test_connection(&model_id)
        .await
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({"alive": alive})))
}

async fn get_active_model(
    State(state): State<AppState>,
) -> std::result::Result<Json<ModelInfo>, ApiError> {
    state.models.get_active().await.map(Json).ok_or_else(|| {
        error_response(AssistError::NotFound("no active model".to_string()))
    })
}

async fn list_servers(State(state): State<AppState>) -> Json<Vec<McpServerInfo>> {
    Json(state.mcp.list_servers().await)
}

async fn add_server(
    State(state): State<AppState>,
    Json(server): Json<McpServerInfo>,
) -> std::result::Result<StatusCode, ApiError> {
    state.mcp.add_server(server).await.map_err(error_response)?;
    Ok(StatusCode::CREATED)
}

async fn remove_server(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    state
        .mcp
        .remove_server(&server_id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn connect_server(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let connected = state
        .mcp
        .connect(&server_id)
        .await
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({"connected": connected})))
}

async fn disconnect_server(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    state
        .mcp
        .disconnect(&server_id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mcp_send(
    State(state): State<AppState>,
    Json(request): Json<McpRequest>,
) -> std::result::Result<Json<crate::mcp::McpResponse>, ApiError> {
    let response = state
        .mcp
        .send_request(&request)
        .await
        .map_err(error_response)?;
    Ok(Json(response))
}

async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentStatus>> {
    Json(state.orchestrator.registry().statuses().await)
}

async fn system_status(State(state): State<AppState>) -> Json<SystemStatusResponse> {
    let orchestrator = &state.orchestrator;
    Json(SystemStatusResponse {
        service: SERVICE_NAME,
        version: SERVICE_VERSION,
        queue: orchestrator.queue().stats().await,
        governor_limit: orchestrator.governor().current_limit(),
        governor_available: orchestrator.governor().available_permits(),
        agents: orchestrator.registry().statuses().await,
        breakers: orchestrator.breaker_metrics().await,
        scan_running: state.scan.is_running(),
    })
}
