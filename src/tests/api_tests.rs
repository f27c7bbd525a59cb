//! HTTP adapter tests driven through the router with `tower::ServiceExt`.

use crate::{
    agents::{AgentRegistry, ValidatorAgent},
    analysis::HeuristicAnalyzer,
    api::{ApiServer, AppState},
    config::Config,
    events::EventBus,
    mcp::McpClient,
    orchestrator::Orchestrator,
    provider::ModelClient,
    scan::ScanEngine,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use std::sync::Arc;
use tower::ServiceExt;

async fn test_server(enable_auth: bool, api_key: Option<&str>) -> ApiServer {
    let mut config = Config::default();
    config.api.enable_auth = enable_auth;
    config.api.api_key = api_key.map(str::to_string);

    let bus = EventBus::default();
    let registry = Arc::new(AgentRegistry::new(bus.clone()));
    registry
        .register(Arc::new(ValidatorAgent::new().unwrap()))
        .await
        .unwrap();

    let orchestrator = Arc::new(Orchestrator::new(&config, registry, bus.clone()).unwrap());
    let provider = Arc::new(ModelClient::new(bus.clone()));
    let mcp = Arc::new(McpClient::new(config.mcp.clone(), bus.clone()));
    let scan = Arc::new(ScanEngine::new(
        config.scan.clone(),
        Arc::new(HeuristicAnalyzer::new().unwrap()),
        None,
        bus,
    ));

    ApiServer::new(
        config,
        AppState {
            orchestrator,
            scan,
            models: provider,
            mcp,
        },
    )
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = test_server(false, None).await;
    let response = server
        .build_router()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["service"], "assist-core");
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_auth_rejects_missing_and_wrong_keys() {
    let server = test_server(true, Some("a-very-long-test-api-key-0123456789")).await;
    let router = server.build_router();

    let missing = router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = router
        .clone()
        .oneshot(
            Request::get("/health")
                .header("x-api-key", "nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let bearer = router
        .oneshot(
            Request::get("/health")
                .header(
                    "authorization",
                    "Bearer a-very-long-test-api-key-0123456789",
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bearer.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_process_request_round_trip() {
    let server = test_server(false, None).await;
    let body = serde_json::json!({
        "prompt": "validate this snippet",
        "user_id": "tester",
        "content": "let x = 1;",
        "preferred_agent_type": "Validator",
    });

    let response = server
        .build_router()
        .oneshot(
            Request::post("/requests")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let result = body_json(response).await;
    assert_eq!(result["success"], serde_json::json!(true));
    assert_eq!(result["agent_name"], serde_json::json!("validator-agent"));
}

#[tokio::test]
async fn test_validation_failure_maps_to_400() {
    let server = test_server(false, None).await;
    let body = serde_json::json!({
        "prompt": "",
        "user_id": "tester",
    });

    let response = server
        .build_router()
        .oneshot(
            Request::post("/requests")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_active_model_404_when_none_selected() {
    let server = test_server(false, None).await;
    let response = server
        .build_router()
        .oneshot(Request::get("/models/active").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mcp_send_without_servers_maps_to_503() {
    let server = test_server(false, None).await;
    let body = serde_json::json!({"method": "tools/list", "params": {}});
    let response = server
        .build_router()
        .oneshot(
            Request::post("/mcp/send")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_scan_endpoints() {
    let server = test_server(false, None).await;
    let router = server.build_router();

    let running = router
        .clone()
        .oneshot(Request::get("/scan/running").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(running.status(), StatusCode::OK);
    assert_eq!(body_json(running).await["running"], serde_json::json!(false));

    let bad_start = router
        .oneshot(
            Request::post("/scan/start")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({"path": "/definitely/not/here"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bad_start.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_system_status_shape() {
    let server = test_server(false, None).await;
    let response = server
        .build_router()
        .oneshot(Request::get("/system/status").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["service"], "assist-core");
    assert!(body["governor_limit"].as_u64().unwrap() >= 1);
    assert_eq!(body["scan_running"], serde_json::json!(false));
    assert!(body["agents"].as_array().unwrap().len() == 1);
}
