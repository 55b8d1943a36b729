//! End-to-end registry flows exercised against the in-memory router.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use mesh_registry::api::{self, ApiContext};
use mesh_registry::{LivenessConfig, MeshState, RegistryService, SqliteStore, TraceStore};

async fn test_app() -> axum::Router {
    let service = Arc::new(RegistryService::new(
        SqliteStore::open_in_memory().await.unwrap(),
        MeshState::new(),
        TraceStore::new(100, Duration::ZERO),
        LivenessConfig::default(),
    ));
    api::router(ApiContext::new(service))
}

async fn send(app: &axum::Router, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn registration(name: &str, capabilities: Value) -> Value {
    json!({
        "agent": {
            "name": name,
            "version": "1.0.0",
            "endpoint": format!("http://{}:8080", name),
            "namespace": "default",
            "agent_type": "tool"
        },
        "sequence": 1,
        "capabilities": capabilities
    })
}

#[tokio::test]
async fn register_then_list_round_trips() {
    let app = test_app().await;

    let body = registration(
        "date-agent",
        json!([{
            "function_name": "get_date",
            "capability": "date_service",
            "version": "1.0.0",
            "tags": ["system", "time"]
        }]),
    );
    let (status, response) = send(&app, "POST", "/register", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    let agent_id = response["agent_id"].as_str().unwrap().to_string();
    assert_eq!(response["timeouts"]["timeout_s"], 60);
    assert_eq!(response["timeouts"]["eviction_s"], 120);

    let (status, listing) = send(&app, "GET", "/agents", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["count"], 1);
    let agent = &listing["agents"][0];
    assert_eq!(agent["id"], agent_id.as_str());
    assert_eq!(agent["capabilities"][0]["function_name"], "get_date");
    assert_eq!(agent["capabilities"][0]["tags"], json!(["system", "time"]));
    assert_eq!(agent["status"], "healthy");
}

#[tokio::test]
async fn smoke_resolve_via_heartbeat() {
    let app = test_app().await;

    let (status, _) = send(
        &app,
        "POST",
        "/register",
        Some(registration(
            "date-agent",
            json!([{
                "function_name": "get_date",
                "capability": "date_service",
                "version": "1.0.0",
                "tags": ["system", "time"]
            }]),
        )),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, response) = send(
        &app,
        "POST",
        "/register",
        Some(registration(
            "hello-agent",
            json!([{
                "function_name": "say_hello",
                "capability": "greeting",
                "version": "1.0.0",
                "dependencies": [{
                    "capability": "date_service",
                    "tags": ["system", "time"],
                    "parameter_name": "date_service"
                }]
            }]),
        )),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let provider = &response["resolutions"][0]["provider"];
    assert_eq!(provider["endpoint"], "http://date-agent:8080");
    assert_eq!(provider["function_name"], "get_date");

    let (_, listing) = send(&app, "GET", "/agents", None).await;
    let hello = listing["agents"]
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["name"] == "hello-agent")
        .unwrap();
    assert_eq!(hello["dependencies_resolved"], 1);
    assert_eq!(hello["dependencies_total"], 1);
}

#[tokio::test]
async fn malformed_document_is_400() {
    let app = test_app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/register")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn heartbeat_with_unknown_id_is_409() {
    let app = test_app().await;
    let mut body = registration("ghost", json!([]));
    body["agent"]["id"] = json!("ghost-00000000");
    let (status, response) = send(&app, "POST", "/heartbeat", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(response["hint"].as_str().unwrap().contains("re-register"));
}

#[tokio::test]
async fn deregister_then_404_on_get() {
    let app = test_app().await;
    let (_, response) = send(
        &app,
        "POST",
        "/register",
        Some(registration("date-agent", json!([]))),
    )
    .await;
    let agent_id = response["agent_id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, "DELETE", &format!("/agents/{}", agent_id), None).await;
    assert_eq!(status, StatusCode::OK);

    // Soft delete: the record is still visible but expired.
    let (status, agent) = send(&app, "GET", &format!("/agents/{}", agent_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(agent["status"], "expired");

    let (status, _) = send(&app, "DELETE", "/agents/never-existed", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn span_report_round_trips_through_trace_endpoint() {
    let app = test_app().await;
    let trace_id = "00112233445566778899aabbccddeeff";

    let root = json!({
        "trace_id": trace_id,
        "span_id": "0011223344556677",
        "agent_name": "meshctl",
        "operation": "cli_call",
        "start_time": "2026-01-01T00:00:00Z",
        "end_time": "2026-01-01T00:00:01Z",
        "duration_ms": 1000.0,
        "success": true
    });
    let child = json!({
        "trace_id": trace_id,
        "span_id": "8899aabbccddeeff",
        "parent_span_id": "0011223344556677",
        "agent_name": "hello-agent",
        "operation": "say_hello",
        "start_time": "2026-01-01T00:00:00.100Z",
        "end_time": "2026-01-01T00:00:00.900Z",
        "duration_ms": 800.0,
        "success": true
    });

    let (status, _) = send(&app, "POST", "/trace", Some(json!([root, child]))).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, trace) = send(&app, "GET", &format!("/trace/{}", trace_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trace["span_count"], 2);
    assert_eq!(trace["agent_count"], 2);
    assert_eq!(trace["roots"][0]["operation"], "cli_call");
    assert_eq!(trace["roots"][0]["children"][0]["operation"], "say_hello");

    let (status, _) = send(&app, "GET", "/trace/ffffffffffffffffffffffffffffffff", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn proxy_rejects_unknown_target() {
    let app = test_app().await;
    let (status, _) = send(
        &app,
        "POST",
        "/proxy/unknown-host:9999/mcp",
        Some(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", "/proxy/notaport/mcp", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_counts() {
    let app = test_app().await;
    let (status, health) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["service"], "mesh-registry");
    assert_eq!(health["agents_total"], 0);
}
