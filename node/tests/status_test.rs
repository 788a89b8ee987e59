//! Status endpoint tests, served in-process.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use loopsync_engine::{Domain, MemoryStore};
use loopsync_node::{status, NodeConfig, SyncContext};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn context() -> Arc<SyncContext> {
    let config = NodeConfig::new("com.example.status", "Status", "2.1.0")
        .with_discovery_interval(None);
    SyncContext::new_shared(config)
}

async fn get_json(ctx: Arc<SyncContext>, uri: &str) -> (StatusCode, Value) {
    let response = status::router(ctx)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let code = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (code, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health() {
    let (code, body) = get_json(context(), "/health").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_reports_domains() {
    let ctx = context();
    ctx.manager(Domain::Theme, Arc::new(MemoryStore::new()));
    let language = ctx.manager(Domain::Language, Arc::new(MemoryStore::new()));
    language.start().await.unwrap();
    let port = language.local_port().unwrap();

    let (code, body) = get_json(Arc::clone(&ctx), "/status").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["appId"], "com.example.status");
    assert_eq!(body["appVersion"], "2.1.0");

    let domains = body["domains"].as_array().unwrap();
    assert_eq!(domains.len(), 2);
    assert_eq!(domains[0]["domain"], "theme");
    assert_eq!(domains[0]["status"]["state"], "stopped");
    assert_eq!(domains[1]["domain"], "language");
    assert_eq!(domains[1]["objectType"], "language_preference");
    assert_eq!(domains[1]["status"]["state"], "running");
    assert_eq!(domains[1]["status"]["port"], port);
    assert_eq!(domains[1]["peers"], Value::Array(vec![]));

    ctx.stop_all().await;
}

#[tokio::test]
async fn test_unknown_route() {
    let response = status::router(context())
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
