//! Passive HTTP status endpoint.
//!
//! Reports what the process is syncing. It only reads shared state and never
//! takes part in replication.

use crate::context::SyncContext;
use crate::manager::SyncStatus;
use crate::peers::PeerInfo;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Full status report.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub app_id: String,
    pub app_name: String,
    pub app_version: String,
    pub domains: Vec<DomainStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainStatus {
    pub domain: String,
    pub object_type: String,
    pub status: SyncStatus,
    pub peers: Vec<PeerInfo>,
}

/// Create the status router.
pub fn router(ctx: Arc<SyncContext>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn status(State(ctx): State<Arc<SyncContext>>) -> Json<StatusResponse> {
    let config = ctx.config();
    let domains = ctx
        .domains()
        .into_iter()
        .filter_map(|domain| {
            let manager = ctx.get(domain)?;
            Some(DomainStatus {
                domain: domain.name().to_string(),
                object_type: manager.object_type().to_string(),
                status: manager.status(),
                peers: manager.sessions(),
            })
        })
        .collect();

    Json(StatusResponse {
        app_id: config.app_id.clone(),
        app_name: config.app_name.clone(),
        app_version: config.app_version.clone(),
        domains,
    })
}
