//! Loopsync Node - standalone sync daemon.
//!
//! Runs one manager per configured domain over file-backed in-memory stores,
//! and optionally serves the status endpoint.

use loopsync_engine::{Domain, MemoryStore, StoreSnapshot};
use loopsync_node::{status, DaemonConfig, NodeConfig, SyncContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loopsync_node=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = NodeConfig::from_env()?;
    let daemon = DaemonConfig::from_env()?;

    tracing::info!(
        app_id = %config.app_id,
        domains = daemon.domains.len(),
        "starting loopsync node"
    );

    let ctx = SyncContext::new_shared(config);
    let mut stores = Vec::with_capacity(daemon.domains.len());
    for &domain in &daemon.domains {
        let store = Arc::new(load_store(daemon.state_dir.as_deref(), domain)?);
        ctx.manager(domain, store.clone());
        stores.push((domain, store));
    }
    ctx.start_all().await;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let status_server = match daemon.status_addr {
        Some(addr) => {
            let app = status::router(Arc::clone(&ctx));
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!("status endpoint listening on {}", addr);
            Some(tokio::spawn(async move {
                let shutdown = async move {
                    let _ = shutdown_rx.wait_for(|stop| *stop).await;
                };
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown)
                    .await
                {
                    tracing::error!(error = %e, "status endpoint failed");
                }
            }))
        }
        None => None,
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    let _ = shutdown_tx.send(true);
    ctx.stop_all().await;
    if let Some(server) = status_server {
        let _ = server.await;
    }

    if let Some(dir) = &daemon.state_dir {
        for (domain, store) in &stores {
            save_store(dir, *domain, store)?;
        }
    }

    Ok(())
}

fn state_file(dir: &Path, domain: Domain) -> PathBuf {
    dir.join(format!("{}.json", domain.name()))
}

fn load_store(
    dir: Option<&Path>,
    domain: Domain,
) -> Result<MemoryStore, Box<dyn std::error::Error>> {
    let Some(dir) = dir else {
        return Ok(MemoryStore::new());
    };
    let path = state_file(dir, domain);
    if !path.exists() {
        return Ok(MemoryStore::new());
    }
    let json = std::fs::read_to_string(&path)?;
    let store = MemoryStore::from_snapshot(StoreSnapshot::from_json(&json)?)?;
    tracing::info!(domain = %domain, objects = store.len(), path = %path.display(), "loaded state");
    Ok(store)
}

fn save_store(
    dir: &Path,
    domain: Domain,
    store: &MemoryStore,
) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(dir)?;
    let path = state_file(dir, domain);
    std::fs::write(&path, store.export_snapshot().to_json_pretty()?)?;
    tracing::info!(domain = %domain, objects = store.len(), path = %path.display(), "saved state");
    Ok(())
}
