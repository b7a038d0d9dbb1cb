use aishare_core::ModelStore;
use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod routes;
mod upload;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "aishared=info,tower_http=info".into()),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "aishared starting");

    let config = config::Config::from_env().context("invalid configuration")?;
    tracing::info!(
        bind = %config.bind_addr,
        model_root = %config.model_root.display(),
        onnx_dir = %config.onnx_dir.display(),
        threshold = config.match_threshold,
        "configuration loaded"
    );

    let store = ModelStore::new(&config.model_root);
    let engine = engine::spawn_engine(&config, store.clone()).context("failed to start engine")?;

    let app = routes::router(routes::AppState { engine, store }, config.max_upload_bytes);
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", config.bind_addr))?;

    tracing::info!(addr = %config.bind_addr, "aishared ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for shutdown signal");
            }
            tracing::info!("aishared shutting down");
        })
        .await?;

    Ok(())
}
