//! Runner entry point.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use nanoclaw_runner::{router, AppState};
use nanoclaw_store::RunRegistry;
use nanoclaw_types::RunnerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = RunnerConfig::from_env().context("loading runner configuration")?;
    let registry =
        RunRegistry::open(&config.registry_path).context("opening the run registry")?;

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, registry));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!(addr = %bind_addr, "runner listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("runner shutting down");
        })
        .await
        .context("serving the runner API")?;

    Ok(())
}
