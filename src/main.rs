use std::sync::Arc;

use anyhow::{Context, Result};
use clipfetch::{AppConfig, AppState, YtDlp, router, scratch::ScratchDir};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "clipfetch=debug,tower_http=debug".to_string()),
        )
        .init();

    if let Err(err) = run().await {
        error!("server error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = AppConfig::from_env();

    let scratch = ScratchDir::new(&config.scratch_dir);
    scratch
        .ensure()
        .await
        .with_context(|| format!("creating scratch directory {:?}", config.scratch_dir))?;
    if let Some(max_age) = config.stale_scratch_after {
        scratch.sweep_stale(max_age).await;
    }

    if let Some(path) = &config.cookie_file
        && !path.exists()
    {
        warn!("cookie file {:?} not found; requests run without site cookies", path);
    }

    let engine = Arc::new(YtDlp::from_config(&config));
    let app = router(AppState::new(engine, &config));

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await.context("http server")
}
