//! pio-unit-daemon -- runs `pio-unit-api` on a single node (worker or
//! leader-as-its-own-node). Mirrors the teacher's `at-daemon` skeleton
//! (config load, logging init, bind, ctrl-c shutdown, serve) with the
//! Datadog/OpenTelemetry/mimalloc/frontend-serving machinery that skeleton
//! carries stripped out -- this binary has no frontend to serve and no APM
//! backend configured.

mod config;
mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use config::Config;
use pio_taskengine::TaskEngine;
use pio_unit_api::UnitApiState;

#[derive(Debug, Parser)]
#[command(name = "pio-unit-daemon", about = "HTTP façade for one Pioreactor node")]
struct Cli {
    /// Path to a TOML config file. Defaults to built-in values when absent.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `storage_root` from the config file.
    #[arg(long)]
    storage_root: Option<PathBuf>,
    /// Overrides `bind_addr` from the config file.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load_or_default(cli.config.as_deref());
    if let Some(storage_root) = &cli.storage_root {
        config.storage_root = storage_root.to_string_lossy().into_owned();
    }
    if let Some(bind) = &cli.bind {
        config.bind_addr = bind.clone();
    }

    pio_telemetry::logging::init_logging("pio-unit-daemon", &config.log_level);
    info!(bind_addr = %config.bind_addr, storage_root = %config.storage_root, "pio-unit-daemon starting");

    let root = PathBuf::from(&config.storage_root);
    tokio::fs::create_dir_all(&root).await.context("failed to create storage root")?;
    let cache_dir = PathBuf::from(&config.cache_dir);
    tokio::fs::create_dir_all(&cache_dir).await.context("failed to create cache dir")?;

    let tasks = Arc::new(
        TaskEngine::open(cache_dir.join("tasks.sqlite"), None)
            .await
            .context("failed to open task engine")?,
    );
    handlers::register(&tasks, &config.pio_executable);
    tasks.spawn_consumers();

    let state = UnitApiState::open(
        cache_dir.join("unit_metadata.sqlite"),
        tasks,
        root,
        config.is_leader,
    )
    .await
    .map_err(|e| anyhow::anyhow!("failed to open unit API state: {e}"))?;

    let app = pio_unit_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %listener.local_addr()?, "pio-unit-daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("unit API server failed")?;

    info!("pio-unit-daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        return;
    }
    info!("ctrl-c received, shutting down");
}
