//! pio-leader-daemon -- runs `pio-leader-api`, the cluster-coordination
//! surface that only the leader node exposes. Follows the teacher's
//! `at-daemon` skeleton (config load, logging init, bind, ctrl-c shutdown,
//! serve), with the Datadog/OpenTelemetry/mimalloc/dotenv/libc/lockfile/
//! frontend-serving machinery that skeleton carries stripped out -- this
//! binary has no WASM frontend and no APM backend configured.

mod config;
mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use config::Config;
use pio_bus::Bus;
use pio_cache::Cache;
use pio_leader_api::LeaderState;
use pio_store::Store;
use pio_taskengine::TaskEngine;
use pio_workerrpc::{DnsResolver, WorkerRpc};

#[derive(Debug, Parser)]
#[command(name = "pio-leader-daemon", about = "Cluster-coordination API for the Pioreactor leader node")]
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

    pio_telemetry::logging::init_logging("pio-leader-daemon", &config.log_level);
    info!(bind_addr = %config.bind_addr, storage_root = %config.storage_root, "pio-leader-daemon starting");

    let root = PathBuf::from(&config.storage_root);
    tokio::fs::create_dir_all(&root).await.context("failed to create storage root")?;
    let cache_dir = PathBuf::from(&config.cache_dir);
    tokio::fs::create_dir_all(&cache_dir).await.context("failed to create cache dir")?;

    let store = Store::open(cache_dir.join("pioreactor.sqlite"))
        .await
        .context("failed to open store")?;
    let cache = Arc::new(Cache::new());

    let bus = Bus::connect("pio-leader-daemon", &config.mqtt_broker_addr, config.mqtt_broker_port);
    let bus = Some(Arc::new(bus));

    let rpc = Arc::new(WorkerRpc::new(DnsResolver::new(config.worker_rpc_port)));

    let tasks = Arc::new(
        TaskEngine::open(cache_dir.join("tasks.sqlite"), None)
            .await
            .context("failed to open task engine")?,
    );
    handlers::register(&tasks, &config, rpc.clone());
    tasks.spawn_consumers();

    let state = LeaderState::new(store, cache, bus, tasks, rpc, root);
    let app = pio_leader_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %listener.local_addr()?, "pio-leader-daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("leader API server failed")?;

    info!("pio-leader-daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        return;
    }
    info!("ctrl-c received, shutting down");
}
