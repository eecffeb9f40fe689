//! Shared state for every UnitAPI handler: the local per-node metadata
//! database (running jobs, published settings), the task engine, the shared
//! cache, and the active-calibrations table. One `UnitApiState` is built at
//! startup and handed to the router as Axum state; it is cheap to clone,
//! the way `pio_store::Store` is.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pio_types::calibration::ActiveCalibrations;
use tokio::sync::RwLock;
use tokio_rusqlite::Connection;

use crate::error::ApiError;

#[derive(Clone)]
pub struct UnitApiState {
    pub metadata: Connection,
    pub cache: Arc<pio_cache::Cache>,
    pub tasks: Arc<pio_taskengine::TaskEngine>,
    pub active_calibrations: Arc<RwLock<ActiveCalibrations>>,
    /// `<root>`: parent of `storage/calibrations`, `plugins`,
    /// `experiment_profiles`, `exportable_datasets` (see spec.md §6).
    pub root: PathBuf,
    pub is_leader: bool,
}

impl UnitApiState {
    pub async fn open(
        metadata_path: impl AsRef<Path>,
        tasks: Arc<pio_taskengine::TaskEngine>,
        root: PathBuf,
        is_leader: bool,
    ) -> Result<Self, ApiError> {
        let metadata = Connection::open(metadata_path.as_ref()).await?;
        init_metadata_schema(&metadata).await?;
        let active_calibrations = load_active_calibrations(&root).await;

        Ok(Self {
            metadata,
            cache: Arc::new(pio_cache::Cache::new()),
            tasks,
            active_calibrations: Arc::new(RwLock::new(active_calibrations)),
            root,
            is_leader,
        })
    }

    pub fn calibrations_dir(&self) -> PathBuf {
        self.root.join("storage").join("calibrations")
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.root.join("plugins")
    }

    /// Persist the in-memory active-calibrations table to
    /// `<root>/storage/calibrations/active_calibrations.json`. Called after
    /// every mutation so a restart picks up where it left off.
    pub async fn save_active_calibrations(&self) -> Result<(), ApiError> {
        let snapshot = self.active_calibrations.read().await.clone();
        let dir = self.calibrations_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ApiError::Internal(e.into()))?;
        let body = serde_json::to_vec_pretty(&snapshot).map_err(|e| ApiError::Internal(e.into()))?;
        tokio::fs::write(active_calibrations_path(&dir), body)
            .await
            .map_err(|e| ApiError::Internal(e.into()))?;
        Ok(())
    }
}

fn active_calibrations_path(calibrations_dir: &Path) -> PathBuf {
    calibrations_dir.join("active_calibrations.json")
}

async fn load_active_calibrations(root: &Path) -> ActiveCalibrations {
    let dir = root.join("storage").join("calibrations");
    match tokio::fs::read(active_calibrations_path(&dir)).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => ActiveCalibrations::default(),
    }
}

async fn init_metadata_schema(conn: &Connection) -> Result<(), ApiError> {
    conn.call(|conn| {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS pio_job_metadata (
                job_name    TEXT NOT NULL,
                job_source  TEXT,
                experiment  TEXT NOT NULL,
                job_id      TEXT,
                pid         INTEGER,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (job_name, experiment)
            );
            CREATE TABLE IF NOT EXISTS pio_job_published_settings (
                job_name    TEXT NOT NULL,
                experiment  TEXT NOT NULL,
                setting     TEXT NOT NULL,
                value       TEXT,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (job_name, experiment, setting)
            );
            ",
        )?;
        Ok(())
    })
    .await
    .map_err(ApiError::from)
}
