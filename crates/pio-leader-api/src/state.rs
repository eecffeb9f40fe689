//! Root service struct for the leader cluster-coordination API: owns the
//! singletons (`Store`, `Cache`, `Bus`, `TaskEngine`, `WorkerRpc`) that every
//! handler composes, per spec.md §9's "cycle-free ownership" design note.
//! Cheap to clone -- every field is an `Arc`/handle type.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pio_bus::Bus;
use pio_cache::Cache;
use pio_store::Store;
use pio_taskengine::TaskEngine;
use pio_workerrpc::WorkerRpc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct LeaderState {
    pub store: Store,
    pub cache: Arc<Cache>,
    /// Only present when this node is the leader (spec.md §5: "Bus client
    /// started only if the node is the leader").
    pub bus: Option<Arc<Bus>>,
    pub tasks: Arc<TaskEngine>,
    pub rpc: Arc<WorkerRpc>,
    /// The leader's own view of each node's active calibration, keyed by
    /// `(pioreactor_unit, device)`. Mirrors the per-node table exposed by
    /// UnitAPI; kept here so `GET /workers/<u>/calibrations` can answer
    /// without a round trip when it was set through this API.
    pub active_calibrations: Arc<RwLock<HashMap<(String, String), String>>>,
    /// Parent of `contrib/{automations,jobs,charts,experiment_profiles,exportable_datasets}`,
    /// `exports`, and `uploads`. See spec.md §6.
    pub root: PathBuf,
}

impl LeaderState {
    pub fn new(
        store: Store,
        cache: Arc<Cache>,
        bus: Option<Arc<Bus>>,
        tasks: Arc<TaskEngine>,
        rpc: Arc<WorkerRpc>,
        root: PathBuf,
    ) -> Self {
        Self {
            store,
            cache,
            bus,
            tasks,
            rpc,
            active_calibrations: Arc::new(RwLock::new(HashMap::new())),
            root,
        }
    }

    pub fn contrib_dir(&self, category: &str) -> PathBuf {
        self.root.join("contrib").join(category)
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn filesystem_root(&self) -> &Path {
        &self.root
    }
}
