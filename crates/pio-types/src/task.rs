use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every kind of work the `TaskEngine` knows how to run, per spec.md §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    PioRun,
    PioKill,
    PioPluginsInstall,
    PioPluginsUninstall,
    PioPluginsList,
    PioUpdateApp,
    PioUpdateUi,
    PioUpdateEverything,
    PioRunExportExperimentData,
    AddNewPioreactor,
    WriteConfigAndSync,
    SaveFile,
    Rm,
    MulticastGet,
    MulticastPost,
    MulticastPatch,
    MulticastDelete,
    PostToWorker,
}

impl TaskKind {
    /// Default priority, per spec.md §4.5's table (higher runs first).
    pub fn default_priority(self) -> i64 {
        match self {
            TaskKind::PioKill => 100,
            TaskKind::PioRun => 10,
            TaskKind::PostToWorker => 10,
            TaskKind::MulticastGet
            | TaskKind::MulticastPost
            | TaskKind::MulticastPatch
            | TaskKind::MulticastDelete => 5,
            _ => 0,
        }
    }

    /// The named advisory lock this kind must hold while running, if any.
    pub fn lock_name(self) -> Option<&'static str> {
        match self {
            TaskKind::PioPluginsInstall | TaskKind::PioPluginsUninstall => Some("plugins-lock"),
            TaskKind::PioUpdateApp | TaskKind::PioUpdateUi | TaskKind::PioUpdateEverything => {
                Some("update-lock")
            }
            TaskKind::PioRunExportExperimentData => Some("export-data-lock"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Complete,
    Failed,
    Locked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub priority: i64,
    pub lock_name: Option<String>,
    pub state: TaskState,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
