use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a [`LogEntry`], ordered least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub pioreactor_unit: String,
    pub message: String,
    pub task: String,
    /// Experiment this log applies to, or [`crate::UNIVERSAL_EXPERIMENT`].
    pub experiment: String,
}

/// A log envelope originated by the UI itself, republished on the log topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiLogEnvelope {
    pub message: String,
    pub task: String,
    pub level: LogLevel,
    #[serde(default = "source_ui")]
    pub source: String,
}

fn source_ui() -> String {
    "ui".to_string()
}
