//! Shared data-model types for the PioreactorUI leader cluster-coordination
//! layer: entities the `Store` persists, the `TaskEngine` tracks, and the
//! `LeaderAPI`/`UnitAPI` exchange over the wire.

pub mod calibration;
pub mod env;
pub mod feature_flags;
pub mod log;
pub mod task;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Path-sentinel meaning "every active worker" (`UNIVERSAL_IDENTIFIER`).
pub const BROADCAST: &str = "$broadcast";

/// Topic/log sentinel meaning "any experiment" (`UNIVERSAL_EXPERIMENT`).
pub const UNIVERSAL_EXPERIMENT: &str = "$experiment";

/// Reserved experiment name that can never be created.
pub const RESERVED_EXPERIMENT_NAME: &str = "current";

/// Prefix that marks an experiment name as test-only and therefore rejected.
pub const RESERVED_EXPERIMENT_PREFIX: &str = "_testing_";

/// Characters forbidden anywhere in an experiment name.
pub const FORBIDDEN_EXPERIMENT_CHARS: &[char] = &['#', '+', '$', '/', '%', '\\'];

// ---------------------------------------------------------------------------
// Experiment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment: String,
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
    pub media_used: Option<String>,
    pub organism_used: Option<String>,
}

/// Validate a proposed experiment name against spec.md §4.1's rules.
///
/// Returns `Err(reason)` on the first rule violated.
pub fn validate_experiment_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("experiment name must not be empty".into());
    }
    if name.len() >= 200 {
        return Err("experiment name must be under 200 characters".into());
    }
    if name.eq_ignore_ascii_case(RESERVED_EXPERIMENT_NAME) {
        return Err(format!("experiment name `{RESERVED_EXPERIMENT_NAME}` is reserved"));
    }
    if name.starts_with(RESERVED_EXPERIMENT_PREFIX) {
        return Err(format!(
            "experiment names prefixed `{RESERVED_EXPERIMENT_PREFIX}` are reserved"
        ));
    }
    if name.chars().any(|c| FORBIDDEN_EXPERIMENT_CHARS.contains(&c)) {
        return Err("experiment name contains a forbidden character".into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub pioreactor_unit: String,
    pub added_at: DateTime<Utc>,
    pub is_active: bool,
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub pioreactor_unit: String,
    pub experiment: String,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentHistoryRow {
    pub pioreactor_unit: String,
    pub experiment: String,
    pub assigned_at: DateTime<Utc>,
    pub unassigned_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// UnitLabel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitLabel {
    pub experiment: String,
    pub pioreactor_unit: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ConfigFileHistory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFileHistoryRow {
    pub filename: String,
    pub timestamp: DateTime<Utc>,
    pub data: String,
}

// ---------------------------------------------------------------------------
// TimeSeriesRow
// ---------------------------------------------------------------------------

/// One `(x, y)` point in a time-series chart, x being the sample timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub x: DateTime<Utc>,
    pub y: f64,
}

/// Nested aggregate a time-series query emits: parallel `series`/`data`
/// arrays, one `data` entry per `series` name, front-end-chart-ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TimeSeriesAggregate {
    pub series: Vec<String>,
    pub data: Vec<Vec<TimeSeriesPoint>>,
}

// ---------------------------------------------------------------------------
// MediaRate
// ---------------------------------------------------------------------------

/// Per-worker dosing-automation media addition rate over a fixed lookback
/// window, in mL/hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct MediaRate {
    #[serde(rename = "mediaRate")]
    pub media_rate: f64,
    #[serde(rename = "altMediaRate")]
    pub alt_media_rate: f64,
}
