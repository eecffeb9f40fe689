use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A calibration artifact stored as YAML under
/// `<root>/storage/calibrations/<device>/<name>.yaml`. The core treats the
/// payload as an opaque, schema-validated blob; only the identifying fields
/// are structured here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrationBase {
    pub device: String,
    pub calibration_name: String,
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Remaining device-specific fields, passed through unvalidated beyond
    /// "is this valid YAML/JSON".
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Per-node active-calibration table: `device -> calibration_name`.
///
/// Invariant: at most one entry per device, and the named file must exist
/// on disk (enforced by the caller before writing this map).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveCalibrations(pub HashMap<String, String>);

impl ActiveCalibrations {
    pub fn get(&self, device: &str) -> Option<&str> {
        self.0.get(device).map(String::as_str)
    }

    pub fn set(&mut self, device: impl Into<String>, name: impl Into<String>) {
        self.0.insert(device.into(), name.into());
    }

    pub fn clear(&mut self, device: &str) {
        self.0.remove(device);
    }
}
