//! Persisted state types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::Sample;

/// Top-level document in the state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorPersistedState>,
    /// Sections owned by other front-ends (window placement etc.), kept as-is.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Snapshot of the monitor: run flag plus each target's bounded history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorPersistedState {
    #[serde(default)]
    pub is_running: Option<bool>,
    #[serde(default)]
    pub targets: Vec<TargetPersistedState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPersistedState {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    /// Oldest first.
    #[serde(default)]
    pub history: Vec<Sample>,
}
