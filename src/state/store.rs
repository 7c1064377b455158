//! JSON file store for `AppState`.
//!
//! Loading never fails: a missing, unreadable or malformed file yields the
//! default state. Saving is best-effort and only logs on failure.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::models::AppState;

/// Persistence error types. Only surfaced through logs.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// File-backed store for the monitoring snapshot.
#[derive(Debug, Clone)]
pub struct PersistenceStore {
    path: PathBuf,
}

impl PersistenceStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state file, falling back to the default state on any failure.
    pub fn load(&self) -> AppState {
        match self.try_load() {
            Ok(Some(state)) => state,
            Ok(None) => {
                tracing::debug!("No state file at {}", self.path.display());
                AppState::default()
            }
            Err(e) => {
                tracing::warn!("Ignoring state file {}: {}", self.path.display(), e);
                AppState::default()
            }
        }
    }

    fn try_load(&self) -> Result<Option<AppState>, StateError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Write the state file. Failures are logged and otherwise ignored.
    pub fn save(&self, state: &AppState) {
        match self.try_save(state) {
            Ok(()) => tracing::debug!("Saved state to {}", self.path.display()),
            Err(e) => tracing::warn!("Failed to save state to {}: {}", self.path.display(), e),
        }
    }

    fn try_save(&self, state: &AppState) -> Result<(), StateError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let json = serde_json::to_string_pretty(state)?;

        // Write a sibling file first so a crash never leaves a truncated snapshot
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProbeTarget, Sample};
    use crate::state::{MonitorPersistedState, TargetPersistedState};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn state() -> AppState {
        let target = ProbeTarget::new("Router", "192.168.178.1", 1000, 1000);
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        AppState {
            monitor: Some(MonitorPersistedState {
                is_running: Some(false),
                targets: vec![TargetPersistedState {
                    name: Some("Router".to_string()),
                    host: Some("192.168.178.1".to_string()),
                    history: vec![
                        Sample::ok(&target, ts, 3.0),
                        Sample::failed(&target, ts, "TimedOut"),
                    ],
                }],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let store = PersistenceStore::new(dir.path().join("state.json"));
        assert_eq!(store.load(), AppState::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = PersistenceStore::new(dir.path().join("nested/pingmon/state.json"));

        store.save(&state());
        assert_eq!(store.load(), state());
        assert!(!dir.path().join("nested/pingmon/state.json.tmp").exists());
    }

    #[test]
    fn test_invalid_json_is_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ \"monitor\": { \"targets\": [ ").unwrap();

        assert_eq!(PersistenceStore::new(&path).load(), AppState::default());
    }

    #[test]
    fn test_wrong_shape_is_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{ "monitor": { "targets": "nope" } }"#).unwrap();

        assert_eq!(PersistenceStore::new(&path).load(), AppState::default());
    }

    #[test]
    fn test_foreign_sections_survive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{ "mainWindow": { "x": 10, "topmost": true }, "monitor": { "isRunning": true } }"#,
        )
        .unwrap();

        let store = PersistenceStore::new(&path);
        let loaded = store.load();
        assert_eq!(loaded.monitor.as_ref().unwrap().is_running, Some(true));
        assert!(loaded.monitor.as_ref().unwrap().targets.is_empty());
        assert!(loaded.other.contains_key("mainWindow"));

        store.save(&loaded);
        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["mainWindow"]["topmost"], true);
    }

    #[test]
    fn test_save_failure_is_swallowed() {
        let dir = TempDir::new().unwrap();
        // The target path is a directory, so the final rename fails
        let store = PersistenceStore::new(dir.path());
        store.save(&state());
        assert!(dir.path().is_dir());
    }

    #[test]
    fn test_snapshot_format() {
        let json = serde_json::to_value(state()).unwrap();
        let monitor = &json["monitor"];
        assert_eq!(monitor["isRunning"], false);
        assert_eq!(monitor["targets"][0]["name"], "Router");
        let history = &monitor["targets"][0]["history"];
        assert_eq!(history[0]["success"], true);
        assert_eq!(history[0]["roundtripMs"], 3.0);
        assert_eq!(history[1]["replyStatus"], "TimedOut");
        assert_eq!(history[1]["timeoutMs"], 1000);
    }
}
