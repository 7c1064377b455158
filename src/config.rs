//! Configuration module for PingMon.
//!
//! Targets and probe timing come from a JSON settings file; environment
//! variables override individual values.

use serde::Deserialize;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::models::ProbeTarget;

pub const DEFAULT_SETTINGS_PATH: &str = "appsettings.json";
pub const DEFAULT_STATE_PATH: &str = "pingmon-state.json";
pub const DEFAULT_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_STATUS_SECS: u64 = 10;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Settings file layout. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SettingsFile {
    #[serde(default)]
    targets: TargetsSection,
    #[serde(default)]
    ping: PingSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TargetsSection {
    router: Option<HostSection>,
    internet: Option<HostSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostSection {
    name: Option<String>,
    host: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PingSection {
    interval_ms: Option<u64>,
    timeout_ms: Option<u64>,
}

/// Monitor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub router_name: String,
    pub router_host: String,
    pub internet_name: String,
    pub internet_host: String,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    /// Path of the persisted snapshot (default: "pingmon-state.json")
    pub state_path: PathBuf,
    /// How often the binary logs the display lines (default: 10)
    pub status_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            router_name: "Router".to_string(),
            router_host: "192.168.178.1".to_string(),
            internet_name: "Internet".to_string(),
            internet_host: "1.1.1.1".to_string(),
            interval_ms: DEFAULT_INTERVAL_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            status_secs: DEFAULT_STATUS_SECS,
        }
    }
}

impl MonitorConfig {
    /// Load the settings file and apply environment overrides.
    ///
    /// Environment variables:
    /// - `PINGMON_SETTINGS`: settings file path (default: "appsettings.json")
    /// - `PINGMON_INTERVAL_MS`: probe interval
    /// - `PINGMON_TIMEOUT_MS`: probe timeout
    /// - `PINGMON_STATE_PATH`: snapshot path
    /// - `PINGMON_STATUS_SECS`: status log period
    pub fn load() -> Self {
        let settings = env::var("PINGMON_SETTINGS").unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string());

        let mut cfg = match Self::from_file(&settings) {
            Ok(Some(cfg)) => cfg,
            Ok(None) => {
                tracing::debug!("No settings file at {}, using defaults", settings);
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Ignoring settings file {}: {}", settings, e);
                Self::default()
            }
        };

        cfg.apply_overrides(|key| env::var(key).ok());
        cfg
    }

    /// Read a settings file. A missing file yields `Ok(None)`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Option<Self>, ConfigError> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::from_json(&json).map(Some)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: SettingsFile = serde_json::from_str(json)?;
        let mut cfg = Self::default();

        if let Some(router) = file.targets.router {
            set_text(&mut cfg.router_name, router.name);
            set_text(&mut cfg.router_host, router.host);
        }
        if let Some(internet) = file.targets.internet {
            set_text(&mut cfg.internet_name, internet.name);
            set_text(&mut cfg.internet_host, internet.host);
        }
        set_positive(&mut cfg.interval_ms, file.ping.interval_ms);
        set_positive(&mut cfg.timeout_ms, file.ping.timeout_ms);

        Ok(cfg)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        set_positive(&mut self.interval_ms, number("PINGMON_INTERVAL_MS"));
        set_positive(&mut self.timeout_ms, number("PINGMON_TIMEOUT_MS"));
        set_positive(&mut self.status_secs, number("PINGMON_STATUS_SECS"));

        if let Some(path) = lookup("PINGMON_STATE_PATH").filter(|p| !p.trim().is_empty()) {
            self.state_path = PathBuf::from(path);
        }
    }

    /// The two monitored targets, router first.
    pub fn targets(&self) -> Vec<ProbeTarget> {
        vec![
            ProbeTarget::new(&self.router_name, &self.router_host, self.interval_ms, self.timeout_ms),
            ProbeTarget::new(&self.internet_name, &self.internet_host, self.interval_ms, self.timeout_ms),
        ]
    }

    pub fn status_period(&self) -> Duration {
        Duration::from_secs(self.status_secs)
    }
}

fn set_text(slot: &mut String, value: Option<String>) {
    if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
        *slot = v.trim().to_string();
    }
}

// Zero falls back to the default already in `slot`
fn set_positive(slot: &mut u64, value: Option<u64>) {
    if let Some(v) = value.filter(|&v| v > 0) {
        *slot = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let cfg = MonitorConfig::default();
        let targets = cfg.targets();
        assert_eq!(targets[0], ProbeTarget::new("Router", "192.168.178.1", 1000, 1000));
        assert_eq!(targets[1], ProbeTarget::new("Internet", "1.1.1.1", 1000, 1000));
        assert_eq!(cfg.state_path, PathBuf::from("pingmon-state.json"));
        assert_eq!(cfg.status_period(), Duration::from_secs(10));
    }

    #[test]
    fn test_settings_json() {
        let cfg = MonitorConfig::from_json(
            r#"{
                "Targets": {
                    "Router": { "Name": "Gateway", "Host": "10.0.0.1" },
                    "Internet": { "Host": "9.9.9.9" }
                },
                "Ping": { "IntervalMs": 2000, "TimeoutMs": 0 },
                "Logging": { "LogLevel": "Debug" }
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.router_name, "Gateway");
        assert_eq!(cfg.router_host, "10.0.0.1");
        assert_eq!(cfg.internet_name, "Internet");
        assert_eq!(cfg.internet_host, "9.9.9.9");
        assert_eq!(cfg.interval_ms, 2000);
        assert_eq!(cfg.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_malformed_settings() {
        assert!(matches!(
            MonitorConfig::from_json("{ \"Ping\": "),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            MonitorConfig::from_json(r#"{ "Ping": { "IntervalMs": "fast" } }"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_settings_file() {
        let dir = TempDir::new().unwrap();
        assert!(MonitorConfig::from_file(dir.path().join("missing.json")).unwrap().is_none());

        let path = dir.path().join("appsettings.json");
        fs::write(&path, r#"{ "Ping": { "TimeoutMs": 250 } }"#).unwrap();
        let cfg = MonitorConfig::from_file(&path).unwrap().unwrap();
        assert_eq!(cfg.timeout_ms, 250);
        assert_eq!(cfg.targets()[1].timeout_ms, 250);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("PINGMON_INTERVAL_MS", "500"),
            ("PINGMON_TIMEOUT_MS", "0"),
            ("PINGMON_STATUS_SECS", "abc"),
            ("PINGMON_STATE_PATH", "/var/lib/pingmon/state.json"),
        ]
        .into_iter()
        .collect();

        let mut cfg = MonitorConfig::default();
        cfg.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.interval_ms, 500);
        assert_eq!(cfg.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(cfg.status_secs, DEFAULT_STATUS_SECS);
        assert_eq!(cfg.state_path, PathBuf::from("/var/lib/pingmon/state.json"));
    }
}
