//! Core model types shared by the probe loop, the aggregators and persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A monitored host and how often to probe it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Display name, unique per monitor (compared case-insensitively).
    pub name: String,
    pub host: String,
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl ProbeTarget {
    pub fn new(name: &str, host: &str, interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            interval_ms,
            timeout_ms,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Lookup key used for case-insensitive name matching.
    pub fn key(&self) -> String {
        target_key(&self.name)
    }
}

/// Normalize a target name into its lookup key.
pub fn target_key(name: &str) -> String {
    name.to_lowercase()
}

/// The outcome of one probe cycle.
///
/// This is also the persisted form of a history entry, so every optional field
/// is skipped when absent and tolerated when missing on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    #[serde(default)]
    pub target_name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roundtrip_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_message: Option<String>,
}

impl Sample {
    /// A successful echo reply.
    pub fn ok(target: &ProbeTarget, timestamp: DateTime<Utc>, roundtrip_ms: f64) -> Self {
        Self {
            success: true,
            roundtrip_ms: Some(roundtrip_ms),
            ..Self::blank(target, timestamp)
        }
    }

    /// A reply that arrived (or timed out) without success.
    pub fn failed(target: &ProbeTarget, timestamp: DateTime<Utc>, status: &str) -> Self {
        Self {
            error: Some(status.to_string()),
            reply_status: Some(status.to_string()),
            ..Self::blank(target, timestamp)
        }
    }

    /// A probe that could not be carried out at all.
    pub fn errored(target: &ProbeTarget, timestamp: DateTime<Utc>, kind: &str, message: &str) -> Self {
        Self {
            error: Some(kind.to_string()),
            exception_type: Some(kind.to_string()),
            exception_message: Some(message.to_string()),
            ..Self::blank(target, timestamp)
        }
    }

    fn blank(target: &ProbeTarget, timestamp: DateTime<Utc>) -> Self {
        Self {
            target_name: target.name.clone(),
            host: target.host.clone(),
            timestamp,
            success: false,
            roundtrip_ms: None,
            error: None,
            reply_status: None,
            reply_address: None,
            timeout_ms: Some(target.timeout_ms),
            exception_type: None,
            exception_message: None,
        }
    }

    /// The cause used when grouping failures: error, then reply status, then error kind.
    pub fn failure_cause(&self) -> &str {
        self.error
            .as_deref()
            .or(self.reply_status.as_deref())
            .or(self.exception_type.as_deref())
            .unwrap_or("Unknown")
    }
}
