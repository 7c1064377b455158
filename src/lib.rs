//! PingMon - continuous ICMP reachability monitoring for a router and an
//! internet host.
//!
//! Probe workers feed samples into a single dispatch task that owns the
//! per-target aggregators. History can be segmented into connectivity runs
//! and persisted between sessions.

pub mod config;
pub mod models;
pub mod monitor;
pub mod probe;
pub mod state;
pub mod stats;

pub use config::MonitorConfig;
pub use models::{ProbeTarget, Sample};
pub use monitor::{MonitorController, MonitorError};
pub use probe::{IcmpProber, Prober};
pub use state::{AppState, PersistenceStore};
