//! Probe module for network monitoring.
//!
//! An echo probe either yields a reply (successful or not) or fails to run.

mod ping;

pub use ping::*;

use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("could not resolve host: {0}")]
    Resolve(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
}

impl ProbeError {
    /// Short kind name recorded on failed samples.
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeError::Resolve(_) => "Resolve",
            ProbeError::Network(_) => "Network",
            ProbeError::Config(_) => "Config",
            ProbeError::Command(_) => "Command",
        }
    }
}

/// Status of an echo reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Success,
    TimedOut,
    DestinationNetworkUnreachable,
    DestinationHostUnreachable,
    DestinationProtocolUnreachable,
    DestinationPortUnreachable,
    TtlExpired,
    ParameterProblem,
    Unknown,
}

impl ReplyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyStatus::Success => "Success",
            ReplyStatus::TimedOut => "TimedOut",
            ReplyStatus::DestinationNetworkUnreachable => "DestinationNetworkUnreachable",
            ReplyStatus::DestinationHostUnreachable => "DestinationHostUnreachable",
            ReplyStatus::DestinationProtocolUnreachable => "DestinationProtocolUnreachable",
            ReplyStatus::DestinationPortUnreachable => "DestinationPortUnreachable",
            ReplyStatus::TtlExpired => "TtlExpired",
            ReplyStatus::ParameterProblem => "ParameterProblem",
            ReplyStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one echo request that got an answer, or timed out waiting for one.
#[derive(Debug, Clone, PartialEq)]
pub struct EchoReply {
    pub status: ReplyStatus,
    pub roundtrip: Duration,
    /// Source address of the reply, when one arrived.
    pub address: Option<String>,
}

impl EchoReply {
    pub fn success(roundtrip: Duration, address: Option<String>) -> Self {
        Self {
            status: ReplyStatus::Success,
            roundtrip,
            address,
        }
    }

    pub fn timed_out(timeout: Duration) -> Self {
        Self {
            status: ReplyStatus::TimedOut,
            roundtrip: timeout,
            address: None,
        }
    }

    pub fn roundtrip_ms(&self) -> f64 {
        self.roundtrip.as_nanos() as f64 / 1_000_000.0
    }
}

/// Anything that can issue a single bounded echo probe.
pub trait Prober: Send + Sync + 'static {
    fn probe(
        &self,
        host: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<EchoReply, ProbeError>> + Send;
}

/// Prober backed by native ICMP sockets with a `ping` command fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct IcmpProber;

impl Prober for IcmpProber {
    async fn probe(&self, host: &str, timeout: Duration) -> Result<EchoReply, ProbeError> {
        if host.trim().is_empty() {
            return Err(ProbeError::Config("empty host".to_string()));
        }
        run_ping_probe(host, timeout).await
    }
}
