//! Per-target probe loop.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use super::dispatch::SampleDispatch;
use crate::models::{ProbeTarget, Sample};
use crate::probe::{EchoReply, ProbeError, Prober, ReplyStatus};

/// How long a paused worker waits before checking again.
pub const PAUSED_POLL: Duration = Duration::from_millis(150);

/// Lower bound on the pause between two cycles.
pub const MIN_CYCLE_DELAY: Duration = Duration::from_millis(50);

/// Delay before the next cycle so cycles start `interval` apart.
pub fn next_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed).max(MIN_CYCLE_DELAY)
}

/// Build the sample for one finished probe.
pub fn sample_from_result(
    target: &ProbeTarget,
    result: Result<EchoReply, ProbeError>,
) -> Sample {
    // Wall clock for the record; cadence uses the monotonic clock
    let timestamp = Utc::now();

    match result {
        Ok(reply) if reply.status == ReplyStatus::Success => Sample {
            reply_status: Some(reply.status.to_string()),
            reply_address: reply.address.clone(),
            ..Sample::ok(target, timestamp, reply.roundtrip_ms())
        },
        Ok(reply) => Sample {
            reply_address: reply.address,
            ..Sample::failed(target, timestamp, reply.status.as_str())
        },
        Err(e) => Sample::errored(target, timestamp, e.kind(), &e.to_string()),
    }
}

/// Resolves once shutdown is signalled (or the signal is gone).
pub(crate) async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `delay`; returns false if shutdown interrupted the sleep.
async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancelled(shutdown) => false,
    }
}

/// Runs one target's probe loop, emitting exactly one sample per active cycle.
pub struct ProbeWorker<P> {
    target: ProbeTarget,
    prober: Arc<P>,
    enabled: AtomicBool,
}

impl<P: Prober> ProbeWorker<P> {
    pub fn new(target: ProbeTarget, prober: Arc<P>) -> Self {
        Self {
            target,
            prober,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn target(&self) -> &ProbeTarget {
        &self.target
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Loop until shutdown is signalled or the dispatch mailbox closes.
    pub async fn run(&self, dispatch: SampleDispatch, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("Worker: starting {} ({})", self.target.name, self.target.host);

        loop {
            if *shutdown.borrow() {
                break;
            }

            if !self.is_enabled() {
                if !pause(PAUSED_POLL, &mut shutdown).await {
                    break;
                }
                continue;
            }

            let started = Instant::now();

            // A probe cut short by shutdown produces no sample
            let sample = tokio::select! {
                _ = cancelled(&mut shutdown) => break,
                sample = self.probe_once() => sample,
            };

            // A probe still in flight when the worker was disabled is discarded
            if !self.is_enabled() {
                tracing::debug!("Worker: discarding sample for paused {}", self.target.name);
            } else if !dispatch.post(sample).await {
                tracing::warn!("Worker: dispatch closed, stopping {}", self.target.name);
                break;
            }

            let delay = next_delay(self.target.interval(), started.elapsed());
            if !pause(delay, &mut shutdown).await {
                break;
            }
        }

        tracing::debug!("Worker: stopped {}", self.target.name);
    }

    async fn probe_once(&self) -> Sample {
        let timeout = self.target.timeout();
        let result = tokio::time::timeout(timeout, self.prober.probe(&self.target.host, timeout))
            .await
            .unwrap_or_else(|_| Ok(EchoReply::timed_out(timeout)));

        if let Err(e) = &result {
            tracing::debug!("Probe failed for {}: {}", self.target.name, e);
        }

        sample_from_result(&self.target, result)
    }
}
