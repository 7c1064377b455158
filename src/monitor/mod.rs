//! Monitor module: owns the probe workers, the dispatch task and the run flag.

mod dispatch;
mod worker;

pub use dispatch::*;
pub use worker::*;

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::{target_key, ProbeTarget};
use crate::probe::{IcmpProber, Prober};
use crate::state::{MonitorPersistedState, TargetPersistedState};
use crate::stats::{HistoryNode, StatsObserver, TargetAggregator, TargetDisplay, TargetStats};

/// Monitor error types.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("duplicate target name: {0}")]
    DuplicateTarget(String),
    #[error("dispatch task is not running")]
    DispatchClosed,
}

/// Entry point for the surrounding application.
pub struct MonitorController<P: Prober = IcmpProber> {
    workers: Vec<Arc<ProbeWorker<P>>>,
    by_name: HashMap<String, usize>,
    dispatch: SampleDispatch,
    shutdown_tx: watch::Sender<bool>,
    worker_tasks: Vec<JoinHandle<()>>,
    is_running: bool,
}

impl<P: Prober> MonitorController<P> {
    /// Build workers and aggregators for `targets` and spawn the dispatch task.
    ///
    /// Must be called from within a tokio runtime. Workers do not probe until
    /// [`start`](Self::start).
    pub fn new(targets: Vec<ProbeTarget>, prober: P) -> Result<Self, MonitorError> {
        let mut by_name = HashMap::new();
        for (i, target) in targets.iter().enumerate() {
            if by_name.insert(target.key(), i).is_some() {
                return Err(MonitorError::DuplicateTarget(target.name.clone()));
            }
        }

        let prober = Arc::new(prober);
        let workers = targets
            .iter()
            .map(|t| Arc::new(ProbeWorker::new(t.clone(), prober.clone())))
            .collect();
        let aggregators = targets.into_iter().map(TargetAggregator::new).collect();

        // The dispatch task ends on its own once the controller and workers drop their handles
        let (dispatch, _) = SampleDispatch::spawn(aggregators);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            workers,
            by_name,
            dispatch,
            shutdown_tx,
            worker_tasks: Vec::new(),
            is_running: true,
        })
    }

    pub fn targets(&self) -> impl Iterator<Item = &ProbeTarget> {
        self.workers.iter().map(|w| w.target())
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn subtitle(&self) -> &'static str {
        if self.is_running {
            "Running"
        } else {
            "Paused"
        }
    }

    /// Launch every worker. Calling it again is a no-op.
    pub fn start(&mut self) {
        if !self.worker_tasks.is_empty() {
            return;
        }

        tracing::info!("Starting monitor with {} targets", self.workers.len());

        for worker in &self.workers {
            let worker = worker.clone();
            let dispatch = self.dispatch.clone();
            let shutdown = self.shutdown_tx.subscribe();
            self.worker_tasks.push(tokio::spawn(async move {
                worker.run(dispatch, shutdown).await;
            }));
        }
    }

    /// Flip the run flag and push it to every worker. Returns the new flag.
    ///
    /// Once paused, no further samples are recorded, including those from
    /// probes that were already in flight.
    pub fn toggle(&mut self) -> bool {
        self.is_running = !self.is_running;
        for worker in &self.workers {
            worker.set_enabled(self.is_running);
        }
        tracing::info!("Monitor: {}", self.subtitle());
        self.is_running
    }

    pub async fn subscribe(&self, observer: Arc<dyn StatsObserver>) -> Result<(), MonitorError> {
        if self.dispatch.send(DispatchCommand::Subscribe(observer)).await {
            Ok(())
        } else {
            Err(MonitorError::DispatchClosed)
        }
    }

    pub async fn displays(&self) -> Result<Vec<TargetDisplay>, MonitorError> {
        self.dispatch
            .request(DispatchCommand::Displays)
            .await
            .ok_or(MonitorError::DispatchClosed)
    }

    pub async fn stats(&self) -> Result<Vec<TargetStats>, MonitorError> {
        self.dispatch
            .request(DispatchCommand::Stats)
            .await
            .ok_or(MonitorError::DispatchClosed)
    }

    /// One node per target: its stats line with the connectivity segments below.
    pub async fn history_view(&self) -> Result<Vec<HistoryNode>, MonitorError> {
        self.dispatch
            .request(DispatchCommand::HistoryView)
            .await
            .ok_or(MonitorError::DispatchClosed)
    }

    /// Current run flag and every target's history.
    pub async fn snapshot(&self) -> Result<MonitorPersistedState, MonitorError> {
        let histories = self
            .dispatch
            .request(DispatchCommand::Histories)
            .await
            .ok_or(MonitorError::DispatchClosed)?;

        Ok(MonitorPersistedState {
            is_running: Some(self.is_running),
            targets: histories
                .into_iter()
                .map(|h| TargetPersistedState {
                    name: Some(h.target.name),
                    host: Some(h.target.host),
                    history: h.history,
                })
                .collect(),
        })
    }

    /// Replay a persisted snapshot into the live aggregators.
    ///
    /// Entries that match no live target are skipped. A persisted paused flag
    /// pauses the monitor.
    pub async fn restore(&mut self, state: &MonitorPersistedState) -> Result<(), MonitorError> {
        for entry in &state.targets {
            let Some(index) = self.find_target(entry) else {
                tracing::debug!(
                    "Restore: no live target for {:?} ({:?})",
                    entry.name,
                    entry.host
                );
                continue;
            };
            if entry.history.is_empty() {
                continue;
            }

            tracing::info!(
                "Restore: replaying {} samples into {}",
                entry.history.len(),
                self.workers[index].target().name
            );
            let replay = DispatchCommand::Replay {
                index,
                samples: entry.history.clone(),
            };
            if !self.dispatch.send(replay).await {
                return Err(MonitorError::DispatchClosed);
            }
        }

        if state.is_running == Some(false) && self.is_running {
            self.toggle();
        }

        Ok(())
    }

    /// Match by name first, then by host.
    fn find_target(&self, entry: &TargetPersistedState) -> Option<usize> {
        let non_blank = |s: &Option<String>| s.as_deref().filter(|v| !v.trim().is_empty()).map(str::to_string);

        if let Some(index) = non_blank(&entry.name).and_then(|name| self.by_name.get(&target_key(&name)).copied()) {
            return Some(index);
        }

        let host = non_blank(&entry.host)?;
        self.workers
            .iter()
            .position(|w| w.target().host.eq_ignore_ascii_case(&host))
    }

    /// Cancel all workers and wait for them to stop.
    ///
    /// The aggregators stay readable so a final snapshot can be taken.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.worker_tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::error!("Worker task failed: {}", e);
            }
        }
        tracing::info!("Monitor stopped");
    }
}
