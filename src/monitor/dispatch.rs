//! Single consumption point for samples from every worker.
//!
//! One task owns all aggregators and drains one mailbox, so every mutation and
//! every read of aggregator state happens on that task, one command at a time.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::models::{target_key, ProbeTarget, Sample};
use crate::stats::{target_node, HistoryNode, StatsObserver, TargetAggregator, TargetDisplay, TargetStats};

/// Mailbox size shared by all workers.
const MAILBOX_CAPACITY: usize = 1000;

/// A target's configuration together with a copy of its history.
#[derive(Debug, Clone)]
pub struct TargetHistory {
    pub target: ProbeTarget,
    pub history: Vec<Sample>,
}

/// Commands accepted by the dispatch task.
pub enum DispatchCommand {
    /// A fresh sample from a worker, routed by target name.
    Sample(Sample),
    /// Replay stored samples into the aggregator at `index`, oldest first.
    Replay { index: usize, samples: Vec<Sample> },
    Subscribe(Arc<dyn StatsObserver>),
    Displays(oneshot::Sender<Vec<TargetDisplay>>),
    Stats(oneshot::Sender<Vec<TargetStats>>),
    Histories(oneshot::Sender<Vec<TargetHistory>>),
    HistoryView(oneshot::Sender<Vec<HistoryNode>>),
}

/// Cloneable handle onto the dispatch mailbox.
#[derive(Clone)]
pub struct SampleDispatch {
    tx: mpsc::Sender<DispatchCommand>,
}

impl SampleDispatch {
    pub(crate) fn new(tx: mpsc::Sender<DispatchCommand>) -> Self {
        Self { tx }
    }

    /// Spawn the consumer task that owns `aggregators`.
    pub fn spawn(aggregators: Vec<TargetAggregator>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let handle = tokio::spawn(run_dispatch(rx, DispatchState::new(aggregators)));
        (Self::new(tx), handle)
    }

    /// Queue a sample. Returns false once the consumer is gone.
    pub async fn post(&self, sample: Sample) -> bool {
        self.tx.send(DispatchCommand::Sample(sample)).await.is_ok()
    }

    pub async fn send(&self, command: DispatchCommand) -> bool {
        self.tx.send(command).await.is_ok()
    }

    /// Ask the consumer for something and wait for the answer.
    pub async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> DispatchCommand,
    ) -> Option<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if !self.send(make(reply_tx)).await {
            return None;
        }
        reply_rx.await.ok()
    }
}

/// Aggregators plus a case-insensitive name index. Owned by the dispatch task.
pub struct DispatchState {
    aggregators: Vec<TargetAggregator>,
    by_name: HashMap<String, usize>,
}

impl DispatchState {
    pub fn new(aggregators: Vec<TargetAggregator>) -> Self {
        let by_name = aggregators
            .iter()
            .enumerate()
            .map(|(i, agg)| (agg.target().key(), i))
            .collect();
        Self {
            aggregators,
            by_name,
        }
    }

    pub fn aggregators(&self) -> &[TargetAggregator] {
        &self.aggregators
    }

    pub fn handle(&mut self, command: DispatchCommand) {
        match command {
            DispatchCommand::Sample(sample) => {
                match self.by_name.get(&target_key(&sample.target_name)) {
                    Some(&i) => self.aggregators[i].add_sample(sample),
                    None => tracing::debug!(
                        "Dispatch: dropping sample for unknown target {}",
                        sample.target_name
                    ),
                }
            }
            DispatchCommand::Replay { index, samples } => match self.aggregators.get_mut(index) {
                Some(agg) => samples.into_iter().for_each(|s| agg.add_sample(s)),
                None => tracing::warn!("Dispatch: replay for unknown target index {}", index),
            },
            DispatchCommand::Subscribe(observer) => {
                for agg in &mut self.aggregators {
                    agg.subscribe(observer.clone());
                }
            }
            DispatchCommand::Displays(reply) => {
                let _ = reply.send(self.aggregators.iter().map(|a| a.display()).collect());
            }
            DispatchCommand::Stats(reply) => {
                let _ = reply.send(self.aggregators.iter().map(|a| a.stats().clone()).collect());
            }
            DispatchCommand::Histories(reply) => {
                let histories = self
                    .aggregators
                    .iter()
                    .map(|a| TargetHistory {
                        target: a.target().clone(),
                        history: a.history().iter().cloned().collect(),
                    })
                    .collect();
                let _ = reply.send(histories);
            }
            DispatchCommand::HistoryView(reply) => {
                let nodes = self
                    .aggregators
                    .iter()
                    .map(|a| target_node(&a.display(), a.history()))
                    .collect();
                let _ = reply.send(nodes);
            }
        }
    }
}

/// Drain the mailbox until every sender is dropped.
async fn run_dispatch(mut rx: mpsc::Receiver<DispatchCommand>, mut state: DispatchState) {
    while let Some(command) = rx.recv().await {
        state.handle(command);
    }
    tracing::debug!("Dispatch: mailbox closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn state() -> DispatchState {
        DispatchState::new(vec![
            TargetAggregator::new(ProbeTarget::new("Router", "192.168.178.1", 1000, 1000)),
            TargetAggregator::new(ProbeTarget::new("Internet", "1.1.1.1", 1000, 1000)),
        ])
    }

    fn sample_for(name: &str, rtt: f64) -> Sample {
        let mut s = Sample::ok(&ProbeTarget::new(name, "h", 1000, 1000), Utc::now(), rtt);
        s.target_name = name.to_string();
        s
    }

    #[test]
    fn test_routes_by_case_insensitive_name() {
        let mut state = state();
        state.handle(DispatchCommand::Sample(sample_for("internet", 5.0)));
        state.handle(DispatchCommand::Sample(sample_for("ROUTER", 1.0)));
        state.handle(DispatchCommand::Sample(sample_for("Internet", 7.0)));

        assert_eq!(state.aggregators()[0].stats().total, 1);
        assert_eq!(state.aggregators()[1].stats().total, 2);
    }

    #[test]
    fn test_unknown_target_dropped() {
        let mut state = state();
        state.handle(DispatchCommand::Sample(sample_for("Nowhere", 5.0)));

        assert!(state.aggregators().iter().all(|a| a.stats().total == 0));
    }

    #[test]
    fn test_replay_preserves_order() {
        let mut state = state();
        let samples: Vec<Sample> = (0..5).map(|i| sample_for("Router", i as f64)).collect();
        state.handle(DispatchCommand::Replay { index: 0, samples });
        state.handle(DispatchCommand::Replay {
            index: 9,
            samples: vec![sample_for("Router", 1.0)],
        });

        let order: Vec<f64> = state.aggregators()[0]
            .history()
            .iter()
            .filter_map(|s| s.roundtrip_ms)
            .collect();
        assert_eq!(order, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_requests_answered_in_mailbox_order() {
        let (dispatch, handle) = SampleDispatch::spawn(state().aggregators);
        assert!(dispatch.post(sample_for("Router", 3.0)).await);

        let stats = dispatch.request(DispatchCommand::Stats).await.unwrap();
        assert_eq!(stats[0].total, 1);

        let histories = dispatch.request(DispatchCommand::Histories).await.unwrap();
        assert_eq!(histories[0].history.len(), 1);
        assert_eq!(histories[1].target.name, "Internet");

        let view = dispatch.request(DispatchCommand::HistoryView).await.unwrap();
        assert_eq!(view[0].header, "Router (192.168.178.1)");
        assert_eq!(view[0].children.len(), 1);

        drop(dispatch);
        handle.await.unwrap();
    }
}
