//! Running statistics and bounded history for one target.
//!
//! A `TargetAggregator` is owned by exactly one writer (the dispatch actor), so
//! it carries no locks of its own.

use chrono::{DateTime, Local, Utc};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::models::{ProbeTarget, Sample};

/// Maximum number of samples kept per target.
pub const MAX_HISTORY_SAMPLES: usize = 10_000;

/// Placeholder shown when a value is not defined yet.
pub const NO_VALUE: &str = "—";

/// Receives a fresh display every time an aggregator changes.
pub trait StatsObserver: Send + Sync {
    fn stats_changed(&self, display: &TargetDisplay);
}

/// Running counters for one target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetStats {
    pub total: u64,
    pub success_count: u64,
    pub sum_latency: f64,
    pub min_latency: Option<f64>,
    pub max_latency: Option<f64>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl TargetStats {
    pub fn fail_count(&self) -> u64 {
        self.total - self.success_count
    }

    pub fn average_latency(&self) -> Option<f64> {
        (self.success_count > 0).then(|| self.sum_latency / self.success_count as f64)
    }

    /// Loss in percent, `None` before the first sample.
    pub fn loss_percent(&self) -> Option<f64> {
        (self.total > 0).then(|| 100.0 * self.fail_count() as f64 / self.total as f64)
    }
}

/// Display strings handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDisplay {
    pub name: String,
    pub host: String,
    pub current: String,
    pub status: String,
    pub average: String,
    pub loss: String,
    pub min: String,
    pub max: String,
    pub counts: String,
    pub summary_line: String,
    pub range_line: String,
    pub last_updated: String,
}

/// Whole milliseconds, halves rounded away from zero.
pub fn format_ms(value: Option<f64>) -> String {
    value.map_or_else(|| NO_VALUE.to_string(), |ms| format!("{:.0} ms", ms.round()))
}

/// Single-writer aggregator for one target.
pub struct TargetAggregator {
    target: ProbeTarget,
    stats: TargetStats,
    history: VecDeque<Sample>,
    capacity: usize,
    current: String,
    status: String,
    observers: Vec<Arc<dyn StatsObserver>>,
}

impl TargetAggregator {
    pub fn new(target: ProbeTarget) -> Self {
        Self::with_capacity(target, MAX_HISTORY_SAMPLES)
    }

    pub fn with_capacity(target: ProbeTarget, capacity: usize) -> Self {
        Self {
            target,
            stats: TargetStats::default(),
            history: VecDeque::with_capacity(capacity.min(1024) + 1),
            capacity,
            current: NO_VALUE.to_string(),
            status: "No data".to_string(),
            observers: Vec::new(),
        }
    }

    pub fn target(&self) -> &ProbeTarget {
        &self.target
    }

    pub fn stats(&self) -> &TargetStats {
        &self.stats
    }

    /// History in arrival order, oldest first.
    pub fn history(&self) -> &VecDeque<Sample> {
        &self.history
    }

    pub fn subscribe(&mut self, observer: Arc<dyn StatsObserver>) {
        self.observers.push(observer);
    }

    /// Record one sample, evicting the oldest history entry past capacity.
    pub fn add_sample(&mut self, sample: Sample) {
        let stats = &mut self.stats;
        stats.total += 1;
        stats.last_timestamp = Some(sample.timestamp);

        match sample.roundtrip_ms {
            Some(ms) if sample.success => {
                stats.success_count += 1;
                stats.sum_latency += ms;
                stats.min_latency = Some(stats.min_latency.map_or(ms, |min| min.min(ms)));
                stats.max_latency = Some(stats.max_latency.map_or(ms, |max| max.max(ms)));

                self.current = format_ms(Some(ms));
                self.status = "OK".to_string();
            }
            _ => {
                self.current = NO_VALUE.to_string();
                self.status = sample.error.clone().unwrap_or_else(|| "Fail".to_string());
            }
        }

        self.history.push_back(sample);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }

        if !self.observers.is_empty() {
            let display = self.display();
            for observer in &self.observers {
                observer.stats_changed(&display);
            }
        }
    }

    pub fn display(&self) -> TargetDisplay {
        let stats = &self.stats;
        let average = format_ms(stats.average_latency());
        let loss = stats
            .loss_percent()
            .map_or_else(|| NO_VALUE.to_string(), |pct| format!("{:.1}%", pct));
        let min = format_ms(stats.min_latency);
        let max = format_ms(stats.max_latency);

        TargetDisplay {
            name: self.target.name.clone(),
            host: self.target.host.clone(),
            current: self.current.clone(),
            status: self.status.clone(),
            counts: format!(
                "Samples: {}   Success: {}   Fail: {}",
                stats.total,
                stats.success_count,
                stats.fail_count()
            ),
            summary_line: format!("Avg {}  ·  Loss {}", average, loss),
            range_line: format!("Min {}  ·  Max {}", min, max),
            last_updated: stats.last_timestamp.map_or_else(
                || NO_VALUE.to_string(),
                |ts| ts.with_timezone(&Local).format("%H:%M:%S").to_string(),
            ),
            average,
            loss,
            min,
            max,
        }
    }
}
