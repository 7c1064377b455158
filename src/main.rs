//! PingMon - Network Reachability Monitor
//!
//! Probes the local router and an internet host, logs their statistics and
//! keeps history across restarts. Commands are read from stdin.

use pingmon::stats::{StatsObserver, TargetDisplay};
use pingmon::{IcmpProber, MonitorConfig, MonitorController, PersistenceStore};

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Logs every failed sample as it arrives.
struct FailureLogger;

impl FailureLogger {
    fn failure_line(target: &TargetDisplay) -> Option<String> {
        (target.status != "OK").then(|| format!("{} ({}): {}", target.name, target.host, target.status))
    }
}

impl StatsObserver for FailureLogger {
    fn stats_changed(&self, target: &TargetDisplay) {
        if let Some(line) = Self::failure_line(target) {
            tracing::warn!("{}", line);
        }
    }
}

async fn log_status(monitor: &MonitorController) {
    match monitor.displays().await {
        Ok(displays) => {
            for d in displays {
                tracing::info!(
                    "{} ({}): {}  {}  {}  [{}]  last {}",
                    d.name,
                    d.host,
                    d.current,
                    d.summary_line,
                    d.range_line,
                    d.counts,
                    d.last_updated
                );
            }
        }
        Err(e) => tracing::error!("Status unavailable: {}", e),
    }
}

async fn print_history(monitor: &MonitorController) {
    match monitor.history_view().await {
        Ok(nodes) => {
            for node in nodes {
                println!("{}", node.render());
            }
        }
        Err(e) => tracing::error!("History unavailable: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pingmon=info".parse()?))
        .init();

    // Load configuration
    let cfg = MonitorConfig::load();
    tracing::info!(
        "Probing every {} ms (timeout {} ms)",
        cfg.interval_ms,
        cfg.timeout_ms
    );
    tracing::info!("Using state file at {}", cfg.state_path.display());

    // Restore previous session
    let store = PersistenceStore::new(&cfg.state_path);
    let mut app_state = store.load();

    let mut monitor = MonitorController::new(cfg.targets(), IcmpProber)?;
    monitor.subscribe(Arc::new(FailureLogger)).await?;
    if let Some(saved) = &app_state.monitor {
        monitor.restore(saved).await?;
    }

    monitor.start();
    tracing::info!("Monitor {}. Commands: toggle, history, status, quit", monitor.subtitle());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut status_tick = tokio::time::interval(cfg.status_period());
    status_tick.tick().await;

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = &mut interrupted => {
                tracing::info!("Interrupted");
                break;
            }
            _ = status_tick.tick() => log_status(&monitor).await,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "toggle" => {
                        monitor.toggle();
                    }
                    "history" => print_history(&monitor).await,
                    "status" => log_status(&monitor).await,
                    "quit" | "exit" => break,
                    "" => {}
                    other => tracing::warn!("Unknown command: {}", other),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("stdin error: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    monitor.shutdown().await;

    // Save this session
    app_state.monitor = Some(monitor.snapshot().await?);
    store.save(&app_state);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pingmon::stats::TargetAggregator;
    use pingmon::{ProbeTarget, Sample};
    use chrono::Utc;

    #[test]
    fn test_failure_logger_reports_failures_only() {
        let target = ProbeTarget::new("Internet", "1.1.1.1", 1000, 1000);
        let mut agg = TargetAggregator::new(target.clone());
        agg.subscribe(Arc::new(FailureLogger));

        agg.add_sample(Sample::ok(&target, Utc::now(), 8.0));
        assert_eq!(FailureLogger::failure_line(&agg.display()), None);

        agg.add_sample(Sample::failed(&target, Utc::now(), "TimedOut"));
        assert_eq!(
            FailureLogger::failure_line(&agg.display()).as_deref(),
            Some("Internet (1.1.1.1): TimedOut")
        );
    }
}
