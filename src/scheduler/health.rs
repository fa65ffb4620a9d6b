// ABOUTME: Health monitor - periodically flags workers whose heartbeat has gone stale.
// ABOUTME: Runs as a background loop owned by the scheduler.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::HealthConfig;
use crate::worker::{WorkerRegistry, WorkerStatus};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// Workers looked at.
    pub checked: usize,

    /// Workers flagged as stale, sorted by id.
    pub stale: Vec<String>,
}

/// Sweeps the worker registry for stale heartbeats.
#[derive(Clone)]
pub struct HealthMonitor {
    registry: WorkerRegistry,
    interval: Duration,
    stale_after: Duration,
}

impl HealthMonitor {
    pub fn new(registry: WorkerRegistry, config: HealthConfig) -> Self {
        Self {
            registry,
            interval: config.interval(),
            stale_after: config.stale_after(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Check every worker once.
    ///
    /// A stale worker is set to `warning` before its heartbeat is refreshed.
    /// Every heartbeat is refreshed here, so a worker only shows up stale if
    /// the gap between two sweeps exceeds `stale_after` or it was never swept.
    pub async fn check_once(&self) -> HealthReport {
        let mut workers = self.registry.all().await;
        workers.sort_by(|a, b| a.id().cmp(b.id()));

        let mut report = HealthReport {
            checked: workers.len(),
            stale: Vec::new(),
        };

        for worker in workers {
            let since = worker.state().since_heartbeat().await;
            if since > self.stale_after {
                warn!(
                    worker = %worker.id(),
                    since_heartbeat_secs = since.as_secs(),
                    "Worker has not sent a heartbeat"
                );
                worker.state().set_status(WorkerStatus::Warning).await;
                report.stale.push(worker.id().to_string());
            }
            worker.heartbeat().await;
        }

        debug!(checked = report.checked, stale = report.stale.len(), "Health check complete");
        report
    }

    /// Sweep every `interval` until `shutdown` flips to true or its sender drops.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.check_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
}
