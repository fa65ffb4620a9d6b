// ABOUTME: Defines the Worker trait - the contract every task executor implements.
// ABOUTME: Workers run tasks, report failures as results, and keep a liveness heartbeat.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, error};

use super::TaskResult;
use crate::error::WorkerError;
use crate::scheduler::Task;

/// Health of a worker as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Initialized,
    Running,
    Warning,
    Error,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Initialized => write!(f, "initialized"),
            WorkerStatus::Running => write!(f, "running"),
            WorkerStatus::Warning => write!(f, "warning"),
            WorkerStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug)]
struct StateInner {
    status: WorkerStatus,
    last_heartbeat: DateTime<Utc>,
}

/// Mutable status and heartbeat shared by the worker, the scheduler, and the
/// health monitor.
#[derive(Debug)]
pub struct WorkerState {
    inner: RwLock<StateInner>,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerState {
    /// Fresh state: `initialized`, heartbeat now.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StateInner {
                status: WorkerStatus::Initialized,
                last_heartbeat: Utc::now(),
            }),
        }
    }

    pub async fn status(&self) -> WorkerStatus {
        self.inner.read().await.status
    }

    pub async fn set_status(&self, status: WorkerStatus) {
        self.inner.write().await.status = status;
    }

    pub async fn last_heartbeat(&self) -> DateTime<Utc> {
        self.inner.read().await.last_heartbeat
    }

    /// Refresh the heartbeat to now.
    pub async fn heartbeat(&self) {
        self.record_heartbeat_at(Utc::now()).await;
    }

    /// Set the heartbeat to an explicit timestamp.
    pub async fn record_heartbeat_at(&self, at: DateTime<Utc>) {
        self.inner.write().await.last_heartbeat = at;
    }

    /// Time elapsed since the last heartbeat. Zero if the heartbeat is in the future.
    pub async fn since_heartbeat(&self) -> Duration {
        let last = self.last_heartbeat().await;
        (Utc::now() - last).to_std().unwrap_or(Duration::ZERO)
    }
}

/// A pluggable executor of tasks.
///
/// Implementors provide `execute`; the scheduler only ever calls `process`,
/// which turns every outcome into a `TaskResult`.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Returns the unique id of this worker.
    fn id(&self) -> &str;

    /// Capability tags this worker offers.
    fn capabilities(&self) -> &[String];

    /// Capability tags a resource must offer for this worker to use it.
    fn required_capabilities(&self) -> &[String] {
        &[]
    }

    fn state(&self) -> &WorkerState;

    /// Do the work for `task` and return the output payload.
    async fn execute(&self, task: &Task) -> Result<Map<String, Value>, WorkerError>;

    /// Run `task` and report the outcome. Never fails.
    async fn process(&self, task: &Task) -> TaskResult {
        self.state().set_status(WorkerStatus::Running).await;

        match self.execute(task).await {
            Ok(payload) => {
                self.heartbeat().await;
                TaskResult::completed(&task.id, self.id(), payload)
            }
            Err(err) => {
                self.handle_error(&err, task).await;
                TaskResult::failed(&task.id, self.id(), task.payload.clone(), err.to_string())
            }
        }
    }

    /// Called when `execute` fails.
    async fn handle_error(&self, error: &WorkerError, task: &Task) {
        error!(
            worker = %self.id(),
            task_id = %task.id,
            error = %error,
            "Worker failed to process task"
        );
        self.state().set_status(WorkerStatus::Error).await;
    }

    /// Refresh this worker's liveness timestamp.
    async fn heartbeat(&self) {
        debug!(worker = %self.id(), "Heartbeat");
        self.state().heartbeat().await;
    }
}
