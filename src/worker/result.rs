// ABOUTME: Defines the TaskResult type - the outcome of a worker processing a task,
// ABOUTME: with output payload, status, and the error message when it failed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::scheduler::{Task, TaskStatus};

/// Result of a worker processing a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,

    /// The worker that produced this result, if any ran.
    pub worker_id: Option<String>,

    /// `Completed` or `Failed`.
    pub status: TaskStatus,

    /// The output payload.
    pub payload: Map<String, Value>,

    /// Set iff the task failed.
    pub error: Option<String>,
}

impl TaskResult {
    /// Create a successful result.
    pub fn completed(
        task_id: impl Into<String>,
        worker_id: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            worker_id: Some(worker_id.into()),
            status: TaskStatus::Completed,
            payload,
            error: None,
        }
    }

    /// Create a failed result.
    pub fn failed(
        task_id: impl Into<String>,
        worker_id: impl Into<String>,
        payload: Map<String, Value>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            worker_id: Some(worker_id.into()),
            status: TaskStatus::Failed,
            payload,
            error: Some(error.into()),
        }
    }

    /// A completed result that hands the task's payload through untouched.
    pub fn passthrough(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            worker_id: None,
            status: TaskStatus::Completed,
            payload: task.payload.clone(),
            error: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }

    /// Add an entry to the output payload.
    pub fn with_output(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.payload.insert(key.into(), v);
        }
        self
    }
}
