// ABOUTME: Task data model - the unit of work routed to workers and workflows.
// ABOUTME: Tasks live in memory only and are dropped once their outcome is logged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::worker::TaskResult;

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Returns true once the task has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A unit of work.
///
/// `id` and `submitted_at` are assigned by the scheduler on submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,

    /// Opaque input for the worker.
    pub payload: Map<String, Value>,

    /// Worker to run when no workflow applies.
    pub worker: Option<String>,

    /// Workflow to run the task through.
    pub workflow: Option<String>,

    pub submitted_at: Option<DateTime<Utc>>,

    pub status: TaskStatus,
}

impl Task {
    /// Create an unsubmitted task with the given payload.
    pub fn new(payload: Map<String, Value>) -> Self {
        Self {
            id: String::new(),
            payload,
            worker: None,
            workflow: None,
            submitted_at: None,
            status: TaskStatus::Queued,
        }
    }

    /// Create a task from a JSON value. Non-object values are stored under `"input"`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::new(map),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                Self::new(map)
            }
        }
    }

    /// Route the task to a single worker.
    pub fn for_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    /// Route the task through a workflow.
    pub fn in_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = Some(workflow.into());
        self
    }

    /// Build the input for the next workflow stage from this stage's result.
    ///
    /// Routing fields are kept; the payload becomes the result's payload. A
    /// failed stage's error message is carried along under `"error"`.
    pub fn next_stage(&self, result: &TaskResult) -> Task {
        let mut payload = result.payload.clone();
        if let Some(error) = &result.error {
            payload.insert("error".to_string(), Value::String(error.clone()));
        }
        Task {
            id: self.id.clone(),
            payload,
            worker: self.worker.clone(),
            workflow: self.workflow.clone(),
            submitted_at: self.submitted_at,
            status: TaskStatus::Running,
        }
    }
}
