// ABOUTME: Workflow engine - runs a task through an ordered chain of workers.
// ABOUTME: Each stage's result becomes the next stage's input.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::Task;
use crate::error::SchedulerError;
use crate::worker::{TaskResult, WorkerRegistry};

/// Outcome of running a workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRun {
    /// Result of the last stage that ran.
    pub result: TaskResult,

    /// Steps that named a worker not in the registry.
    pub skipped: Vec<String>,
}

/// Named, ordered worker chains.
#[derive(Clone)]
pub struct WorkflowEngine {
    workflows: BTreeMap<String, Vec<String>>,
    registry: WorkerRegistry,
}

impl WorkflowEngine {
    pub fn new(workflows: BTreeMap<String, Vec<String>>, registry: WorkerRegistry) -> Self {
        Self {
            workflows,
            registry,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    /// Workflow names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.workflows.keys().cloned().collect()
    }

    /// Worker ids of the named workflow.
    pub fn steps(&self, name: &str) -> Option<&[String]> {
        self.workflows.get(name).map(Vec::as_slice)
    }

    /// Steps across all workflows that name a worker not in the registry.
    pub async fn unknown_steps(&self) -> Vec<SchedulerError> {
        let mut missing = Vec::new();
        for (workflow, steps) in &self.workflows {
            for worker in steps {
                if !self.registry.contains(worker).await {
                    missing.push(SchedulerError::UnknownWorkflowStep {
                        workflow: workflow.clone(),
                        worker: worker.clone(),
                    });
                }
            }
        }
        missing
    }

    /// Run `task` through the named workflow.
    ///
    /// A failed stage does not stop the chain: the next stage sees the failed
    /// stage's payload plus its message under `"error"`.
    pub async fn run(&self, name: &str, task: Task) -> Result<WorkflowRun, SchedulerError> {
        let steps = self
            .steps(name)
            .ok_or_else(|| SchedulerError::UnknownWorkflow(name.to_string()))?;

        let mut input = task;
        let mut last = None;
        let mut skipped = Vec::new();

        for worker_id in steps {
            let Some(worker) = self.registry.get(worker_id).await else {
                let err = SchedulerError::UnknownWorkflowStep {
                    workflow: name.to_string(),
                    worker: worker_id.clone(),
                };
                warn!(task_id = %input.id, error = %err, "Skipping workflow step");
                skipped.push(worker_id.clone());
                continue;
            };

            debug!(task_id = %input.id, workflow = %name, worker = %worker_id, "Running workflow step");
            let result = worker.process(&input).await;
            input = input.next_stage(&result);
            last = Some(result);
        }

        let result = last.unwrap_or_else(|| TaskResult::passthrough(&input));
        Ok(WorkflowRun { result, skipped })
    }
}
