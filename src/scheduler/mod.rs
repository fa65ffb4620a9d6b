// ABOUTME: Scheduler module - task model, queue dispatch, workflows, and health checks.
// ABOUTME: This is the entry point callers submit work through.

mod dispatcher;
mod health;
mod task;
mod workflow;

pub use dispatcher::{Scheduler, SchedulerStats, WorkerStatusReport};
pub use health::{HealthMonitor, HealthReport};
pub use task::{Task, TaskStatus};
pub use workflow::{WorkflowEngine, WorkflowRun};
