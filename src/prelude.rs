// ABOUTME: Prelude module - convenient imports for common use cases.
// ABOUTME: Use `use switchyard::prelude::*;` to get started quickly.

pub use crate::config::{
    EngineConfig, HealthConfig, RateLimitConfig, ResourceConfig, RetryConfig, SchedulerConfig,
    WorkerConfig,
};
pub use crate::coordinator::{
    AllocatorConfig, Cancelled, RateLimiter, ResourceAllocator, ResourceRotator, ResourceStatus,
};
pub use crate::error::{
    AllocationError, ConfigError, OperationError, SchedulerError, SwitchyardError, WorkerError,
};
pub use crate::scheduler::{
    HealthMonitor, HealthReport, Scheduler, SchedulerStats, Task, TaskStatus, WorkerStatusReport,
    WorkflowEngine, WorkflowRun,
};
pub use crate::worker::{
    ModelCall, ModelWorker, TaskResult, Worker, WorkerContext, WorkerFactory, WorkerRegistry,
    WorkerState, WorkerStatus,
};
