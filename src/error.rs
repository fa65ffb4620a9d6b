// ABOUTME: Defines all error types for switchyard using thiserror.
// ABOUTME: Each subsystem has its own error enum, unified under SwitchyardError.

/// Top-level error type for the switchyard library.
#[derive(Debug, thiserror::Error)]
pub enum SwitchyardError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Errors raised while validating configuration or building workers from it.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Worker '{worker}' has unknown type '{kind}'")]
    UnknownWorkerKind { worker: String, kind: String },

    #[error("Failed to build worker '{worker}': {message}")]
    Worker { worker: String, message: String },
}

/// Failure reported by an operation run against a resource.
///
/// The variant decides the retry policy: `RateLimited` disables the resource
/// and does not count against the retry budget, `Transient` does.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Operation failed: {0}")]
    Transient(#[source] anyhow::Error),
}

impl OperationError {
    /// Create a rate-limit signal.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited(message.into())
    }

    /// Create a transient failure from a message.
    pub fn transient(message: impl std::fmt::Display) -> Self {
        Self::Transient(anyhow::anyhow!("{}", message))
    }

    /// Classify an HTTP status from a backend call.
    ///
    /// 429 and 529 (overloaded) map to `RateLimited`, everything else is transient.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 | 529 => Self::RateLimited(message),
            _ => Self::Transient(anyhow::anyhow!("HTTP {}: {}", status, message)),
        }
    }

    /// Returns true for the rate-limit variant.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

impl From<anyhow::Error> for OperationError {
    fn from(err: anyhow::Error) -> Self {
        Self::Transient(err)
    }
}

/// Errors from the resource allocator.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("No resource available for capabilities {required:?}")]
    NoResourceAvailable {
        required: Vec<String>,
        /// Failure of the last attempt made before the pool ran dry, if any.
        #[source]
        last: Option<OperationError>,
    },

    #[error("Failed after {attempts} attempts. Last error: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: OperationError,
    },
}

/// Errors from task routing.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("Worker '{worker}' not found in workflow '{workflow}'")]
    UnknownWorkflowStep { workflow: String, worker: String },

    #[error("Task {0} names neither a known workflow nor a worker")]
    NoTarget(String),

    #[error("Task {task_id} panicked: {message}")]
    Panicked { task_id: String, message: String },
}

/// Errors raised inside a worker. Never escape `Worker::process`.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Execution failed: {0}")]
    Execution(#[source] anyhow::Error),
}

impl WorkerError {
    /// Returns true if the allocator gave up after a rate-limit failure.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            WorkerError::Allocation(AllocationError::RetriesExhausted { last, .. }) => {
                last.is_rate_limited()
            }
            WorkerError::Allocation(AllocationError::NoResourceAvailable {
                last: Some(last),
                ..
            }) => last.is_rate_limited(),
            _ => false,
        }
    }
}
