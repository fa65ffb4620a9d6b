// ABOUTME: ModelWorker - a worker that runs a model call through the resource allocator.
// ABOUTME: The call itself is pluggable so any backend client can sit behind it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{error, warn};

use super::{Worker, WorkerContext, WorkerState, WorkerStatus};
use crate::coordinator::ResourceAllocator;
use crate::error::{OperationError, WorkerError};
use crate::scheduler::Task;

/// A single request to a model backend.
///
/// Implementations report backend throttling as `OperationError::RateLimited`
/// (see `OperationError::from_status`) so the allocator can rotate away.
#[async_trait]
pub trait ModelCall: Send + Sync {
    async fn call(&self, resource: &str, task: &Task) -> Result<Value, OperationError>;
}

/// Worker that sends each task to whichever resource the allocator picks.
pub struct ModelWorker {
    id: String,
    capabilities: Vec<String>,
    required: Vec<String>,
    allocator: Arc<ResourceAllocator>,
    call: Arc<dyn ModelCall>,
    state: WorkerState,
}

impl ModelWorker {
    /// Build a worker from its construction context.
    pub fn new(ctx: WorkerContext, call: Arc<dyn ModelCall>) -> Self {
        Self {
            id: ctx.id,
            capabilities: ctx.config.capabilities,
            required: ctx.config.required_capabilities,
            allocator: ctx.allocator,
            call,
            state: WorkerState::new(),
        }
    }
}

#[async_trait]
impl Worker for ModelWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    fn required_capabilities(&self) -> &[String] {
        &self.required
    }

    fn state(&self) -> &WorkerState {
        &self.state
    }

    async fn execute(&self, task: &Task) -> Result<Map<String, Value>, WorkerError> {
        let (resource, value) = self
            .allocator
            .execute(
                |resource| {
                    let call = Arc::clone(&self.call);
                    async move {
                        let value = call.call(&resource, task).await?;
                        Ok::<_, OperationError>((resource, value))
                    }
                },
                &self.required,
            )
            .await?;

        let mut output = Map::new();
        output.insert("result".to_string(), value);
        output.insert("resource".to_string(), Value::String(resource));
        Ok(output)
    }

    async fn handle_error(&self, error: &WorkerError, task: &Task) {
        if error.is_rate_limited() {
            warn!(worker = %self.id, task_id = %task.id, "Rate limit reached for every resource");
        }
        error!(
            worker = %self.id,
            task_id = %task.id,
            error = %error,
            "Worker failed to process task"
        );
        self.state.set_status(WorkerStatus::Error).await;
    }
}
