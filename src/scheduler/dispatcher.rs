// ABOUTME: Task scheduler - queues submitted tasks and routes them to workers or workflows.
// ABOUTME: Owns the background queue and health loops and exposes status queries.

use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{HealthMonitor, Task, TaskStatus, WorkflowEngine};
use crate::config::{EngineConfig, HealthConfig, SchedulerConfig};
use crate::coordinator::{ResourceAllocator, ResourceStatus};
use crate::error::{ConfigError, SchedulerError};
use crate::worker::{TaskResult, WorkerFactory, WorkerRegistry, WorkerStatus};

/// Snapshot of one worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatusReport {
    pub id: String,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub capabilities: Vec<String>,
}

/// Task counters since the scheduler was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// Tasks that could not be routed.
    pub dropped: u64,
    /// Tasks waiting in the queue right now.
    pub queued: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

struct Inner {
    queue: Mutex<VecDeque<Task>>,
    registry: WorkerRegistry,
    workflows: WorkflowEngine,
    allocator: Arc<ResourceAllocator>,
    health: HealthMonitor,
    poll_interval: Duration,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    seq: AtomicU64,
    counters: Counters,
}

/// Routes queued tasks to workers and workflows.
///
/// Tasks are held in memory only. Delivery is at-most-once: a task that
/// cannot be routed is logged and dropped.
pub struct Scheduler {
    inner: Arc<Inner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler from pre-built parts.
    pub fn new(
        registry: WorkerRegistry,
        allocator: Arc<ResourceAllocator>,
        workflows: BTreeMap<String, Vec<String>>,
        scheduler: SchedulerConfig,
        health: HealthConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                workflows: WorkflowEngine::new(workflows, registry.clone()),
                health: HealthMonitor::new(registry.clone(), health),
                registry,
                allocator,
                poll_interval: scheduler.poll_interval(),
                running: AtomicBool::new(false),
                shutdown,
                seq: AtomicU64::new(0),
                counters: Counters::default(),
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Build the allocator and every enabled worker from `config`.
    pub async fn from_config(
        config: &EngineConfig,
        factory: &WorkerFactory,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let allocator = Arc::new(ResourceAllocator::from_config(config));
        let registry = WorkerRegistry::new();

        for (id, worker_config) in &config.workers {
            if !worker_config.enabled {
                info!(worker = %id, "Worker disabled, skipping");
                continue;
            }
            let worker = factory.build(id, worker_config, Arc::clone(&allocator))?;
            registry.register_arc(worker).await;
            debug!(worker = %id, kind = %worker_config.kind, "Worker registered");
        }

        let scheduler = Self::new(
            registry,
            allocator,
            config.workflows.clone(),
            config.scheduler,
            config.health,
        );

        for err in scheduler.inner.workflows.unknown_steps().await {
            warn!(error = %err, "Workflow references a worker that is not registered");
        }

        info!(
            workers = scheduler.inner.registry.count().await,
            workflows = ?scheduler.inner.workflows.names(),
            "Scheduler configured"
        );
        Ok(scheduler)
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.inner.registry
    }

    pub fn allocator(&self) -> &Arc<ResourceAllocator> {
        &self.inner.allocator
    }

    pub fn workflows(&self) -> &WorkflowEngine {
        &self.inner.workflows
    }

    pub fn health_monitor(&self) -> &HealthMonitor {
        &self.inner.health
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Queue a task and return its freshly assigned id.
    pub async fn submit(&self, mut task: Task) -> String {
        let now = Utc::now();
        let seq = self.inner.seq.fetch_add(1, Ordering::SeqCst) + 1;
        task.id = format!("task_{}_{}", now.format("%Y%m%d_%H%M%S"), seq);
        task.submitted_at = Some(now);
        task.status = TaskStatus::Queued;

        let id = task.id.clone();
        self.inner.queue.lock().await.push_back(task);
        self.inner.counters.submitted.fetch_add(1, Ordering::SeqCst);
        info!(task_id = %id, "Task submitted");
        id
    }

    /// Take one task off the queue and route it. `None` when the queue is empty.
    pub async fn process_next(&self) -> Option<Result<TaskResult, SchedulerError>> {
        self.inner.process_next().await
    }

    /// Start the queue and health loops. No-op if already running.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.send_replace(false);

        let queue_loop = {
            let inner = Arc::clone(&self.inner);
            let shutdown = self.inner.shutdown.subscribe();
            tokio::spawn(async move { inner.run_queue(shutdown).await })
        };
        let health_loop = {
            let health = self.inner.health.clone();
            let shutdown = self.inner.shutdown.subscribe();
            tokio::spawn(async move { health.run(shutdown).await })
        };

        self.handles.lock().await.extend([queue_loop, health_loop]);
        info!("Scheduler started");
    }

    /// Stop both loops and wait for them. A task being processed finishes first.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.send_replace(true);

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for joined in futures::future::join_all(handles).await {
            if let Err(err) = joined {
                error!(error = %err, "Scheduler loop terminated abnormally");
            }
        }
        info!("Scheduler stopped");
    }

    pub async fn get_worker_status(&self, id: &str) -> Option<WorkerStatusReport> {
        let worker = self.inner.registry.get(id).await?;
        Some(WorkerStatusReport {
            id: worker.id().to_string(),
            status: worker.state().status().await,
            last_heartbeat: worker.state().last_heartbeat().await,
            capabilities: worker.capabilities().to_vec(),
        })
    }

    pub async fn get_all_worker_status(&self) -> BTreeMap<String, WorkerStatusReport> {
        let mut all = BTreeMap::new();
        for id in self.inner.registry.list().await {
            if let Some(report) = self.get_worker_status(&id).await {
                all.insert(id, report);
            }
        }
        all
    }

    pub async fn get_resource_status(&self) -> BTreeMap<String, ResourceStatus> {
        self.inner.allocator.resource_status().await
    }

    pub async fn stats(&self) -> SchedulerStats {
        let counters = &self.inner.counters;
        SchedulerStats {
            submitted: counters.submitted.load(Ordering::SeqCst),
            completed: counters.completed.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            dropped: counters.dropped.load(Ordering::SeqCst),
            queued: self.inner.queue.lock().await.len(),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Loops hold their own Arc<Inner>; tell them to exit.
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.shutdown.send_replace(true);
    }
}

impl Inner {
    async fn run_queue(&self, mut shutdown: watch::Receiver<bool>) {
        while self.running.load(Ordering::SeqCst) {
            if self.process_next().await.is_some() {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn process_next(&self) -> Option<Result<TaskResult, SchedulerError>> {
        let task = self.queue.lock().await.pop_front()?;
        let task_id = task.id.clone();

        let outcome = match AssertUnwindSafe(self.route(task)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => Err(SchedulerError::Panicked {
                task_id: task_id.clone(),
                message: panic_message(payload.as_ref()),
            }),
        };
        match &outcome {
            Ok(result) if result.is_failed() => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                error!(
                    task_id = %task_id,
                    worker = ?result.worker_id,
                    error = ?result.error,
                    "Task failed"
                );
            }
            Ok(result) => {
                self.counters.completed.fetch_add(1, Ordering::SeqCst);
                info!(task_id = %task_id, worker = ?result.worker_id, "Task completed");
            }
            Err(err) => {
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                error!(task_id = %task_id, error = %err, "Error processing task, dropping it");
            }
        }
        Some(outcome)
    }

    async fn route(&self, mut task: Task) -> Result<TaskResult, SchedulerError> {
        task.status = TaskStatus::Running;

        if let Some(workflow) = task.workflow.clone() {
            if self.workflows.contains(&workflow) {
                let run = self.workflows.run(&workflow, task).await?;
                return Ok(run.result);
            }
            if task.worker.is_none() {
                return Err(SchedulerError::UnknownWorkflow(workflow));
            }
            warn!(
                task_id = %task.id,
                workflow = %workflow,
                "Unknown workflow, falling back to target worker"
            );
        }

        let Some(worker_id) = task.worker.clone() else {
            return Err(SchedulerError::NoTarget(task.id));
        };
        let worker = self
            .registry
            .get(&worker_id)
            .await
            .ok_or(SchedulerError::UnknownWorker(worker_id))?;

        Ok(worker.process(&task).await)
    }
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
