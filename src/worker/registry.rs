// ABOUTME: Implements the WorkerRegistry - a thread-safe map of live workers - and the
// ABOUTME: WorkerFactory that builds workers from config by their kind tag.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::Worker;
use crate::config::WorkerConfig;
use crate::coordinator::ResourceAllocator;
use crate::error::ConfigError;

/// A thread-safe registry of workers.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: Arc<RwLock<HashMap<String, Arc<dyn Worker>>>>,
}

impl WorkerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker.
    pub async fn register<W: Worker + 'static>(&self, worker: W) {
        self.register_arc(Arc::new(worker)).await;
    }

    /// Register a worker from an Arc. Replaces any worker with the same id.
    pub async fn register_arc(&self, worker: Arc<dyn Worker>) {
        let mut workers = self.workers.write().await;
        workers.insert(worker.id().to_string(), worker);
    }

    /// Get a worker by id.
    pub async fn get(&self, id: &str) -> Option<Arc<dyn Worker>> {
        let workers = self.workers.read().await;
        workers.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.workers.read().await.contains_key(id)
    }

    /// List all worker ids, sorted alphabetically.
    pub async fn list(&self) -> Vec<String> {
        let workers = self.workers.read().await;
        let mut ids: Vec<_> = workers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Get all registered workers.
    pub async fn all(&self) -> Vec<Arc<dyn Worker>> {
        let workers = self.workers.read().await;
        workers.values().cloned().collect()
    }

    /// Get the number of registered workers.
    pub async fn count(&self) -> usize {
        let workers = self.workers.read().await;
        workers.len()
    }
}

impl Clone for WorkerRegistry {
    fn clone(&self) -> Self {
        Self {
            workers: Arc::clone(&self.workers),
        }
    }
}

/// Everything a worker constructor gets to work with.
#[derive(Clone)]
pub struct WorkerContext {
    /// Id the worker is registered under.
    pub id: String,
    pub config: WorkerConfig,
    pub allocator: Arc<ResourceAllocator>,
}

type Constructor = Arc<dyn Fn(WorkerContext) -> Result<Arc<dyn Worker>, ConfigError> + Send + Sync>;

/// Builds workers from config, keyed by the config's `type` tag.
#[derive(Default, Clone)]
pub struct WorkerFactory {
    constructors: HashMap<String, Constructor>,
}

impl WorkerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for a worker kind.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(WorkerContext) -> Result<Arc<dyn Worker>, ConfigError> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(constructor));
    }

    /// Builder form of `register`.
    pub fn with<F>(mut self, kind: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(WorkerContext) -> Result<Arc<dyn Worker>, ConfigError> + Send + Sync + 'static,
    {
        self.register(kind, constructor);
        self
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Known kinds, sorted alphabetically.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.constructors.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Build the worker `id` described by `config`.
    pub fn build(
        &self,
        id: &str,
        config: &WorkerConfig,
        allocator: Arc<ResourceAllocator>,
    ) -> Result<Arc<dyn Worker>, ConfigError> {
        let constructor =
            self.constructors
                .get(&config.kind)
                .ok_or_else(|| ConfigError::UnknownWorkerKind {
                    worker: id.to_string(),
                    kind: config.kind.clone(),
                })?;

        constructor(WorkerContext {
            id: id.to_string(),
            config: config.clone(),
            allocator,
        })
    }
}
