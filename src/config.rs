// ABOUTME: In-memory configuration structs for workers, workflows, and resources.
// ABOUTME: Serde-deserializable so callers can load them from any source, then validate.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_true() -> bool {
    true
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker id -> worker definition.
    pub workers: BTreeMap<String, WorkerConfig>,

    /// Workflow name -> ordered worker ids.
    pub workflows: BTreeMap<String, Vec<String>>,

    /// Resource name -> resource definition.
    pub resources: BTreeMap<String, ResourceConfig>,

    pub rate_limits: RateLimitConfig,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
    pub health: HealthConfig,
}

impl EngineConfig {
    /// Check the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limits.requests_per_minute == 0 || self.rate_limits.requests_per_hour == 0 {
            return Err(ConfigError::Invalid(
                "rate limits must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduler poll interval must be greater than zero".to_string(),
            ));
        }
        if self.health.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "health check interval must be greater than zero".to_string(),
            ));
        }
        if let Some(name) = self.resources.keys().find(|name| name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "resource name must not be empty (got {:?})",
                name
            )));
        }
        if let Some((id, _)) = self
            .workers
            .iter()
            .find(|(_, worker)| worker.kind.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "worker '{}' is missing a type",
                id
            )));
        }
        Ok(())
    }
}

/// Definition of a single worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Kind tag looked up in the `WorkerFactory`.
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Tags this worker offers.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Tags a resource must offer for this worker to use it.
    #[serde(default)]
    pub required_capabilities: Vec<String>,

    /// Kind-specific fields, passed through to the constructor.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WorkerConfig {
    /// Create an enabled worker config of the given kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            enabled: true,
            capabilities: Vec::new(),
            required_capabilities: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Set the capabilities this worker offers.
    pub fn capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the capabilities this worker needs from a resource.
    pub fn required_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.required_capabilities = capabilities;
        self
    }

    /// Enable or disable the worker.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Definition of a single resource (e.g. one model backend).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Lower is preferred.
    pub priority: i64,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ResourceConfig {
    /// Create an enabled resource with no capabilities.
    pub fn new(priority: i64) -> Self {
        Self {
            priority,
            enabled: true,
            capabilities: Vec::new(),
        }
    }

    /// Set the capabilities this resource offers.
    pub fn capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Enable or disable the resource.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 50,
            requests_per_hour: 500,
        }
    }
}

/// Retry policy for the resource allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Transient failures allowed per `execute` call.
    pub max_retries: u32,

    /// Pause between attempts, in milliseconds.
    pub retry_delay_ms: u64,

    /// Re-enable a rate-limited resource after this many seconds. Off when unset.
    pub reactivate_after_secs: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 5_000,
            reactivate_after_secs: None,
        }
    }
}

impl RetryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn reactivate_after(&self) -> Option<Duration> {
        self.reactivate_after_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Sleep between queue polls when the queue is empty.
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Time between health sweeps.
    pub interval_secs: u64,

    /// A worker whose last heartbeat is older than this is flagged.
    pub stale_after_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            stale_after_secs: 300,
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}
