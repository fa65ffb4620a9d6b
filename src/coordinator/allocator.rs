// ABOUTME: Resource allocator - hands a capable, non-throttled resource to an operation.
// ABOUTME: Owns the rate limiter and rotator and applies the retry/backoff policy.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::rate_limiter::RateLimiter;
use super::rotator::{ResourceRotator, ResourceStatus};
use crate::config::{EngineConfig, RateLimitConfig, ResourceConfig, RetryConfig};
use crate::error::{AllocationError, OperationError};

/// Retry policy for `ResourceAllocator::execute`.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Transient failures tolerated before giving up.
    pub max_retries: u32,

    /// Pause after a failed attempt.
    pub retry_delay: Duration,

    /// If set, a resource disabled for rate limiting is re-enabled after this delay.
    pub reactivate_after: Option<Duration>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::from(RetryConfig::default())
    }
}

impl From<RetryConfig> for AllocatorConfig {
    fn from(retry: RetryConfig) -> Self {
        Self {
            max_retries: retry.max_retries,
            retry_delay: retry.retry_delay(),
            reactivate_after: retry.reactivate_after(),
        }
    }
}

impl AllocatorConfig {
    /// Set the transient failure budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the pause between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Re-enable rate-limited resources after `delay`.
    pub fn with_reactivation(mut self, delay: Duration) -> Self {
        self.reactivate_after = Some(delay);
        self
    }
}

/// Picks resources for operations and decides what to do when they fail.
///
/// Rate-limit failures disable the resource and never count against the
/// retry budget; any other failure does.
pub struct ResourceAllocator {
    limiter: RateLimiter,
    rotator: ResourceRotator,
    config: AllocatorConfig,
}

impl ResourceAllocator {
    /// Create an allocator over the given resources.
    pub fn new(
        resources: &BTreeMap<String, ResourceConfig>,
        limits: RateLimitConfig,
        config: AllocatorConfig,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(limits.requests_per_minute, limits.requests_per_hour),
            rotator: ResourceRotator::new(resources),
            config,
        }
    }

    /// Create an allocator from the resource, rate-limit, and retry sections.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            &config.resources,
            config.rate_limits,
            AllocatorConfig::from(config.retry),
        )
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn rotator(&self) -> &ResourceRotator {
        &self.rotator
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Status of every resource.
    pub async fn resource_status(&self) -> BTreeMap<String, ResourceStatus> {
        self.rotator.status().await
    }

    /// Run `operation` against a resource offering `required` capabilities.
    ///
    /// The operation receives the resource name. It is retried on another (or
    /// the same) resource according to the failure it reports.
    pub async fn execute<T, F, Fut>(
        &self,
        mut operation: F,
        required: &[String],
    ) -> Result<T, AllocationError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        // A previous call may have rotated past the last resource.
        if self.rotator.current().await.is_none() {
            self.rotator.reset().await;
        }

        let config = self.config();
        let mut failures = 0u32;
        let mut last_error = None;
        loop {
            let Some(resource) = self.select(required).await else {
                return Err(AllocationError::NoResourceAvailable {
                    required: required.to_vec(),
                    last: last_error,
                });
            };

            debug!(resource = %resource, "Executing operation");

            match operation(resource.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limited() => {
                    warn!(resource = %resource, error = %err, "Rate limit hit for resource");
                    self.rotator.disable(&resource).await;
                    if let Some(delay) = config.reactivate_after {
                        self.rotator.schedule_reactivation(&resource, delay);
                    }
                    last_error = Some(err);
                    tokio::time::sleep(config.retry_delay).await;
                }
                Err(err) => {
                    failures += 1;
                    error!(
                        resource = %resource,
                        attempt = failures,
                        error = %err,
                        "Error executing operation"
                    );
                    if failures >= config.max_retries {
                        return Err(AllocationError::RetriesExhausted {
                            attempts: failures,
                            last: err,
                        });
                    }
                    last_error = Some(err);
                    tokio::time::sleep(config.retry_delay).await;
                }
            }
        }
    }

    /// Find a resource that covers `required` and claim one request on it.
    ///
    /// The returned resource has already been counted by the rate limiter.
    async fn select(&self, required: &[String]) -> Option<String> {
        loop {
            let Some(resource) = self.rotator.current().await else {
                error!(required = ?required, "No resources available");
                return None;
            };

            if !self.rotator.supports(&resource, required).await {
                warn!(
                    resource = %resource,
                    required = ?required,
                    "Resource lacks required capabilities"
                );
                self.rotator.rotate_from(&resource).await?;
                continue;
            }

            if !self.limiter.try_acquire(&resource).await {
                info!(resource = %resource, "Resource is rate limited, rotating to next resource");
                self.rotator.rotate_from(&resource).await?;
                continue;
            }

            return Some(resource);
        }
    }
}
