// ABOUTME: Priority-ordered resource rotation with enable/disable and preemption.
// ABOUTME: Tracks the current resource and re-admits resources after a cool-down.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ResourceConfig;

/// A single resource as tracked by the rotator.
#[derive(Debug, Clone)]
struct ResourceEntry {
    priority: i64,
    enabled: bool,
    capabilities: Vec<String>,
}

/// Snapshot of one resource for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceStatus {
    pub enabled: bool,
    pub priority: i64,
    pub capabilities: Vec<String>,
    pub is_current: bool,
}

struct RotatorState {
    resources: BTreeMap<String, ResourceEntry>,
    current: Option<String>,
}

impl RotatorState {
    /// Lowest-priority-number enabled resource, ties broken by name.
    fn best_enabled(&self) -> Option<String> {
        self.resources
            .iter()
            .filter(|(_, entry)| entry.enabled)
            .min_by(|(a_name, a), (b_name, b)| {
                a.priority.cmp(&b.priority).then_with(|| a_name.cmp(b_name))
            })
            .map(|(name, _)| name.clone())
    }

    fn priority_of(&self, name: &str) -> Option<i64> {
        self.resources.get(name).map(|entry| entry.priority)
    }

    fn advance(&mut self) -> Option<String> {
        let current = self.current.clone()?;
        let current_priority = self.priority_of(&current)?;

        let next = self
            .resources
            .iter()
            .filter(|(_, entry)| entry.enabled && entry.priority > current_priority)
            .min_by(|(a_name, a), (b_name, b)| {
                a.priority.cmp(&b.priority).then_with(|| a_name.cmp(b_name))
            })
            .map(|(name, _)| name.clone());

        match next {
            Some(name) => {
                info!(from = %current, to = %name, "Rotated resource");
                self.current = Some(name.clone());
                Some(name)
            }
            None => {
                let others_enabled = self
                    .resources
                    .iter()
                    .any(|(name, entry)| entry.enabled && *name != current);
                if others_enabled {
                    self.current = None;
                    warn!(from = %current, "Rotation exhausted all resources");
                } else {
                    warn!(current = %current, "No more resources available for rotation");
                }
                None
            }
        }
    }
}

/// Holds the prioritized set of resources and picks the current one.
///
/// Lower priority numbers are preferred. Cloning shares state, so a clone can
/// be moved into a background reactivation task.
pub struct ResourceRotator {
    state: Arc<Mutex<RotatorState>>,
}

impl ResourceRotator {
    /// Create a rotator from resource configs. The best enabled resource starts as current.
    pub fn new(resources: &BTreeMap<String, ResourceConfig>) -> Self {
        let resources: BTreeMap<String, ResourceEntry> = resources
            .iter()
            .map(|(name, config)| {
                (
                    name.clone(),
                    ResourceEntry {
                        priority: config.priority,
                        enabled: config.enabled,
                        capabilities: config.capabilities.clone(),
                    },
                )
            })
            .collect();

        let mut state = RotatorState {
            resources,
            current: None,
        };
        state.current = state.best_enabled();

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// The resource currently in use, if any.
    pub async fn current(&self) -> Option<String> {
        self.state.lock().await.current.clone()
    }

    /// Returns true if the resource offers every required capability.
    pub async fn supports(&self, resource: &str, required: &[String]) -> bool {
        let state = self.state.lock().await;
        match state.resources.get(resource) {
            Some(entry) => required.iter().all(|cap| entry.capabilities.contains(cap)),
            None => false,
        }
    }

    /// Advance to the next enabled resource with a higher priority number.
    ///
    /// Returns the new current resource. When nothing follows the current one,
    /// returns `None`; the current pointer is cleared if other enabled
    /// resources exist (they all rank ahead and were already passed over) and
    /// left alone otherwise.
    pub async fn rotate(&self) -> Option<String> {
        self.state.lock().await.advance()
    }

    /// Rotate away from `resource`, but only if it is still current.
    ///
    /// If another caller already moved the pointer, nothing changes and the
    /// present current resource is returned. Concurrent callers that saw the
    /// same resource therefore rotate once, not once each.
    pub async fn rotate_from(&self, resource: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        if state.current.as_deref() != Some(resource) {
            return state.current.clone();
        }
        state.advance()
    }

    /// Disable a resource. If it was current, fall back to the best enabled one.
    ///
    /// Returns false if the resource is unknown.
    pub async fn disable(&self, resource: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.resources.get_mut(resource) else {
            warn!(resource = %resource, "Cannot disable unknown resource");
            return false;
        };
        entry.enabled = false;
        warn!(resource = %resource, "Disabled resource");

        if state.current.as_deref() == Some(resource) {
            state.current = state.best_enabled();
            match &state.current {
                Some(next) => info!(resource = %next, "Switched to resource"),
                None => warn!("No enabled resources remain"),
            }
        }
        true
    }

    /// Re-enable a resource, preempting the current one if it ranks higher.
    ///
    /// Returns false if the resource is unknown.
    pub async fn enable(&self, resource: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.resources.get_mut(resource) else {
            warn!(resource = %resource, "Cannot enable unknown resource");
            return false;
        };
        entry.enabled = true;
        let priority = entry.priority;
        info!(resource = %resource, "Enabled resource");

        match state.current.clone() {
            Some(current) => {
                let preempts = state
                    .priority_of(&current)
                    .is_some_and(|current_priority| priority < current_priority);
                if preempts {
                    state.current = Some(resource.to_string());
                    info!(
                        from = %current,
                        to = %resource,
                        "Switched to higher priority resource"
                    );
                }
            }
            None => {
                state.current = state.best_enabled();
            }
        }
        true
    }

    /// Point `current` back at the best enabled resource.
    pub async fn reset(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        state.current = state.best_enabled();
        state.current.clone()
    }

    /// Re-enable `resource` after `delay` on a background task.
    ///
    /// Must be called from within a tokio runtime. The handle may be dropped.
    pub fn schedule_reactivation(&self, resource: &str, delay: Duration) -> JoinHandle<()> {
        info!(
            resource = %resource,
            delay_secs = delay.as_secs(),
            "Scheduling resource reactivation"
        );
        let rotator = self.clone();
        let resource = resource.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if rotator.enable(&resource).await {
                info!(resource = %resource, "Reactivated resource");
            }
        })
    }

    /// Status of every resource, keyed by name.
    pub async fn status(&self) -> BTreeMap<String, ResourceStatus> {
        let state = self.state.lock().await;
        state
            .resources
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    ResourceStatus {
                        enabled: entry.enabled,
                        priority: entry.priority,
                        capabilities: entry.capabilities.clone(),
                        is_current: state.current.as_deref() == Some(name.as_str()),
                    },
                )
            })
            .collect()
    }
}

impl Clone for ResourceRotator {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}
