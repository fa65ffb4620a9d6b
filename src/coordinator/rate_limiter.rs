// ABOUTME: Per-resource request counting over rolling minute and hour windows.
// ABOUTME: Answers whether a resource is throttled and how long until it frees up.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Error returned when a rate limiter wait is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Request counters for every resource, protected by a single mutex.
///
/// The reset instants are shared: when the minute window elapses, every
/// resource's minute counter is cleared at once (same for the hour window).
struct RateWindow {
    minute_counts: HashMap<String, u32>,
    hour_counts: HashMap<String, u32>,
    last_reset_minute: Instant,
    last_reset_hour: Instant,
}

impl RateWindow {
    fn new(now: Instant) -> Self {
        Self {
            minute_counts: HashMap::new(),
            hour_counts: HashMap::new(),
            last_reset_minute: now,
            last_reset_hour: now,
        }
    }

    /// Clear any window whose length has fully elapsed.
    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.last_reset_minute) >= MINUTE {
            self.minute_counts.clear();
            self.last_reset_minute = now;
            info!("Reset minute counters");
        }
        if now.duration_since(self.last_reset_hour) >= HOUR {
            self.hour_counts.clear();
            self.last_reset_hour = now;
            info!("Reset hour counters");
        }
    }

    /// Count one request against the resource and return the new counts.
    fn record(&mut self, resource: &str) -> (u32, u32) {
        let minute = self.minute_counts.entry(resource.to_string()).or_insert(0);
        *minute += 1;
        let minute = *minute;
        let hour = self.hour_counts.entry(resource.to_string()).or_insert(0);
        *hour += 1;
        (minute, *hour)
    }

    fn counts(&self, resource: &str) -> (u32, u32) {
        (
            self.minute_counts.get(resource).copied().unwrap_or(0),
            self.hour_counts.get(resource).copied().unwrap_or(0),
        )
    }
}

/// Minute/hour request limiter keyed by resource name.
///
/// A resource is throttled once its minute count reaches `requests_per_minute`
/// or its hour count reaches `requests_per_hour`. Counters reset lazily on the
/// next query after a window has elapsed.
pub struct RateLimiter {
    state: Mutex<RateWindow>,
    requests_per_minute: u32,
    requests_per_hour: u32,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(50, 500)
    }
}

impl RateLimiter {
    /// Create a limiter with the given per-minute and per-hour caps.
    pub fn new(requests_per_minute: u32, requests_per_hour: u32) -> Self {
        Self {
            state: Mutex::new(RateWindow::new(Instant::now())),
            requests_per_minute,
            requests_per_hour,
        }
    }

    /// Per-minute cap.
    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    /// Per-hour cap.
    pub fn requests_per_hour(&self) -> u32 {
        self.requests_per_hour
    }

    /// Returns true if the resource has used up either window.
    pub async fn is_throttled(&self, resource: &str) -> bool {
        let mut state = self.state.lock().await;
        state.roll(Instant::now());
        self.exhausted(state.counts(resource))
    }

    /// Record one request against the resource.
    pub async fn increment(&self, resource: &str) {
        let mut state = self.state.lock().await;
        state.roll(Instant::now());
        let (minute, hour) = state.record(resource);
        debug!(resource = %resource, minute, hour, "Incremented request counters");
    }

    /// Count a request only if the resource is not throttled.
    ///
    /// The check and the increment happen under one lock, so concurrent
    /// callers can never push a resource past its caps.
    pub async fn try_acquire(&self, resource: &str) -> bool {
        let mut state = self.state.lock().await;
        state.roll(Instant::now());
        if self.exhausted(state.counts(resource)) {
            return false;
        }
        let (minute, hour) = state.record(resource);
        debug!(resource = %resource, minute, hour, "Acquired request slot");
        true
    }

    fn exhausted(&self, (minute, hour): (u32, u32)) -> bool {
        minute >= self.requests_per_minute || hour >= self.requests_per_hour
    }

    /// Current `(minute, hour)` counts for the resource.
    pub async fn usage(&self, resource: &str) -> (u32, u32) {
        let mut state = self.state.lock().await;
        state.roll(Instant::now());
        state.counts(resource)
    }

    /// Time until the window that throttles the resource resets.
    ///
    /// The minute window governs when both are exhausted. Returns
    /// `Duration::ZERO` if the resource is not throttled.
    pub async fn wait_time(&self, resource: &str) -> Duration {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.roll(now);
        let (minute, hour) = state.counts(resource);

        if minute >= self.requests_per_minute {
            return MINUTE.saturating_sub(now.duration_since(state.last_reset_minute));
        }
        if hour >= self.requests_per_hour {
            return HOUR.saturating_sub(now.duration_since(state.last_reset_hour));
        }
        Duration::ZERO
    }

    /// Sleep until the resource is no longer throttled.
    ///
    /// Returns `Err(Cancelled)` if the `cancel` future completes first.
    pub async fn wait_until_available<F>(&self, resource: &str, cancel: F) -> Result<(), Cancelled>
    where
        F: std::future::Future<Output = ()>,
    {
        tokio::pin!(cancel);

        loop {
            let wait = self.wait_time(resource).await;
            if wait.is_zero() {
                return Ok(());
            }

            // Floor the sleep so a window boundary racing the clock can't spin.
            let wait = wait.max(Duration::from_millis(10));
            warn!(
                resource = %resource,
                wait_secs = wait.as_secs_f64(),
                "Rate limit reached, waiting"
            );

            tokio::select! {
                biased;
                () = &mut cancel => {
                    return Err(Cancelled);
                }
                () = tokio::time::sleep(wait) => {}
            }
        }
    }
}
