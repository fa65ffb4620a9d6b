// ABOUTME: Coordinator module for managing the resources workers execute against.
// ABOUTME: Contains rate limiting, priority rotation, and the allocator tying them together.

mod allocator;
mod rate_limiter;
mod rotator;

pub use allocator::{AllocatorConfig, ResourceAllocator};
pub use rate_limiter::{Cancelled, RateLimiter};
pub use rotator::{ResourceRotator, ResourceStatus};

#[cfg(test)]
mod allocator_test;
