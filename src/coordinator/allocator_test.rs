// ABOUTME: Tests for the resource allocator - selection, throttling, retry policy.
// ABOUTME: Backoff sleeps run on a paused tokio clock so tests stay fast.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use super::allocator::{AllocatorConfig, ResourceAllocator};
use crate::config::{RateLimitConfig, ResourceConfig};
use crate::error::{AllocationError, OperationError};

fn resources(entries: &[(&str, i64, &[&str])]) -> BTreeMap<String, ResourceConfig> {
    entries
        .iter()
        .map(|(name, priority, caps)| {
            (
                name.to_string(),
                ResourceConfig::new(*priority).capabilities(caps.iter().map(|c| c.to_string()).collect()),
            )
        })
        .collect()
}

fn limits(per_minute: u32) -> RateLimitConfig {
    RateLimitConfig {
        requests_per_minute: per_minute,
        requests_per_hour: 1000,
    }
}

/// Operation that records which resource it ran on and echoes it back.
fn recording(used: Arc<Mutex<Vec<String>>>) -> impl FnMut(String) -> std::future::Ready<Result<String, OperationError>> {
    move |resource| {
        used.lock().unwrap().push(resource.clone());
        std::future::ready(Ok(resource))
    }
}

#[tokio::test(start_paused = true)]
async fn test_throttled_resource_rotates_to_next() {
    let allocator = ResourceAllocator::new(
        &resources(&[("A", 1, &[]), ("B", 2, &[])]),
        limits(2),
        AllocatorConfig::default(),
    );
    let used = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..3 {
        assert_ok!(allocator.execute(recording(used.clone()), &[]).await);
    }

    assert_eq!(*used.lock().unwrap(), vec!["A", "A", "B"]);
    assert_eq!(allocator.rotator().current().await.as_deref(), Some("B"));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_exhaust_retry_budget() {
    let allocator = ResourceAllocator::new(
        &resources(&[("A", 1, &[])]),
        limits(50),
        AllocatorConfig::default().with_max_retries(3),
    );
    let calls = Arc::new(AtomicU32::new(0));

    let result: Result<(), AllocationError> = allocator
        .execute(
            |_resource| {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(OperationError::transient(format!("boom #{}", n)))
                }
            },
            &[],
        )
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match result.unwrap_err() {
        AllocationError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(!last.is_rate_limited());
            assert!(last.to_string().contains("boom #3"));
        }
        other => panic!("Expected RetriesExhausted, got {:?}", other),
    }
    // Transient failures leave the resource enabled
    assert!(allocator.resource_status().await["A"].enabled);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_waits_retry_delay() {
    let allocator = ResourceAllocator::new(
        &resources(&[("A", 1, &[])]),
        limits(50),
        AllocatorConfig::default()
            .with_max_retries(2)
            .with_retry_delay(Duration::from_secs(5)),
    );

    let start = tokio::time::Instant::now();
    let result: Result<(), _> = allocator
        .execute(
            |_| async { Err(OperationError::transient("nope")) },
            &[],
        )
        .await;

    assert_err!(result);
    // One pause between the two attempts, none after the last
    assert_eq!(start.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_transient_failure() {
    let allocator = ResourceAllocator::new(
        &resources(&[("A", 1, &[])]),
        limits(50),
        AllocatorConfig::default(),
    );
    let calls = Arc::new(AtomicU32::new(0));

    let result = allocator
        .execute(
            |resource| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(OperationError::transient("flaky"))
                    } else {
                        Ok(format!("done on {}", resource))
                    }
                }
            },
            &[],
        )
        .await;

    assert_eq!(result.unwrap(), "done on A");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(allocator.rate_limiter().usage("A").await, (2, 2));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_rotates_through_all_resources() {
    let allocator = ResourceAllocator::new(
        &resources(&[("A", 1, &[]), ("B", 2, &[]), ("C", 3, &[])]),
        limits(50),
        AllocatorConfig::default().with_max_retries(1),
    );
    let used = Arc::new(Mutex::new(Vec::new()));

    let result: Result<(), AllocationError> = allocator
        .execute(
            |resource| {
                used.lock().unwrap().push(resource);
                async { Err(OperationError::rate_limited("429 Too Many Requests")) }
            },
            &[],
        )
        .await;

    // Rate limits never consume the retry budget of 1
    assert_eq!(*used.lock().unwrap(), vec!["A", "B", "C"]);
    match result {
        Err(AllocationError::NoResourceAvailable { last: Some(last), .. }) => {
            assert!(last.is_rate_limited());
        }
        other => panic!("Expected NoResourceAvailable, got {:?}", other),
    }

    let status = allocator.resource_status().await;
    assert!(status.values().all(|s| !s.enabled));
    assert!(allocator.rotator().current().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_then_success_on_next_resource() {
    let allocator = ResourceAllocator::new(
        &resources(&[("A", 1, &[]), ("B", 2, &[])]),
        limits(50),
        AllocatorConfig::default(),
    );

    let result = allocator
        .execute(
            |resource| async move {
                if resource == "A" {
                    Err(OperationError::from_status(429, "slow down"))
                } else {
                    Ok(resource)
                }
            },
            &[],
        )
        .await;

    assert_eq!(result.unwrap(), "B");
    assert!(!allocator.resource_status().await["A"].enabled);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_resource_reactivates() {
    let allocator = ResourceAllocator::new(
        &resources(&[("A", 1, &[]), ("B", 2, &[])]),
        limits(50),
        AllocatorConfig::default()
            .with_retry_delay(Duration::from_secs(1))
            .with_reactivation(Duration::from_secs(600)),
    );

    let first = allocator
        .execute(
            |resource| async move {
                if resource == "A" {
                    Err(OperationError::rate_limited("quota exceeded"))
                } else {
                    Ok(resource)
                }
            },
            &[],
        )
        .await;
    assert_eq!(first.unwrap(), "B");

    tokio::time::sleep(Duration::from_secs(601)).await;

    // Reactivated A outranks B again
    let used = Arc::new(Mutex::new(Vec::new()));
    assert_ok!(allocator.execute(recording(used.clone()), &[]).await);
    assert_eq!(*used.lock().unwrap(), vec!["A"]);
}

#[tokio::test(start_paused = true)]
async fn test_capability_mismatch_rotates() {
    let allocator = ResourceAllocator::new(
        &resources(&[
            ("chat-only", 1, &["chat"]),
            ("coder", 2, &["chat", "code_review", "debugging"]),
        ]),
        limits(50),
        AllocatorConfig::default(),
    );
    let used = Arc::new(Mutex::new(Vec::new()));
    let required = vec!["code_review".to_string(), "debugging".to_string()];

    assert_ok!(allocator.execute(recording(used.clone()), &required).await);
    assert_eq!(*used.lock().unwrap(), vec!["coder"]);
}

#[tokio::test(start_paused = true)]
async fn test_no_capable_resource_fails_immediately() {
    let allocator = ResourceAllocator::new(
        &resources(&[("A", 1, &["chat"]), ("B", 2, &["chat"])]),
        limits(50),
        AllocatorConfig::default(),
    );
    let calls = Arc::new(AtomicU32::new(0));
    let required = vec!["vision".to_string()];

    let result: Result<(), _> = allocator
        .execute(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            &required,
        )
        .await;

    match result {
        Err(AllocationError::NoResourceAvailable { required, last }) => {
            assert_eq!(required, vec!["vision"]);
            assert!(last.is_none());
        }
        other => panic!("Expected NoResourceAvailable, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_resources_configured() {
    let allocator = ResourceAllocator::new(&BTreeMap::new(), limits(50), AllocatorConfig::default());
    let result: Result<(), _> = allocator.execute(|_| async { Ok(()) }, &[]).await;
    assert!(matches!(
        result,
        Err(AllocationError::NoResourceAvailable { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_all_throttled_then_next_call_starts_over() {
    let allocator = ResourceAllocator::new(
        &resources(&[("A", 1, &[]), ("B", 2, &[])]),
        limits(1),
        AllocatorConfig::default(),
    );
    let used = Arc::new(Mutex::new(Vec::new()));

    assert_ok!(allocator.execute(recording(used.clone()), &[]).await);
    assert_ok!(allocator.execute(recording(used.clone()), &[]).await);
    assert_err!(allocator.execute(recording(used.clone()), &[]).await);
    assert_eq!(*used.lock().unwrap(), vec!["A", "B"]);

    // Once the minute window rolls over, the next call re-seeds from the top
    tokio::time::advance(Duration::from_secs(60)).await;
    assert_ok!(allocator.execute(recording(used.clone()), &[]).await);
    assert_eq!(used.lock().unwrap().last().map(String::as_str), Some("A"));
}

#[test]
fn test_config_from_retry_section() {
    let config = AllocatorConfig::default();
    assert_eq!(config.max_retries, 3);
    assert_eq!(config.retry_delay, Duration::from_secs(5));
    assert!(config.reactivate_after.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_never_exceed_minute_cap() {
    let allocator = Arc::new(ResourceAllocator::new(
        &resources(&[("A", 1, &[])]),
        limits(1),
        AllocatorConfig::default(),
    ));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let allocator = allocator.clone();
            tokio::spawn(async move {
                allocator
                    .execute(|resource| std::future::ready(Ok::<_, OperationError>(resource)), &[])
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for joined in futures::future::join_all(handles).await {
        match joined.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) => assert!(matches!(err, AllocationError::NoResourceAvailable { .. })),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(allocator.rate_limiter().usage("A").await, (1, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_throttling_rotates_once_per_resource() {
    let allocator = Arc::new(ResourceAllocator::new(
        &resources(&[("A", 1, &[]), ("B", 2, &[]), ("C", 3, &[])]),
        limits(1),
        AllocatorConfig::default(),
    ));
    let used = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let allocator = allocator.clone();
            let used = used.clone();
            tokio::spawn(async move { allocator.execute(recording(used), &[]).await })
        })
        .collect();
    futures::future::join_all(handles).await;

    // Each resource admits exactly one call; none is skipped by a double rotation
    let mut used = used.lock().unwrap().clone();
    used.sort();
    assert_eq!(used, vec!["A", "B", "C"]);
    for name in ["A", "B", "C"] {
        assert_eq!(allocator.rate_limiter().usage(name).await, (1, 1));
    }
}
